use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgyError {
    #[error("Authentication failed: wrong master password")]
    Authentication,

    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("Transaction {fitid}: immutable field '{field}' differs from stored row")]
    DataIntegrity { fitid: String, field: &'static str },

    #[error("Referential integrity: {0}")]
    ReferentialIntegrity(String),

    #[error("Archive integrity: {0}")]
    ArchiveIntegrity(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Another session holds the lock: {0}")]
    Locked(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BudgyError>;
