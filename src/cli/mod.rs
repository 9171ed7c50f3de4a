pub mod backup;
pub mod categories;
pub mod categorize;
pub mod import;
pub mod init;
pub mod report;
pub mod restore;
pub mod rules;
pub mod status;
pub mod transactions;

use clap::{Parser, Subcommand};
use zeroize::Zeroize;

use crate::error::{BudgyError, Result};
use crate::models::{CategorySelector, TransactionFilter};
use crate::session::Session;
use crate::settings::get_data_dir;

#[derive(Parser)]
#[command(name = "budgy", version, about = "Encrypted transaction ledger and expense categorizer.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up budgy: choose a data directory, set the master password,
    /// and create the encrypted database.
    Init {
        /// Path for budgy data (default: ~/Documents/budgy)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Import a batch of parsed statement records (CSV) and
    /// auto-categorize the newly inserted transactions.
    Import {
        /// Path to a CSV of parsed records: account,type,posted,amount,name,memo,checknum
        file: String,
        /// Abort the whole batch on the first invalid record
        #[arg(long)]
        strict: bool,
        /// Keep the plaintext source instead of encrypting and deleting it
        #[arg(long = "no-archive")]
        no_archive: bool,
    },
    /// Re-run categorization rules over an explicit set of transactions.
    Categorize {
        /// Restrict to one account
        #[arg(long)]
        account: Option<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
        /// Only touch transactions that have no category yet
        #[arg(long = "uncategorized-only")]
        uncategorized_only: bool,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Manage expense categories.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// List transactions.
    Transactions {
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        /// Category name, or 'none' for uncategorized
        #[arg(long)]
        category: Option<String>,
    },
    /// Manually assign a category to one transaction.
    Assign {
        /// Transaction id prefix (shown in `budgy transactions`)
        fitid: String,
        /// Category name, or 'none' to clear
        #[arg(long)]
        category: String,
    },
    /// Spending reports.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Back up the encrypted database.
    Backup {
        /// Output path (default: <data_dir>/backups/budgy-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
    /// Decrypt an archived statement back to plaintext.
    Restore {
        /// Path to a .bgy archive
        archive: String,
        /// Directory to restore into (default: current directory)
        #[arg(long = "output-dir")]
        output_dir: Option<String>,
    },
    /// Show the current database and summary statistics.
    Status,
    /// Generate shell completions.
    Completions {
        /// Shell: bash, zsh, fish, ...
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Substring to match, case-insensitive
        pattern: String,
        /// Category name to assign
        #[arg(long)]
        category: String,
        /// Field to match against: name, memo
        #[arg(long, default_value = "name")]
        field: String,
        /// Rule priority (lower wins)
        #[arg(long, default_value = "100")]
        priority: i64,
    },
    /// List rules in evaluation order.
    List,
    /// Delete a rule.
    Delete {
        /// Rule ID (shown in `budgy rules list`)
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// Add a category.
    Add {
        name: String,
        /// Expense type: not-expense, one-time, recurring
        #[arg(long = "type", default_value = "recurring")]
        expense_type: String,
    },
    /// List categories.
    List,
    /// Change a category's expense type.
    SetType {
        id: i64,
        /// Expense type: not-expense, one-time, recurring
        expense_type: String,
    },
    /// Delete a category.
    Delete {
        id: i64,
        /// Move its transactions to uncategorized and drop its rules
        #[arg(long)]
        reassign: bool,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Retirement-relevant spending by month.
    Monthly,
    /// Spending totals by category.
    Categories {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

/// Resolve the master password: environment first (scripting, tests),
/// then the OS keychain when built with the keyring feature, then an
/// interactive prompt.
pub(crate) fn master_password(confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var("BUDGY_MASTER_PASSWORD") {
        if !password.is_empty() {
            return Ok(password);
        }
    }

    #[cfg(feature = "keyring")]
    {
        if let Ok(entry) = keyring::Entry::new("budgy", "master") {
            if let Ok(password) = entry.get_password() {
                return Ok(password);
            }
        }
    }

    let password = rpassword::prompt_password("Master password: ")
        .map_err(|e| BudgyError::Other(format!("could not read password: {e}")))?;
    if password.len() < 8 {
        return Err(BudgyError::Other(
            "password must be at least 8 characters".to_string(),
        ));
    }
    if confirm {
        let again = rpassword::prompt_password("Confirm master password: ")
            .map_err(|e| BudgyError::Other(format!("could not read password: {e}")))?;
        if again != password {
            return Err(BudgyError::Other("passwords do not match".to_string()));
        }
    }
    Ok(password)
}

pub(crate) fn open_session() -> Result<Session> {
    let mut password = master_password(false)?;
    let session = Session::open(&get_data_dir(), &password);
    password.zeroize();
    session
}

/// Expand a bare date into an inclusive posted-timestamp bound.
fn day_bound(value: &str, end: bool) -> String {
    if value.len() == 10 {
        if end {
            format!("{value} 23:59:59")
        } else {
            format!("{value} 00:00:00")
        }
    } else {
        value.to_string()
    }
}

pub(crate) fn build_filter(
    conn: &rusqlite::Connection,
    account: Option<String>,
    from: Option<String>,
    to: Option<String>,
    category: Option<String>,
) -> Result<TransactionFilter> {
    let category = match category.as_deref() {
        None => None,
        Some("none") | Some("uncategorized") => Some(CategorySelector::Uncategorized),
        Some(name) => Some(CategorySelector::Id(crate::db::category_id_by_name(conn, name)?)),
    };
    Ok(TransactionFilter {
        account,
        from: from.as_deref().map(|v| day_bound(v, false)),
        to: to.as_deref().map(|v| day_bound(v, true)),
        category,
    })
}
