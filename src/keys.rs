use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{BudgyError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SALT_LEN: usize = 32;
const KEY_LEN: usize = 32;

const DB_CONTEXT: &[u8] = b"budgy/db";
const ARCHIVE_CONTEXT: &[u8] = b"budgy/archive";
const VERIFIER_CONTEXT: &[u8] = b"budgy key verifier v1";

/// Session keys derived from the master password. Held in memory only,
/// zeroed when the session ends.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionContext {
    db_key: [u8; KEY_LEN],
    archive_key: [u8; KEY_LEN],
}

impl EncryptionContext {
    pub fn db_key(&self) -> &[u8; KEY_LEN] {
        &self.db_key
    }

    pub fn archive_key(&self) -> &[u8; KEY_LEN] {
        &self.archive_key
    }
}

/// Argon2id cost parameters. Defaults match the recommended interactive
/// profile: 64 MiB, 3 iterations, 4 lanes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Plaintext sidecar stored next to the database. The salt and verifier
/// token are not secret; the verifier lets a wrong password fail before
/// the database file is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub salt: String,
    pub params: KdfParams,
    pub verifier: String,
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Stretch the master password into a base key, then expand two
/// domain-separated sub-keys so neither reveals the other.
pub fn derive(master_password: &str, salt: &[u8], params: &KdfParams) -> Result<EncryptionContext> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| BudgyError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut base = [0u8; KEY_LEN];
    argon2
        .hash_password_into(master_password.as_bytes(), salt, &mut base)
        .map_err(|e| BudgyError::KeyDerivation(e.to_string()))?;

    let ctx = EncryptionContext {
        db_key: subkey(&base, DB_CONTEXT),
        archive_key: subkey(&base, ARCHIVE_CONTEXT),
    };
    base.zeroize();
    Ok(ctx)
}

fn subkey(base: &[u8; KEY_LEN], context: &[u8]) -> [u8; KEY_LEN] {
    let mut mac = HmacSha256::new_from_slice(base).expect("HMAC accepts any key length");
    mac.update(context);
    let digest = mac.finalize().into_bytes();
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest);
    key
}

fn verifier_token(ctx: &EncryptionContext) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(ctx.db_key()).expect("HMAC accepts any key length");
    mac.update(VERIFIER_CONTEXT);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time check of the derived keys against the stored verifier.
pub fn verify(ctx: &EncryptionContext, key_file: &KeyFile) -> Result<()> {
    let expected = hex::decode(&key_file.verifier)
        .map_err(|e| BudgyError::Crypto(format!("bad verifier encoding: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(ctx.db_key()).expect("HMAC accepts any key length");
    mac.update(VERIFIER_CONTEXT);
    mac.verify_slice(&expected)
        .map_err(|_| BudgyError::Authentication)
}

pub fn load_key_file(path: &Path) -> Result<KeyFile> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| BudgyError::Crypto(format!("unreadable key file {}: {e}", path.display())))
}

/// First-run setup: generate a salt, derive keys, persist the sidecar with
/// restrictive permissions. Returns the derived context.
pub fn create_key_file(path: &Path, master_password: &str) -> Result<EncryptionContext> {
    let salt = generate_salt();
    let params = KdfParams::default();
    let ctx = derive(master_password, &salt, &params)?;
    let key_file = KeyFile {
        version: 1,
        salt: hex::encode(salt),
        params,
        verifier: hex::encode(verifier_token(&ctx)),
    };
    let json = serde_json::to_string_pretty(&key_file)
        .map_err(|e| BudgyError::Crypto(e.to_string()))?;
    std::fs::write(path, format!("{json}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    tracing::info!(path = %path.display(), "created key file");
    Ok(ctx)
}

/// Open an installation's keys: load the sidecar, derive, and verify.
/// Fails with `Authentication` before any database access on mismatch.
pub fn unlock(path: &Path, master_password: &str) -> Result<EncryptionContext> {
    let key_file = load_key_file(path)?;
    let salt = hex::decode(&key_file.salt)
        .map_err(|e| BudgyError::Crypto(format!("bad salt encoding: {e}")))?;
    if salt.len() < 16 {
        return Err(BudgyError::Crypto("salt too short".to_string()));
    }
    let ctx = derive(master_password, &salt, &key_file.params)?;
    verify(&ctx, &key_file)?;
    Ok(ctx)
}
