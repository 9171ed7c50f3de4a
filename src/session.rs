use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::archive;
use crate::db;
use crate::error::{BudgyError, Result};
use crate::ingest;
use crate::keys::{self, EncryptionContext};
use crate::models::{ImportSummary, RawRecord};

pub const DB_FILE: &str = "budgy.db";
pub const KEY_FILE: &str = "budgy.key.json";
pub const LOCK_FILE: &str = "budgy.db.lock";
pub const ARCHIVE_DIR: &str = "archives";

/// Advisory single-writer lock. Held for the session lifetime; the file
/// is removed on drop.
struct SessionLock {
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn pid_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{pid}")).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        true
    }
}

fn acquire_lock(data_dir: &Path) -> Result<SessionLock> {
    let path = data_dir.join(LOCK_FILE);
    for attempt in 0..2 {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                return Ok(SessionLock { path });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder: Option<u32> = std::fs::read_to_string(&path)
                    .ok()
                    .and_then(|s| s.trim().parse().ok());
                match holder {
                    Some(pid) if !pid_alive(pid) && attempt == 0 => {
                        tracing::warn!(pid, "reclaiming lock from dead process");
                        std::fs::remove_file(&path)?;
                    }
                    _ => {
                        return Err(BudgyError::Locked(format!(
                            "{} (pid {})",
                            path.display(),
                            holder.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                        )));
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(BudgyError::Locked(path.display().to_string()))
}

/// One authenticated, single-writer session against an installation's
/// encrypted store. All ingestion, categorization, query, and archival
/// operations run through a session; closing it releases the lock and
/// zeroes the key material.
pub struct Session {
    conn: Connection,
    ctx: EncryptionContext,
    data_dir: PathBuf,
    _lock: SessionLock,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open or initialize an installation. Key verification happens
    /// before the database file is touched; a wrong password fails with
    /// `Authentication` and no data access.
    pub fn open(data_dir: &Path, master_password: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let key_path = data_dir.join(KEY_FILE);
        let ctx = if key_path.exists() {
            keys::unlock(&key_path, master_password)?
        } else {
            keys::create_key_file(&key_path, master_password)?
        };

        let lock = acquire_lock(data_dir)?;

        let mut conn = db::open_connection(&data_dir.join(DB_FILE), ctx.db_key())?;
        db::migrate(&mut conn)?;

        let session = Self {
            conn,
            ctx,
            data_dir: data_dir.to_path_buf(),
            _lock: lock,
        };

        // Recover archives queued before a crash between commit and
        // archival.
        let resumed = archive::resume_pending(&session.conn, &session.ctx, &session.archive_dir())?;
        if resumed > 0 {
            tracing::info!(resumed, "archived statements left pending by a previous session");
        }

        Ok(session)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_DIR)
    }

    /// Merge a batch of externally-parsed records; see `ingest::ingest_batch`.
    pub fn ingest(
        &mut self,
        records: &[RawRecord],
        source: Option<&Path>,
        strict: bool,
    ) -> Result<ImportSummary> {
        ingest::ingest_batch(&mut self.conn, records, source, strict)
    }

    /// Encrypt an imported statement and drop it from the pending queue.
    /// Runs after the batch commit, independent of the transactional path.
    pub fn archive_source(&self, source: &Path) -> Result<PathBuf> {
        let dest = archive::archive_file(&self.ctx, source, &self.archive_dir())?;
        db::dequeue_archive(&self.conn, &source.to_string_lossy())?;
        Ok(dest)
    }

    pub fn restore_archive(&self, archive_path: &Path, dest_dir: &Path) -> Result<PathBuf> {
        archive::restore_file(&self.ctx, archive_path, dest_dir)
    }

    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        db::backup_to(&self.conn, dest, self.ctx.db_key())
    }

    /// Release the lock and zero key material.
    pub fn close(self) -> Result<()> {
        let Self { conn, ctx, _lock, .. } = self;
        conn.close().map_err(|(_, e)| BudgyError::Db(e))?;
        drop(ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{derive, KdfParams, KeyFile, SALT_LEN};

    /// Pre-seed a key file with cheap KDF parameters so tests don't pay
    /// the interactive Argon2 cost.
    fn seed_key_file(data_dir: &Path, password: &str) {
        std::fs::create_dir_all(data_dir).unwrap();
        let params = KdfParams { memory_kib: 8, iterations: 1, parallelism: 1 };
        let salt = [3u8; SALT_LEN];
        let ctx = derive(password, &salt, &params).unwrap();

        // Re-derive the verifier the same way keys::create_key_file does.
        use hmac::{Hmac, Mac};
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(ctx.db_key()).unwrap();
        mac.update(b"budgy key verifier v1");
        let verifier = hex::encode(mac.finalize().into_bytes());

        let key_file = KeyFile {
            version: 1,
            salt: hex::encode(salt),
            params,
            verifier,
        };
        std::fs::write(
            data_dir.join(KEY_FILE),
            serde_json::to_string(&key_file).unwrap(),
        )
        .unwrap();
    }

    fn raw_record(posted: &str, amount: &str, name: &str) -> RawRecord {
        RawRecord {
            account: "chk-1".to_string(),
            kind: "checking".to_string(),
            posted: posted.to_string(),
            amount: amount.to_string(),
            name: name.to_string(),
            memo: None,
            checknum: None,
        }
    }

    #[test]
    fn test_wrong_password_fails_before_data_access() {
        let dir = tempfile::tempdir().unwrap();
        seed_key_file(dir.path(), "right password");

        let session = Session::open(dir.path(), "right password").unwrap();
        session.close().unwrap();

        match Session::open(dir.path(), "wrong password") {
            Err(BudgyError::Authentication) => {}
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[test]
    fn test_second_session_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        seed_key_file(dir.path(), "pw12345678");

        let first = Session::open(dir.path(), "pw12345678").unwrap();
        match Session::open(dir.path(), "pw12345678") {
            Err(BudgyError::Locked(_)) => {}
            other => panic!("expected Locked, got {other:?}"),
        }
        first.close().unwrap();

        // Lock released; a new session opens cleanly.
        Session::open(dir.path(), "pw12345678").unwrap().close().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        seed_key_file(dir.path(), "pw12345678");
        // No such pid on a live system.
        std::fs::write(dir.path().join(LOCK_FILE), "999999999\n").unwrap();

        Session::open(dir.path(), "pw12345678").unwrap().close().unwrap();
    }

    #[test]
    fn test_ingest_and_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        seed_key_file(dir.path(), "pw12345678");

        let mut session = Session::open(dir.path(), "pw12345678").unwrap();
        let summary = session
            .ingest(&[raw_record("2025-01-15", "-42.00", "GAS STATION")], None, false)
            .unwrap();
        assert_eq!(summary.inserted, 1);
        session.close().unwrap();

        let session = Session::open(dir.path(), "pw12345678").unwrap();
        assert_eq!(db::count_transactions(session.conn()).unwrap(), 1);
        session.close().unwrap();
    }

    #[test]
    fn test_pending_archive_resumed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        seed_key_file(dir.path(), "pw12345678");

        let source = dir.path().join("statement.csv");
        std::fs::write(
            &source,
            "account,type,posted,amount,name,memo,checknum\n\
             chk-1,checking,2025-01-15,-42.00,GAS STATION,,\n",
        )
        .unwrap();

        let mut session = Session::open(dir.path(), "pw12345678").unwrap();
        let records = ingest::read_records_csv(&source).unwrap();
        session.ingest(&records, Some(&source), false).unwrap();
        // Simulate a crash: close without archiving.
        session.close().unwrap();
        assert!(source.exists());

        let session = Session::open(dir.path(), "pw12345678").unwrap();
        assert!(!source.exists(), "pending archive must run at session open");
        assert!(db::list_pending_archives(session.conn()).unwrap().is_empty());
        assert!(session.archive_dir().join("statement.csv.bgy").exists());
        session.close().unwrap();
    }
}
