use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::{rngs::OsRng, RngCore};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::db;
use crate::error::{BudgyError, Result};
use crate::keys::EncryptionContext;

const MAGIC: &[u8; 4] = b"BGY1";
const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HASH_LEN: usize = 32;

pub const ARCHIVE_EXT: &str = "bgy";

fn content_hash(data: &[u8]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Header layout: magic, version, nonce, filename length + filename,
/// plaintext content hash. The whole header doubles as the GCM associated
/// data, so tampering with the plaintext metadata fails authentication.
fn build_header(nonce: &[u8; NONCE_LEN], filename: &str, hash: &[u8; HASH_LEN]) -> Result<Vec<u8>> {
    let name_bytes = filename.as_bytes();
    if name_bytes.len() > u16::MAX as usize {
        return Err(BudgyError::Validation("source filename too long".to_string()));
    }
    let mut header = Vec::with_capacity(4 + 1 + NONCE_LEN + 2 + name_bytes.len() + HASH_LEN);
    header.extend_from_slice(MAGIC);
    header.push(VERSION);
    header.extend_from_slice(nonce);
    header.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    header.extend_from_slice(name_bytes);
    header.extend_from_slice(hash);
    Ok(header)
}

struct ParsedHeader {
    header: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    filename: String,
    hash: [u8; HASH_LEN],
    body_offset: usize,
}

fn parse_header(data: &[u8]) -> Result<ParsedHeader> {
    let corrupt = |what: &str| BudgyError::ArchiveIntegrity(format!("malformed archive: {what}"));

    let fixed = 4 + 1 + NONCE_LEN + 2;
    if data.len() < fixed {
        return Err(corrupt("truncated header"));
    }
    if &data[..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    if data[4] != VERSION {
        return Err(BudgyError::ArchiveIntegrity(format!(
            "unsupported archive version {}",
            data[4]
        )));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[5..5 + NONCE_LEN]);
    let name_len = u16::from_be_bytes([data[fixed - 2], data[fixed - 1]]) as usize;
    let body_offset = fixed + name_len + HASH_LEN;
    if data.len() < body_offset {
        return Err(corrupt("truncated metadata"));
    }
    let filename = std::str::from_utf8(&data[fixed..fixed + name_len])
        .map_err(|_| corrupt("filename is not UTF-8"))?
        .to_string();
    let mut hash = [0u8; HASH_LEN];
    hash.copy_from_slice(&data[fixed + name_len..body_offset]);

    Ok(ParsedHeader {
        header: data[..body_offset].to_vec(),
        nonce,
        filename,
        hash,
        body_offset,
    })
}

fn cipher(ctx: &EncryptionContext) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(ctx.archive_key())
        .map_err(|e| BudgyError::Crypto(format!("bad archive key: {e}")))
}

/// Encrypt `content` into the archive container format.
pub fn seal(ctx: &EncryptionContext, filename: &str, content: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let header = build_header(&nonce_bytes, filename, &content_hash(content))?;

    let ciphertext = cipher(ctx)?
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: content, aad: &header },
        )
        .map_err(|e| BudgyError::Crypto(format!("encryption failed: {e}")))?;

    let mut out = header;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an archive container, verifying the authentication tag and the
/// stored content hash. Any tamper or corruption fails, never returns
/// partial plaintext.
pub fn open(ctx: &EncryptionContext, data: &[u8]) -> Result<(String, Vec<u8>)> {
    let parsed = parse_header(data)?;
    let content = cipher(ctx)?
        .decrypt(
            Nonce::from_slice(&parsed.nonce),
            Payload { msg: &data[parsed.body_offset..], aad: &parsed.header },
        )
        .map_err(|_| {
            BudgyError::ArchiveIntegrity("authentication failed (tampered or wrong key)".to_string())
        })?;
    if content_hash(&content) != parsed.hash {
        return Err(BudgyError::ArchiveIntegrity("content hash mismatch".to_string()));
    }
    Ok((parsed.filename, content))
}

fn unique_archive_path(archive_dir: &Path, filename: &str) -> PathBuf {
    let base = archive_dir.join(format!("{filename}.{ARCHIVE_EXT}"));
    if !base.exists() {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = archive_dir.join(format!("{filename}.{n}.{ARCHIVE_EXT}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Best-effort secure delete: overwrite with random bytes and sync before
/// unlinking. The overwrite can fail on exotic filesystems; the unlink
/// must not. Only removal from the filesystem namespace is guaranteed.
fn secure_delete(path: &Path) -> Result<()> {
    let overwrite = || -> std::io::Result<()> {
        use std::io::Write;
        let len = std::fs::metadata(path)?.len() as usize;
        let mut random = vec![0u8; len];
        OsRng.fill_bytes(&mut random);
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.write_all(&random)?;
        file.flush()?;
        file.sync_all()
    };
    if let Err(e) = overwrite() {
        tracing::warn!(path = %path.display(), error = %e, "secure overwrite failed, plain unlink");
    }
    std::fs::remove_file(path)?;
    Ok(())
}

/// Encrypt a source statement into the archive directory, verify the
/// written archive by reading it back, then delete the plaintext original.
/// Any failure before the verify leaves the plaintext untouched.
pub fn archive_file(
    ctx: &EncryptionContext,
    source: &Path,
    archive_dir: &Path,
) -> Result<PathBuf> {
    let filename = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BudgyError::Validation(format!("bad source path: {}", source.display())))?
        .to_string();
    let content = std::fs::read(source)?;

    std::fs::create_dir_all(archive_dir)?;
    let dest = unique_archive_path(archive_dir, &filename);
    let sealed = seal(ctx, &filename, &content)?;
    std::fs::write(&dest, &sealed)?;

    // Verifying read-back before the plaintext goes away.
    let verify = std::fs::read(&dest)
        .map_err(BudgyError::from)
        .and_then(|data| open(ctx, &data));
    match verify {
        Ok((_, roundtrip)) if roundtrip == content => {}
        other => {
            let _ = std::fs::remove_file(&dest);
            return match other {
                Err(e) => Err(e),
                Ok(_) => Err(BudgyError::ArchiveIntegrity(
                    "read-back verification mismatch".to_string(),
                )),
            };
        }
    }

    secure_delete(source)?;
    tracing::info!(source = %source.display(), archive = %dest.display(), "archived statement");
    Ok(dest)
}

/// Decrypt an archive next to its recorded original filename.
pub fn restore_file(ctx: &EncryptionContext, archive: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let data = std::fs::read(archive)?;
    let (filename, content) = open(ctx, &data)?;
    std::fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.join(&filename);
    if dest.exists() {
        return Err(BudgyError::Other(format!(
            "refusing to overwrite existing file {}",
            dest.display()
        )));
    }
    std::fs::write(&dest, &content)?;
    Ok(dest)
}

/// Retry archives queued before a crash. Sources that no longer exist are
/// dropped from the queue: their plaintext is already out of the
/// filesystem namespace.
pub fn resume_pending(
    conn: &Connection,
    ctx: &EncryptionContext,
    archive_dir: &Path,
) -> Result<usize> {
    let pending = db::list_pending_archives(conn)?;
    let mut archived = 0usize;
    for (source_path, queued_hash) in pending {
        let source = Path::new(&source_path);
        if !source.exists() {
            tracing::debug!(source = %source_path, "pending archive source gone, dropping");
            db::dequeue_archive(conn, &source_path)?;
            continue;
        }
        let current_hash = crate::ingest::compute_checksum(source)?;
        if current_hash != queued_hash {
            tracing::warn!(source = %source_path, "source changed since import, archiving current content");
        }
        archive_file(ctx, source, archive_dir)?;
        db::dequeue_archive(conn, &source_path)?;
        archived += 1;
    }
    Ok(archived)
}
