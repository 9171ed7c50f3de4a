use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::categorizer::categorize_new;
use crate::db;
use crate::error::{BudgyError, Result};
use crate::models::{ImportSummary, RawRecord, RecordError, Transaction, UpsertOutcome};

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Collapse whitespace and casing so cosmetic differences between repeated
/// exports of the same statement do not change a record's identity.
pub fn normalize_identity(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

pub fn canonical_account(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Parse a raw amount string into signed fixed-point cents. Accepts the
/// usual bank-export decorations: currency symbol, thousands separators,
/// quotes, parenthesized negatives. Rejects more than two decimal places.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let mut s = s.trim();

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.trim();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }
    if s.is_empty() {
        return None;
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if frac_part.len() > 2 || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let dollars: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse().ok()?,
    };
    let total = dollars.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}

const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonicalize a posted timestamp. Institutions vary between RFC 3339,
/// space-separated, OFX compact, and bare-date forms.
pub fn canonical_posted(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, CANONICAL_FORMAT) {
        return Some(dt.format(CANONICAL_FORMAT).to_string());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc().format(CANONICAL_FORMAT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.format(CANONICAL_FORMAT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S") {
        return Some(dt.format(CANONICAL_FORMAT).to_string());
    }
    for fmt in ["%Y-%m-%d", "%Y%m%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d.and_time(chrono::NaiveTime::MIN).format(CANONICAL_FORMAT).to_string());
        }
    }
    None
}

/// Content identity: account + posted + amount + normalized name/memo.
/// Stable across re-exports, unique per account because the account
/// participates in the hash.
pub fn compute_fitid(
    account: &str,
    posted: &str,
    amount: i64,
    name: &str,
    memo: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(b"|");
    hasher.update(posted.as_bytes());
    hasher.update(b"|");
    hasher.update(amount.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_identity(name).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_identity(memo.unwrap_or("")).as_bytes());
    hex::encode(hasher.finalize())
}

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Validate and normalize one raw record into a storable transaction.
fn normalize_record(record: &RawRecord, index: usize) -> std::result::Result<Transaction, RecordError> {
    let fail = |message: String| RecordError { index, message };

    let account = canonical_account(&record.account);
    if account.is_empty() {
        return Err(fail("missing account".to_string()));
    }

    let kind = record.kind.trim().to_lowercase();
    if kind != "checking" && kind != "credit" {
        return Err(fail(format!("unknown account type '{}'", record.kind)));
    }

    let posted = canonical_posted(&record.posted)
        .ok_or_else(|| fail(format!("unparsable posted timestamp '{}'", record.posted)))?;

    let raw_amount = record.amount.trim();
    if raw_amount.is_empty() {
        return Err(fail("missing amount".to_string()));
    }
    let amount = parse_amount_cents(raw_amount)
        .ok_or_else(|| fail(format!("unparsable amount '{raw_amount}'")))?;

    let name = record.name.trim().to_string();
    if name.is_empty() {
        return Err(fail("missing name".to_string()));
    }

    let memo = non_empty(record.memo.as_deref());
    let checknum = non_empty(record.checknum.as_deref());
    let fitid = compute_fitid(&account, &posted, amount, &name, memo.as_deref());

    Ok(Transaction {
        fitid,
        account,
        kind,
        posted,
        amount,
        name,
        memo,
        checknum,
        category_id: None,
    })
}

// ---------------------------------------------------------------------------
// Batch ingestion
// ---------------------------------------------------------------------------

/// Read a batch of externally-parsed OFX records from CSV
/// (columns: account,type,posted,amount,name,memo,checknum).
pub fn read_records_csv(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(std::io::BufReader::new(file));
    let mut records = Vec::new();
    for row in rdr.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Merge a batch of raw records into the store inside one transaction.
///
/// Per-record validation failures and immutable-field conflicts are
/// recorded in the summary and skipped; in strict mode any of them aborts
/// the whole batch before/without committing. Duplicates are counted, not
/// failures. After commit, categorization runs over the newly inserted
/// rows only, so prior manual edits survive re-imports.
pub fn ingest_batch(
    conn: &mut Connection,
    records: &[RawRecord],
    source: Option<&Path>,
    strict: bool,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut valid = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match normalize_record(record, index) {
            Ok(txn) => valid.push((index, txn)),
            Err(err) => summary.errors.push(err),
        }
    }

    if strict {
        if let Some(first) = summary.errors.first() {
            return Err(BudgyError::Validation(format!(
                "record {}: {} (strict mode, batch aborted)",
                first.index, first.message
            )));
        }
    }

    let checksum = match source {
        Some(path) => Some(compute_checksum(path)?),
        None => None,
    };

    let mut new_fitids = Vec::new();
    let tx = conn.transaction()?;
    for (index, txn) in &valid {
        match db::upsert_transaction(&tx, txn) {
            Ok(UpsertOutcome::Inserted) => {
                summary.inserted += 1;
                new_fitids.push(txn.fitid.clone());
            }
            Ok(UpsertOutcome::Duplicate) => summary.duplicates += 1,
            Err(BudgyError::DataIntegrity { fitid, field }) => {
                if strict {
                    return Err(BudgyError::DataIntegrity { fitid, field });
                }
                summary.errors.push(RecordError {
                    index: *index,
                    message: format!("immutable field '{field}' differs from stored {fitid}"),
                });
            }
            Err(other) => return Err(other),
        }
    }

    let filename = source.and_then(|p| p.file_name()).and_then(|n| n.to_str());
    db::record_import(
        &tx,
        filename,
        records.len(),
        summary.inserted,
        summary.duplicates,
        summary.errors.len(),
        checksum.as_deref(),
    )?;
    if let (Some(path), Some(hash)) = (source, checksum.as_deref()) {
        db::enqueue_archive(&tx, &path.to_string_lossy(), hash)?;
    }
    tx.commit()?;

    summary.categorized = categorize_new(conn, &new_fitids)?;
    tracing::info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        errors = summary.errors.len(),
        categorized = summary.categorized,
        "ingested batch"
    );
    Ok(summary)
}
