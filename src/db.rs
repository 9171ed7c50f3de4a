use std::path::Path;

use rusqlite::types::Value;
use rusqlite::Connection;
use zeroize::Zeroize;

use crate::error::{BudgyError, Result};
use crate::ingest::normalize_identity;
use crate::models::{
    Category, CategorySelector, CategoryTotal, ExpenseType, Rule, TargetField, Transaction,
    TransactionFilter, UpsertOutcome,
};

/// Version the running code understands. A database reporting a higher
/// version was written by newer code and must not be touched.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    expense_type INTEGER NOT NULL DEFAULT 2,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS transactions (
    fitid TEXT PRIMARY KEY,
    account TEXT NOT NULL,
    type TEXT NOT NULL,
    posted TEXT NOT NULL,
    amount INTEGER NOT NULL,
    name TEXT NOT NULL,
    memo TEXT,
    checknum TEXT,
    category_id INTEGER REFERENCES categories(id),
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS txn_order ON transactions (posted, fitid);
CREATE INDEX IF NOT EXISTS txn_account ON transactions (account);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY,
    pattern TEXT NOT NULL,
    target_field TEXT NOT NULL DEFAULT 'name',
    category_id INTEGER NOT NULL REFERENCES categories(id),
    priority INTEGER NOT NULL DEFAULT 100,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT,
    record_count INTEGER NOT NULL,
    inserted INTEGER NOT NULL,
    duplicates INTEGER NOT NULL,
    errors INTEGER NOT NULL,
    checksum TEXT,
    imported_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS pending_archives (
    id INTEGER PRIMARY KEY,
    source_path TEXT NOT NULL UNIQUE,
    content_sha256 TEXT NOT NULL,
    queued_at TEXT DEFAULT (datetime('now'))
);
";

/// Forward-only migration steps; entry N targets schema version N+1.
/// Each step must be idempotent.
const MIGRATIONS: &[&str] = &[SCHEMA];

// (name, expense_type) seeded on first open. Uncategorized is represented
// by a NULL category_id, not a seeded row.
const DEFAULT_CATEGORIES: &[(&str, ExpenseType)] = &[
    ("Expense", ExpenseType::Recurring),
    ("Auto", ExpenseType::Recurring),
    ("Auto Purchase", ExpenseType::OneTime),
    ("Cash Withdrawal", ExpenseType::Recurring),
    ("Clothing", ExpenseType::Recurring),
    ("Education", ExpenseType::OneTime),
    ("Entertainment", ExpenseType::Recurring),
    ("Dining", ExpenseType::Recurring),
    ("Groceries / Food", ExpenseType::Recurring),
    ("Household", ExpenseType::Recurring),
    ("Rent / Mortgage", ExpenseType::Recurring),
    ("Home Remodel", ExpenseType::OneTime),
    ("Insurance", ExpenseType::Recurring),
    ("Medical", ExpenseType::Recurring),
    ("Postage / Shipping", ExpenseType::Recurring),
    ("Recreation", ExpenseType::Recurring),
    ("Rideshare", ExpenseType::Recurring),
    ("Shopping", ExpenseType::Recurring),
    ("Taxes", ExpenseType::OneTime),
    ("Travel", ExpenseType::Recurring),
    ("Utilities", ExpenseType::Recurring),
    ("Work Expense", ExpenseType::Recurring),
    ("Income", ExpenseType::NotExpense),
    ("Savings", ExpenseType::NotExpense),
    ("Transfer", ExpenseType::NotExpense),
];

/// Open the SQLCipher database with a raw key and verify it decrypts.
/// The first read of sqlite_master fails on a key mismatch; that failure
/// surfaces as `Authentication` before any data access.
pub fn open_connection(db_path: &Path, db_key: &[u8; 32]) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    let mut key_pragma = format!("PRAGMA key = \"x'{}'\";", hex::encode(db_key));
    let applied = conn.execute_batch(&key_pragma);
    key_pragma.zeroize();
    applied?;

    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(|_| BudgyError::Authentication)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([name])?)
}

pub fn schema_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, "meta")? {
        return Ok(0);
    }
    let version: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Create or upgrade the schema. Forward-only: a database newer than the
/// running code is rejected untouched.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(BudgyError::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (i, step) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i64;
        if version <= current {
            continue;
        }
        tracing::info!(version, "applying schema migration");
        tx.execute_batch(step)?;
        if version == 1 {
            seed_categories(&tx)?;
        }
    }
    tx.execute(
        "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

fn seed_categories(conn: &Connection) -> Result<()> {
    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(());
    }
    for (name, expense_type) in DEFAULT_CATEGORIES {
        conn.execute(
            "INSERT INTO categories (name, expense_type) VALUES (?1, ?2)",
            rusqlite::params![name, expense_type.as_i64()],
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Insert a transaction or detect a re-import of the same content.
/// Financial fields are immutable once stored: a fitid collision with a
/// differing payload is corruption, not an update. `category_id` is the
/// only mutable field and is never overwritten here.
pub fn upsert_transaction(conn: &Connection, txn: &Transaction) -> Result<UpsertOutcome> {
    let existing = conn
        .query_row(
            "SELECT account, type, posted, amount, name, memo, checknum
             FROM transactions WHERE fitid = ?1",
            [&txn.fitid],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some((account, kind, posted, amount, name, memo, checknum)) = existing else {
        conn.execute(
            "INSERT INTO transactions (fitid, account, type, posted, amount, name, memo, checknum, category_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                txn.fitid,
                txn.account,
                txn.kind,
                txn.posted,
                txn.amount,
                txn.name,
                txn.memo,
                txn.checknum,
                txn.category_id,
            ],
        )?;
        return Ok(UpsertOutcome::Inserted);
    };

    let mismatch = |field: &'static str| BudgyError::DataIntegrity {
        fitid: txn.fitid.clone(),
        field,
    };
    if account != txn.account {
        return Err(mismatch("account"));
    }
    if kind != txn.kind {
        return Err(mismatch("type"));
    }
    if posted != txn.posted {
        return Err(mismatch("posted"));
    }
    if amount != txn.amount {
        return Err(mismatch("amount"));
    }
    // Name and memo participate in identity in normalized form; compare
    // the same way so cosmetic reformatting still counts as a duplicate.
    if normalize_identity(&name) != normalize_identity(&txn.name) {
        return Err(mismatch("name"));
    }
    let norm_memo = |m: &Option<String>| m.as_deref().map(normalize_identity);
    if norm_memo(&memo) != norm_memo(&txn.memo) {
        return Err(mismatch("memo"));
    }
    let trim = |c: &Option<String>| c.as_deref().map(str::trim).map(str::to_string);
    if trim(&checknum) != trim(&txn.checknum) {
        return Err(mismatch("checknum"));
    }

    Ok(UpsertOutcome::Duplicate)
}

fn txn_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        fitid: row.get(0)?,
        account: row.get(1)?,
        kind: row.get(2)?,
        posted: row.get(3)?,
        amount: row.get(4)?,
        name: row.get(5)?,
        memo: row.get(6)?,
        checknum: row.get(7)?,
        category_id: row.get(8)?,
    })
}

pub fn get_transaction(conn: &Connection, fitid: &str) -> Result<Option<Transaction>> {
    conn.query_row(
        "SELECT fitid, account, type, posted, amount, name, memo, checknum, category_id
         FROM transactions WHERE fitid = ?1",
        [fitid],
        txn_from_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

/// Stable listing order: (posted, fitid).
pub fn list_transactions(conn: &Connection, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
    let mut sql = String::from(
        "SELECT fitid, account, type, posted, amount, name, memo, checknum, category_id
         FROM transactions",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(account) = &filter.account {
        clauses.push("account = ?");
        params.push(Value::Text(account.trim().to_uppercase()));
    }
    if let Some(from) = &filter.from {
        clauses.push("posted >= ?");
        params.push(Value::Text(from.clone()));
    }
    if let Some(to) = &filter.to {
        clauses.push("posted <= ?");
        params.push(Value::Text(to.clone()));
    }
    match filter.category {
        Some(CategorySelector::Id(id)) => {
            clauses.push("category_id = ?");
            params.push(Value::Integer(id));
        }
        Some(CategorySelector::Uncategorized) => clauses.push("category_id IS NULL"),
        None => {}
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY posted, fitid");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), txn_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM transactions", [], |row| row.get(0))?)
}

/// Resolve a fitid prefix (as shown in listings) to the full identity.
pub fn resolve_fitid(conn: &Connection, prefix: &str) -> Result<String> {
    let mut stmt =
        conn.prepare("SELECT fitid FROM transactions WHERE fitid LIKE ?1 || '%' LIMIT 2")?;
    let matches: Vec<String> = stmt
        .query_map([prefix], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match matches.as_slice() {
        [fitid] => Ok(fitid.clone()),
        [] => Err(BudgyError::Other(format!("no transaction matches '{prefix}'"))),
        _ => Err(BudgyError::Other(format!("'{prefix}' is ambiguous, use more characters"))),
    }
}

pub fn set_transaction_category(
    conn: &Connection,
    fitid: &str,
    category_id: Option<i64>,
) -> Result<()> {
    if let Some(id) = category_id {
        ensure_category_exists(conn, id)?;
    }
    let changed = conn.execute(
        "UPDATE transactions SET category_id = ?1 WHERE fitid = ?2",
        rusqlite::params![category_id, fitid],
    )?;
    if changed == 0 {
        return Err(BudgyError::Other(format!("no transaction with fitid {fitid}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

fn ensure_category_exists(conn: &Connection, id: i64) -> Result<()> {
    let mut stmt = conn.prepare("SELECT 1 FROM categories WHERE id = ?1")?;
    if !stmt.exists([id])? {
        return Err(BudgyError::ReferentialIntegrity(format!(
            "no category with id {id}"
        )));
    }
    Ok(())
}

pub fn list_categories(conn: &Connection) -> Result<Vec<Category>> {
    let mut stmt =
        conn.prepare("SELECT id, name, expense_type FROM categories ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, name, et)| {
            let expense_type = ExpenseType::from_i64(et).ok_or_else(|| {
                BudgyError::Other(format!("category {id} has invalid expense_type {et}"))
            })?;
            Ok(Category { id, name, expense_type })
        })
        .collect()
}

pub fn category_id_by_name(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM categories WHERE name = ?1", [name], |row| row.get(0))
        .map_err(|_| BudgyError::ReferentialIntegrity(format!("unknown category: {name}")))
}

pub fn create_category(conn: &Connection, name: &str, expense_type: ExpenseType) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BudgyError::Validation("category name is empty".to_string()));
    }
    conn.execute(
        "INSERT INTO categories (name, expense_type) VALUES (?1, ?2)",
        rusqlite::params![name, expense_type.as_i64()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Explicit user edit; rule application never changes an expense type.
pub fn set_category_expense_type(
    conn: &Connection,
    id: i64,
    expense_type: ExpenseType,
) -> Result<()> {
    ensure_category_exists(conn, id)?;
    conn.execute(
        "UPDATE categories SET expense_type = ?1 WHERE id = ?2",
        rusqlite::params![expense_type.as_i64(), id],
    )?;
    Ok(())
}

/// Deleting a referenced category is rejected unless `reassign` is set,
/// in which case its transactions become uncategorized and its rules are
/// removed, atomically.
pub fn delete_category(conn: &mut Connection, id: i64, reassign: bool) -> Result<()> {
    ensure_category_exists(conn, id)?;
    let tx = conn.transaction()?;

    let txn_refs: i64 = tx.query_row(
        "SELECT count(*) FROM transactions WHERE category_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    let rule_refs: i64 =
        tx.query_row("SELECT count(*) FROM rules WHERE category_id = ?1", [id], |row| row.get(0))?;

    if (txn_refs > 0 || rule_refs > 0) && !reassign {
        return Err(BudgyError::ReferentialIntegrity(format!(
            "category {id} is referenced by {txn_refs} transaction(s) and {rule_refs} rule(s)"
        )));
    }

    tx.execute("UPDATE transactions SET category_id = NULL WHERE category_id = ?1", [id])?;
    tx.execute("DELETE FROM rules WHERE category_id = ?1", [id])?;
    tx.execute("DELETE FROM categories WHERE id = ?1", [id])?;
    tx.commit()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Total evaluation order: priority ascending (lower wins), then creation
/// order. Equal priorities tie-break deterministically by id.
pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT id, pattern, target_field, category_id, priority
         FROM rules ORDER BY priority, id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, pattern, field, category_id, priority)| {
            let target_field = TargetField::parse(&field).ok_or_else(|| {
                BudgyError::Other(format!("rule {id} has invalid target field '{field}'"))
            })?;
            Ok(Rule { id, pattern, target_field, category_id, priority })
        })
        .collect()
}

pub fn create_rule(
    conn: &Connection,
    pattern: &str,
    target_field: TargetField,
    category_id: i64,
    priority: i64,
) -> Result<i64> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err(BudgyError::Validation("rule pattern is empty".to_string()));
    }
    ensure_category_exists(conn, category_id)?;
    conn.execute(
        "INSERT INTO rules (pattern, target_field, category_id, priority) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![pattern, target_field.as_str(), category_id, priority],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM rules WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(BudgyError::Other(format!("no rule with id {id}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Aggregation (read API for the forecasting consumer)
// ---------------------------------------------------------------------------

/// Spending per category over a posted-date range (negative amounts only).
pub fn expense_totals(
    conn: &Connection,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<CategoryTotal>> {
    let mut sql = String::from(
        "SELECT c.name, c.expense_type, SUM(ABS(t.amount)), count(*)
         FROM transactions t LEFT JOIN categories c ON t.category_id = c.id
         WHERE t.amount < 0",
    );
    let mut params: Vec<Value> = Vec::new();
    if let Some(from) = from {
        sql.push_str(" AND t.posted >= ?");
        params.push(Value::Text(from.to_string()));
    }
    if let Some(to) = to {
        sql.push_str(" AND t.posted <= ?");
        params.push(Value::Text(to.to_string()));
    }
    sql.push_str(" GROUP BY c.id ORDER BY SUM(ABS(t.amount)) DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .map(|(category, et, total, count)| CategoryTotal {
            category,
            expense_type: et.and_then(ExpenseType::from_i64),
            total,
            count,
        })
        .collect())
}

/// Monthly retirement-relevant spending: all negative amounts except those
/// in non-expense categories (transfers, savings, income adjustments).
/// Uncategorized spending counts until a rule or user says otherwise.
pub fn monthly_expenses(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m', posted) AS ym, SUM(ABS(t.amount))
         FROM transactions t LEFT JOIN categories c ON t.category_id = c.id
         WHERE t.amount < 0 AND (c.id IS NULL OR c.expense_type != 0)
         GROUP BY ym ORDER BY ym",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Import log & pending archives
// ---------------------------------------------------------------------------

pub fn record_import(
    conn: &Connection,
    filename: Option<&str>,
    record_count: usize,
    inserted: usize,
    duplicates: usize,
    errors: usize,
    checksum: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO imports (filename, record_count, inserted, duplicates, errors, checksum)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            filename,
            record_count as i64,
            inserted as i64,
            duplicates as i64,
            errors as i64,
            checksum,
        ],
    )?;
    Ok(())
}

pub fn import_seen(conn: &Connection, checksum: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM imports WHERE checksum = ?1")?;
    Ok(stmt.exists([checksum])?)
}

/// Queue a source file for post-commit archival. Enqueued inside the
/// import transaction so a crash between commit and archival is
/// recoverable at next session open.
pub fn enqueue_archive(conn: &Connection, source_path: &str, content_sha256: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO pending_archives (source_path, content_sha256) VALUES (?1, ?2)
         ON CONFLICT(source_path) DO UPDATE SET content_sha256 = excluded.content_sha256",
        rusqlite::params![source_path, content_sha256],
    )?;
    Ok(())
}

pub fn list_pending_archives(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt =
        conn.prepare("SELECT source_path, content_sha256 FROM pending_archives ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn dequeue_archive(conn: &Connection, source_path: &str) -> Result<()> {
    conn.execute("DELETE FROM pending_archives WHERE source_path = ?1", [source_path])?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

/// Online backup into a fresh database encrypted under the same key.
pub fn backup_to(conn: &Connection, dest_path: &Path, db_key: &[u8; 32]) -> Result<()> {
    let mut dest = open_connection(dest_path, db_key)?;
    let backup = rusqlite::backup::Backup::new(conn, &mut dest)?;
    backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::{sample_txn, test_db, TEST_KEY};
    use super::*;

    #[test]
    fn test_migrate_creates_tables_and_is_idempotent() {
        let (_dir, mut conn) = test_db();
        migrate(&mut conn).unwrap();
        for table in &["meta", "categories", "transactions", "rules", "imports", "pending_archives"] {
            assert!(table_exists(&conn, table).unwrap(), "missing table: {table}");
        }
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_seeds_default_categories() {
        let (_dir, conn) = test_db();
        let categories = list_categories(&conn).unwrap();
        assert!(categories.len() >= 20, "expected seeded categories, got {}", categories.len());
        let income = categories.iter().find(|c| c.name == "Income").unwrap();
        assert_eq!(income.expense_type, ExpenseType::NotExpense);
        let taxes = categories.iter().find(|c| c.name == "Taxes").unwrap();
        assert_eq!(taxes.expense_type, ExpenseType::OneTime);
    }

    #[test]
    fn test_wrong_key_fails_before_data_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut conn = open_connection(&path, &TEST_KEY).unwrap();
        migrate(&mut conn).unwrap();
        drop(conn);

        let wrong = [13u8; 32];
        match open_connection(&path, &wrong) {
            Err(BudgyError::Authentication) => {}
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let (_dir, mut conn) = test_db();
        conn.execute("UPDATE meta SET value = '99' WHERE key = 'schema_version'", [])
            .unwrap();
        match migrate(&mut conn) {
            Err(BudgyError::UnsupportedSchema { found: 99, supported }) => {
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected UnsupportedSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_upsert_then_duplicate() {
        let (_dir, conn) = test_db();
        let txn = sample_txn("f1", -4200);
        assert_eq!(upsert_transaction(&conn, &txn).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(upsert_transaction(&conn, &txn).unwrap(), UpsertOutcome::Duplicate);
        assert_eq!(count_transactions(&conn).unwrap(), 1);
    }

    #[test]
    fn test_upsert_amount_mismatch_is_integrity_error() {
        let (_dir, conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let altered = sample_txn("f1", -9900);
        match upsert_transaction(&conn, &altered) {
            Err(BudgyError::DataIntegrity { field: "amount", .. }) => {}
            other => panic!("expected DataIntegrity on amount, got {other:?}"),
        }
        // Stored row untouched.
        let stored = get_transaction(&conn, "f1").unwrap().unwrap();
        assert_eq!(stored.amount, -4200);
    }

    #[test]
    fn test_upsert_cosmetic_name_change_is_duplicate() {
        let (_dir, conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let mut reimport = sample_txn("f1", -4200);
        reimport.name = "  gas   station 42 ".to_string();
        assert_eq!(upsert_transaction(&conn, &reimport).unwrap(), UpsertOutcome::Duplicate);
    }

    #[test]
    fn test_upsert_preserves_existing_category() {
        let (_dir, conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        set_transaction_category(&conn, "f1", Some(auto)).unwrap();

        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let stored = get_transaction(&conn, "f1").unwrap().unwrap();
        assert_eq!(stored.category_id, Some(auto));
    }

    #[test]
    fn test_list_transactions_filter_and_order() {
        let (_dir, conn) = test_db();
        let mut a = sample_txn("a", -100);
        a.posted = "2025-02-01 00:00:00".to_string();
        let mut b = sample_txn("b", -200);
        b.posted = "2025-01-01 00:00:00".to_string();
        let mut c = sample_txn("c", -300);
        c.posted = "2025-03-01 00:00:00".to_string();
        c.account = "VISA-9".to_string();
        for t in [&a, &b, &c] {
            upsert_transaction(&conn, t).unwrap();
        }

        let all = list_transactions(&conn, &TransactionFilter::default()).unwrap();
        let order: Vec<&str> = all.iter().map(|t| t.fitid.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);

        let chk = list_transactions(
            &conn,
            &TransactionFilter { account: Some("chk-1234".to_string()), ..Default::default() },
        )
        .unwrap();
        assert_eq!(chk.len(), 2);

        let feb = list_transactions(
            &conn,
            &TransactionFilter {
                from: Some("2025-02-01 00:00:00".to_string()),
                to: Some("2025-02-28 23:59:59".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(feb.len(), 1);
        assert_eq!(feb[0].fitid, "a");
    }

    #[test]
    fn test_delete_referenced_category_rejected_then_cascades() {
        let (_dir, mut conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        set_transaction_category(&conn, "f1", Some(auto)).unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 10).unwrap();

        match delete_category(&mut conn, auto, false) {
            Err(BudgyError::ReferentialIntegrity(_)) => {}
            other => panic!("expected ReferentialIntegrity, got {other:?}"),
        }

        delete_category(&mut conn, auto, true).unwrap();
        let stored = get_transaction(&conn, "f1").unwrap().unwrap();
        assert_eq!(stored.category_id, None);
        assert!(list_rules(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_rule_order_is_priority_then_creation() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let travel = category_id_by_name(&conn, "Travel").unwrap();
        create_rule(&conn, "STATION", TargetField::Name, travel, 2).unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 1).unwrap();
        create_rule(&conn, "FUEL", TargetField::Name, travel, 1).unwrap();

        let rules = list_rules(&conn).unwrap();
        let patterns: Vec<&str> = rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["GAS", "FUEL", "STATION"]);
    }

    #[test]
    fn test_create_rule_unknown_category_rejected() {
        let (_dir, conn) = test_db();
        match create_rule(&conn, "GAS", TargetField::Name, 9999, 1) {
            Err(BudgyError::ReferentialIntegrity(_)) => {}
            other => panic!("expected ReferentialIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_monthly_expenses_exclude_non_expense() {
        let (_dir, conn) = test_db();
        let transfer = category_id_by_name(&conn, "Transfer").unwrap();

        let mut spend = sample_txn("spend", -5000);
        spend.posted = "2025-01-10 00:00:00".to_string();
        let mut moved = sample_txn("moved", -100000);
        moved.posted = "2025-01-15 00:00:00".to_string();
        moved.category_id = Some(transfer);
        let mut income = sample_txn("pay", 250000);
        income.posted = "2025-01-20 00:00:00".to_string();
        for t in [&spend, &moved, &income] {
            upsert_transaction(&conn, t).unwrap();
        }

        let months = monthly_expenses(&conn).unwrap();
        assert_eq!(months, vec![("2025-01".to_string(), 5000)]);
    }

    #[test]
    fn test_expense_totals_groups_uncategorized() {
        let (_dir, conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -5000)).unwrap();
        let totals = expense_totals(&conn, None, None).unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].category, None);
        assert_eq!(totals[0].total, 5000);
    }

    #[test]
    fn test_backup_roundtrip() {
        let (dir, conn) = test_db();
        upsert_transaction(&conn, &sample_txn("f1", -4200)).unwrap();
        let dest = dir.path().join("backup.db");
        backup_to(&conn, &dest, &TEST_KEY).unwrap();

        let copy = open_connection(&dest, &TEST_KEY).unwrap();
        assert_eq!(count_transactions(&copy).unwrap(), 1);
    }
}
