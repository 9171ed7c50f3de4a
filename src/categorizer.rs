use rusqlite::Connection;

use crate::db;
use crate::error::Result;
use crate::models::{Rule, TargetField, Transaction, TransactionFilter};

fn rule_matches(rule: &Rule, name: &str, memo: Option<&str>) -> bool {
    let haystack = match rule.target_field {
        TargetField::Name => Some(name),
        TargetField::Memo => memo,
    };
    let Some(haystack) = haystack else {
        return false;
    };
    haystack.to_uppercase().contains(&rule.pattern.trim().to_uppercase())
}

/// Deterministic first-match classification. `rules` must already be in
/// evaluation order (priority, then creation order — `db::list_rules`).
/// No match is a valid terminal state, not an error.
pub fn classify(txn: &Transaction, rules: &[Rule]) -> Option<i64> {
    rules
        .iter()
        .find(|rule| rule_matches(rule, &txn.name, txn.memo.as_deref()))
        .map(|rule| rule.category_id)
}

/// Ingest-time pass: assign categories to freshly inserted rows only.
/// Rows that already carry a category (manual edits included) are never
/// touched here.
pub fn categorize_new(conn: &Connection, fitids: &[String]) -> Result<usize> {
    if fitids.is_empty() {
        return Ok(0);
    }
    let rules = db::list_rules(conn)?;
    if rules.is_empty() {
        return Ok(0);
    }

    let mut assigned = 0usize;
    for fitid in fitids {
        let Some(txn) = db::get_transaction(conn, fitid)? else {
            continue;
        };
        if txn.category_id.is_some() {
            continue;
        }
        if let Some(category_id) = classify(&txn, &rules) {
            conn.execute(
                "UPDATE transactions SET category_id = ?1 WHERE fitid = ?2",
                rusqlite::params![category_id, fitid],
            )?;
            assigned += 1;
        }
    }
    tracing::debug!(assigned, total = fitids.len(), "categorized new transactions");
    Ok(assigned)
}

/// Re-evaluate rules over an explicit, user-selected set — including rows
/// that already have a category. Used after rule edits; never runs
/// implicitly. Returns how many rows changed.
pub fn bulk_categorize(conn: &Connection, filter: &TransactionFilter) -> Result<usize> {
    let rules = db::list_rules(conn)?;
    let transactions = db::list_transactions(conn, filter)?;

    let mut changed = 0usize;
    for txn in &transactions {
        let category_id = classify(txn, &rules);
        if category_id != txn.category_id {
            conn.execute(
                "UPDATE transactions SET category_id = ?1 WHERE fitid = ?2",
                rusqlite::params![category_id, txn.fitid],
            )?;
            changed += 1;
        }
    }
    tracing::info!(changed, scanned = transactions.len(), "bulk re-categorization");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{sample_txn, test_db};
    use crate::db::{category_id_by_name, create_rule, get_transaction, upsert_transaction};
    use crate::models::CategorySelector;

    #[test]
    fn test_lower_priority_value_wins() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let travel = category_id_by_name(&conn, "Travel").unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 1).unwrap();
        create_rule(&conn, "STATION", TargetField::Name, travel, 2).unwrap();

        let txn = sample_txn("f1", -4200); // name: GAS STATION 42
        let rules = db::list_rules(&conn).unwrap();
        assert_eq!(classify(&txn, &rules), Some(auto));
    }

    #[test]
    fn test_equal_priority_breaks_by_creation_order() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let travel = category_id_by_name(&conn, "Travel").unwrap();
        create_rule(&conn, "STATION", TargetField::Name, travel, 5).unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 5).unwrap();

        let txn = sample_txn("f1", -4200);
        let rules = db::list_rules(&conn).unwrap();
        assert_eq!(classify(&txn, &rules), Some(travel));
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let (_dir, conn) = test_db();
        let dining = category_id_by_name(&conn, "Dining").unwrap();
        create_rule(&conn, "coffee", TargetField::Name, dining, 10).unwrap();

        let mut txn = sample_txn("f1", -750);
        txn.name = "Blue Bottle Coffee #12".to_string();
        let rules = db::list_rules(&conn).unwrap();
        assert_eq!(classify(&txn, &rules), Some(dining));
    }

    #[test]
    fn test_memo_rule_ignores_missing_memo() {
        let (_dir, conn) = test_db();
        let travel = category_id_by_name(&conn, "Travel").unwrap();
        create_rule(&conn, "HOTEL", TargetField::Memo, travel, 10).unwrap();

        let mut without_memo = sample_txn("f1", -4200);
        without_memo.name = "HOTEL CHARGE".to_string();
        let mut with_memo = sample_txn("f2", -4200);
        with_memo.memo = Some("hotel folio 993".to_string());

        let rules = db::list_rules(&conn).unwrap();
        assert_eq!(classify(&without_memo, &rules), None);
        assert_eq!(classify(&with_memo, &rules), Some(travel));
    }

    #[test]
    fn test_no_match_is_none() {
        let (_dir, conn) = test_db();
        let txn = sample_txn("f1", -4200);
        let rules = db::list_rules(&conn).unwrap();
        assert_eq!(classify(&txn, &rules), None);
    }

    #[test]
    fn test_categorize_new_skips_already_categorized() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let dining = category_id_by_name(&conn, "Dining").unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 10).unwrap();

        let mut manual = sample_txn("manual", -4200);
        manual.category_id = Some(dining);
        upsert_transaction(&conn, &manual).unwrap();
        upsert_transaction(&conn, &sample_txn("fresh", -3000)).unwrap();

        let assigned =
            categorize_new(&conn, &["manual".to_string(), "fresh".to_string()]).unwrap();
        assert_eq!(assigned, 1);
        assert_eq!(
            get_transaction(&conn, "manual").unwrap().unwrap().category_id,
            Some(dining)
        );
        assert_eq!(
            get_transaction(&conn, "fresh").unwrap().unwrap().category_id,
            Some(auto)
        );
    }

    #[test]
    fn test_bulk_categorize_reassigns_selected_set() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let travel = category_id_by_name(&conn, "Travel").unwrap();

        let mut txn = sample_txn("f1", -4200);
        txn.category_id = Some(travel);
        upsert_transaction(&conn, &txn).unwrap();

        create_rule(&conn, "GAS", TargetField::Name, auto, 1).unwrap();
        let changed = bulk_categorize(&conn, &TransactionFilter::default()).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(get_transaction(&conn, "f1").unwrap().unwrap().category_id, Some(auto));
    }

    #[test]
    fn test_bulk_categorize_respects_filter() {
        let (_dir, conn) = test_db();
        let auto = category_id_by_name(&conn, "Auto").unwrap();
        let mut categorized = sample_txn("done", -4200);
        categorized.category_id = Some(auto);
        upsert_transaction(&conn, &categorized).unwrap();
        upsert_transaction(&conn, &sample_txn("todo", -3000)).unwrap();
        create_rule(&conn, "GAS", TargetField::Name, auto, 1).unwrap();

        let filter = TransactionFilter {
            category: Some(CategorySelector::Uncategorized),
            ..Default::default()
        };
        let changed = bulk_categorize(&conn, &filter).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(get_transaction(&conn, "todo").unwrap().unwrap().category_id, Some(auto));
    }
}
