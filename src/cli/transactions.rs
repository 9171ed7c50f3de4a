use comfy_table::{Cell, Table};

use crate::cli::{build_filter, open_session};
use crate::db;
use crate::error::Result;
use crate::fmt::money;

pub fn run(
    account: Option<String>,
    from: Option<String>,
    to: Option<String>,
    category: Option<String>,
) -> Result<()> {
    let session = open_session()?;
    let filter = build_filter(session.conn(), account, from, to, category)?;
    let transactions = db::list_transactions(session.conn(), &filter)?;
    let categories = db::list_categories(session.conn())?;
    let name_of = |id: Option<i64>| match id {
        None => "\u{2014}".to_string(),
        Some(id) => categories
            .iter()
            .find(|c| c.id == id)
            .map_or("?".to_string(), |c| c.name.clone()),
    };

    let mut table = Table::new();
    table.set_header(vec!["Id", "Posted", "Account", "Amount", "Name", "Category"]);
    let count = transactions.len();
    for txn in transactions {
        table.add_row(vec![
            Cell::new(&txn.fitid[..12]),
            Cell::new(&txn.posted[..10]),
            Cell::new(&txn.account),
            Cell::new(money(txn.amount)),
            Cell::new(&txn.name),
            Cell::new(name_of(txn.category_id)),
        ]);
    }
    println!("{table}\n{count} transaction(s)");
    session.close()
}

/// Manual category assignment; preserved across later re-imports.
pub fn assign(fitid_prefix: &str, category: &str) -> Result<()> {
    let session = open_session()?;
    let fitid = db::resolve_fitid(session.conn(), fitid_prefix)?;
    let category_id = match category {
        "none" => None,
        name => Some(db::category_id_by_name(session.conn(), name)?),
    };
    db::set_transaction_category(session.conn(), &fitid, category_id)?;
    println!("Set category for {} \u{2192} {category}", &fitid[..12]);
    session.close()
}
