use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::db;
use crate::error::Result;
use crate::fmt::money;

/// Retirement-relevant spending by month: negative amounts minus
/// non-expense categories (transfers, savings).
pub fn monthly() -> Result<()> {
    let session = open_session()?;
    let months = db::monthly_expenses(session.conn())?;

    let mut table = Table::new();
    table.set_header(vec!["Month", "Expenses"]);
    for (month, total) in &months {
        table.add_row(vec![Cell::new(month), Cell::new(money(*total))]);
    }
    println!("Monthly expenses\n{table}");
    session.close()
}

pub fn categories(from: Option<String>, to: Option<String>) -> Result<()> {
    let session = open_session()?;
    let totals = db::expense_totals(session.conn(), from.as_deref(), to.as_deref())?;

    let mut table = Table::new();
    table.set_header(vec!["Category", "Type", "Count", "Total"]);
    for row in &totals {
        table.add_row(vec![
            Cell::new(row.category.as_deref().unwrap_or("(uncategorized)")),
            Cell::new(row.expense_type.map_or("\u{2014}", |e| e.as_str())),
            Cell::new(row.count),
            Cell::new(money(row.total)),
        ]);
    }
    println!("Spending by category\n{table}");
    session.close()
}
