use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::db;
use crate::error::{BudgyError, Result};
use crate::models::ExpenseType;

fn parse_expense_type(s: &str) -> Result<ExpenseType> {
    ExpenseType::parse(s)
        .ok_or_else(|| BudgyError::Validation(format!("unknown expense type '{s}'")))
}

pub fn add(name: &str, expense_type: &str) -> Result<()> {
    let expense_type = parse_expense_type(expense_type)?;
    let session = open_session()?;
    let id = db::create_category(session.conn(), name, expense_type)?;
    println!("Added category {id}: {name} ({})", expense_type.as_str());
    session.close()
}

pub fn list() -> Result<()> {
    let session = open_session()?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Expense type"]);
    for category in db::list_categories(session.conn())? {
        table.add_row(vec![
            Cell::new(category.id),
            Cell::new(&category.name),
            Cell::new(category.expense_type.as_str()),
        ]);
    }
    println!("Categories\n{table}");
    session.close()
}

pub fn set_type(id: i64, expense_type: &str) -> Result<()> {
    let expense_type = parse_expense_type(expense_type)?;
    let session = open_session()?;
    db::set_category_expense_type(session.conn(), id, expense_type)?;
    println!("Category {id} is now {}", expense_type.as_str());
    session.close()
}

pub fn delete(id: i64, reassign: bool) -> Result<()> {
    let mut session = open_session()?;
    db::delete_category(session.conn_mut(), id, reassign)?;
    println!("Deleted category {id}");
    session.close()
}
