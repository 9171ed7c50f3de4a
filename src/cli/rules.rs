use comfy_table::{Cell, Table};

use crate::cli::open_session;
use crate::db;
use crate::error::{BudgyError, Result};
use crate::models::TargetField;

pub fn add(pattern: &str, category: &str, field: &str, priority: i64) -> Result<()> {
    let target_field = TargetField::parse(field)
        .ok_or_else(|| BudgyError::Validation(format!("unknown target field '{field}'")))?;

    let session = open_session()?;
    let category_id = db::category_id_by_name(session.conn(), category)?;
    db::create_rule(session.conn(), pattern, target_field, category_id, priority)?;
    println!("Added rule: '{pattern}' \u{2192} {category}");
    session.close()
}

pub fn list() -> Result<()> {
    let session = open_session()?;
    let rules = db::list_rules(session.conn())?;
    let categories = db::list_categories(session.conn())?;
    let name_of = |id: i64| {
        categories
            .iter()
            .find(|c| c.id == id)
            .map_or("?".to_string(), |c| c.name.clone())
    };

    let mut table = Table::new();
    table.set_header(vec!["ID", "Priority", "Pattern", "Field", "Category"]);
    for rule in rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(rule.priority),
            Cell::new(&rule.pattern),
            Cell::new(rule.target_field.as_str()),
            Cell::new(name_of(rule.category_id)),
        ]);
    }
    println!("Rules (evaluation order)\n{table}");
    session.close()
}

pub fn delete(id: i64) -> Result<()> {
    let session = open_session()?;
    db::delete_rule(session.conn(), id)?;
    println!("Deleted rule {id}");
    session.close()
}
