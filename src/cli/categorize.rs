use crate::categorizer::bulk_categorize;
use crate::cli::{build_filter, open_session};
use crate::error::Result;
use crate::models::CategorySelector;

pub fn run(
    account: Option<String>,
    from: Option<String>,
    to: Option<String>,
    uncategorized_only: bool,
) -> Result<()> {
    let session = open_session()?;
    let mut filter = build_filter(session.conn(), account, from, to, None)?;
    if uncategorized_only {
        filter.category = Some(CategorySelector::Uncategorized);
    }
    let changed = bulk_categorize(session.conn(), &filter)?;
    println!("{changed} transaction(s) re-categorized");
    session.close()
}
