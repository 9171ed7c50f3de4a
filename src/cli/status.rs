use crate::cli::open_session;
use crate::db;
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::models::{CategorySelector, TransactionFilter};
use crate::settings::load_settings;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    let db_path = data_dir.join(crate::session::DB_FILE);

    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `budgy init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));

    let session = open_session()?;
    let conn = session.conn();

    println!("Schema:     v{}", db::schema_version(conn)?);

    let transactions = db::count_transactions(conn)?;
    let uncategorized = db::list_transactions(
        conn,
        &TransactionFilter {
            category: Some(CategorySelector::Uncategorized),
            ..Default::default()
        },
    )?
    .len();
    let categories = db::list_categories(conn)?.len();
    let rules = db::list_rules(conn)?.len();
    let pending = db::list_pending_archives(conn)?.len();

    println!();
    println!("Transactions:   {transactions}");
    println!("Uncategorized:  {uncategorized}");
    println!("Categories:     {categories}");
    println!("Rules:          {rules}");
    println!("Pending files:  {pending}");
    session.close()
}
