use std::path::PathBuf;

use colored::Colorize;

use crate::cli::open_session;
use crate::db;
use crate::error::Result;
use crate::ingest;

pub fn run(file: &str, strict: bool, no_archive: bool) -> Result<()> {
    let path = PathBuf::from(file);
    let mut session = open_session()?;

    let checksum = ingest::compute_checksum(&path)?;
    if db::import_seen(session.conn(), &checksum)? {
        println!(
            "{}",
            "This file was imported before; existing rows will show up as duplicates.".yellow()
        );
    }

    let records = ingest::read_records_csv(&path)?;
    let summary = session.ingest(&records, Some(&path), strict)?;

    println!(
        "{} inserted, {} duplicates, {} auto-categorized",
        summary.inserted, summary.duplicates, summary.categorized
    );
    for err in &summary.errors {
        println!("  {} record {}: {}", "error".red(), err.index + 1, err.message);
    }

    if no_archive {
        db::dequeue_archive(session.conn(), &path.to_string_lossy())?;
        println!("Plaintext source kept (--no-archive).");
    } else {
        let dest = session.archive_source(&path)?;
        println!("Source encrypted to {} and plaintext deleted.", dest.display());
    }

    session.close()
}
