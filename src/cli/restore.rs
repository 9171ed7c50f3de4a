use std::path::{Path, PathBuf};

use crate::cli::open_session;
use crate::error::Result;

pub fn run(archive: &str, output_dir: Option<String>) -> Result<()> {
    let dest_dir = output_dir.map_or_else(|| PathBuf::from("."), PathBuf::from);
    let session = open_session()?;
    let restored = session.restore_archive(Path::new(archive), &dest_dir)?;
    println!("Restored {}", restored.display());
    session.close()
}
