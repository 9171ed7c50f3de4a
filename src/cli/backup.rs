use std::path::PathBuf;

use crate::cli::open_session;
use crate::error::Result;
use crate::fmt::format_bytes;

pub fn run(output: Option<String>) -> Result<()> {
    let session = open_session()?;

    let dest_path = match output {
        Some(p) => PathBuf::from(p),
        None => {
            let backups_dir = session.data_dir().join("backups");
            std::fs::create_dir_all(&backups_dir)?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            backups_dir.join(format!("budgy-{stamp}.db"))
        }
    };

    session.backup_to(&dest_path)?;

    let size = std::fs::metadata(&dest_path)?.len();
    println!("Encrypted backup saved to {}", dest_path.display());
    println!("Size: {}", format_bytes(size));
    session.close()
}
