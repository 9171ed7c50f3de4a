use std::path::PathBuf;

use zeroize::Zeroize;

use crate::cli::master_password;
use crate::error::Result;
use crate::session::{Session, ARCHIVE_DIR, KEY_FILE};
use crate::settings::{load_settings, save_settings, shellexpand_path, Settings};

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    let defaults = Settings::default();

    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    } else if settings.data_dir == defaults.data_dir {
        // First run — prompt for data dir
        let default = &settings.data_dir;
        println!("Data directory [{default}]: ");
        let mut input = String::new();
        std::io::stdin().read_line(&mut input).ok();
        let chosen = input.trim();
        if !chosen.is_empty() {
            settings.data_dir = shellexpand_path(chosen);
        }
    }

    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(resolved.join(ARCHIVE_DIR))?;

    // Confirm the password only when it is being set for the first time.
    let first_run = !resolved.join(KEY_FILE).exists();
    let mut password = master_password(first_run)?;

    let opened = Session::open(&resolved, &password);

    #[cfg(feature = "keyring")]
    if first_run && opened.is_ok() {
        match keyring::Entry::new("budgy", "master").and_then(|e| e.set_password(&password)) {
            Ok(()) => println!("Master password stored in the OS keychain."),
            Err(e) => eprintln!("Could not store password in keychain: {e}"),
        }
    }

    password.zeroize();
    opened?.close()?;

    println!("Initialized budgy at {}", resolved.display());
    Ok(())
}
