mod archive;
mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod ingest;
mod keys;
mod models;
mod session;
mod settings;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{CategoriesCommands, Cli, Commands, ReportCommands, RulesCommands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("budgy=warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Import { file, strict, no_archive } => cli::import::run(&file, strict, no_archive),
        Commands::Categorize {
            account,
            from,
            to,
            uncategorized_only,
        } => cli::categorize::run(account, from, to, uncategorized_only),
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                field,
                priority,
            } => cli::rules::add(&pattern, &category, &field, priority),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Delete { id } => cli::rules::delete(id),
        },
        Commands::Categories { command } => match command {
            CategoriesCommands::Add { name, expense_type } => {
                cli::categories::add(&name, &expense_type)
            }
            CategoriesCommands::List => cli::categories::list(),
            CategoriesCommands::SetType { id, expense_type } => {
                cli::categories::set_type(id, &expense_type)
            }
            CategoriesCommands::Delete { id, reassign } => cli::categories::delete(id, reassign),
        },
        Commands::Transactions {
            account,
            from,
            to,
            category,
        } => cli::transactions::run(account, from, to, category),
        Commands::Assign { fitid, category } => cli::transactions::assign(&fitid, &category),
        Commands::Report { command } => match command {
            ReportCommands::Monthly => cli::report::monthly(),
            ReportCommands::Categories { from, to } => cli::report::categories(from, to),
        },
        Commands::Backup { output } => cli::backup::run(output),
        Commands::Restore { archive, output_dir } => cli::restore::run(&archive, output_dir),
        Commands::Status => cli::status::run(),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
