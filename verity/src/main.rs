// verity/src/main.rs

mod cli;
mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let project_dir = PathBuf::from(&cli.project_dir);

    let outcome = match cli.command {
        Commands::Run {
            select,
            force,
            parallel,
            sequential,
            max_workers,
        } => commands::run::execute(&project_dir, select, force, parallel, sequential, max_workers),

        Commands::Query { sql } => commands::query::execute(&project_dir, &sql).map(|()| true),

        Commands::Validate => commands::validate::execute(&project_dir),

        Commands::Impact { target, column } => {
            commands::impact::execute(&project_dir, &target, column.as_deref()).map(|()| true)
        }

        Commands::Freshness { max_age_hours } => {
            commands::freshness::execute(&project_dir, max_age_hours).map(|()| true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
