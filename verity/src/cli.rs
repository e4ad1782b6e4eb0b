// verity/src/cli.rs

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "verity")]
#[command(version)]
#[command(about = "Embedded warehouse transform engine: SQL models, DAG scheduling, incremental materialization", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    pub project_dir: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the transform pipeline, or a subset of models
    Run {
        /// Select specific models to run (matches full_name or bare name); runs everything if omitted
        #[arg(long, short)]
        select: Vec<String>,

        /// Rebuild every selected model even if unchanged since the last run
        #[arg(long)]
        force: bool,

        /// Force tiered parallel execution, overriding the project config
        #[arg(long, conflicts_with = "sequential")]
        parallel: bool,

        /// Force sequential execution, overriding the project config
        #[arg(long)]
        sequential: bool,

        /// Worker threads per tier when running in parallel (defaults to the project config)
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Execute a raw ad-hoc SQL query against the warehouse
    Query {
        /// The SQL statement to run
        sql: String,
    },

    /// Validate the transform tree: duplicate models, cycles, missing upstream references
    Validate,

    /// Show every model transitively downstream of a target
    Impact {
        /// Target model, as schema.name
        target: String,

        /// Trace impact to a specific column on the target model
        #[arg(long)]
        column: Option<String>,
    },

    /// Report models whose last successful run is older than a threshold
    Freshness {
        /// Age in hours past which a model is considered stale
        #[arg(long, default_value_t = 24.0)]
        max_age_hours: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_select_and_force() {
        let args = Cli::parse_from(["verity", "run", "--select", "bronze.e", "--force"]);
        match args.command {
            Commands::Run { select, force, .. } => {
                assert_eq!(select, vec!["bronze.e".to_string()]);
                assert!(force);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn run_defaults_to_no_selection_and_no_force() {
        let args = Cli::parse_from(["verity", "run"]);
        match args.command {
            Commands::Run {
                select,
                force,
                parallel,
                sequential,
                max_workers,
            } => {
                assert!(select.is_empty());
                assert!(!force);
                assert!(!parallel);
                assert!(!sequential);
                assert_eq!(max_workers, None);
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn parallel_and_sequential_are_mutually_exclusive() {
        let result = Cli::try_parse_from(["verity", "run", "--parallel", "--sequential"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_query() {
        let args = Cli::parse_from(["verity", "query", "SELECT 1"]);
        match args.command {
            Commands::Query { sql } => assert_eq!(sql, "SELECT 1"),
            _ => panic!("expected Query command"),
        }
    }

    #[test]
    fn parses_impact_target() {
        let args = Cli::parse_from(["verity", "impact", "bronze.e"]);
        match args.command {
            Commands::Impact { target, column } => {
                assert_eq!(target, "bronze.e");
                assert_eq!(column, None);
            }
            _ => panic!("expected Impact command"),
        }
    }

    #[test]
    fn parses_impact_with_column() {
        let args = Cli::parse_from(["verity", "impact", "bronze.e", "--column", "id"]);
        match args.command {
            Commands::Impact { target, column } => {
                assert_eq!(target, "bronze.e");
                assert_eq!(column.as_deref(), Some("id"));
            }
            _ => panic!("expected Impact command"),
        }
    }

    #[test]
    fn freshness_defaults_to_24_hours() {
        let args = Cli::parse_from(["verity", "freshness"]);
        match args.command {
            Commands::Freshness { max_age_hours } => assert_eq!(max_age_hours, 24.0),
            _ => panic!("expected Freshness command"),
        }
    }

    #[test]
    fn project_dir_defaults_to_current_directory() {
        let args = Cli::parse_from(["verity", "validate"]);
        assert_eq!(args.project_dir, ".");
    }
}
