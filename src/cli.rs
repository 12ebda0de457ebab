use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cropops",
    version,
    about = "Cultivation plan optimizer and task scheduler"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override SQLite data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and pipeline workers (default)
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Re-run interactive setup
    Init,
    /// Validate config and test the weather source
    Check,
    /// Load farms, crops, rules and plans from a YAML file
    Import {
        file: PathBuf,
    },
    /// Run the planning pipeline for one plan and print progress
    Run {
        plan_id: i64,
    },
    /// Print the weekly task schedule of a plan as JSON
    Schedule {
        plan_id: i64,

        /// Any date inside the requested week (YYYY-MM-DD)
        #[arg(short, long)]
        week_start: Option<String>,
    },
    /// Blueprint maintenance
    #[command(subcommand)]
    Blueprints(BlueprintCommands),
}

#[derive(Subcommand)]
pub enum BlueprintCommands {
    /// Regenerate a crop's template blueprints from its task templates
    Generate {
        crop_id: i64,
    },
}
