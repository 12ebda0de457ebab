mod cli;
mod config;
mod datasources;
mod db;
mod error;
mod import;
mod logic;
mod models;
mod server;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use cli::{BlueprintCommands, Cli, Commands};
use config::{Config, WeatherProvider};
use datasources::{Location, OpenMeteoClient};
use db::Database;
use logic::timeline::{load_timeline, TimelineQuery};
use logic::Coordinator;
use models::ProgressEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let command = cli.command.unwrap_or(Commands::Serve { port: None });

    let config_override = cli.config.clone();
    let load_config =
        move || Config::load(config_override).context("Failed to load configuration");
    let data_dir = cli.data_dir.as_ref();

    match command {
        Commands::Init => {
            Config::setup_interactive()?;
        }
        Commands::Serve { port } => {
            let config = load_config()?;
            let db = Database::open(data_dir)?;
            server::serve(config, db, port).await?;
        }
        Commands::Check => check(&load_config()?, data_dir).await?,
        Commands::Import { file } => {
            let db = Database::open(data_dir)?;
            let summary = import::import_file(&db, &file)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            println!("Imported {}", summary);
        }
        Commands::Run { plan_id } => {
            let config = load_config()?;
            let db = Database::open(data_dir)?;
            run_pipeline(config, db, plan_id).await?;
        }
        Commands::Schedule {
            plan_id,
            week_start,
        } => {
            let db = Database::open(data_dir)?;
            let week_start = week_start
                .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
                .transpose()
                .context("--week-start must be YYYY-MM-DD")?;
            let query = TimelineQuery {
                week_start,
                ..Default::default()
            };
            let timeline = load_timeline(&db, plan_id, &query, today())?;
            println!("{}", serde_json::to_string_pretty(&timeline)?);
        }
        Commands::Blueprints(BlueprintCommands::Generate { crop_id }) => {
            let db = Database::open(data_dir)?;
            let blueprints = logic::blueprints::generate_crop_blueprints(&db, crop_id)?;
            for bp in &blueprints {
                println!(
                    "lane {:>2}  {:>8.1} GDD  {}  ({})",
                    bp.priority, bp.gdd_trigger, bp.name, bp.task_type
                );
            }
            println!("Generated {} blueprints", blueprints.len());
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

async fn check(config: &Config, data_dir: Option<&std::path::PathBuf>) -> anyhow::Result<()> {
    println!("Configuration OK");

    let db = Database::open(data_dir)?;
    println!("Database OK ({})", db.path().display());

    match config.weather.provider {
        WeatherProvider::Database => {
            println!("Weather provider: database cache only");
        }
        WeatherProvider::OpenMeteo => match db.get_farm(1)? {
            Some(farm) => {
                let client = OpenMeteoClient::new(config.weather.clone());
                let location = Location::from(&farm);
                match client.test_connection(&location).await {
                    Ok(true) => println!("Open-Meteo OK ({})", location.key),
                    Ok(false) => println!("Open-Meteo reachable but returned no data"),
                    Err(e) => println!("Open-Meteo FAILED: {}", e),
                }
            }
            None => println!("No farms imported yet, skipping weather check"),
        },
    }
    Ok(())
}

async fn run_pipeline(config: Config, db: Database, plan_id: i64) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(server::build_services(config, db));
    let (_, mut rx) = coordinator.subscribe(plan_id);

    let started = coordinator.start(plan_id, today()).await?;
    let stages: Vec<_> = started.stages.iter().map(|s| s.as_str()).collect();
    println!("Plan {}: {}", plan_id, stages.join(" -> "));

    loop {
        match rx.recv().await {
            Ok(ProgressEvent::Progress {
                progress,
                phase_message,
            }) => println!("[{:>3}%] {}", progress, phase_message),
            Ok(ProgressEvent::Redirect { redirect_path }) => {
                println!("Schedule available at {}", redirect_path)
            }
            Ok(ProgressEvent::Completed) => {
                println!("Completed");
                return Ok(());
            }
            Ok(ProgressEvent::Failed { phase_message }) => bail!(phase_message),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => bail!("Pipeline stopped without reporting a result"),
        }
    }
}
