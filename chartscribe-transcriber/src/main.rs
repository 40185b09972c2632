//! chartscribe-transcriber - chart transcription operator CLI
//!
//! Operator tools around the transcription pipeline:
//! - `selfheal`: verify (and if needed restore) write access to the cache
//! - `sign`: compute the content signature of a chart data file
//! - `transcribe`: run one chart through the full pipeline

use anyhow::Result;
use chartscribe_common::config;
use chartscribe_common::db::{create_transcription_table, init_database_pool};
use chartscribe_transcriber::{
    chart_signature, selfheal, CacheGateway, ChartRequest, SelfHealOutcome,
    TranscriptionPipeline, TranscriptionService, VisionProvider,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "chartscribe-transcriber",
    about = "Chart transcription pipeline operator tools",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify write access to the transcription cache, remediating if needed
    Selfheal {
        /// Connection string override (otherwise resolved from env/config)
        #[arg(long, env = "CHARTSCRIBE_DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Compute the content signature of a chart data JSON file
    Sign {
        /// Path to the chart data JSON
        path: PathBuf,
    },
    /// Transcribe a chart data JSON file and cache the result
    Transcribe {
        /// Path to the chart data JSON
        path: PathBuf,
        /// Cache key for the chart (defaults to a fresh UUID)
        #[arg(long)]
        chart_id: Option<String>,
        /// Report topic forwarded as provider context
        #[arg(long)]
        topic: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let toml_config = config::load_toml_config();

    match cli.command {
        Command::Selfheal { database_url } => {
            let outcome = match database_url {
                Some(url) => selfheal::run_with_url(&url).await,
                None => selfheal::run_from_env(&toml_config).await,
            };

            match &outcome {
                SelfHealOutcome::Writable => println!("cache is writable"),
                SelfHealOutcome::Healed => println!("cache write access restored"),
                SelfHealOutcome::NotConfigured => {
                    println!("no database connection string configured")
                }
                SelfHealOutcome::StillBlocked { reason } => {
                    println!("cache is still read-only: {}", reason)
                }
            }

            if !matches!(
                outcome,
                SelfHealOutcome::Writable | SelfHealOutcome::Healed
            ) {
                std::process::exit(1);
            }
        }
        Command::Sign { path } => {
            let data: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            println!("{}", chart_signature(Some(&data)));
        }
        Command::Transcribe {
            path,
            chart_id,
            topic,
        } => {
            let data: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;

            let provider = VisionProvider::from_settings(
                config::resolve_openai_api_key(&toml_config),
                config::resolve_vision_model(&toml_config),
            );
            let service = TranscriptionService::new(provider);

            let cache = match config::resolve_database_url(&toml_config) {
                Ok(url) => {
                    let pool = init_database_pool(&url).await?;
                    create_transcription_table(&pool).await?;
                    Some(CacheGateway::new(pool))
                }
                Err(_) => {
                    tracing::warn!("No database configured, transcription will not be cached");
                    None
                }
            };

            let pipeline = TranscriptionPipeline::new(service, cache);
            let request = ChartRequest {
                chart_id: chart_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                data,
                image_url: None,
                topic,
            };

            let result = pipeline.transcribe(&request).await;
            info!(
                chart_id = %result.chart_id,
                signature = %result.signature,
                model = %result.model,
                cached = result.cached,
                "Transcription complete"
            );
            println!("{}", result.text);
        }
    }

    Ok(())
}
