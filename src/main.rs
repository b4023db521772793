mod analytics;
mod config;
mod engine;
mod error;
mod ingest;
mod ml;
mod storage;
mod types;
mod web;

#[cfg(test)]
mod testing;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{load_config, to_toml, PipelineConfig, DEFAULT_CONFIG_PATH};
use crate::engine::{Pipeline, PredictionSummary};
use crate::ml::VersionSelector;
use crate::types::{parse_years, AnalyzeQuery, PredictQuery, SnapshotRequest, TrainBody};
use crate::web::{start_api_server, AppState};

#[derive(Parser)]
#[command(name = "fantasy_predictor")]
#[command(version)]
#[command(about = "Next-season fantasy football projections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import player season stats from a file or the HTTP feed
    Ingest {
        /// JSON or CSV file
        #[arg(short, long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// Feed URL (`{year}` is substituted); defaults to ingest.feed_url
        #[arg(short, long)]
        url: Option<String>,

        /// Seasons to fetch from the feed, e.g. 2019-2023
        #[arg(short, long)]
        years: Option<String>,
    },

    /// Train and publish a new model
    Train {
        /// Seasons to train on, e.g. 2018-2022 (default: most recent window)
        #[arg(short, long)]
        years: Option<String>,

        /// Number of recent seasons when --years is not given
        #[arg(short, long)]
        window: Option<usize>,

        /// Training profile: quick, standard, thorough, custom
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Rank next-season projections
    Predict {
        #[arg(short = 'n', long, allow_negative_numbers = true)]
        top_n: Option<i64>,

        /// QB, RB, WR or TE
        #[arg(short, long)]
        position: Option<String>,

        /// Single player lookup
        #[arg(long)]
        player: Option<String>,

        /// Model version (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Also store the full ranking for the analyzer
        #[arg(long)]
        persist: bool,
    },

    /// Aggregate statistics and insights
    Analyze {
        /// all, predictions, historical or insights
        #[arg(short = 't', long = "type")]
        analysis_type: Option<String>,

        #[arg(short, long)]
        season: Option<i32>,

        #[arg(long)]
        version: Option<String>,
    },

    /// List published model versions
    Models,

    /// Run the HTTP API
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write the default configuration file
    InitConfig {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if cli.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    info!("Fantasy Predictor v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::InitConfig { output, force } = &cli.command {
        return init_config(output, *force);
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { file, url, years } => {
            run_ingest(config, file, url, years).await?;
        }
        Commands::Train { years, window, profile } => {
            run_train(config, years, window, profile).await?;
        }
        Commands::Predict {
            top_n,
            position,
            player,
            version,
            persist,
        } => {
            let query = PredictQuery {
                top_n: top_n.map(|n| n.to_string()),
                position,
                player,
                version,
            };
            run_predict(config, query, persist).await?;
        }
        Commands::Analyze {
            analysis_type,
            season,
            version,
        } => {
            let query = AnalyzeQuery {
                analysis_type,
                season: season.map(|s| s.to_string()),
                version,
            };
            run_analyze(config, query).await?;
        }
        Commands::Models => {
            list_models(config).await?;
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let host = config.server.host.clone();
            let pipeline = Pipeline::open(config).await?;
            start_api_server(AppState::new(pipeline), &host, port).await?;
        }
        Commands::InitConfig { .. } => unreachable!("handled before config load"),
    }

    Ok(())
}

fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let contents = to_toml(&PipelineConfig::default())?;
    std::fs::write(output, contents)?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

async fn run_ingest(
    config: PipelineConfig,
    file: Option<PathBuf>,
    url: Option<String>,
    years: Option<String>,
) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;

    let summary = match file {
        Some(path) => pipeline.ingest_file(&path).await?,
        None => {
            let years = match years {
                Some(raw) => parse_years(&raw)?,
                None => bail!("--years is required when ingesting from the feed"),
            };
            pipeline.ingest_feed(url.as_deref(), &years).await?
        }
    };

    println!("\n=== Ingest Summary ===");
    println!("Snapshot:       {}", summary.raw_key);
    println!("New records:    {}", summary.new_records);
    println!("Total records:  {}", summary.total_records);
    for (year, count) in &summary.players_by_year {
        println!("  {}: {} players", year, count);
    }
    Ok(())
}

async fn run_train(
    config: PipelineConfig,
    years: Option<String>,
    window: Option<usize>,
    profile: Option<String>,
) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;

    let body = TrainBody {
        years: years.as_deref().map(parse_years).transpose()?,
        window,
        profile,
        ..TrainBody::default()
    };
    let request = body.into_request(&pipeline.config.training)?;
    let version = pipeline.trainer.train_request(request).await?;

    println!("\n=== Published Model {} ===", version);
    if let Some(metadata) = pipeline.registry.metadata(version).await? {
        let m = &metadata.metrics;
        println!("Seasons:     {:?}", metadata.training_years);
        println!("MAE:         {:.2}", m.mae);
        println!("RMSE:        {:.2}", m.rmse);
        println!("R²:          {:.3}", m.r2);
        println!("Samples:     {} train / {} validation", m.train_samples, m.validation_samples);
        println!("Checksum:    {}", metadata.checksum);
    }
    Ok(())
}

async fn run_predict(config: PipelineConfig, query: PredictQuery, persist: bool) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let request = query.into_request(&pipeline.config.prediction)?;
    let predictions = pipeline.predictor.predict(&request).await?;

    println!(
        "\n{:<4} {:<24} {:<4} {:<5} {:>8} {:>9} {:>8} {:>6}",
        "#", "Player", "Pos", "Team", "Current", "Predicted", "Change", "Conf"
    );
    for (rank, p) in predictions.iter().enumerate() {
        println!(
            "{:<4} {:<24} {:<4} {:<5} {:>8.1} {:>9.1} {:>7.1}% {:>6.1}",
            rank + 1,
            p.player,
            p.position.as_str(),
            p.team,
            p.current_points,
            p.predicted_points,
            p.percent_change,
            p.confidence
        );
    }

    let summary = PredictionSummary::from_predictions(&predictions);
    println!(
        "\n{} predictions, average change {:+.1}%",
        summary.total_predictions, summary.avg_predicted_change
    );

    if persist {
        let snapshot = pipeline
            .predictor
            .snapshot(&SnapshotRequest {
                season: None,
                version: request.version,
            })
            .await?;
        println!(
            "Stored full ranking for {} ({} players, model {})",
            snapshot.season,
            snapshot.predictions.len(),
            snapshot.model_version
        );
    }
    Ok(())
}

async fn run_analyze(config: PipelineConfig, query: AnalyzeQuery) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let request = query.into_request()?;
    let report = pipeline.analyzer.analyze(&request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn list_models(config: PipelineConfig) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let latest = pipeline.registry.latest_pointer().await?.map(|p| p.version);
    let versions = pipeline.registry.list_versions().await?;

    if versions.is_empty() {
        println!("No models published yet");
        return Ok(());
    }

    println!("\n=== Model Versions ===");
    for v in versions {
        let marker = if Some(v.version) == latest { "*" } else { " " };
        println!(
            "{} {}  {}  seasons {:?}  MAE {:.2}  R² {:.3}",
            marker,
            v.version,
            v.published_at.format("%Y-%m-%d %H:%M:%S"),
            v.training_years,
            v.metrics.mae,
            v.metrics.r2
        );
    }

    if let Some(latest) = latest {
        println!("\nLatest: {}", VersionSelector::Pinned(latest));
    }
    Ok(())
}
