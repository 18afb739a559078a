use std::path::{Path, PathBuf};
use std::sync::Arc;

use analysis_service::{logging, BatchOrchestrator, Config, ImmichClient};
use anyhow::{Context, Result};
use batch_db::{AnalysisStatus, AssetQualityScore, BatchDb, BatchStore, BurstSequence, ImportBatch};
use burst_detection::{capture_time, BurstCandidate, BurstDetector, BurstGroup, QualityAnalyzer, QualityReport};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "photo-triage")]
#[command(about = "Quality scoring and burst detection for photo imports")]
struct Cli {
    /// Config file (defaults to <config dir>/photo-triage/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Batch database path
    #[arg(long, global = true, env = "TRIAGE_DATABASE")]
    database: Option<PathBuf>,

    /// Asset store base URL
    #[arg(long, global = true, env = "IMMICH_API_URL")]
    api_url: Option<String>,

    /// Asset store API key
    #[arg(long, global = true, env = "IMMICH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit assets as a new import batch and analyze them
    Analyze {
        /// Owner of the import
        #[arg(short, long)]
        user: String,

        /// Asset ids to analyze
        asset_ids: Vec<String>,

        /// Read additional asset ids from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show progress of a batch
    Status { batch_id: String },

    /// List quality scores of a batch
    Scores { batch_id: String },

    /// List burst sequences of a batch
    Bursts { batch_id: String },

    /// List a user's batches, newest first
    Batches {
        #[arg(short, long)]
        user: String,
    },

    /// Delete a batch with its scores and bursts
    Delete { batch_id: String },

    /// Score local image files without touching the database
    Inspect {
        /// Image files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Also group the files into bursts by EXIF capture time
        #[arg(short, long)]
        bursts: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init()?;

    let config = load_config(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Analyze { user, asset_ids, file } => analyze(&config, &user, asset_ids, file.as_deref(), json).await,
        Commands::Status { batch_id } => show_status(&config, &batch_id, json),
        Commands::Scores { batch_id } => show_scores(&config, &batch_id, json),
        Commands::Bursts { batch_id } => show_bursts(&config, &batch_id, json),
        Commands::Batches { user } => show_batches(&config, &user, json),
        Commands::Delete { batch_id } => delete(&config, &batch_id),
        Commands::Inspect { paths, bursts } => inspect(&config, &paths, bursts, json),
    }
}

/// File values first, then flags and environment.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(url) = &cli.api_url {
        config.asset_store.base_url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        config.asset_store.api_key = Some(key.clone());
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<BatchDb> {
    BatchDb::open_at(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output to JSON")?;
    println!("{json}");
    Ok(())
}

async fn analyze(config: &Config, user: &str, mut asset_ids: Vec<String>, file: Option<&Path>, json: bool) -> Result<()> {
    if let Some(path) = file {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read asset list: {}", path.display()))?;
        asset_ids.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    let store: Arc<dyn BatchStore> = Arc::new(open_store(config)?);
    let source = Arc::new(ImmichClient::new(&config.asset_store).context("Failed to create asset store client")?);
    let orchestrator = BatchOrchestrator::from_config(Arc::clone(&store), source, config);

    let batch = orchestrator.submit(user, &asset_ids)?;
    if !json {
        println!("📥 Submitted batch {} with {} assets", batch.id, batch.total_assets);
    }

    let done = orchestrator.run(&batch.id).await?;
    let bursts = store.list_bursts(&done.id)?;

    if json {
        #[derive(Serialize)]
        struct AnalyzeOutput<'a> {
            batch: &'a ImportBatch,
            bursts: &'a [BurstSequence],
        }
        return print_json(&AnalyzeOutput { batch: &done, bursts: &bursts });
    }

    println!(
        "✅ Batch {}: {} analyzed, {} skipped of {}",
        done.id, done.analyzed_assets, done.skipped_assets, done.total_assets
    );
    print_bursts(&bursts);
    Ok(())
}

fn show_status(config: &Config, batch_id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let status = store.load_batch(batch_id)?.analysis_status(Utc::now());
    if json {
        return print_json(&status);
    }
    print_status(batch_id, &status);
    Ok(())
}

fn print_status(batch_id: &str, status: &AnalysisStatus) {
    println!("📊 Batch {batch_id}: {}", status.status);
    println!(
        "   Progress: {:.1}% ({} analyzed, {} skipped of {})",
        status.progress_percent, status.analyzed_assets, status.skipped_assets, status.total_assets
    );
    if let Some(eta) = status.eta_seconds {
        println!("   ETA: {eta}s");
    }
    if let Some(message) = &status.error_message {
        println!("   Error: {message}");
    }
}

fn show_scores(config: &Config, batch_id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let scores = store.list_scores(batch_id)?;
    if json {
        return print_json(&scores);
    }

    println!("{:<40} {:>6} {:>9} {:>8}  Category", "Asset", "Blur", "Exposure", "Overall");
    for score in &scores {
        println!(
            "{:<40} {:>6} {:>9} {:>8}  {}",
            score.asset_id,
            format_score(score.blur_score),
            format_score(score.exposure_score),
            format_score(score.overall_quality),
            category(score)
        );
    }
    println!("{} scores", scores.len());
    Ok(())
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.1}"))
}

fn category(score: &AssetQualityScore) -> &'static str {
    QualityReport {
        blur_score: score.blur_score,
        exposure_score: score.exposure_score,
        overall_quality: score.overall_quality.unwrap_or(0.0),
        is_corrupted: score.is_corrupted,
    }
    .quality_category()
}

fn show_bursts(config: &Config, batch_id: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let bursts = store.list_bursts(batch_id)?;
    if json {
        return print_json(&bursts);
    }
    print_bursts(&bursts);
    Ok(())
}

fn print_bursts(bursts: &[BurstSequence]) {
    if bursts.is_empty() {
        println!("No burst sequences");
        return;
    }
    println!("🎯 {} burst sequences", bursts.len());
    for (i, burst) in bursts.iter().enumerate() {
        println!("   Burst {} ({} frames)", i + 1, burst.asset_ids.len());
        for asset_id in &burst.asset_ids {
            let marker = if burst.recommended_asset_id.as_deref() == Some(asset_id.as_str()) {
                "⭐"
            } else {
                "  "
            };
            println!("     {marker} {asset_id}");
        }
    }
}

fn show_batches(config: &Config, user: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let batches = store.list_batches_for_user(user)?;
    if json {
        return print_json(&batches);
    }

    if batches.is_empty() {
        println!("No batches for {user}");
        return Ok(());
    }
    for batch in &batches {
        println!(
            "{}  {:<10}  {}/{} analyzed, {} skipped  {}",
            batch.id,
            batch.status.as_str(),
            batch.analyzed_assets,
            batch.total_assets,
            batch.skipped_assets,
            batch.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

fn delete(config: &Config, batch_id: &str) -> Result<()> {
    let store = open_store(config)?;
    store.delete_batch(batch_id)?;
    println!("🗑️  Deleted batch {batch_id}");
    Ok(())
}

#[derive(Serialize)]
struct InspectedFile {
    path: PathBuf,
    capture_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    report: Option<QualityReport>,
    error: Option<String>,
}

#[derive(Serialize)]
struct InspectOutput {
    files: Vec<InspectedFile>,
    bursts: Option<Vec<BurstGroup>>,
}

fn inspect(config: &Config, paths: &[PathBuf], group: bool, json: bool) -> Result<()> {
    let analyzer = QualityAnalyzer::new(config.analysis.blur_threshold);
    let reports = analyzer.analyze_batch(paths);

    let files: Vec<InspectedFile> = paths
        .iter()
        .zip(reports)
        .map(|(path, report)| {
            let capture_time = std::fs::read(path).ok().and_then(|bytes| capture_time(&bytes));
            match report {
                Ok(report) => InspectedFile {
                    path: path.clone(),
                    capture_time,
                    report: Some(report),
                    error: None,
                },
                Err(e) => InspectedFile {
                    path: path.clone(),
                    capture_time,
                    report: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    let bursts = group.then(|| {
        let candidates = files
            .iter()
            .filter_map(|file| {
                let report = file.report.as_ref()?;
                Some(BurstCandidate::new(
                    file.path.display().to_string(),
                    file.capture_time?,
                    report.overall_quality,
                ))
            })
            .collect();
        BurstDetector::new(config.burst.clone()).group(candidates)
    });

    if json {
        return print_json(&InspectOutput { files, bursts });
    }

    for file in &files {
        match (&file.report, &file.error) {
            (Some(report), _) => println!(
                "{}  overall {:.1} ({}), blur {}, exposure {}",
                file.path.display(),
                report.overall_quality,
                report.quality_category(),
                format_score(report.blur_score),
                format_score(report.exposure_score)
            ),
            (None, Some(error)) => println!("⚠️  {}: {error}", file.path.display()),
            (None, None) => {}
        }
    }

    if let Some(bursts) = bursts {
        if bursts.is_empty() {
            println!("No burst sequences");
        }
        for (i, burst) in bursts.iter().enumerate() {
            println!(
                "🎯 Burst {}: {} frames over {}ms (~{:.1} fps)",
                i + 1,
                burst.frame_count,
                burst.duration_ms,
                burst.estimated_fps
            );
            for path in &burst.asset_ids {
                let marker = if burst.recommended_asset_id.as_deref() == Some(path.as_str()) {
                    "⭐"
                } else {
                    "  "
                };
                println!("     {marker} {path}");
            }
        }
    }
    Ok(())
}
