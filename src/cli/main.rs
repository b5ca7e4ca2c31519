//! Background Removal Studio CLI
//!
//! Collects input files, runs them through one [`Pipeline`], and writes either
//! one PNG per processed image, a zip archive, or both.

use super::config::CliConfigBuilder;
use crate::{
    pipeline::{BatchReport, IngestOutcome, InputImage, ItemOutcome, Pipeline, PipelineEvent},
    services::ImageIOService,
    tracing_config::init_cli_tracing,
    types::{BackgroundSpec, ImageId},
};
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Extensions picked up when scanning directories
const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif", "gif"];

/// Batch background removal through a remote service
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-studio")]
#[command(group(
    ArgGroup::new("destination")
        .required(true)
        .multiple(true)
        .args(["output", "archive"])
))]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Directory receiving one `{id}.png` per processed image
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<String>,

    /// Write every processed image into this zip archive
    #[arg(short, long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Replacement background: transparent, #rrggbb, gradient:#a,#b or url:https://...
    #[arg(short, long, default_value = "transparent")]
    pub background: String,

    /// Number of removal calls in flight at once
    #[arg(short = 'j', long, default_value_t = 1)]
    pub concurrency: usize,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Only pick files whose name matches this glob when scanning directories (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// API key of the removal service
    #[arg(long, env = "REMOVE_BG_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Removal service endpoint
    #[arg(long, env = "REMOVE_BG_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Output size requested from the service (auto, preview, full, ...)
    #[arg(long)]
    pub size: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "REMOVE_BG_TIMEOUT_SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Custom log filter, e.g. "bgremove_studio=debug,reqwest=warn" (overrides -v)
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Show a progress bar while images are processed
    #[arg(long)]
    pub progress: bool,
}

/// One selected input and what became of it
#[derive(Debug)]
struct InputRecord {
    path: PathBuf,
    id: Option<ImageId>,
    output: Option<PathBuf>,
    error: Option<String>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let session = init_cli_tracing(cli.verbose, cli.log_filter.as_deref())
        .context("Failed to initialize tracing")?;

    run(cli).instrument(session).await
}

async fn run(cli: Cli) -> Result<()> {
    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let background = CliConfigBuilder::background(&cli)?;

    let files = collect_inputs(&cli.input, cli.recursive, cli.pattern.as_deref())?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    info!("Found {} image file(s) to process", files.len());

    let pipeline = Pipeline::new(config).context("Failed to create pipeline")?;
    let mut records = ingest_files(&pipeline, files).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing without starting new requests");
                cancel.cancel();
            }
        })
    };

    let total = pipeline.snapshot().await.entries().filter(|e| e.needs_removal()).count();
    let progress = cli.progress.then(|| spawn_progress(&pipeline, total as u64));

    let report = pipeline
        .remove_background_all(cancel)
        .await
        .context("Background removal failed to start")?;

    if let Some((bar, task)) = progress {
        task.abort();
        bar.finish_and_clear();
    }
    ctrl_c.abort();

    apply_report(&mut records, &report);
    apply_background(&pipeline, &report, &background).await?;

    if let Some(output) = &cli.output {
        write_singles(&pipeline, &mut records, Path::new(output)).await;
    }

    let mut archive_error = None;
    if let Some(archive) = &cli.archive {
        if report.processed().is_empty() {
            archive_error = Some("no image was processed, archive not written".to_string());
        } else {
            match write_archive(&pipeline, archive).await {
                Ok(()) => info!("Archive written to {}", archive.display()),
                Err(e) => archive_error = Some(format!("{e:#}")),
            }
        }
    }

    print_summary(&records, cli.archive.as_deref(), archive_error.as_deref());

    let failed = records.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 || archive_error.is_some() {
        anyhow::bail!(
            "{failed} of {} image(s) failed{}",
            records.len(),
            if archive_error.is_some() { ", archive not written" } else { "" }
        );
    }
    Ok(())
}

/// Read every file and ingest it under an id derived from its file name
async fn ingest_files(pipeline: &Pipeline, files: Vec<PathBuf>) -> Result<Vec<InputRecord>> {
    let mut records = Vec::with_capacity(files.len());
    let mut inputs = Vec::new();
    let mut taken = HashSet::new();

    for path in files {
        match ImageIOService::read_input(&path).await {
            Ok(bytes) => {
                let id = id_for_path(&path, &mut taken);
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                inputs.push((id.clone(), InputImage { name, bytes }));
                records.push(InputRecord {
                    path,
                    id: Some(id),
                    output: None,
                    error: None,
                });
            },
            Err(e) => records.push(InputRecord {
                path,
                id: None,
                output: None,
                error: Some(e.to_string()),
            }),
        }
    }

    let report = pipeline
        .ingest_named(inputs)
        .await
        .context("Failed to add images to the batch")?;

    let failures: HashMap<ImageId, String> = report
        .outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            IngestOutcome::DecodeFailed { id, message } => Some((id, message)),
            _ => None,
        })
        .collect();
    for record in &mut records {
        if let Some(message) = record.id.as_ref().and_then(|id| failures.get(id)) {
            record.error = Some(message.clone());
        }
    }
    Ok(records)
}

/// Stable, unique id from the file stem
fn id_for_path(path: &Path, taken: &mut HashSet<String>) -> ImageId {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut base: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .chars()
        .take(100)
        .collect();
    if base.is_empty() {
        base = "image".to_string();
    }

    let mut candidate = base.clone();
    let mut suffix = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{base}-{suffix}");
        suffix += 1;
    }
    // Sanitized above, so this cannot fail
    ImageId::new(candidate).unwrap_or_else(|_| ImageId::from_sequence(taken.len() as u64))
}

fn spawn_progress(pipeline: &Pipeline, total: u64) -> (ProgressBar, tokio::task::JoinHandle<()>) {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let mut events = pipeline.subscribe();
    let task_bar = bar.clone();
    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::Submitted { id }) => task_bar.set_message(format!("{id}")),
                Ok(
                    PipelineEvent::Processed { .. }
                    | PipelineEvent::Failed { .. }
                    | PipelineEvent::Cancelled { .. },
                ) => task_bar.inc(1),
                Ok(_) | Err(RecvError::Lagged(_)) => {},
                Err(RecvError::Closed) => break,
            }
        }
    });
    (bar, task)
}

fn apply_report(records: &mut [InputRecord], report: &BatchReport) {
    let outcomes: HashMap<&ImageId, &ItemOutcome> =
        report.items.iter().map(|(id, outcome)| (id, outcome)).collect();
    for record in records.iter_mut().filter(|r| r.error.is_none()) {
        let outcome = record.id.as_ref().and_then(|id| outcomes.get(id));
        match outcome {
            Some(ItemOutcome::Failed { category, message }) => {
                record.error = Some(format!("{category}: {message}"));
            },
            Some(ItemOutcome::Cancelled) => record.error = Some("cancelled".to_string()),
            Some(ItemOutcome::Processed) | None => {},
        }
    }
}

async fn apply_background(
    pipeline: &Pipeline,
    report: &BatchReport,
    background: &BackgroundSpec,
) -> Result<()> {
    if *background == BackgroundSpec::Transparent {
        return Ok(());
    }
    for id in report.processed() {
        pipeline
            .update_background(id, background.clone())
            .await
            .with_context(|| format!("Failed to set background of {id}"))?;
    }
    Ok(())
}

/// Render each processed image to `{dir}/{id}.png`; failures are recorded per input
async fn write_singles(pipeline: &Pipeline, records: &mut [InputRecord], dir: &Path) {
    for record in records.iter_mut().filter(|r| r.error.is_none()) {
        let Some(id) = record.id.clone() else { continue };
        let target = dir.join(id.png_file_name());
        let result = match pipeline.render(&id).await {
            Ok(png) => ImageIOService::write_output(&target, &png).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => record.output = Some(target),
            Err(e) => record.error = Some(format!("{}: {e}", e.category())),
        }
    }
}

async fn write_archive(pipeline: &Pipeline, path: &Path) -> Result<()> {
    let archive = pipeline
        .package_all()
        .await
        .context("Failed to build archive")?;
    ImageIOService::write_output(path, &archive)
        .await
        .with_context(|| format!("Failed to write archive {}", path.display()))
}

fn print_summary(records: &[InputRecord], archive: Option<&Path>, archive_error: Option<&str>) {
    for record in records {
        let id = record.id.as_ref().map_or("-", ImageId::as_str);
        match (&record.error, &record.output) {
            (Some(error), _) => println!("✗ {} [{id}]: {error}", record.path.display()),
            (None, Some(output)) => {
                println!("✓ {} [{id}] -> {}", record.path.display(), output.display());
            },
            (None, None) => println!("✓ {} [{id}]", record.path.display()),
        }
    }
    match (archive, archive_error) {
        (Some(path), None) => println!("Archive: {}", path.display()),
        (Some(path), Some(error)) => println!("Archive {} failed: {error}", path.display()),
        _ => {},
    }
}

/// Expand files and directories into a sorted list of image files
fn collect_inputs(inputs: &[String], recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();

    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_file() {
            all_files.push(path);
        } else if path.is_dir() {
            all_files.extend(find_image_files(&path, recursive, pattern)?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    // Sort files alphanumerically for consistent processing order
    all_files.sort();
    all_files.dedup();
    Ok(all_files)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if recursive {
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let path = entry.path();
                if is_image_file(path) && matches_pattern(path, pattern) {
                    files.push(path.to_path_buf());
                }
            }
        }
    } else {
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let path = entry.path();
                if is_image_file(&path) && matches_pattern(&path, pattern) {
                    files.push(path);
                }
            }
        }
    }

    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(name))
                    .unwrap_or(false)
            }),
        None => true,
    }
}
