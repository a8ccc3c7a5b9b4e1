// raw_batch - command line batch converter
// Queues RAW files, converts them sequentially and reports a summary.
// Ctrl-C cancels the running batch; the in-flight file is reset, not failed.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use raw_batch::{
    ColorProfile, Config, ConversionError, JobQueue, JobStatus, Orchestrator, OutputFormat, OutputLocation,
    Pipeline, SystemRunner, TracingNotifier,
};

#[derive(Parser)]
#[command(name = "raw_batch", version, about = "Batch RAW to DNG converter with lens correction profiles")]
struct Args {
    /// Files or directories to convert
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write every output into this directory
    #[arg(long, conflicts_with = "subfolder")]
    output_dir: Option<PathBuf>,

    /// Write outputs into this subfolder next to each source
    #[arg(long)]
    subfolder: Option<String>,

    /// Output format: dng, jpg or tiff
    #[arg(long)]
    format: Option<OutputFormat>,

    #[arg(long)]
    compress: bool,

    #[arg(long)]
    no_denoise: bool,

    /// Use the converter's accelerated path
    #[arg(long)]
    fast: bool,

    /// Output color space: default, srgb, adobe-rgb, prophoto-rgb
    #[arg(long)]
    color: Option<ColorProfile>,

    /// Convert every file, including ones already converted in this session
    #[arg(long)]
    reprocess_all: bool,

    /// Descend into subdirectories
    #[arg(long)]
    recursive: bool,

    /// Leave files whose output already exists out of the batch
    #[arg(long)]
    skip_existing: bool,

    #[arg(long)]
    converter: Option<PathBuf>,

    #[arg(long)]
    exiftool: Option<PathBuf>,

    /// Directory holding correction profiles
    #[arg(long)]
    profile_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Command line values win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.output_location = OutputLocation::Fixed(dir.clone());
        }
        if let Some(name) = &self.subfolder {
            config.output_location = OutputLocation::Subfolder(name.clone());
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if let Some(color) = self.color {
            config.color_profile = color;
        }
        if let Some(path) = &self.converter {
            config.converter_path = path.clone();
        }
        if let Some(path) = &self.exiftool {
            config.exiftool_path = path.clone();
        }
        if let Some(dir) = &self.profile_dir {
            config.profile_dir = dir.clone();
        }
        config.compress |= self.compress;
        config.denoise &= !self.no_denoise;
        config.faster_processing |= self.fast;
        config.reprocess_all |= self.reprocess_all;
    }
}

/// Expand directories into the files they contain
fn expand_inputs(inputs: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let found = WalkDir::new(input)
                .max_depth(max_depth)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path());
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }

    debug!("{} candidate file(s)", files.len());
    files
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);

    for (tool, check_arg) in [(&config.converter_path, "-h"), (&config.exiftool_path, "-ver")] {
        if !SystemRunner::is_available(tool, check_arg) {
            return Err(ConversionError::MissingBinary { path: tool.clone() }).context("Tool check failed");
        }
    }

    let mut queue = JobQueue::new();
    queue.add_paths(expand_inputs(&args.inputs, args.recursive));
    if queue.is_empty() {
        info!("No supported files found");
        return Ok(());
    }

    let existing = queue.jobs_with_existing_output(&config);
    if !existing.is_empty() {
        if args.skip_existing {
            queue.remove(&existing);
            info!("Skipping {} file(s) with existing output", existing.len());
        } else {
            warn!("{} existing output file(s) will be overwritten", existing.len());
        }
    }

    info!("🎞  Converting {} file(s)", queue.len());

    let config = Arc::new(config);
    let queue = queue.shared();
    let runner = Arc::new(SystemRunner::new());
    let pipeline = Arc::new(Pipeline::from_config(runner, &config));
    let orchestrator = Orchestrator::new(queue.clone(), pipeline, config, Arc::new(TracingNotifier));
    let cancel = orchestrator.cancel_handle();

    let mut batch = tokio::task::spawn_blocking(move || orchestrator.process_all());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let mut cancel_sent = false;

    let report = loop {
        tokio::select! {
            result = &mut batch => break result.context("Batch task panicked")?,
            _ = &mut ctrl_c, if !cancel_sent => {
                warn!("Interrupted, cancelling");
                cancel.cancel();
                cancel_sent = true;
            }
            _ = ticker.tick() => {
                let progress = queue.lock().aggregate_progress();
                debug!("Progress: {:.0}%", progress * 100.0);
            }
        }
    };

    let Some(report) = report else {
        bail!("A batch is already running");
    };

    {
        let queue = queue.lock();
        for job in queue.jobs() {
            if matches!(job.status(), JobStatus::Failed | JobStatus::Warning) {
                println!(
                    "{:<10} {}  {}",
                    job.status().as_str(),
                    job.display_name,
                    job.message.as_deref().unwrap_or("")
                );
            }
        }
    }

    if report.cancelled {
        println!("Cancelled: {}", report.summary);
    } else {
        println!("{}", report.summary);
    }

    if report.summary.failed > 0 {
        bail!("{} file(s) failed", report.summary.failed);
    }
    Ok(())
}
