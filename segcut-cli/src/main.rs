use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use segcut_core::storage::{LocalObjectStore, ObjectStore};
use segcut_core::{
    ClipEditDescriptor, ClipRequest, CodecFamily, ContentAddressedCache, ExportConfig, ExportMode,
    PipelineEnv, ProgressPhase, check_ffmpeg, presets, spawn_export,
};

#[derive(Parser, Debug)]
#[command(name = "segcut")]
#[command(about = "Segment-aware video exporter with per-segment speed, slow motion and crop")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a clip from an edit description
    Export {
        /// Input video file path
        #[arg(short, long)]
        input: PathBuf,

        /// Edit description (JSON)
        #[arg(short, long)]
        descriptor: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        /// Override the export mode from the descriptor
        #[arg(long, value_enum)]
        mode: Option<ExportMode>,

        /// Output codec family
        #[arg(long, value_enum)]
        codec: Option<CodecFamily>,

        /// Override the target frame rate from the descriptor
        #[arg(long)]
        fps: Option<f64>,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of encoder threads
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Show the detected interpolation backend
    Backend {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Maintain the render cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Configuration file (JSON)
        #[arg(long, global = true)]
        config: Option<PathBuf>,
    },

    /// List available codec families
    Codecs,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Evict old entries, then the oldest until the cache fits the size limit
    Cleanup {
        /// Maximum entry age in days
        #[arg(long)]
        max_age_days: Option<u64>,

        /// Maximum total cache size in MiB
        #[arg(long)]
        max_size_mb: Option<u64>,
    },

    /// Remove one entry by digest
    Invalidate { digest: String },
}

fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::load(path),
        None => Ok(ExportConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match args.command {
        Commands::Export {
            input,
            descriptor,
            output,
            mode,
            codec,
            fps,
            config,
            threads,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(codec) = codec {
                config.codec = codec;
            }
            if threads.is_some() {
                config.threads = threads;
            }
            export(input, descriptor, output, mode, fps, config).await
        }
        Commands::Backend { json, config } => {
            let config = load_config(config.as_deref())?;
            let env = PipelineEnv::new(config)?;
            let info = env.backend_info();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("\nInterpolation backend: {}", info.backend);
                println!("{:-<50}", "");
                println!("{:<15} - {}", "description", info.backend.description());
                println!("{:<15} - {}", "quality tier", info.quality_tier);
                println!("{:<15} - {}", "fallback", info.is_fallback);
                for device in &info.device_names {
                    println!("{:<15} - {}", "device", device);
                }
            }
            Ok(())
        }
        Commands::Cache { action, config } => {
            let config = load_config(config.as_deref())?;
            let cache = ContentAddressedCache::new(&config.cache_dir)?;
            match action {
                CacheAction::Cleanup {
                    max_age_days,
                    max_size_mb,
                } => {
                    let mut limits = config.cache.clone();
                    if let Some(days) = max_age_days {
                        limits.max_age_days = days;
                    }
                    if let Some(mb) = max_size_mb {
                        limits.max_total_size_mb = mb;
                    }
                    let removed = cache.cleanup(limits.max_age(), limits.max_total_size())?;
                    println!("Removed {} cache entries from {:?}", removed, cache.dir());
                }
                CacheAction::Invalidate { digest } => {
                    if cache.invalidate(&digest)? {
                        println!("Removed cache entry {}", digest);
                    } else {
                        println!("No cache entry {}", digest);
                    }
                }
            }
            Ok(())
        }
        Commands::Codecs => {
            println!("\nAvailable codecs:");
            println!("{:-<50}", "");
            for (name, description) in presets::list_all() {
                println!("{:<15} - {}", name, description);
            }
            println!("\nUsage: segcut export -i input.mp4 -d edit.json -o output.webm --codec vp9");
            Ok(())
        }
    }
}

async fn export(
    input: PathBuf,
    descriptor_path: PathBuf,
    output: PathBuf,
    mode: Option<ExportMode>,
    fps: Option<f64>,
    config: ExportConfig,
) -> Result<()> {
    // Check FFmpeg availability
    match check_ffmpeg() {
        Ok(version) => {
            log::info!("FFmpeg version {} detected", version);
        }
        Err(e) => {
            eprintln!("Error: FFmpeg not found!");
            eprintln!("Please install FFmpeg to use this tool.");
            eprintln!();
            eprintln!("Installation instructions:");
            eprintln!("  Ubuntu/Debian: sudo apt install ffmpeg");
            eprintln!("  macOS:         brew install ffmpeg");
            eprintln!("  Windows:       Download from https://ffmpeg.org/download.html");
            eprintln!();
            eprintln!("Details: {}", e);
            std::process::exit(1);
        }
    }

    let text = std::fs::read_to_string(&descriptor_path)
        .with_context(|| format!("Failed to read edit description {:?}", descriptor_path))?;
    let mut descriptor = ClipEditDescriptor::from_json(&text)
        .with_context(|| format!("Invalid edit description {:?}", descriptor_path))?;
    if let Some(mode) = mode {
        descriptor.export_mode = mode;
    }
    if let Some(fps) = fps {
        descriptor.target_fps = fps;
    }

    let store = LocalObjectStore::new(
        input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new(".")),
    );
    let key = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid input path: {:?}", input))?;
    let bytes = store.download(key)?;

    log::info!("Input: {:?}", input);
    log::info!("Output: {:?}", output);

    let env = PipelineEnv::new(config)?;
    let mut job = spawn_export(
        env,
        ClipRequest {
            descriptor,
            input: bytes,
            output: output.clone(),
        },
    );

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("#>-"),
    );
    while let Some(update) = job.progress.recv().await {
        if update.phase == ProgressPhase::Finished {
            pb.set_position(100);
        } else {
            pb.set_position(update.percent() as u64);
        }
        pb.set_message(format!("{}: {}", update.phase, update.message));
    }

    match job.handle.await? {
        Ok(path) => {
            pb.finish_with_message("Export complete");
            println!("\n✅ Export completed successfully!");
            println!("📁 Output saved to: {:?}", path);
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("Export failed");
            if e.is_retryable() {
                log::warn!("The export may succeed if retried");
            }
            Err(e.into())
        }
    }
}
