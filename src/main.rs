use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use noise_camo::{
    config::{Config, ConfigOverrides, DisposalPolicy, Tier},
    error::CamoError,
    session::{OutputTarget, SessionControls, SessionRequest, SessionRunner},
    video::{ffmpeg, scaler::target_resolution, FfmpegBackend, PreviewUnit},
};

#[derive(Parser)]
#[command(
    name = "noise-camo",
    version,
    about = "Camouflage videos with motion-gated synthetic noise",
    long_about = "Noise-Camo replaces every pixel of a video with synthetic noise: a fixed noise field where nothing moves and a rotating noise pool where motion is detected. Only where motion happened survives, never what moved."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: OverrideArgs,
}

/// Startup surface; each flag can also come from the environment
#[derive(Args)]
struct OverrideArgs {
    /// Maximum working width in pixels
    #[arg(long, global = true, env = "NOISE_CAMO_MAX_WIDTH")]
    max_width: Option<u32>,

    /// Noise pool size for the preview tier
    #[arg(long, global = true, env = "NOISE_CAMO_PREVIEW_POOL")]
    preview_pool: Option<usize>,

    /// Noise pool size for the batch tier
    #[arg(long, global = true, env = "NOISE_CAMO_BATCH_POOL")]
    batch_pool: Option<usize>,

    /// Frame-difference threshold (0-255)
    #[arg(long, global = true, env = "NOISE_CAMO_MOTION_THRESHOLD")]
    motion_threshold: Option<u8>,

    /// Closing kernel size (odd, 0 disables)
    #[arg(long, global = true, env = "NOISE_CAMO_KERNEL")]
    kernel: Option<u32>,
}

impl From<&OverrideArgs> for ConfigOverrides {
    fn from(args: &OverrideArgs) -> Self {
        Self {
            max_width: args.max_width,
            preview_pool: args.preview_pool,
            batch_pool: args.batch_pool,
            motion_threshold: args.motion_threshold,
            closing_kernel: args.kernel,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Encode a camouflaged copy of a video
    Batch {
        /// Source video
        #[arg(short, long)]
        input: PathBuf,

        /// Output container path
        #[arg(short, long)]
        output: PathBuf,

        /// Delete the source once the session completes
        #[arg(long)]
        dispose: bool,
    },

    /// Run the preview tier and write JPEG units
    Preview {
        /// Source video
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for numbered JPEG units (multipart stream on stdout if omitted)
        #[arg(short, long)]
        frames_dir: Option<PathBuf>,

        /// Also record the composite to this container
        #[arg(short, long)]
        record: Option<PathBuf>,

        /// Disconnect after this many units
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Print source metadata and the working resolution
    Probe {
        /// Source video
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write the default configuration to a TOML file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "noise-camo.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout may carry the preview stream
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Noise-Camo v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<CamoError>() {
            Some(camo) => error!("❌ {}", camo.user_message()),
            None => error!("❌ {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };
    config.apply_overrides(&ConfigOverrides::from(&cli.overrides));
    config.validate()?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.lifecycle.worker_threads())
        .build_global()
        .context("failed to configure the processing thread pool")?;

    match cli.command {
        Command::Batch { input, output, dispose } => run_batch(config, input, output, dispose).await,
        Command::Preview { input, frames_dir, record, limit } => {
            run_preview(config, input, frames_dir, record, limit).await
        }
        Command::Probe { input } => run_probe(&config, &input),
        Command::InitConfig { output } => {
            config.save_to_file(&output)?;
            info!("Configuration written to {:?}", output);
            Ok(())
        }
    }
}

fn ensure_ffmpeg() -> Result<()> {
    if !ffmpeg::check_ffmpeg_available() {
        anyhow::bail!("ffmpeg not found in PATH; install it (e.g. `sudo apt install ffmpeg`)");
    }
    Ok(())
}

fn runner(mut config: Config, dispose: bool) -> SessionRunner {
    // Files named on the command line belong to the user
    if !dispose {
        config.lifecycle.disposal = DisposalPolicy::Never;
    }
    SessionRunner::new(Arc::new(config), Arc::new(FfmpegBackend))
}

async fn run_batch(config: Config, input: PathBuf, output: PathBuf, dispose: bool) -> Result<()> {
    ensure_ffmpeg()?;
    let runner = runner(config, dispose);

    let request = SessionRequest {
        id: "cli-batch".to_string(),
        tier: Tier::Batch,
        source: input,
        target: OutputTarget::File(output.clone()),
    };

    let report = tokio::task::spawn_blocking(move || runner.run(request, SessionControls::detached()))
        .await
        .context("batch task panicked")??;

    if report.truncated {
        warn!("Source was removed before it was fully read");
    }
    if let Some(warning) = &report.disposal {
        warn!("{}", warning);
    }
    info!(
        "🎉 Wrote {} frames ({} @ {:.2} fps) to {:?}",
        report.frames_processed, report.target, report.fps, output
    );
    Ok(())
}

async fn run_preview(
    config: Config,
    input: PathBuf,
    frames_dir: Option<PathBuf>,
    record: Option<PathBuf>,
    limit: Option<u64>,
) -> Result<()> {
    ensure_ffmpeg()?;
    if let Some(dir) = &frames_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let (sender, mut units) = mpsc::channel::<PreviewUnit>(config.lifecycle.preview_buffer);
    let runner = runner(config, false);
    let request = SessionRequest {
        id: "cli-preview".to_string(),
        tier: Tier::Preview,
        source: input,
        target: OutputTarget::Live { sender, record },
    };
    let task = tokio::task::spawn_blocking(move || runner.run(request, SessionControls::detached()));

    let mut received = 0u64;
    while let Some(unit) = units.recv().await {
        emit_unit(&unit, frames_dir.as_deref()).await?;
        received += 1;
        if limit.is_some_and(|max| received >= max) {
            info!("Disconnecting after {} units", received);
            break;
        }
    }
    drop(units);

    match task.await.context("preview task panicked")? {
        Ok(report) => info!("🎉 Preview finished: {} units", report.frames_processed),
        Err(e) if e.is_cancelled() => info!("Preview stopped after {} units", received),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn emit_unit(unit: &PreviewUnit, frames_dir: Option<&Path>) -> Result<()> {
    match frames_dir {
        Some(dir) => {
            let path = dir.join(format!("frame_{:06}.jpg", unit.index));
            tokio::fs::write(&path, &unit.jpeg).await?;
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&unit.to_multipart_part())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

fn run_probe(config: &Config, input: &Path) -> Result<()> {
    ensure_ffmpeg()?;
    let metadata = ffmpeg::probe(input)?;
    let target = target_resolution(metadata.resolution(), config.scaling.max_width);

    println!("📹 {}", input.display());
    println!("   Resolution: {}", metadata.resolution());
    println!("   Frame rate: {:.3} fps", metadata.fps);
    if metadata.frame_count_known() {
        println!("   Frames:     {}", metadata.frame_count);
    } else {
        println!("   Frames:     unknown");
    }
    println!("   Working:    {} (scale {:.4})", target, target.width as f64 / metadata.width as f64);
    Ok(())
}
