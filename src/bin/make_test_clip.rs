// Writes a synthetic moving-square clip for manual end-to-end runs.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use noise_camo::{
    config::OutputConfig,
    video::{ffmpeg, FfmpegWriter, FrameSink, FrameSource, SyntheticSource},
};

#[derive(Parser)]
#[command(name = "make_test_clip", about = "Generate a synthetic test clip")]
struct Args {
    /// Output container path
    #[arg(short, long, default_value = "test_clip.mp4")]
    output: PathBuf,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    #[arg(long, default_value_t = 90)]
    frames: u64,

    /// Side of the moving square in pixels (0 for a static clip)
    #[arg(long, default_value_t = 160)]
    square: u32,

    /// Pixels the square moves per frame
    #[arg(long, default_value_t = 12)]
    speed: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    if !ffmpeg::check_ffmpeg_available() {
        anyhow::bail!("ffmpeg not found in PATH");
    }

    let mut source = SyntheticSource::new(args.width, args.height, args.fps, args.frames);
    if args.square > 0 {
        source = source.with_moving_square(args.square, args.speed);
    }

    let metadata = source.metadata();
    let mut writer = FfmpegWriter::create(&args.output, metadata.resolution(), metadata.fps, &OutputConfig::default())?;

    let mut index = 0;
    while let Some(frame) = source.next_frame()? {
        writer.write_frame(&frame, index)?;
        index += 1;
    }
    writer.close()?;

    info!("🎬 Wrote {} frames ({} @ {:.2} fps) to {:?}", index, metadata.resolution(), metadata.fps, args.output);
    Ok(())
}
