// External FFmpeg processes: ffprobe for metadata, ffmpeg for rawvideo decode/encode pipes.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use serde::Deserialize;
use tracing::debug;

use crate::config::OutputConfig;
use crate::error::{Result, VideoError};
use crate::video::types::{Resolution, VideoMetadata};

pub fn check_ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

/// Read width, height, frame rate and frame count of the first video stream.
pub fn probe(path: &Path) -> Result<VideoMetadata> {
    let not_readable = |reason: String| VideoError::NotReadable {
        path: path.display().to_string(),
        reason,
    };

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames",
            "-of", "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| not_readable(format!("ffprobe could not be started: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(not_readable(format!("ffprobe failed: {}", stderr.trim())).into());
    }

    parse_probe_json(&output.stdout).map_err(|reason| not_readable(reason).into())
}

fn parse_probe_json(json: &[u8]) -> std::result::Result<VideoMetadata, String> {
    let probe: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| format!("invalid ffprobe output: {}", e))?;

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    // nb_frames is absent or "N/A" for many containers
    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.trim().parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoMetadata::new(width, height, fps, frame_count))
}

/// Parse an ffprobe rational such as `30000/1001`; `0/0` yields `None`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Spawn `ffmpeg` decoding the first video stream to packed RGB24 on stdout.
pub fn spawn_decoder(path: &Path) -> std::io::Result<Child> {
    debug!("Spawning ffmpeg decoder for {}", path.display());
    Command::new("ffmpeg")
        // Frame size must match what ffprobe reported, so no rotation
        .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
}

/// Spawn `ffmpeg` encoding packed RGB24 frames from stdin into `output`.
pub fn spawn_encoder(
    output: &Path,
    resolution: Resolution,
    fps: f64,
    config: &OutputConfig,
) -> std::io::Result<Child> {
    let size = resolution.to_string();
    let rate = format!("{:.6}", fps);

    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-y",
        "-v", "error",
        "-f", "rawvideo",
        "-pix_fmt", "rgb24",
        "-s", size.as_str(),
        "-r", rate.as_str(),
        "-i", "pipe:0",
        "-an",
        "-c:v", config.codec.as_str(),
    ]);

    if uses_crf(&config.codec) {
        let crf = quality_to_crf(config.quality).to_string();
        cmd.args(["-crf", crf.as_str()]);
    } else {
        let qscale = quality_to_qscale(config.quality).to_string();
        cmd.args(["-q:v", qscale.as_str()]);
    }

    // yuv420p needs even dimensions; pad the odd edge with one black line
    if resolution.width % 2 == 1 || resolution.height % 2 == 1 {
        cmd.args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"]);
    }

    cmd.args(["-pix_fmt", "yuv420p"]).arg(output);

    debug!("Spawning ffmpeg encoder ({}, {} @ {:.2}fps) -> {}",
           config.codec, resolution, fps, output.display());

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
}

fn uses_crf(codec: &str) -> bool {
    matches!(codec, "libx264" | "libx265" | "h264" | "hevc" | "libvpx-vp9" | "libaom-av1")
}

fn quality_to_crf(quality: u8) -> u8 {
    (51 - ((quality.min(100) as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
}

/// mpeg4-style qscale: 1 is best, 31 is worst
fn quality_to_qscale(quality: u8) -> u8 {
    (31 - ((quality.min(100) as f32 / 100.0) * 30.0).round() as u8).clamp(1, 31)
}
