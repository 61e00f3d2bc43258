use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use image::{ImageFormat, RgbaImage};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::media::decode_data_url;
use super::{
    mean_abs_difference, ExtractedFrame, MAX_KEY_FRAMES, SAMPLE_INTERVAL_SECS,
    SCENE_CHANGE_THRESHOLD,
};
use crate::error::NarrationError;

/// Seekable decoded video.
pub trait VideoSource {
    fn duration_secs(&self) -> f64;
    fn frame_at(&mut self, seconds: f64) -> Result<RgbaImage, NarrationError>;
}

/// Samples once per second and keeps the first sample plus every scene change, up to
/// [`MAX_KEY_FRAMES`]. Never returns an empty list: a source that produced no samples falls
/// back to its final frame.
///
/// Sampling has no time bound of its own beyond `budget`; with `None` a very long video is
/// sampled to the end or until the key-frame cap is reached.
pub fn sample_key_frames<S: VideoSource + ?Sized>(
    source: &mut S,
    url: &str,
    budget: Option<Duration>,
) -> Result<Vec<ExtractedFrame>, NarrationError> {
    let duration = source.duration_secs();
    let started = Instant::now();
    let mut key_frames: Vec<ExtractedFrame> = Vec::new();
    let mut previous: Option<RgbaImage> = None;
    let mut sample_index: u32 = 0;

    loop {
        let timestamp = f64::from(sample_index) * SAMPLE_INTERVAL_SECS;
        if !(timestamp <= duration) || key_frames.len() >= MAX_KEY_FRAMES {
            break;
        }
        if let Some(budget) = budget {
            if started.elapsed() >= budget {
                warn!(
                    url,
                    budget_secs = budget.as_secs_f64(),
                    captured = key_frames.len(),
                    "extraction budget exhausted; stopping video sampling"
                );
                break;
            }
        }

        let frame = match source.frame_at(timestamp) {
            Ok(frame) => frame,
            Err(err) if previous.is_some() => {
                warn!(url, timestamp, error = %err, "video sample failed; keeping frames so far");
                break;
            }
            Err(err) => return Err(err),
        };

        let is_key_frame = match &previous {
            None => true,
            Some(prev) => {
                let diff = mean_abs_difference(prev.as_raw(), frame.as_raw());
                diff > SCENE_CHANGE_THRESHOLD
            }
        };
        if is_key_frame {
            let captured = ExtractedFrame::capture(&frame, timestamp)
                .map_err(|err| NarrationError::media_load(url, err))?;
            key_frames.push(captured);
            debug!(url, timestamp, count = key_frames.len(), "captured key frame");
        }

        previous = Some(frame);
        sample_index += 1;
    }

    if key_frames.is_empty() {
        let final_at = if duration.is_finite() {
            duration.max(0.0)
        } else {
            0.0
        };
        let frame = source.frame_at(final_at)?;
        let captured = ExtractedFrame::capture(&frame, final_at)
            .map_err(|err| NarrationError::media_load(url, err))?;
        key_frames.push(captured);
    }

    Ok(key_frames)
}

/// Video decoded through the `ffprobe`/`ffmpeg` binaries, one process per sample.
pub struct FfmpegVideo {
    url: String,
    input: String,
    ffmpeg: String,
    duration: f64,
    _spool: Option<NamedTempFile>,
}

impl FfmpegVideo {
    pub fn open(url: &str, ffmpeg: &str, ffprobe: &str) -> Result<Self, NarrationError> {
        let (input, spool) = ffmpeg_input(url)?;
        let output = Command::new(ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                &input,
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|err| NarrationError::media_load(url, format!("failed to run ffprobe: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NarrationError::media_load(
                url,
                format!("ffprobe failed: {}", stderr.trim()),
            ));
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        let duration = parse_duration(&raw)
            .ok_or_else(|| NarrationError::media_load(url, format!("unreadable duration '{}'", raw.trim())))?;
        debug!(url, duration, "probed video duration");
        Ok(Self {
            url: url.to_string(),
            input,
            ffmpeg: ffmpeg.to_string(),
            duration,
            _spool: spool,
        })
    }
}

/// The path or URL handed to ffmpeg for `url`. `file://` references become plain paths and
/// `data:` payloads are written to a temporary file that lives as long as the returned handle.
fn ffmpeg_input(url: &str) -> Result<(String, Option<NamedTempFile>), NarrationError> {
    let trimmed = url.trim();
    if let Some(rest) = trimmed.strip_prefix("data:") {
        let bytes = decode_data_url(url, rest)?;
        let mut spool = NamedTempFile::new()
            .map_err(|err| NarrationError::media_load(url, format!("failed to spool video: {err}")))?;
        spool
            .write_all(&bytes)
            .and_then(|()| spool.flush())
            .map_err(|err| NarrationError::media_load(url, format!("failed to spool video: {err}")))?;
        let path = spool.path().to_string_lossy().into_owned();
        return Ok((path, Some(spool)));
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    Ok((path.to_string(), None))
}

impl VideoSource for FfmpegVideo {
    fn duration_secs(&self) -> f64 {
        self.duration
    }

    fn frame_at(&mut self, seconds: f64) -> Result<RgbaImage, NarrationError> {
        // Seeking exactly to the end yields no frame.
        let seek = seconds.min((self.duration - 0.05).max(0.0)).max(0.0);
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss"])
            .arg(format!("{seek:.3}"))
            .args(["-i", &self.input])
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"])
            .stdin(Stdio::null())
            .output()
            .map_err(|err| {
                NarrationError::media_load(&self.url, format!("failed to run ffmpeg: {err}"))
            })?;
        if !output.status.success() || output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NarrationError::media_load(
                &self.url,
                format!("ffmpeg produced no frame at {seek:.3}s: {}", stderr.trim()),
            ));
        }
        image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .map(|image| image.to_rgba8())
            .map_err(|err| NarrationError::media_load(&self.url, err.to_string()))
    }
}

fn parse_duration(raw: &str) -> Option<f64> {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
}
