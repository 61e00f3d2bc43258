//! Representative-frame extraction with scene-change detection and quadrant tiling.
//!
//! Full-frame captures are downscaled by the vision models, which loses small text such as IP
//! addresses and CLI output. Every capture is therefore also split into four native-resolution
//! quadrant tiles.

mod media;
mod video;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, RgbImage, RgbaImage};
use labnarrate_contracts::labs::MediaKind;
use reqwest::blocking::Client as HttpClient;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::NarrationConfig;
use crate::error::NarrationError;

pub use video::{sample_key_frames, FfmpegVideo, VideoSource};

pub const MAX_KEY_FRAMES: usize = 8;
/// Mean normalized per-channel difference above which a sample starts a new scene.
pub const SCENE_CHANGE_THRESHOLD: f64 = 0.08;
pub const SAMPLE_INTERVAL_SECS: f64 = 1.0;
pub const FULL_FRAME_QUALITY: u8 = 85;
pub const TILE_QUALITY: u8 = 90;

/// Compare every 4th RGBA pixel.
const DIFF_STRIDE_BYTES: usize = 16;

/// A JPEG capture with its pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn mime(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime(), BASE64.encode(&self.bytes))
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One representative instant of a media asset.
///
/// Tiles are ordered top-left, top-right, bottom-left, bottom-right.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    pub full: EncodedImage,
    pub tiles: [EncodedImage; 4],
    pub timestamp_secs: f64,
}

impl ExtractedFrame {
    pub fn capture(image: &RgbaImage, timestamp_secs: f64) -> Result<Self, String> {
        if image.width() == 0 || image.height() == 0 {
            return Err("image has no pixels".to_string());
        }
        let full = encode_jpeg(image, FULL_FRAME_QUALITY)?;
        let [top_left, top_right, bottom_left, bottom_right] = quadrant_tiles(image);
        Ok(Self {
            full,
            tiles: [
                encode_jpeg(&top_left, TILE_QUALITY)?,
                encode_jpeg(&top_right, TILE_QUALITY)?,
                encode_jpeg(&bottom_left, TILE_QUALITY)?,
                encode_jpeg(&bottom_right, TILE_QUALITY)?,
            ],
            timestamp_secs,
        })
    }
}

/// Anything that can turn a media reference into frames.
pub trait FrameSource {
    fn extract_frames(
        &self,
        url: &str,
        kind: MediaKind,
    ) -> Result<Vec<ExtractedFrame>, NarrationError>;
}

/// Production extractor: HTTP/data/file loading for images, ffmpeg sampling for video.
pub struct MediaFrameExtractor {
    http: HttpClient,
    ffmpeg: String,
    ffprobe: String,
    budget: Option<Duration>,
}

impl MediaFrameExtractor {
    pub fn new(config: &NarrationConfig) -> Result<Self, NarrationError> {
        let http = HttpClient::builder()
            .timeout(config.analysis_timeout())
            .build()
            .map_err(|err| NarrationError::InvalidInput(format!("http client: {err}")))?;
        Ok(Self {
            http,
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            budget: config.extraction_budget(),
        })
    }
}

impl FrameSource for MediaFrameExtractor {
    fn extract_frames(
        &self,
        url: &str,
        kind: MediaKind,
    ) -> Result<Vec<ExtractedFrame>, NarrationError> {
        match kind {
            MediaKind::Video => {
                let mut source = FfmpegVideo::open(url, &self.ffmpeg, &self.ffprobe)?;
                sample_key_frames(&mut source, url, self.budget)
            }
            // Animated GIFs are not decoded frame by frame; the first rendered frame stands in.
            MediaKind::Gif | MediaKind::Image => {
                let bytes = media::load_bytes(&self.http, url)?;
                extract_image_frame(&bytes, url)
            }
        }
    }
}

/// A still image yields exactly one frame at timestamp 0.
pub fn extract_image_frame(bytes: &[u8], url: &str) -> Result<Vec<ExtractedFrame>, NarrationError> {
    let image = image::load_from_memory(bytes)
        .map_err(|err| NarrationError::media_load(url, err.to_string()))?
        .to_rgba8();
    let frame =
        ExtractedFrame::capture(&image, 0.0).map_err(|err| NarrationError::media_load(url, err))?;
    debug!(
        width = frame.full.width,
        height = frame.full.height,
        "captured still image"
    );
    Ok(vec![frame])
}

/// Splits at the floor midpoint of width and height. Images narrower or shorter than two
/// pixels produce overlapping one-pixel tiles instead of empty ones.
pub fn quadrant_tiles(image: &RgbaImage) -> [RgbaImage; 4] {
    let (width, height) = image.dimensions();
    let (mid_x, mid_y) = (width / 2, height / 2);
    let (tile_w, tile_h) = (mid_x.max(1), mid_y.max(1));
    [(0, 0), (mid_x, 0), (0, mid_y), (mid_x, mid_y)]
        .map(|(x, y)| imageops::crop_imm(image, x, y, tile_w, tile_h).to_image())
}

/// Mean absolute RGB difference in `0.0..=1.0`, sampled at a fixed stride. Alpha is ignored.
pub fn mean_abs_difference(a: &[u8], b: &[u8]) -> f64 {
    let len = a.len().min(b.len());
    let mut total = 0.0;
    let mut samples = 0u64;
    let mut idx = 0;
    while idx + 2 < len {
        for channel in idx..idx + 3 {
            total += f64::from(a[channel].abs_diff(b[channel])) / 255.0;
        }
        samples += 3;
        idx += DIFF_STRIDE_BYTES;
    }
    if samples == 0 {
        return 0.0;
    }
    total / samples as f64
}

/// SHA-256 over every capture in order, hex encoded.
pub fn frames_digest(frames: &[ExtractedFrame]) -> Option<String> {
    if frames.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for frame in frames {
        hasher.update(&frame.full.bytes);
        for tile in &frame.tiles {
            hasher.update(&tile.bytes);
        }
    }
    Some(hex::encode(hasher.finalize()))
}

fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<EncodedImage, String> {
    let flattened = flatten_onto_white(image);
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(flattened))
        .map_err(|err| format!("jpeg encode failed: {err}"))?;
    Ok(EncodedImage {
        bytes,
        width: image.width(),
        height: image.height(),
    })
}

fn flatten_onto_white(image: &RgbaImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        out.put_pixel(
            x,
            y,
            image::Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgba, RgbaImage};
    use labnarrate_contracts::labs::MediaKind;

    use super::{
        extract_image_frame, frames_digest, mean_abs_difference, quadrant_tiles, ExtractedFrame,
        FrameSource, MediaFrameExtractor,
    };
    use crate::config::NarrationConfig;
    use crate::error::NarrationError;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    fn png_bytes(image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(bytes)
    }

    #[test]
    fn quadrants_cover_the_frame_minus_floor_rounding() {
        for (width, height) in [(640, 480), (101, 57), (3, 3)] {
            let tiles = quadrant_tiles(&gradient(width, height));
            let area: u32 = tiles.iter().map(|tile| tile.width() * tile.height()).sum();
            assert_eq!(area, (width / 2) * (height / 2) * 4);
            assert!(area <= width * height);
        }
    }

    #[test]
    fn quadrant_order_is_row_major() {
        let mut image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        image.put_pixel(2, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 2, Rgba([0, 255, 0, 255]));
        let tiles = quadrant_tiles(&image);
        assert_eq!(tiles[1].get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(tiles[2].get_pixel(0, 0), &Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn tiny_images_still_tile() {
        let tiles = quadrant_tiles(&gradient(1, 1));
        assert!(tiles.iter().all(|tile| tile.width() == 1 && tile.height() == 1));
    }

    #[test]
    fn still_image_yields_one_frame_with_four_tiles() -> anyhow::Result<()> {
        let bytes = png_bytes(&gradient(101, 57))?;
        let frames = extract_image_frame(&bytes, "shot.png")?;
        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.timestamp_secs, 0.0);
        assert_eq!((frame.full.width, frame.full.height), (101, 57));
        assert_eq!(frame.tiles.len(), 4);
        let tile_area: u64 = frame.tiles.iter().map(|tile| tile.area()).sum();
        assert_eq!(tile_area, 50 * 28 * 4);
        assert!(frame.full.bytes.starts_with(&[0xFF, 0xD8, 0xFF]));
        assert!(frame.full.data_url().starts_with("data:image/jpeg;base64,/9j/"));
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_media_load_errors() {
        let err = extract_image_frame(b"not an image", "broken.png").err();
        assert!(matches!(err, Some(NarrationError::MediaLoad { .. })));
    }

    #[test]
    fn transparent_pixels_flatten_onto_white() -> anyhow::Result<()> {
        let clear = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let frame = ExtractedFrame::capture(&clear, 0.0).map_err(anyhow::Error::msg)?;
        let decoded = image::load_from_memory(&frame.full.bytes)?.to_rgb8();
        assert!(decoded.get_pixel(4, 4)[0] > 240);
        Ok(())
    }

    #[test]
    fn difference_is_normalized_and_ignores_alpha() {
        let black = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let white = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 0]));
        assert_eq!(mean_abs_difference(black.as_raw(), black.as_raw()), 0.0);
        assert!((mean_abs_difference(black.as_raw(), white.as_raw()) - 1.0).abs() < 1e-9);
        assert_eq!(mean_abs_difference(&[], &[]), 0.0);
    }

    #[test]
    fn gif_and_image_share_the_still_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("anim.gif");
        gradient(40, 30).save_with_format(&path, ImageFormat::Gif)?;
        let extractor = MediaFrameExtractor::new(&NarrationConfig::default())?;
        let url = path.to_string_lossy().to_string();
        let gif = extractor.extract_frames(&url, MediaKind::Gif)?;
        let image = extractor.extract_frames(&url, MediaKind::Image)?;
        assert_eq!(gif.len(), 1);
        assert_eq!(gif, image);
        assert_eq!(frames_digest(&gif), frames_digest(&image));
        assert_eq!(frames_digest(&[]), None);
        Ok(())
    }

    #[test]
    fn missing_file_is_media_load_error() -> anyhow::Result<()> {
        let extractor = MediaFrameExtractor::new(&NarrationConfig::default())?;
        let err = extractor
            .extract_frames("/definitely/not/here.png", MediaKind::Image)
            .err();
        assert!(matches!(err, Some(NarrationError::MediaLoad { .. })));
        Ok(())
    }
}
