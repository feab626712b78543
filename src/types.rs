//! Shared data types for vidsqueeze

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_i18n::t;
use serde::{Deserialize, Serialize};

use crate::error::{CompressError, CompressResult};

/// Smallest width or height accepted for a custom resolution
pub const MIN_CUSTOM_DIMENSION: u32 = 100;

/// Highest quality factor libx264 accepts
pub const MAX_QUALITY_FACTOR: u32 = 51;

/// Pixel dimensions of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Metadata of the video selected for compression
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceVideo {
    /// File name as given by the user (used for the output name)
    pub file_name: String,
    /// File size in bytes
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl SourceVideo {
    /// Build a source from probed metadata, refusing unresolved dimensions
    pub fn new(
        file_name: impl Into<String>,
        byte_size: u64,
        width: u32,
        height: u32,
        duration_seconds: f64,
    ) -> CompressResult<Self> {
        let source = Self {
            file_name: file_name.into(),
            byte_size,
            width,
            height,
            duration_seconds,
        };
        source.ensure_resolved()?;
        Ok(source)
    }

    /// Fails with `MetadataUnavailable` when width, height or duration are unusable
    pub fn ensure_resolved(&self) -> CompressResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CompressError::MetadataUnavailable(format!(
                "invalid dimensions {}x{} for {}",
                self.width, self.height, self.file_name
            )));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return Err(CompressError::MetadataUnavailable(format!(
                "invalid duration for {}",
                self.file_name
            )));
        }
        Ok(())
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    pub fn pixels(&self) -> u64 {
        self.dimensions().pixels()
    }

    /// Width divided by height; `None` while the height is unknown
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height == 0 {
            return None;
        }
        Some(self.width as f64 / self.height as f64)
    }
}

/// The seven standard output resolutions, smallest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardResolution {
    P240,
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
}

impl StandardResolution {
    /// Ascending by pixel count
    pub const ALL: [StandardResolution; 7] = [
        StandardResolution::P240,
        StandardResolution::P360,
        StandardResolution::P480,
        StandardResolution::P720,
        StandardResolution::P1080,
        StandardResolution::P1440,
        StandardResolution::P2160,
    ];

    pub const fn dimensions(self) -> Dimensions {
        match self {
            StandardResolution::P240 => Dimensions::new(426, 240),
            StandardResolution::P360 => Dimensions::new(640, 360),
            StandardResolution::P480 => Dimensions::new(854, 480),
            StandardResolution::P720 => Dimensions::new(1280, 720),
            StandardResolution::P1080 => Dimensions::new(1920, 1080),
            StandardResolution::P1440 => Dimensions::new(2560, 1440),
            StandardResolution::P2160 => Dimensions::new(3840, 2160),
        }
    }

    pub fn pixels(self) -> u64 {
        self.dimensions().pixels()
    }

    /// Human label shown next to the key in menus
    pub const fn label(self) -> &'static str {
        match self {
            StandardResolution::P240 => "240p",
            StandardResolution::P360 => "360p",
            StandardResolution::P480 => "480p",
            StandardResolution::P720 => "720p",
            StandardResolution::P1080 => "1080p",
            StandardResolution::P1440 => "1440p",
            StandardResolution::P2160 => "4K",
        }
    }

    /// Standard resolution with exactly these dimensions, if any
    pub fn from_dimensions(dimensions: Dimensions) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|res| res.dimensions() == dimensions)
    }
}

impl fmt::Display for StandardResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dimensions().fmt(f)
    }
}

/// Resolution picked by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChoice {
    Standard(StandardResolution),
    Original,
    Custom { width: u32, height: u32 },
}

impl ResolutionChoice {
    /// Validated custom resolution (both sides at least `MIN_CUSTOM_DIMENSION`)
    pub fn custom(width: u32, height: u32) -> CompressResult<Self> {
        validate_custom(width, height)?;
        Ok(ResolutionChoice::Custom { width, height })
    }

    /// Key used by the preset table: `WxH` or `original`
    pub fn key(&self) -> String {
        match self {
            ResolutionChoice::Standard(res) => res.to_string(),
            ResolutionChoice::Original => "original".to_string(),
            ResolutionChoice::Custom { width, height } => format!("{}x{}", width, height),
        }
    }
}

impl fmt::Display for ResolutionChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Checks a custom resolution against the minimum size
pub fn validate_custom(width: u32, height: u32) -> CompressResult<()> {
    if width < MIN_CUSTOM_DIMENSION || height < MIN_CUSTOM_DIMENSION {
        return Err(CompressError::Validation(
            t!(
                "errors.custom_resolution",
                min = MIN_CUSTOM_DIMENSION,
                width = width,
                height = height
            )
            .into_owned(),
        ));
    }
    Ok(())
}

fn resolution_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*[xX×]\s*(\d+)$").expect("resolution pattern is valid")
    })
}

impl FromStr for ResolutionChoice {
    type Err = CompressError;

    /// Accepts `original`, a standard key such as `1280x720`, or any `WxH`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("original") {
            return Ok(ResolutionChoice::Original);
        }

        let caps = resolution_pattern().captures(value).ok_or_else(|| {
            CompressError::Validation(t!("errors.invalid_resolution", value = value).into_owned())
        })?;

        let parse = |idx: usize| -> CompressResult<u32> {
            caps[idx].parse::<u32>().map_err(|_| {
                CompressError::Validation(
                    t!("errors.invalid_resolution_number", value = value).into_owned(),
                )
            })
        };
        let dimensions = Dimensions::new(parse(1)?, parse(2)?);

        match StandardResolution::from_dimensions(dimensions) {
            Some(res) => Ok(ResolutionChoice::Standard(res)),
            None => ResolutionChoice::custom(dimensions.width, dimensions.height),
        }
    }
}

/// How the quality factor is chosen
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// Quality factor and bitrate cap follow the target resolution
    #[default]
    Auto,
    /// Quality factor supplied by the user, no bitrate cap
    Manual,
}

impl QualityMode {
    pub fn tip(self) -> String {
        match self {
            QualityMode::Auto => t!("quality.tip_auto").into_owned(),
            QualityMode::Manual => t!("quality.tip_manual").into_owned(),
        }
    }
}

/// Which flavour of the compressor to emulate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Auto/manual quality, bitrate caps and grain compensation
    #[default]
    Advanced,
    /// Manual quality factor only
    Basic,
}

/// Derived ffmpeg parameters for one compression request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingParameters {
    pub quality_factor: u32,
    pub max_bitrate_kbps: Option<u32>,
    /// `None` keeps the source dimensions
    pub target_resolution: Option<Dimensions>,
    pub apply_grain_filter: bool,
    pub upscale_detected: bool,
}

/// Encoder settings passed through to ffmpeg untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    /// x264 speed preset (default: "medium")
    pub preset: String,
    /// Audio bitrate (default: "128k")
    pub audio_bitrate: String,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            preset: "medium".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

/// Metadata of the produced file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    pub byte_size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

impl CompressionResult {
    /// Size reduction relative to the source, in percent (negative if it grew)
    pub fn compression_ratio_percent(&self, source: &SourceVideo) -> f64 {
        if source.byte_size == 0 {
            return 0.0;
        }
        (source.byte_size as f64 - self.byte_size as f64) / source.byte_size as f64 * 100.0
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height == 0 {
            return None;
        }
        Some(self.width as f64 / self.height as f64)
    }
}

/// Application version constant
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name constant
pub const APP_NAME: &str = "vidsqueeze";
