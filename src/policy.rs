//! Resolution and quality policy
//! Maps source metadata plus the user's selections to encoding parameters.
//! Everything here is pure: no I/O, same inputs give the same output.

use log::debug;
use rust_i18n::t;

use crate::error::{CompressError, CompressResult};
use crate::types::{
    validate_custom, Dimensions, EncodingParameters, QualityMode, ResolutionChoice, SourceVideo,
    StandardResolution, Variant, MAX_QUALITY_FACTOR,
};

/// Quality factor used for `original` and any resolution without a preset
pub const DEFAULT_QUALITY_FACTOR: u32 = 23;

/// Quality factor and optional bitrate cap for an auto-mode target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub quality_factor: u32,
    pub max_bitrate_kbps: Option<u32>,
}

impl QualityPreset {
    const fn capped(quality_factor: u32, max_bitrate_kbps: u32) -> Self {
        Self {
            quality_factor,
            max_bitrate_kbps: Some(max_bitrate_kbps),
        }
    }
}

/// Preset for a standard resolution.
/// Lower quality factors go to larger frames, which have more detail to keep.
pub const fn standard_preset(resolution: StandardResolution) -> QualityPreset {
    match resolution {
        StandardResolution::P2160 => QualityPreset::capped(22, 12000),
        StandardResolution::P1440 => QualityPreset::capped(22, 8000),
        StandardResolution::P1080 => QualityPreset::capped(23, 5000),
        StandardResolution::P720 => QualityPreset::capped(23, 2500),
        StandardResolution::P480 => QualityPreset::capped(24, 1200),
        StandardResolution::P360 => QualityPreset::capped(24, 800),
        StandardResolution::P240 => QualityPreset::capped(25, 400),
    }
}

/// Auto-mode preset for a resolution key such as `1920x1080` or `original`.
/// Unknown keys fall back to the default quality factor with no cap.
pub fn preset_for(resolution_key: &str) -> QualityPreset {
    StandardResolution::ALL
        .into_iter()
        .find(|res| res.to_string() == resolution_key)
        .map(standard_preset)
        .unwrap_or(QualityPreset {
            quality_factor: DEFAULT_QUALITY_FACTOR,
            max_bitrate_kbps: None,
        })
}

/// Largest standard resolution that does not exceed the source pixel count,
/// or `Original` when the source is smaller than every option.
/// Pixel counts in the table are distinct, so ties cannot occur.
pub fn suggest_closest_resolution(source: &SourceVideo) -> ResolutionChoice {
    let original_pixels = source.pixels();
    let mut closest = ResolutionChoice::Original;
    let mut smallest_diff = u64::MAX;

    for res in StandardResolution::ALL {
        let pixels = res.pixels();
        if pixels > original_pixels {
            continue;
        }
        let diff = original_pixels - pixels;
        if diff < smallest_diff {
            smallest_diff = diff;
            closest = ResolutionChoice::Standard(res);
        }
    }

    debug!(
        "Suggested resolution for {}x{}: {}",
        source.width, source.height, closest
    );
    closest
}

/// A standard resolution and whether it may be offered for this source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionOption {
    pub resolution: StandardResolution,
    pub disabled: bool,
}

/// Menu state for a source: options larger than the source are disabled
pub fn resolution_availability(source: &SourceVideo) -> Vec<ResolutionOption> {
    StandardResolution::ALL
        .into_iter()
        .map(|resolution| ResolutionOption {
            resolution,
            disabled: is_disabled(source.pixels(), resolution.pixels()),
        })
        .collect()
}

fn is_disabled(original_pixels: u64, candidate_pixels: u64) -> bool {
    candidate_pixels > original_pixels
}

/// True if the target is larger than the source in either dimension
pub fn detect_upscale(source: &SourceVideo, target: Option<Dimensions>) -> bool {
    match target {
        Some(target) => target.width > source.width || target.height > source.height,
        None => false,
    }
}

/// Concrete target dimensions for a choice, `None` for `Original`
pub fn resolve_target(choice: &ResolutionChoice) -> CompressResult<Option<Dimensions>> {
    match *choice {
        ResolutionChoice::Standard(res) => Ok(Some(res.dimensions())),
        ResolutionChoice::Original => Ok(None),
        ResolutionChoice::Custom { width, height } => {
            validate_custom(width, height)?;
            Ok(Some(Dimensions::new(width, height)))
        }
    }
}

/// Targets small enough that grain is added back after downscaling
fn needs_grain(target: Option<Dimensions>) -> bool {
    matches!(
        target.and_then(StandardResolution::from_dimensions),
        Some(StandardResolution::P480 | StandardResolution::P360 | StandardResolution::P240)
    )
}

/// Derives the encoding parameters for one compression request.
///
/// The basic variant only knows manual quality: the mode is treated as
/// `Manual` and no grain filter is ever applied.
pub fn build_encoding_parameters(
    source: &SourceVideo,
    choice: &ResolutionChoice,
    mode: QualityMode,
    manual_quality_factor: u32,
    variant: Variant,
) -> CompressResult<EncodingParameters> {
    source.ensure_resolved()?;
    let target = resolve_target(choice)?;

    let mode = match variant {
        Variant::Advanced => mode,
        Variant::Basic => QualityMode::Manual,
    };

    let (quality_factor, max_bitrate_kbps) = match mode {
        QualityMode::Auto => {
            let preset = preset_for(&choice_key(target));
            (preset.quality_factor, preset.max_bitrate_kbps)
        }
        QualityMode::Manual => {
            if manual_quality_factor > MAX_QUALITY_FACTOR {
                return Err(CompressError::Validation(
                    t!(
                        "errors.quality_range",
                        max = MAX_QUALITY_FACTOR,
                        value = manual_quality_factor
                    )
                    .into_owned(),
                ));
            }
            (manual_quality_factor, None)
        }
    };

    let params = EncodingParameters {
        quality_factor,
        max_bitrate_kbps,
        target_resolution: target,
        apply_grain_filter: variant == Variant::Advanced && needs_grain(target),
        upscale_detected: detect_upscale(source, target),
    };

    debug!("Encoding parameters for {}: {:?}", source.file_name, params);
    Ok(params)
}

/// Preset key of a resolved target; a custom size equal to a standard one
/// shares its preset.
fn choice_key(target: Option<Dimensions>) -> String {
    match target {
        Some(dimensions) => dimensions.to_string(),
        None => "original".to_string(),
    }
}
