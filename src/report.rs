//! Terminal output for vidsqueeze
//! Before/after statistics, the resolution menu and the progress bar

use indicatif::{ProgressBar, ProgressStyle};
use rust_i18n::t;
use std::time::Duration;

use crate::compression::ProgressCallback;
use crate::policy::ResolutionOption;
use crate::types::{
    CompressionResult, EncodingParameters, QualityMode, ResolutionChoice, SourceVideo,
};

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human readable size: base 1024, two decimals at most, trailing zeros dropped
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    while unit + 1 < SIZE_UNITS.len() && bytes >= 1024u64.pow(unit as u32 + 1) {
        unit += 1;
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

/// `m:ss` below an hour, `h:mm:ss` above
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

fn format_aspect(ratio: Option<f64>) -> String {
    match ratio {
        Some(r) => format!("{:.2}:1", r),
        None => t!("info.unknown").into_owned(),
    }
}

fn indent(line: impl AsRef<str>) -> String {
    format!("  {}", line.as_ref())
}

/// Info block for the selected video
pub fn source_info(source: &SourceVideo) -> String {
    let resolution = format!("{}×{}", source.width, source.height);
    [
        t!("info.original_title").into_owned(),
        indent(t!("info.resolution", value = resolution)),
        indent(t!("info.duration", value = format_time(source.duration_seconds))),
        indent(t!("info.size", value = format_file_size(source.byte_size))),
        indent(t!(
            "info.aspect_ratio",
            value = format_aspect(source.aspect_ratio())
        )),
    ]
    .join("\n")
}

/// Standard resolution menu, marking disabled entries and the suggestion
pub fn resolution_menu(options: &[ResolutionOption], suggested: &ResolutionChoice) -> String {
    let mut lines = vec![t!("menu.title").into_owned()];
    for option in options.iter().rev() {
        let choice = ResolutionChoice::Standard(option.resolution);
        let mut line = format!(
            "  {:<10} {:<6}",
            option.resolution.to_string(),
            option.resolution.label()
        );
        if option.disabled {
            line.push(' ');
            line.push_str(&t!("menu.larger"));
        }
        if &choice == suggested {
            line.push(' ');
            line.push_str(&t!("menu.suggested"));
        }
        lines.push(line.trim_end().to_string());
    }

    let mut original = "  original".to_string();
    if suggested == &ResolutionChoice::Original {
        original.push(' ');
        original.push_str(&t!("menu.suggested"));
    }
    lines.push(original);
    lines.join("\n")
}

/// Size comparison after a compression
pub fn compression_stats(
    source: &SourceVideo,
    result: &CompressionResult,
    mode: QualityMode,
    params: &EncodingParameters,
) -> String {
    let mode_label = match mode {
        QualityMode::Auto => t!("stats.auto"),
        QualityMode::Manual => t!("stats.manual"),
    };
    let reduction = format!("{:.2}", result.compression_ratio_percent(source));
    [
        t!("stats.title").into_owned(),
        indent(t!(
            "stats.original_size",
            value = format_file_size(source.byte_size)
        )),
        indent(t!(
            "stats.compressed_size",
            value = format_file_size(result.byte_size)
        )),
        indent(t!("stats.reduction", value = reduction)),
        indent(t!(
            "stats.quality_mode",
            mode = mode_label,
            crf = params.quality_factor
        )),
    ]
    .join("\n")
}

/// Info block for the produced video
pub fn result_info(result: &CompressionResult, params: &EncodingParameters, preset: &str) -> String {
    let mut resolution = format!("{}×{}", result.width, result.height);
    if params.upscale_detected {
        resolution.push_str(&t!("info.upscaled"));
    }
    [
        t!("info.compressed_title").into_owned(),
        indent(t!("info.resolution", value = resolution)),
        indent(t!("info.duration", value = format_time(result.duration_seconds))),
        indent(t!(
            "info.new_aspect_ratio",
            value = format_aspect(result.aspect_ratio())
        )),
        indent(t!("info.encoding_preset", value = preset)),
    ]
    .join("\n")
}

/// Progress bar fed by the executor's completion ratio
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% | ETA: {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Callback handed to the compressor
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Box::new(move |ratio| bar.set_position((ratio * 100.0).round() as u64))
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}
