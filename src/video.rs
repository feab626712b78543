//! Video probing module for vidsqueeze
//! Handles ffprobe metadata reads, input type checks and dependency checks

use anyhow::{anyhow, Context, Result};
use rust_i18n::t;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{CompressError, CompressResult};
use crate::types::{CompressionResult, SourceVideo};

/// Extensions treated as video files
const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "wmv", "flv", "mpg", "mpeg", "ts", "m2ts", "3gp",
    "ogv",
];

/// Check if ffmpeg and ffprobe are available
pub fn check_dependencies() -> Result<()> {
    let mut missing = Vec::new();

    for tool in ["ffmpeg", "ffprobe"] {
        let found = Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok();
        if !found {
            missing.push(tool);
        }
    }

    if !missing.is_empty() {
        let os = std::env::consts::OS;
        let mut msg = t!("errors.missing_deps", tools = missing.join(", ")).into_owned();

        let hint = match os {
            "linux" => Some(t!("errors.install_linux")),
            "macos" => Some(t!("errors.install_macos")),
            "windows" => Some(t!("errors.install_windows")),
            _ => None,
        };
        if let Some(hint) = hint {
            msg.push_str("\n\n");
            msg.push_str(&hint);
        }

        return Err(anyhow!(msg));
    }

    Ok(())
}

/// Reject files that do not look like videos
pub fn ensure_video_file(path: &Path) -> CompressResult<()> {
    let is_video = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);

    if !is_video {
        return Err(CompressError::UnsupportedInput(
            t!("errors.not_video", path = path.display()).into_owned(),
        ));
    }
    Ok(())
}

/// Absolute form of a path whose file may not exist yet
fn resolve_path(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Some(resolved);
    }
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::canonicalize(parent).ok().map(|dir| dir.join(name))
}

/// True when both paths reach the same file: `..`, relative spellings,
/// symlinks and (on unix) hard links included
pub fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(ma), Ok(mb)) = (std::fs::metadata(a), std::fs::metadata(b)) {
            return ma.dev() == mb.dev() && ma.ino() == mb.ino();
        }
    }
    match (resolve_path(a), resolve_path(b)) {
        (Some(ra), Some(rb)) => ra == rb,
        _ => a == b,
    }
}

/// Refuse an output path that would overwrite the input
pub fn ensure_distinct_output(input: &Path, output: &Path) -> CompressResult<()> {
    if same_file(input, output) {
        return Err(CompressError::Validation(
            t!("errors.same_file", path = output.display()).into_owned(),
        ));
    }
    Ok(())
}

/// Name of the compressed artifact: `compressed_<stem>.mp4`
pub fn output_file_name(source_file_name: &str) -> String {
    let stem = match source_file_name.rfind('.') {
        Some(idx) if idx > 0 => &source_file_name[..idx],
        _ => source_file_name,
    };
    format!("compressed_{}.mp4", stem)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Width, height and duration read from ffprobe's JSON output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeData {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

/// Parse `ffprobe -of json` output for the first video stream
pub fn parse_probe_output(json: &str) -> CompressResult<ProbeData> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| CompressError::MetadataUnavailable(format!("bad ffprobe output: {}", e)))?;

    let stream = probe.streams.first().ok_or_else(|| {
        CompressError::MetadataUnavailable("no video stream found".to_string())
    })?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(CompressError::MetadataUnavailable(
                "video stream has no dimensions".to_string(),
            ))
        }
    };

    let duration_seconds = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| CompressError::MetadataUnavailable("duration unknown".to_string()))?;

    Ok(ProbeData {
        width,
        height,
        duration_seconds,
    })
}

/// Run ffprobe on a file and return its video metadata
pub async fn probe_file(path: &Path) -> Result<ProbeData> {
    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height:format=duration",
            "-of",
            "json",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompressError::MetadataUnavailable(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr.trim()
        ))
        .into());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    log::debug!("ffprobe output for {}: {}", path.display(), stdout.trim());
    Ok(parse_probe_output(&stdout)?)
}

/// Probe a user-selected file into a `SourceVideo`
pub async fn probe_source(path: &Path) -> Result<SourceVideo> {
    ensure_video_file(path)?;

    let byte_size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?
        .len();
    let data = probe_file(path).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let source = SourceVideo::new(
        file_name,
        byte_size,
        data.width,
        data.height,
        data.duration_seconds,
    )?;
    log::info!(
        "Probed {}: {}x{}, {:.2}s, {} bytes",
        source.file_name,
        source.width,
        source.height,
        source.duration_seconds,
        source.byte_size
    );
    Ok(source)
}

/// Probe a finished output file into a `CompressionResult`
pub async fn probe_result(path: &Path) -> Result<CompressionResult> {
    let byte_size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?
        .len();
    let data = probe_file(path).await?;

    Ok(CompressionResult {
        byte_size,
        width: data.width,
        height: data.height,
        duration_seconds: data.duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("holiday.mov"), "compressed_holiday.mp4");
        assert_eq!(output_file_name("my.clip.mkv"), "compressed_my.clip.mp4");
        assert_eq!(output_file_name("noext"), "compressed_noext.mp4");
        assert_eq!(output_file_name(".hidden"), "compressed_.hidden.mp4");
    }

    #[test]
    fn test_ensure_video_file() {
        assert!(ensure_video_file(Path::new("a/b/clip.MP4")).is_ok());
        assert!(ensure_video_file(Path::new("clip.webm")).is_ok());
        assert!(matches!(
            ensure_video_file(Path::new("notes.txt")),
            Err(CompressError::UnsupportedInput(_))
        ));
        assert!(matches!(
            ensure_video_file(Path::new("README")),
            Err(CompressError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_same_file_resolves_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"source").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let dotted = dir.path().join("sub").join("..").join("clip.mp4");
        assert_ne!(input, dotted);
        assert!(same_file(&input, &dotted));
        assert!(matches!(
            ensure_distinct_output(&input, &dotted),
            Err(CompressError::Validation(_))
        ));

        let fresh = dir.path().join("sub").join("..").join("compressed_clip.mp4");
        assert!(!same_file(&input, &fresh));
        assert!(ensure_distinct_output(&input, &fresh).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_same_file_follows_links() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"source").unwrap();

        let symlink = dir.path().join("alias.mp4");
        std::os::unix::fs::symlink(&input, &symlink).unwrap();
        assert!(same_file(&input, &symlink));

        let hardlink = dir.path().join("hard.mp4");
        std::fs::hard_link(&input, &hardlink).unwrap();
        assert!(same_file(&input, &hardlink));
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "programs": [],
            "streams": [{ "width": 1920, "height": 1080 }],
            "format": { "duration": "12.480000" }
        }"#;
        let data = parse_probe_output(json).unwrap();
        assert_eq!(data.width, 1920);
        assert_eq!(data.height, 1080);
        assert!((data.duration_seconds - 12.48).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_without_stream() {
        let json = r#"{ "streams": [], "format": { "duration": "3.0" } }"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(CompressError::MetadataUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_probe_output_zero_height() {
        let json = r#"{ "streams": [{ "width": 640, "height": 0 }], "format": { "duration": "3.0" } }"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(CompressError::MetadataUnavailable(_))
        ));
    }

    #[test]
    fn test_parse_probe_output_missing_duration() {
        let json = r#"{ "streams": [{ "width": 640, "height": 360 }], "format": {} }"#;
        assert!(parse_probe_output(json).is_err());
    }
}
