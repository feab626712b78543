//! Compression module for vidsqueeze
//! Renders ffmpeg arguments from encoding parameters and runs one ffmpeg
//! process at a time, forwarding its progress.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::error::{CompressError, CompressResult};
use crate::types::{CompressionResult, CompressionSettings, EncodingParameters};

/// Film grain added after heavy downscaling
pub const GRAIN_FILTER: &str = "noise=alls=20:allf=t";

/// Lines of ffmpeg stderr kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Callback receiving the completion ratio (0.0 - 1.0)
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build the ffmpeg argument list for one compression.
///
/// Order is fixed: input, codecs and quality, optional rate cap, optional
/// filter chain, faststart, output. Filters must come before the output.
pub fn render_arguments(
    params: &EncodingParameters,
    settings: &CompressionSettings,
    input: &str,
    output: &str,
) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        input.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-crf".to_string(),
        params.quality_factor.to_string(),
        "-preset".to_string(),
        settings.preset.clone(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        settings.audio_bitrate.clone(),
    ];

    if let Some(bitrate) = params.max_bitrate_kbps {
        args.push("-maxrate".to_string());
        args.push(format!("{}k", bitrate));
        args.push("-bufsize".to_string());
        args.push(format!("{}k", bitrate * 2));
    }

    if let Some(filters) = filter_chain(params) {
        args.push("-vf".to_string());
        args.push(filters);
    }

    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(output.to_string());
    args
}

/// Scale then grain, joined into a single filter chain.
/// ffmpeg honours only the last `-vf`, so both must share one flag.
fn filter_chain(params: &EncodingParameters) -> Option<String> {
    let mut filters = Vec::new();
    if let Some(target) = params.target_resolution {
        filters.push(format!(
            "scale={}:{}:flags=lanczos",
            target.width, target.height
        ));
    }
    if params.apply_grain_filter {
        filters.push(GRAIN_FILTER.to_string());
    }

    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}

/// Turns ffmpeg `-progress` lines into a non-decreasing ratio
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration_seconds: f64,
    last: f64,
}

impl ProgressTracker {
    pub fn new(duration_seconds: f64) -> Self {
        Self {
            duration_seconds,
            last: 0.0,
        }
    }

    /// Feed one `key=value` line; returns the ratio when it advanced
    pub fn update(&mut self, line: &str) -> Option<f64> {
        let (key, value) = line.trim().split_once('=')?;
        let ratio = match key {
            // out_time_ms is microseconds as well
            "out_time_us" | "out_time_ms" => {
                if self.duration_seconds <= 0.0 {
                    return None;
                }
                let micros: f64 = value.trim().parse().ok()?;
                (micros / 1_000_000.0 / self.duration_seconds).clamp(0.0, 1.0)
            }
            "progress" if value.trim() == "end" => 1.0,
            _ => return None,
        };

        if ratio > self.last {
            self.last = ratio;
            Some(ratio)
        } else {
            None
        }
    }

    pub fn ratio(&self) -> f64 {
        self.last
    }
}

/// Everything needed to run one compression
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub params: EncodingParameters,
    pub settings: CompressionSettings,
    /// Source duration, used to scale progress
    pub duration_seconds: f64,
}

impl CompressionJob {
    pub fn arguments(&self) -> Vec<String> {
        self.arguments_to(&self.output)
    }

    /// Same arguments with ffmpeg writing somewhere else
    pub fn arguments_to(&self, output: &Path) -> Vec<String> {
        render_arguments(
            &self.params,
            &self.settings,
            &self.input.to_string_lossy(),
            &output.to_string_lossy(),
        )
    }
}

/// Hidden sibling of the output that ffmpeg writes into. Keeps the
/// extension so ffmpeg still picks the muxer from it.
fn staging_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let mut name = format!(
        ".{}.vidsqueeze-{}-{}",
        stem,
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    if let Some(ext) = output.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    output.with_file_name(name)
}

/// Clears the in-flight flag when dropped, on success and failure alike
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs ffmpeg, allowing at most one compression at a time
#[derive(Debug, Clone)]
pub struct Compressor {
    ffmpeg: String,
    in_flight: Arc<AtomicBool>,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Compressor {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claim the executor, failing with `Busy` if a compression is running
    pub fn begin(&self) -> CompressResult<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CompressError::Busy)?;
        Ok(InFlightGuard {
            flag: self.in_flight.clone(),
        })
    }

    /// Run ffmpeg for a job and probe the produced file.
    ///
    /// ffmpeg writes to a staging sibling that replaces the output only once
    /// it probes cleanly. A failed run leaves any existing output untouched.
    pub async fn compress(
        &self,
        job: &CompressionJob,
        progress: Option<ProgressCallback>,
    ) -> Result<CompressionResult> {
        let _guard = self.begin()?;
        crate::video::ensure_distinct_output(&job.input, &job.output)?;

        let staging = staging_path(&job.output);
        let outcome = self.finish_staged(job, &staging, progress.as_ref()).await;
        if outcome.is_err() {
            remove_staging(&staging).await;
        }
        outcome
    }

    async fn finish_staged(
        &self,
        job: &CompressionJob,
        staging: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<CompressionResult> {
        self.run(job, staging, progress).await?;
        let result = crate::video::probe_result(staging).await?;
        tokio::fs::rename(staging, &job.output).await.map_err(|e| {
            CompressError::ExecutorFailure(format!(
                "Failed to move {} to {}: {}",
                staging.display(),
                job.output.display(),
                e
            ))
        })?;
        info!("Successfully compressed: {}", job.output.display());
        Ok(result)
    }

    async fn run(
        &self,
        job: &CompressionJob,
        staging: &Path,
        progress: Option<&ProgressCallback>,
    ) -> CompressResult<()> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-nostats".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
        ];
        args.extend(job.arguments_to(staging));
        debug!("FFmpeg command args: {:?}", args);
        info!(
            "Compressing {} -> {}",
            job.input.display(),
            job.output.display()
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CompressError::ExecutorFailure(format!("Failed to start {}: {}", self.ffmpeg, e))
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Err(e) = stderr.read_to_end(&mut buf).await {
                    warn!("Could not read ffmpeg stderr: {}", e);
                }
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let mut tracker = ProgressTracker::new(job.duration_seconds);
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        if let Some(ratio) = tracker.update(&text) {
                            if let Some(cb) = progress {
                                cb(ratio);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Stopped reading ffmpeg progress: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            CompressError::ExecutorFailure(format!("Failed to wait for ffmpeg: {}", e))
        })?;

        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let tail = stderr_tail(&stderr);
            error!("FFmpeg failed for {}: {}", job.input.display(), tail);
            return Err(CompressError::ExecutorFailure(format!(
                "ffmpeg exited with {}: {}",
                status, tail
            )));
        }

        if tracker.ratio() < 1.0 {
            if let Some(cb) = progress {
                cb(1.0);
            }
        }
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Only ever called on a path from `staging_path`
async fn remove_staging(path: &Path) {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;
    use std::sync::Mutex;

    fn params(
        max_bitrate_kbps: Option<u32>,
        target: Option<Dimensions>,
        grain: bool,
    ) -> EncodingParameters {
        EncodingParameters {
            quality_factor: 23,
            max_bitrate_kbps,
            target_resolution: target,
            apply_grain_filter: grain,
            upscale_detected: false,
        }
    }

    #[test]
    fn test_render_minimal_arguments() {
        let args = render_arguments(
            &params(None, None, false),
            &CompressionSettings::default(),
            "input.mp4",
            "output.mp4",
        );
        assert_eq!(
            args,
            vec![
                "-i", "input.mp4", "-c:v", "libx264", "-crf", "23", "-preset", "medium", "-c:a",
                "aac", "-b:a", "128k", "-movflags", "+faststart", "output.mp4"
            ]
        );
    }

    #[test]
    fn test_render_full_arguments_order() {
        let args = render_arguments(
            &params(Some(5000), Some(Dimensions::new(854, 480)), true),
            &CompressionSettings {
                preset: "slow".to_string(),
                audio_bitrate: "128k".to_string(),
            },
            "in.mov",
            "out.mp4",
        );
        assert_eq!(
            args,
            vec![
                "-i",
                "in.mov",
                "-c:v",
                "libx264",
                "-crf",
                "23",
                "-preset",
                "slow",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-maxrate",
                "5000k",
                "-bufsize",
                "10000k",
                "-vf",
                "scale=854:480:flags=lanczos,noise=alls=20:allf=t",
                "-movflags",
                "+faststart",
                "out.mp4"
            ]
        );
    }

    #[test]
    fn test_filters_precede_output() {
        let args = render_arguments(
            &params(None, Some(Dimensions::new(1280, 720)), false),
            &CompressionSettings::default(),
            "a.mp4",
            "b.mp4",
        );
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        let codec = args.iter().position(|a| a == "-c:v").unwrap();
        assert!(codec < vf);
        assert_eq!(args[vf + 1], "scale=1280:720:flags=lanczos");
        assert_eq!(args.last().unwrap(), "b.mp4");
        assert!(!args.iter().any(|a| a == "-maxrate"));
    }

    #[test]
    fn test_progress_tracker_monotonic() {
        let mut tracker = ProgressTracker::new(10.0);
        assert_eq!(tracker.update("frame=10"), None);
        assert_eq!(tracker.update("out_time_us=2500000"), Some(0.25));
        assert_eq!(tracker.update("out_time_ms=2000000"), None);
        assert_eq!(tracker.update("out_time_us=N/A"), None);
        assert_eq!(tracker.update("out_time_us=50000000"), Some(1.0));
        assert_eq!(tracker.update("progress=end"), None);
        assert_eq!(tracker.ratio(), 1.0);
    }

    #[test]
    fn test_progress_tracker_unknown_duration() {
        let mut tracker = ProgressTracker::new(0.0);
        assert_eq!(tracker.update("out_time_us=1000000"), None);
        assert_eq!(tracker.update("progress=end"), Some(1.0));
    }

    #[test]
    fn test_second_compression_rejected_while_busy() {
        let compressor = Compressor::default();
        let guard = compressor.begin().unwrap();
        assert!(compressor.is_busy());
        assert!(matches!(compressor.begin(), Err(CompressError::Busy)));
        drop(guard);
        assert!(!compressor.is_busy());
        assert!(compressor.begin().is_ok());
    }

    #[tokio::test]
    async fn test_executor_failure_releases_guard() {
        let compressor = Compressor::new("vidsqueeze-missing-ffmpeg-binary");
        let job = CompressionJob {
            input: PathBuf::from("missing-input.mp4"),
            output: std::env::temp_dir().join("vidsqueeze-never-written.mp4"),
            params: params(None, None, false),
            settings: CompressionSettings::default(),
            duration_seconds: 1.0,
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let err = compressor
            .compress(
                &job,
                Some(Box::new(move |r| sink.lock().unwrap().push(r))),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompressError>(),
            Some(CompressError::ExecutorFailure(_))
        ));
        assert!(!compressor.is_busy());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        let output = Path::new("out/compressed_clip.mp4");
        let first = staging_path(output);
        let second = staging_path(output);
        assert_ne!(first, second);
        assert_eq!(first.parent(), output.parent());
        assert_eq!(first.extension().unwrap(), "mp4");
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".compressed_clip.vidsqueeze-"));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn job_in(dir: &Path, output: PathBuf) -> CompressionJob {
        CompressionJob {
            input: dir.join("clip.mp4"),
            output,
            params: params(None, None, false),
            settings: CompressionSettings::default(),
            duration_seconds: 1.0,
        }
    }

    fn leftover_staging(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".vidsqueeze-"))
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_run_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"source").unwrap();
        let output = dir.path().join("compressed_clip.mp4");
        std::fs::write(&output, b"previous").unwrap();

        let ffmpeg = fake_ffmpeg(
            dir.path(),
            r#"for last; do :; done
echo partial > "$last"
echo "Invalid data found when processing input" >&2
exit 1"#,
        );
        let err = Compressor::new(ffmpeg)
            .compress(&job_in(dir.path(), output.clone()), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CompressError>(),
            Some(CompressError::ExecutorFailure(msg)) if msg.contains("Invalid data found")
        ));
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
        assert_eq!(std::fs::read(dir.path().join("clip.mp4")).unwrap(), b"source");
        assert!(leftover_staging(dir.path()).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_spelled_as_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"source").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let marker = dir.path().join("ran");

        let ffmpeg = fake_ffmpeg(
            dir.path(),
            &format!("touch '{}'\nexit 1", marker.display()),
        );
        let output = dir.path().join("sub").join("..").join("clip.mp4");
        let compressor = Compressor::new(ffmpeg);
        let err = compressor
            .compress(&job_in(dir.path(), output), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<CompressError>(),
            Some(CompressError::Validation(_))
        ));
        assert!(!marker.exists());
        assert_eq!(std::fs::read(dir.path().join("clip.mp4")).unwrap(), b"source");
        assert!(!compressor.is_busy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_binary_stderr_still_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(
            dir.path(),
            r#"printf '\377\376 garbled\n' >&2
echo "Invalid data found when processing input" >&2
exit 1"#,
        );
        let job = job_in(dir.path(), dir.path().join("compressed_clip.mp4"));
        let err = Compressor::new(ffmpeg)
            .run(&job, &staging_path(&job.output), None)
            .await
            .unwrap_err();
        match err {
            CompressError::ExecutorFailure(msg) => {
                assert!(msg.contains("Invalid data found"), "{}", msg)
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_survives_binary_line() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = fake_ffmpeg(
            dir.path(),
            r#"printf 'frame=1\n\377\376\nout_time_us=500000\nprogress=end\n'
exit 0"#,
        );
        let job = job_in(dir.path(), dir.path().join("compressed_clip.mp4"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Box::new(move |r| sink.lock().unwrap().push(r));

        Compressor::new(ffmpeg)
            .run(&job, &staging_path(&job.output), Some(&callback))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
    }

    #[test]
    fn test_stderr_tail() {
        let long: String = (0..30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&long);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
