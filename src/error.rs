//! Error taxonomy for vidsqueeze
//! Policy and executor failures are typed; the CLI layer wraps them in anyhow.

/// Errors surfaced by the compression pipeline
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// Bad user input (custom resolution, quality factor, resolution string)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The selected file is not a recognized video type
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// ffmpeg could not be started or exited with an error
    #[error("Compression failed: {0}")]
    ExecutorFailure(String),

    /// Source dimensions or duration never resolved
    #[error("Video metadata unavailable: {0}")]
    MetadataUnavailable(String),

    /// A compression is already running
    #[error("A compression is already in progress")]
    Busy,
}

pub type CompressResult<T> = std::result::Result<T, CompressError>;
