//! Errors raised while building, submitting and fetching remote jobs.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong for a single task or retrieval.
///
/// Batch runs collect these per task instead of aborting, so every variant
/// carries enough context to be logged on its own.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Date range is empty, reversed or partitioned with a zero length.
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    /// Bounding box corners are out of order or off the globe.
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// Login was rejected or no credentials exist for the portal.
    #[error("Authentication failed for {portal}: {reason}")]
    Authentication { portal: String, reason: String },

    /// The remote queue refused the job description.
    #[error("Submission of `{task_name}` failed: {reason}")]
    Submission { task_name: String, reason: String },

    /// The remote job finished in an error state.
    #[error("Remote job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    /// The remote job never reached completion within the poll budget.
    #[error("Remote job {job_id} stalled after {attempts} status checks ({elapsed_secs}s)")]
    Stalled {
        job_id: String,
        attempts: u32,
        elapsed_secs: u64,
    },

    /// A file stream ended early or did not match the manifest.
    #[error("Partial download of {}: {reason}", path.display())]
    PartialDownload { path: PathBuf, reason: String },

    /// The dataset name has no known remote counterpart.
    #[error("Unknown product `{0}`")]
    UnknownProduct(String),

    /// Non-retryable HTTP status from the remote API.
    #[error("HTTP {status} from {url}")]
    Api { status: u16, url: String },

    /// The remote API answered with something we could not interpret.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration file missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Returns `true` for errors where repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
            }
            DownloadError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` when the server cannot have acted on the request: the
    /// connection was never established, or it answered 429 or 503.
    pub fn is_replay_safe(&self) -> bool {
        match self {
            DownloadError::Http(e) => e.is_connect(),
            DownloadError::Api { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

// -- Tests -------------------------------------------------------------------
