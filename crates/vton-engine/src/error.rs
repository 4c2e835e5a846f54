use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use vton_contracts::jobs::AssetStateError;

use crate::transport::TransportError;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Upload,
    Submit,
    Poll,
    Extract,
    Download,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Submit => "submit",
            Self::Poll => "poll",
            Self::Extract => "extract",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub provider: String,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload exhausted for {label}: {}", describe_attempts(.attempts))]
    Exhausted {
        label: String,
        attempts: Vec<UploadFailure>,
    },
    #[error(transparent)]
    AlreadySettled(#[from] AssetStateError),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("submit transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("submit credential unavailable: {0}")]
    Credential(String),
    #[error("submit rejected credentials (HTTP {status}): {body}")]
    Auth { status: u16, body: String },
    #[error("submit failed (HTTP {status}): {body}")]
    Status { status: u16, body: String },
    #[error("submit rejected by provider: {message}")]
    Rejected { message: String, body: String },
    #[error("submit response has no result or job id: {body}")]
    UnexpectedShape { body: String },
}

/// Local failure that keeps the poller from sending a status request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("poll credential unavailable: {0}")]
    Credential(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no result field in completed payload (fields present: [{}])", .fields.join(", "))]
    NoResultField { fields: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download failed (HTTP {status}) from {url}")]
    Failed { status: u16, url: String },
    #[error("download transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("inline result could not be decoded: {0}")]
    DecodeFailed(String),
    #[error("artifact already persisted at {}", .path.display())]
    AlreadyPersisted { path: PathBuf },
    #[error("failed writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error("job {task_id} failed ({raw_status}): {message}")]
    JobFailed {
        task_id: String,
        message: String,
        raw_status: String,
    },
    #[error(
        "job {task_id} timed out after {:.1}s and {polls} polls{}",
        .elapsed.as_secs_f64(),
        describe_last_error(.last_error)
    )]
    TimedOut {
        task_id: String,
        elapsed: Duration,
        polls: u32,
        last_error: Option<String>,
    },
    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Upload(_) => Stage::Upload,
            Self::Submit(_) => Stage::Submit,
            Self::Poll(_) | Self::JobFailed { .. } | Self::TimedOut { .. } => Stage::Poll,
            Self::Cancelled { stage } => *stage,
            Self::Extract(_) => Stage::Extract,
            Self::Download(_) => Stage::Download,
        }
    }
}

fn describe_attempts(attempts: &[UploadFailure]) -> String {
    if attempts.is_empty() {
        return "no upload targets configured".to_string();
    }
    attempts
        .iter()
        .map(|row| format!("{}: {}", row.provider, row.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_last_error(last_error: &Option<String>) -> String {
    match last_error {
        Some(err) => format!(" (last error: {err})"),
        None => String::new(),
    }
}
