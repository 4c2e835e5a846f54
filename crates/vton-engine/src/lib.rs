//! Resilient try-on job execution against third-party HTTP endpoints:
//! upload with fallback, shape-aware submission, bounded polling,
//! schema-tolerant extraction and atomic download.

pub mod clock;
pub mod download;
pub mod error;
pub mod extract;
pub mod health;
pub mod pipeline;
pub mod poll;
pub mod submit;
pub mod transport;
pub mod upload;

use serde_json::{Map, Value};
use vton_contracts::config::AuthConfig;
use vton_contracts::events::{EventKind, EventWriter};

pub use clock::{CancellationToken, Clock, ManualClock, SystemClock, Wake};
pub use download::ResultDownloader;
pub use error::{
    DownloadError, ExtractError, PipelineError, PollError, Stage, SubmitError, UploadError,
    UploadFailure,
};
pub use extract::{extract, Extracted};
pub use health::{check_health, HealthReport};
pub use pipeline::{RunInput, RunOutcome, RunReport, TryOnPipeline};
pub use poll::{JobPoller, PollOutcome, PollReport};
pub use submit::{JobSubmitter, Submission};
pub use transport::{ReqwestTransport, Transport, TransportError};
pub use upload::{sniff_mime, Resolution, UploadResolver};

/// Event sink bound to one run. Several runs may share the same writer.
///
/// Emission is best effort: a failed write is reported on stderr and never
/// fails the run.
#[derive(Debug, Clone)]
pub struct RunEvents {
    writer: EventWriter,
    run_id: String,
}

impl RunEvents {
    pub fn new(writer: EventWriter, run_id: impl Into<String>) -> Self {
        Self {
            writer,
            run_id: run_id.into(),
        }
    }

    pub fn emit(&self, kind: EventKind, payload: Value) {
        let mut payload = map_object(payload);
        payload
            .entry("run_id")
            .or_insert_with(|| Value::String(self.run_id.clone()));
        if let Err(err) = self.writer.emit(kind, payload) {
            eprintln!(
                "vton-rs: failed writing {} event to {}: {err:#}",
                kind.as_str(),
                self.writer.path().display()
            );
        }
    }
}

/// Headers and body field derived from an endpoint's auth block.
#[derive(Debug, Clone, Default)]
pub(crate) struct Credentials {
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) field: Option<(String, String)>,
}

pub(crate) fn credentials(auth: &AuthConfig) -> Result<Credentials, String> {
    let mut creds = Credentials::default();
    let expose = |secret: &vton_contracts::config::Secret| {
        secret
            .expose()
            .map(str::to_string)
            .ok_or_else(|| match secret.env.as_deref() {
                Some(key) => format!("credential from {key} was not resolved"),
                None => "credential has no value".to_string(),
            })
    };
    match auth {
        AuthConfig::None => {}
        AuthConfig::Header {
            name,
            prefix,
            secret,
        } => creds
            .headers
            .push((name.clone(), format!("{prefix}{}", expose(secret)?))),
        AuthConfig::Bearer { secret } => creds
            .headers
            .push(("Authorization".to_string(), format!("Bearer {}", expose(secret)?))),
        AuthConfig::FormField { name, secret } => {
            creds.field = Some((name.clone(), expose(secret)?));
        }
    }
    Ok(creds)
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
