use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;
use crate::jobs::{AssetState, JobRequest, JobStatus, PersistedArtifact};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

const INLINE_KEYS: [&str; 4] = ["resultimagebase64", "image", "b64_json", "userimage"];
const INLINE_MIN_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Completed,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub label: String,
    pub mime: String,
    pub bytes: u64,
    pub state: AssetState,
    /// `(provider, error)` for every failed attempt, in order.
    #[serde(default)]
    pub failures: Vec<(String, String)>,
}

/// Everything needed to audit one run after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub schema_version: u64,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: Option<ReceiptOutcome>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub degraded_reasons: Vec<String>,
    #[serde(default)]
    pub uploads: Vec<UploadRecord>,
    pub request: Option<JobRequest>,
    pub task_id: Option<String>,
    pub job_status: Option<JobStatus>,
    pub polls: u32,
    #[serde(default)]
    pub provider_responses: Map<String, Value>,
    pub artifact: Option<PersistedArtifact>,
}

impl RunReceipt {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            schema_version: RECEIPT_SCHEMA_VERSION,
            run_id: run_id.into(),
            started_at: now_utc_iso(),
            finished_at: None,
            outcome: None,
            failed_stage: None,
            error: None,
            degraded_reasons: Vec::new(),
            uploads: Vec::new(),
            request: None,
            task_id: None,
            job_status: None,
            polls: 0,
            provider_responses: Map::new(),
            artifact: None,
        }
    }

    pub fn record_response(&mut self, stage: &str, body: &Value) {
        self.provider_responses
            .insert(stage.to_string(), sanitize_payload(body));
    }

    pub fn finish(&mut self, outcome: ReceiptOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(now_utc_iso());
    }
}

pub fn write_receipt(path: &Path, receipt: &RunReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

/// Replaces large inline image payloads so receipts stay readable.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                let is_inline = match row {
                    Value::String(text) => {
                        text.starts_with("data:")
                            || (INLINE_KEYS.contains(&lowered.as_str())
                                && text.len() >= INLINE_MIN_CHARS)
                    }
                    _ => false,
                };
                if is_inline {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
