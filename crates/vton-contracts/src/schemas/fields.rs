//! Field names the try-on providers are known to use.
//!
//! Each enum lists its variants in probe order: the first present,
//! non-empty field wins.

use serde_json::{Map, Value};

/// Where a finished artifact may appear in a submit or poll payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactField {
    OutputImgUrl,
    Result,
    ImageUrl,
    ResultUrl,
    OutputUrl,
    ResultImageUrl,
    ResultImageBase64,
}

impl ArtifactField {
    pub const PROBE_ORDER: [ArtifactField; 7] = [
        Self::OutputImgUrl,
        Self::Result,
        Self::ImageUrl,
        Self::ResultUrl,
        Self::OutputUrl,
        Self::ResultImageUrl,
        Self::ResultImageBase64,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::OutputImgUrl => "output_img_url",
            Self::Result => "result",
            Self::ImageUrl => "image_url",
            Self::ResultUrl => "result_url",
            Self::OutputUrl => "output_url",
            Self::ResultImageUrl => "resultImageUrl",
            Self::ResultImageBase64 => "resultImageBase64",
        }
    }

    /// First artifact field in `body` carrying a usable value.
    pub fn probe(body: &Map<String, Value>) -> Option<(ArtifactField, &str)> {
        Self::PROBE_ORDER.into_iter().find_map(|field| {
            body.get(field.key())
                .and_then(artifact_text)
                .map(|text| (field, text))
        })
    }
}

/// Where an asynchronous job identifier may appear in a submit payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobIdField {
    Id,
    TaskId,
    SessionId,
}

impl JobIdField {
    pub const PROBE_ORDER: [JobIdField; 3] = [Self::Id, Self::TaskId, Self::SessionId];

    pub fn key(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::TaskId => "task_id",
            Self::SessionId => "sessionId",
        }
    }

    pub fn probe(body: &Map<String, Value>) -> Option<(JobIdField, String)> {
        Self::PROBE_ORDER.into_iter().find_map(|field| {
            let id = match body.get(field.key())? {
                Value::String(text) => non_empty(text)?.to_string(),
                Value::Number(number) => number.to_string(),
                _ => return None,
            };
            Some((field, id))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusField {
    Status,
    State,
}

impl StatusField {
    pub const PROBE_ORDER: [StatusField; 2] = [Self::Status, Self::State];

    pub fn key(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::State => "state",
        }
    }

    /// Every non-empty status-like string in probe order, lowercased.
    pub fn collect(body: &Map<String, Value>) -> Vec<(StatusField, String)> {
        Self::PROBE_ORDER
            .into_iter()
            .filter_map(|field| {
                body.get(field.key())
                    .and_then(Value::as_str)
                    .and_then(non_empty)
                    .map(|text| (field, text.to_ascii_lowercase()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorField {
    Error,
    ErrorMessage,
    ErrorMessageSnake,
    Message,
}

impl ErrorField {
    pub const PROBE_ORDER: [ErrorField; 4] = [
        Self::Error,
        Self::ErrorMessage,
        Self::ErrorMessageSnake,
        Self::Message,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::ErrorMessage => "errorMessage",
            Self::ErrorMessageSnake => "error_message",
            Self::Message => "message",
        }
    }

    pub fn probe(body: &Map<String, Value>) -> Option<String> {
        Self::PROBE_ORDER.into_iter().find_map(|field| {
            match body.get(field.key())? {
                Value::String(text) => non_empty(text).map(str::to_string),
                Value::Object(nested) => nested
                    .get("message")
                    .and_then(Value::as_str)
                    .and_then(non_empty)
                    .map(str::to_string),
                _ => None,
            }
        })
    }
}

/// Where an upload host reports the public URL of a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadUrlField {
    DataUrl,
    DataLink,
    Url,
}

impl UploadUrlField {
    pub const PROBE_ORDER: [UploadUrlField; 3] = [Self::DataUrl, Self::DataLink, Self::Url];

    pub fn path(self) -> &'static str {
        match self {
            Self::DataUrl => "data.url",
            Self::DataLink => "data.link",
            Self::Url => "url",
        }
    }

    pub fn probe(body: &Map<String, Value>) -> Option<(UploadUrlField, &str)> {
        Self::PROBE_ORDER.into_iter().find_map(|field| {
            let value = match field {
                Self::DataUrl => body.get("data")?.get("url"),
                Self::DataLink => body.get("data")?.get("link"),
                Self::Url => body.get("url"),
            }?;
            value
                .as_str()
                .and_then(non_empty)
                .filter(|text| is_http_url(text))
                .map(|text| (field, text))
        })
    }
}

pub fn progress(body: &Map<String, Value>) -> Option<f64> {
    match body.get("progress")? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    }
}

pub fn is_http_url(text: &str) -> bool {
    let lowered = text.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn artifact_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Array(rows) => rows.first().and_then(artifact_text),
        Value::Object(obj) => obj.get("url").and_then(Value::as_str).and_then(non_empty),
        _ => None,
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
