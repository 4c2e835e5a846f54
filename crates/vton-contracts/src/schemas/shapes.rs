use serde_json::{Map, Value};

use super::fields::{ArtifactField, ErrorField, JobIdField, StatusField, UploadUrlField};

const COMPLETED_WORDS: [&str; 3] = ["completed", "success", "done"];
const FAILED_WORDS: [&str; 2] = ["failed", "error"];

/// Outer wrapper of a provider response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope<'a> {
    /// Fields sit at the top level.
    Flat(&'a Map<String, Value>),
    /// `{"success": bool, "data": {...}}` as returned by session-style backends.
    Wrapped {
        outer: &'a Map<String, Value>,
        data: &'a Map<String, Value>,
    },
}

impl<'a> Envelope<'a> {
    pub fn open(body: &'a Value) -> Option<Self> {
        let outer = body.as_object()?;
        let Some(data) = outer.get("data").and_then(Value::as_object) else {
            return Some(Self::Flat(outer));
        };
        let top_level_is_payload = ArtifactField::probe(outer).is_some()
            || JobIdField::probe(outer).is_some()
            || !StatusField::collect(outer).is_empty();
        if outer.contains_key("success") || !top_level_is_payload {
            return Some(Self::Wrapped { outer, data });
        }
        Some(Self::Flat(outer))
    }

    pub fn body(&self) -> &'a Map<String, Value> {
        match *self {
            Self::Flat(body) => body,
            Self::Wrapped { data, .. } => data,
        }
    }

    /// Message for an explicit `"success": false`, if the provider sent one.
    pub fn rejection(&self) -> Option<String> {
        let outer: &Map<String, Value> = match *self {
            Self::Flat(outer) | Self::Wrapped { outer, .. } => outer,
        };
        if outer.get("success").and_then(Value::as_bool) != Some(false) {
            return None;
        }
        let message = ErrorField::probe(outer)
            .or_else(|| ErrorField::probe(self.body()))
            .unwrap_or_else(|| "provider reported success=false".to_string());
        Some(message)
    }
}

/// How a submission response should be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitShape {
    Immediate { field: ArtifactField, value: String },
    Task { field: JobIdField, task_id: String },
    Rejected { message: String },
    Unexpected,
}

pub fn classify_submit(body: &Value) -> SubmitShape {
    let Some(envelope) = Envelope::open(body) else {
        return SubmitShape::Unexpected;
    };
    if let Some(message) = envelope.rejection() {
        return SubmitShape::Rejected { message };
    }
    let fields = envelope.body();
    if let Some((field, value)) = ArtifactField::probe(fields) {
        return SubmitShape::Immediate {
            field,
            value: value.to_string(),
        };
    }
    if let Some((field, task_id)) = JobIdField::probe(fields) {
        return SubmitShape::Task { field, task_id };
    }
    SubmitShape::Unexpected
}

/// What one status response says about the job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollShape {
    /// An artifact field is present. `output_img_url` completes the job
    /// whatever the status says; other fields lose to a failed status.
    Artifact {
        field: ArtifactField,
        raw_status: String,
    },
    Completed {
        raw_status: String,
    },
    Failed {
        raw_status: String,
        message: String,
    },
    /// Anything else, including unknown or missing status strings.
    Pending {
        raw_status: String,
        progress: Option<f64>,
    },
}

impl PollShape {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

pub fn classify_poll(body: &Value) -> PollShape {
    let Some(envelope) = Envelope::open(body) else {
        return PollShape::Pending {
            raw_status: String::new(),
            progress: None,
        };
    };
    let fields = envelope.body();
    let statuses = StatusField::collect(fields);
    let raw_status = statuses
        .first()
        .map(|(_, text)| text.clone())
        .unwrap_or_default();

    let artifact = ArtifactField::probe(fields);
    if let Some((field @ ArtifactField::OutputImgUrl, _)) = artifact {
        return PollShape::Artifact { field, raw_status };
    }
    if let Some((_, word)) = statuses
        .iter()
        .find(|(_, text)| FAILED_WORDS.contains(&text.as_str()))
    {
        let message = ErrorField::probe(fields)
            .or_else(|| envelope.rejection())
            .unwrap_or_else(|| "Unknown error".to_string());
        return PollShape::Failed {
            raw_status: word.clone(),
            message,
        };
    }
    if let Some((field, _)) = artifact {
        return PollShape::Artifact { field, raw_status };
    }
    if let Some((_, word)) = statuses
        .iter()
        .find(|(_, text)| COMPLETED_WORDS.contains(&text.as_str()))
    {
        return PollShape::Completed {
            raw_status: word.clone(),
        };
    }
    PollShape::Pending {
        raw_status,
        progress: super::fields::progress(fields),
    }
}

/// What an upload host returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReply {
    Hosted { field: UploadUrlField, url: String },
    Rejected { message: String },
    Unrecognized,
}

pub fn classify_upload(body: &Value) -> UploadReply {
    let Some(outer) = body.as_object() else {
        return UploadReply::Unrecognized;
    };
    if outer.get("success").and_then(Value::as_bool) == Some(false) {
        let message = ErrorField::probe(outer)
            .or_else(|| {
                outer
                    .get("data")
                    .and_then(Value::as_object)
                    .and_then(ErrorField::probe)
            })
            .unwrap_or_else(|| "upload host reported success=false".to_string());
        return UploadReply::Rejected { message };
    }
    match UploadUrlField::probe(outer) {
        Some((field, url)) => UploadReply::Hosted {
            field,
            url: url.to_string(),
        },
        None => UploadReply::Unrecognized,
    }
}
