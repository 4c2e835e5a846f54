use std::sync::Arc;

use serde_json::{json, Map, Value};
use vton_contracts::config::ProcessingEndpoint;
use vton_contracts::events::EventKind;
use vton_contracts::jobs::{JobHandle, JobRequest};
use vton_contracts::schemas::{classify_submit, SubmitShape};

use crate::error::SubmitError;
use crate::transport::{HttpRequest, RequestBody, Transport};
use crate::{credentials, truncate_text, RunEvents};

/// Accepted submission: the handle plus the raw body for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub handle: JobHandle,
    pub response: Value,
}

pub struct JobSubmitter {
    endpoint: ProcessingEndpoint,
    transport: Arc<dyn Transport>,
    events: Option<RunEvents>,
}

impl JobSubmitter {
    pub fn new(endpoint: ProcessingEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoint,
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: RunEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build_body(&self, request: &JobRequest) -> Result<Value, SubmitError> {
        let schema = &self.endpoint.schema;
        let mut body = Map::new();
        body.insert(
            "category".to_string(),
            Value::String(request.category.as_str().to_string()),
        );
        body.insert(
            schema.subject_field().to_string(),
            Value::String(request.subject_url.clone()),
        );
        body.insert(
            schema.garment_field().to_string(),
            Value::String(request.garment_url.clone()),
        );
        if self.endpoint.include_callback_url {
            body.insert("callback_url".to_string(), Value::String(String::new()));
        }
        let creds = credentials(&self.endpoint.auth).map_err(SubmitError::Credential)?;
        if let Some((name, value)) = creds.field {
            body.insert(name, Value::String(value));
        }
        Ok(Value::Object(body))
    }

    /// One POST; the reply is classified as an immediate result, a task
    /// handle, or an error carrying the raw body.
    pub fn submit(&self, request: &JobRequest) -> Result<Submission, SubmitError> {
        let body = self.build_body(request)?;
        let creds = credentials(&self.endpoint.auth).map_err(SubmitError::Credential)?;
        let mut http = HttpRequest::post(
            self.endpoint.endpoint(),
            RequestBody::Json(body),
            self.endpoint.request_timeout(),
        );
        for (name, value) in creds.headers {
            http = http.header(name, value);
        }

        let reply = self.transport.send(http)?;
        let text = reply.text();
        if matches!(reply.status, 401 | 403) {
            return Err(SubmitError::Auth {
                status: reply.status,
                body: truncate_text(&text, 512),
            });
        }
        if !reply.is_success() {
            return Err(SubmitError::Status {
                status: reply.status,
                body: truncate_text(&text, 512),
            });
        }
        let Ok(response) = reply.json() else {
            return Err(SubmitError::UnexpectedShape {
                body: truncate_text(&text, 512),
            });
        };

        let handle = match classify_submit(&response) {
            SubmitShape::Immediate { field, .. } => {
                self.emit(json!({"handle": "immediate", "field": field.key()}));
                JobHandle::Immediate {
                    payload: response.clone(),
                }
            }
            SubmitShape::Task { field, task_id } => {
                self.emit(json!({
                    "handle": "async",
                    "field": field.key(),
                    "task_id": task_id,
                }));
                JobHandle::Async { task_id }
            }
            SubmitShape::Rejected { message } => {
                return Err(SubmitError::Rejected {
                    message,
                    body: truncate_text(&text, 512),
                });
            }
            SubmitShape::Unexpected => {
                return Err(SubmitError::UnexpectedShape {
                    body: truncate_text(&text, 512),
                });
            }
        };
        Ok(Submission { handle, response })
    }

    fn emit(&self, payload: Value) {
        if let Some(events) = &self.events {
            events.emit(EventKind::JobSubmitted, payload);
        }
    }
}
