use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use serde_json::{json, Map, Value};
use vton_contracts::config::{UploadEncoding, UploadTarget, UploadsConfig};
use vton_contracts::events::EventKind;
use vton_contracts::jobs::AssetReference;
use vton_contracts::providers::FallbackPolicy;
use vton_contracts::schemas::{classify_upload, UploadReply};

use crate::error::{UploadError, UploadFailure};
use crate::transport::{HttpRequest, RequestBody, Transport};
use crate::{credentials, truncate_text, RunEvents};

/// How an asset ended up with a public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Hosted {
        url: String,
        provider: String,
        failures: Vec<UploadFailure>,
    },
    /// Every target failed and the configured placeholder was substituted.
    Placeholder {
        url: String,
        failures: Vec<UploadFailure>,
    },
}

impl Resolution {
    pub fn url(&self) -> &str {
        match self {
            Self::Hosted { url, .. } | Self::Placeholder { url, .. } => url,
        }
    }

    pub fn failures(&self) -> &[UploadFailure] {
        match self {
            Self::Hosted { failures, .. } | Self::Placeholder { failures, .. } => failures,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder { .. })
    }
}

/// Publishes local images by walking the fallback policy in order.
///
/// Each target gets exactly one attempt bounded by its timeout. Any failure
/// (transport, non-2xx, unreadable body, missing URL) moves on to the next
/// target; nothing is retried.
pub struct UploadResolver {
    uploads: UploadsConfig,
    policy: FallbackPolicy<UploadTarget>,
    transport: Arc<dyn Transport>,
    events: Option<RunEvents>,
}

impl UploadResolver {
    pub fn new(uploads: UploadsConfig, transport: Arc<dyn Transport>) -> Self {
        let policy = FallbackPolicy::new(uploads.targets.clone(), uploads.placeholder_url.clone());
        Self {
            uploads,
            policy,
            transport,
            events: None,
        }
    }

    pub fn with_events(mut self, events: RunEvents) -> Self {
        self.events = Some(events);
        self
    }

    pub fn resolve(&self, asset: &mut AssetReference) -> Result<Resolution, UploadError> {
        let mut failures = Vec::new();
        for (index, target) in self.policy.providers().iter().enumerate() {
            let attempt = index + 1;
            match self.attempt(target, asset) {
                Ok(url) => {
                    self.emit_attempt(asset.label(), target, attempt, None);
                    asset.resolve(url.clone(), target.name.clone())?;
                    self.emit(
                        EventKind::UploadResolved,
                        json!({
                            "label": asset.label(),
                            "provider": target.name,
                            "url": url,
                            "attempts": attempt,
                        }),
                    );
                    return Ok(Resolution::Hosted {
                        url,
                        provider: target.name.clone(),
                        failures,
                    });
                }
                Err(reason) => {
                    self.emit_attempt(asset.label(), target, attempt, Some(&reason));
                    failures.push(UploadFailure {
                        provider: target.name.clone(),
                        reason,
                    });
                }
            }
        }

        let placeholder = self.policy.placeholder_url().map(str::to_string);
        self.emit(
            EventKind::UploadExhausted,
            json!({
                "label": asset.label(),
                "attempts": failures.len(),
                "placeholder": placeholder,
            }),
        );
        match placeholder {
            Some(url) => {
                asset.mark_placeholder(url.clone(), failures.len())?;
                Ok(Resolution::Placeholder { url, failures })
            }
            None => {
                asset.mark_exhausted(failures.len())?;
                Err(UploadError::Exhausted {
                    label: asset.label().to_string(),
                    attempts: failures,
                })
            }
        }
    }

    fn attempt(&self, target: &UploadTarget, asset: &AssetReference) -> Result<String, String> {
        let creds = credentials(&target.auth)?;
        let timeout = self.uploads.attempt_timeout(target);
        let ext = extension_for_mime(asset.mime());
        let encoded = || BASE64_STANDARD.encode(asset.bytes());

        let (url, body, public_url) = match &target.encoding {
            UploadEncoding::Multipart { field, extra } => {
                let mut fields: Vec<(String, String)> =
                    extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                fields.extend(creds.field.clone());
                let body = RequestBody::Multipart {
                    fields,
                    file_field: field.clone(),
                    file_name: format!("{}.{ext}", asset.label()),
                    mime: asset.mime().to_string(),
                    bytes: asset.bytes().to_vec(),
                };
                (target.endpoint.clone(), body, None)
            }
            UploadEncoding::Base64Form { field, extra } => {
                let mut pairs: Vec<(String, String)> =
                    extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                pairs.extend(creds.field.clone());
                pairs.push((field.clone(), encoded()));
                (target.endpoint.clone(), RequestBody::Form(pairs), None)
            }
            UploadEncoding::Base64Json { field, extra } => {
                let mut body = Map::new();
                for (key, value) in extra {
                    body.insert(key.clone(), value.clone());
                }
                if let Some((name, value)) = &creds.field {
                    body.insert(name.clone(), Value::String(value.clone()));
                }
                body.insert(field.clone(), Value::String(encoded()));
                (
                    target.endpoint.clone(),
                    RequestBody::Json(Value::Object(body)),
                    None,
                )
            }
            UploadEncoding::Raw { public_url } => {
                if creds.field.is_some() {
                    return Err("form_field auth is not supported with raw uploads".to_string());
                }
                let object = object_key(ext);
                let body = RequestBody::Bytes {
                    mime: asset.mime().to_string(),
                    bytes: asset.bytes().to_vec(),
                };
                (
                    target.endpoint.replace("{object}", &object),
                    body,
                    Some(public_url.replace("{object}", &object)),
                )
            }
        };

        let mut request = HttpRequest::post(url, body, timeout);
        for (name, value) in creds.headers {
            request = request.header(name, value);
        }
        let reply = self
            .transport
            .send(request)
            .map_err(|err| format!("transport error: {err}"))?;
        if !reply.is_success() {
            return Err(format!(
                "HTTP {}: {}",
                reply.status,
                truncate_text(&reply.text(), 512)
            ));
        }
        if let Some(url) = public_url {
            return Ok(url);
        }
        let body = reply
            .json()
            .map_err(|_| format!("invalid JSON: {}", truncate_text(&reply.text(), 512)))?;
        match classify_upload(&body) {
            UploadReply::Hosted { url, .. } => Ok(url),
            UploadReply::Rejected { message } => Err(format!("rejected: {message}")),
            UploadReply::Unrecognized => Err(format!(
                "no URL in response: {}",
                truncate_text(&body.to_string(), 512)
            )),
        }
    }

    fn emit_attempt(
        &self,
        label: &str,
        target: &UploadTarget,
        attempt: usize,
        error: Option<&str>,
    ) {
        self.emit(
            EventKind::UploadAttempt,
            json!({
                "label": label,
                "provider": target.name,
                "encoding": target.encoding.label(),
                "attempt": attempt,
                "ok": error.is_none(),
                "error": error,
            }),
        );
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        if let Some(events) = &self.events {
            events.emit(kind, payload);
        }
    }
}

/// Mime type from the leading bytes; unknown content is sent as octet-stream.
pub fn sniff_mime(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| "application/octet-stream".to_string())
}

fn extension_for_mime(mime: &str) -> &'static str {
    ImageFormat::from_mime_type(mime)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

fn object_key(ext: &str) -> String {
    format!(
        "vton/{}-{}.{ext}",
        chrono::Utc::now().timestamp(),
        uuid::Uuid::new_v4().simple()
    )
}
