use serde_json::Value;
use vton_contracts::jobs::ArtifactRef;
use vton_contracts::schemas::fields::is_http_url;
use vton_contracts::schemas::{ArtifactField, Envelope};

use crate::error::ExtractError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub field: ArtifactField,
    pub artifact: ArtifactRef,
}

/// Locates the finished image in a completed payload.
///
/// Pure: the same payload always yields the same reference.
pub fn extract(payload: &Value) -> Result<Extracted, ExtractError> {
    let envelope = Envelope::open(payload);
    let found = envelope.and_then(|envelope| ArtifactField::probe(envelope.body()));
    match found {
        Some((field, value)) => Ok(Extracted {
            field,
            artifact: classify_value(value),
        }),
        None => Err(ExtractError::NoResultField {
            fields: present_fields(envelope),
        }),
    }
}

/// `http(s)` values are URLs; `data:` URLs and anything else are inline.
pub fn classify_value(value: &str) -> ArtifactRef {
    let value = value.trim();
    if is_http_url(value) {
        return ArtifactRef::Url {
            url: value.to_string(),
        };
    }
    if let Some(rest) = value.strip_prefix("data:") {
        if let Some((meta, data)) = rest.split_once(',') {
            let mime = meta
                .split(';')
                .next()
                .map(str::trim)
                .filter(|mime| !mime.is_empty())
                .map(str::to_string);
            return ArtifactRef::Inline {
                data: data.trim().to_string(),
                mime,
            };
        }
    }
    ArtifactRef::Inline {
        data: value.to_string(),
        mime: None,
    }
}

fn present_fields(envelope: Option<Envelope<'_>>) -> Vec<String> {
    let sorted = |keys: Vec<String>| {
        let mut keys = keys;
        keys.sort();
        keys
    };
    match envelope {
        None => Vec::new(),
        Some(Envelope::Flat(body)) => sorted(body.keys().cloned().collect()),
        Some(Envelope::Wrapped { outer, data }) => {
            let mut fields = sorted(outer.keys().cloned().collect());
            fields.extend(sorted(
                data.keys().map(|key| format!("data.{key}")).collect(),
            ));
            fields
        }
    }
}
