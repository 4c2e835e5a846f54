use std::time::Duration;

use vton_contracts::config::ProcessingEndpoint;

use crate::transport::{HttpRequest, Transport, TransportError};
use crate::{credentials, truncate_text};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub url: String,
    pub status: u16,
    pub healthy: bool,
    pub body: String,
}

/// Pre-flight GET against `health_url`. `None` when no URL is configured.
pub fn check_health(
    endpoint: &ProcessingEndpoint,
    transport: &dyn Transport,
) -> Result<Option<HealthReport>, TransportError> {
    let Some(url) = endpoint
        .health_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    else {
        return Ok(None);
    };
    let url = url.replace("{endpoint}", endpoint.endpoint());
    let mut request = HttpRequest::get(url.clone(), HEALTH_TIMEOUT);
    if let Ok(creds) = credentials(&endpoint.auth) {
        for (name, value) in creds.headers {
            request = request.header(name, value);
        }
    }
    let reply = transport.send(request)?;
    Ok(Some(HealthReport {
        url,
        status: reply.status,
        healthy: reply.is_success(),
        body: truncate_text(&reply.text(), 512),
    }))
}
