use std::time::Duration;

use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart {
        fields: Vec<(String, String)>,
        file_field: String,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
    Bytes {
        mime: String,
        bytes: Vec<u8>,
    },
}

/// One outbound call. Every request carries its own timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout,
        }
    }

    pub fn post(url: impl Into<String>, body: RequestBody, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
    pub connect: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
            connect: false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.trim().is_empty() && !message.contains(text.trim()) {
                message = format!("{message} | caused by: {}", text.trim());
            }
            source = std::error::Error::source(cause);
        }
        Self {
            message,
            timeout: err.is_timeout(),
            connect: err.is_connect(),
        }
    }
}

/// The only way pipeline components talk to the network.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("vton-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    fn builder(&self, request: HttpRequest) -> Result<RequestBuilder, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.header_value(ACCEPT.as_str()).is_none() {
            builder = builder.header(ACCEPT, "application/json");
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder.json(&payload),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart {
                fields,
                file_field,
                file_name,
                mime,
                bytes,
            } => {
                let part = MultipartPart::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)?;
                let mut form = MultipartForm::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                builder.multipart(form.part(file_field, part))
            }
            RequestBody::Bytes { mime, bytes } => builder.header(CONTENT_TYPE, mime).body(bytes),
        };
        Ok(builder.timeout(request.timeout))
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        let response = self.builder(request)?.send()?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes()?.to_vec();
        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}
