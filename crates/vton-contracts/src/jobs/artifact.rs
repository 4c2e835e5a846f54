use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Reference to a finished try-on image inside a provider payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactRef {
    Url { url: String },
    /// Base64 payload; `mime` is set when it arrived as a `data:` URL.
    Inline { data: String, mime: Option<String> },
}

impl ArtifactRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::Inline { .. } => "inline",
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url } => f.write_str(url),
            Self::Inline { data, mime } => write!(
                f,
                "<inline {} base64 chars{}>",
                data.len(),
                mime.as_deref()
                    .map(|mime| format!(", {mime}"))
                    .unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
    /// Image format sniffed from the written bytes, when recognisable.
    pub format: Option<String>,
}

/// The finished artifact of a run. Written to disk at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub source: ArtifactRef,
    persisted: Option<PersistedArtifact>,
}

impl ResultArtifact {
    pub fn new(source: ArtifactRef) -> Self {
        Self {
            source,
            persisted: None,
        }
    }

    pub fn persisted(&self) -> Option<&PersistedArtifact> {
        self.persisted.as_ref()
    }

    pub fn record_persisted(&mut self, persisted: PersistedArtifact) -> anyhow::Result<()> {
        if let Some(existing) = &self.persisted {
            anyhow::bail!(
                "artifact already persisted at {}",
                existing.path.display()
            );
        }
        self.persisted = Some(persisted);
        Ok(())
    }
}
