use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an asset stands in the upload fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AssetState {
    Pending,
    Resolved { url: String, provider: String },
    /// Every provider failed and the config's declared placeholder was used.
    Placeholder { url: String, attempts: usize },
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetStateError {
    pub label: String,
    pub current: AssetState,
}

impl fmt::Display for AssetStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "asset '{}' already settled ({:?}); it cannot be resolved twice",
            self.label, self.current
        )
    }
}

impl std::error::Error for AssetStateError {}

/// Local image bytes bound to at most one public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    label: String,
    bytes: Vec<u8>,
    mime: String,
    state: AssetState,
}

impl AssetReference {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            bytes,
            mime: mime.into(),
            state: AssetState::Pending,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn state(&self) -> &AssetState {
        &self.state
    }

    pub fn resolved_url(&self) -> Option<&str> {
        match &self.state {
            AssetState::Resolved { url, .. } | AssetState::Placeholder { url, .. } => {
                Some(url.as_str())
            }
            AssetState::Pending | AssetState::Exhausted { .. } => None,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match &self.state {
            AssetState::Resolved { provider, .. } => Some(provider.as_str()),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.state, AssetState::Placeholder { .. })
    }

    pub fn resolve(
        &mut self,
        url: impl Into<String>,
        provider: impl Into<String>,
    ) -> Result<(), AssetStateError> {
        self.settle(AssetState::Resolved {
            url: url.into(),
            provider: provider.into(),
        })
    }

    pub fn mark_placeholder(
        &mut self,
        url: impl Into<String>,
        attempts: usize,
    ) -> Result<(), AssetStateError> {
        self.settle(AssetState::Placeholder {
            url: url.into(),
            attempts,
        })
    }

    pub fn mark_exhausted(&mut self, attempts: usize) -> Result<(), AssetStateError> {
        self.settle(AssetState::Exhausted { attempts })
    }

    fn settle(&mut self, next: AssetState) -> Result<(), AssetStateError> {
        if self.state != AssetState::Pending {
            return Err(AssetStateError {
                label: self.label.clone(),
                current: self.state.clone(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetReference, AssetState};

    #[test]
    fn asset_resolves_once() {
        let mut asset = AssetReference::new("subject", vec![1, 2, 3], "image/png");
        assert_eq!(asset.resolved_url(), None);
        assert!(asset.resolve("https://i.example/a.png", "imgbb").is_ok());
        assert_eq!(asset.resolved_url(), Some("https://i.example/a.png"));
        assert_eq!(asset.provider(), Some("imgbb"));

        let err = asset
            .resolve("https://i.example/b.png", "imgur")
            .unwrap_err();
        assert_eq!(err.label, "subject");
        assert_eq!(asset.resolved_url(), Some("https://i.example/a.png"));
        assert!(asset.mark_exhausted(2).is_err());
    }

    #[test]
    fn exhausted_asset_has_no_url() {
        let mut asset = AssetReference::new("garment", Vec::new(), "image/png");
        assert!(asset.mark_exhausted(3).is_ok());
        assert_eq!(asset.state(), &AssetState::Exhausted { attempts: 3 });
        assert_eq!(asset.resolved_url(), None);
    }

    #[test]
    fn placeholder_is_flagged() {
        let mut asset = AssetReference::new("garment", Vec::new(), "image/png");
        assert!(asset
            .mark_placeholder("https://placeholder.example/x.png", 2)
            .is_ok());
        assert!(asset.is_placeholder());
        assert_eq!(asset.provider(), None);
        assert_eq!(
            asset.resolved_url(),
            Some("https://placeholder.example/x.png")
        );
    }
}
