use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Garment region the try-on service should replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    UpperBody,
    LowerBody,
    FullBody,
}

impl Category {
    pub const ALL: [Category; 3] = [Self::UpperBody, Self::LowerBody, Self::FullBody];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpperBody => "upper_body",
            Self::LowerBody => "lower_body",
            Self::FullBody => "full_body",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| {
                format!("Unknown category '{raw}' (expected upper_body, lower_body or full_body).")
            })
    }
}

/// One try-on job: two publicly reachable image URLs plus the garment region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub subject_url: String,
    pub garment_url: String,
    pub category: Category,
}

impl JobRequest {
    pub fn new(
        subject_url: impl Into<String>,
        garment_url: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            subject_url: subject_url.into(),
            garment_url: garment_url.into(),
            category,
        }
    }
}
