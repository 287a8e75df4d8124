use serde::{Deserialize, Serialize};
use std::fmt;

/// Aspect ratio bucket a video is filed under in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    /// Roughly 16:9
    Landscape,
    /// Roughly 9:16
    Portrait,
    Other,
}

const LANDSCAPE_MIN: f64 = 1.59;
const LANDSCAPE_MAX: f64 = 1.82;
const PORTRAIT_MIN: f64 = 0.5;
const PORTRAIT_MAX: f64 = 0.7;

impl AspectRatio {
    /// Classify stream dimensions. Zero width or height falls back to `Other`.
    pub fn classify(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return Self::Other;
        }
        Self::from_ratio(f64::from(width) / f64::from(height))
    }

    /// Bucket a width/height ratio. Band edges are inclusive; NaN lands in `Other`.
    pub fn from_ratio(ratio: f64) -> Self {
        if (LANDSCAPE_MIN..=LANDSCAPE_MAX).contains(&ratio) {
            Self::Landscape
        } else if (PORTRAIT_MIN..=PORTRAIT_MAX).contains(&ratio) {
            Self::Portrait
        } else {
            Self::Other
        }
    }

    /// Key prefix used in the object store
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
