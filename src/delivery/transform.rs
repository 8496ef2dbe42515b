//! Image transform parameters attached to delivery URLs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resize behaviour; the only supported mode crops to fill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    #[default]
    Cover,
}

/// Output encoding of a transformed image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Webp,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Invalid {name} parameter: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Quality must be between 1 and 100, got {0}")]
    QualityOutOfRange(u32),
}

/// Requested on-the-fly image transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: u8,
    pub resize: ResizeMode,
    pub format: OutputFormat,
}

impl TransformOptions {
    pub const DEFAULT_QUALITY: u8 = 75;

    pub fn new(width: Option<u32>, height: Option<u32>, quality: u8) -> Self {
        Self {
            width,
            height,
            quality,
            resize: ResizeMode::Cover,
            format: OutputFormat::Webp,
        }
    }

    /// Build options from raw query values.
    ///
    /// A transform exists only when a width or height is requested; quality
    /// alone does not trigger one.
    pub fn from_query(
        width: Option<&str>,
        height: Option<&str>,
        quality: Option<&str>,
        default_quality: u8,
    ) -> Result<Option<Self>, TransformError> {
        let width = parse_dimension("width", width)?;
        let height = parse_dimension("height", height)?;
        if width.is_none() && height.is_none() {
            return Ok(None);
        }

        let quality = match quality.map(str::trim).filter(|q| !q.is_empty()) {
            None => default_quality,
            Some(raw) => {
                let value: u32 = raw.parse().map_err(|_| TransformError::InvalidNumber {
                    name: "quality",
                    value: raw.to_string(),
                })?;
                if !(1..=100).contains(&value) {
                    return Err(TransformError::QualityOutOfRange(value));
                }
                value as u8
            }
        };

        Ok(Some(Self::new(width, height, quality)))
    }

    /// Query parameters in canonical order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5);
        if let Some(width) = self.width {
            pairs.push(("width", width.to_string()));
        }
        if let Some(height) = self.height {
            pairs.push(("height", height.to_string()));
        }
        pairs.push(("quality", self.quality.to_string()));
        pairs.push(("resize", "cover".to_string()));
        pairs.push(("format", "webp".to_string()));
        pairs
    }

    /// Canonical string covered by a link signature.
    pub fn canonical(&self) -> String {
        self.query_pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn parse_dimension(name: &'static str, raw: Option<&str>) -> Result<Option<u32>, TransformError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(value) => match value.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(TransformError::InvalidNumber {
                name,
                value: value.to_string(),
            }),
        },
    }
}
