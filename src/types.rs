//! Core value types shared by the pipeline, compositor and archive packager

use crate::error::{Result, StudioError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of an image within a batch
///
/// Generated ids come from the batch's monotonic counter (`image-0001`, ...).
/// Explicit ids are accepted when they are safe to use as a file name, because
/// archive entries are named `{id}.png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Create an id from caller-supplied text
    ///
    /// # Errors
    /// - `InvalidId` if the text is empty, too long, or contains characters
    ///   other than ASCII letters, digits, `.`, `_` and `-`
    pub fn new<S: Into<String>>(id: S) -> Result<Self> {
        let id = id.into();
        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if id.is_empty() || id.len() > 128 || !valid_chars || id.starts_with('.') {
            return Err(StudioError::InvalidId(id));
        }
        Ok(Self(id))
    }

    /// Id for the n-th generated entry of a batch
    #[must_use]
    pub(crate) fn from_sequence(sequence: u64) -> Self {
        Self(format!("image-{sequence:04}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used for this image in exports
    #[must_use]
    pub fn png_file_name(&self) -> String {
        format!("{}.png", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageId {
    type Error = StudioError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ImageId {
    type Error = StudioError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// Opaque RGB color used for solid and gradient backgrounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const BLACK: Self = Self::rgb(0, 0, 0);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Fully opaque RGBA pixel for this color
    #[must_use]
    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }

    /// `#rrggbb` representation
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = StudioError;

    /// Parse `#rrggbb` or `#rgb` (the leading `#` is optional)
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || StudioError::invalid_config(format!("Invalid color '{s}': expected #rrggbb or #rgb"));

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        match hex.len() {
            6 => {
                let channel = |range: std::ops::Range<usize>| {
                    hex.get(range)
                        .and_then(|part| u8::from_str_radix(part, 16).ok())
                        .ok_or_else(invalid)
                };
                Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
            },
            3 => {
                let mut channels = hex.chars().map(|c| {
                    c.to_digit(16)
                        .map(|v| (v * 17) as u8)
                        .ok_or_else(invalid)
                });
                let mut next = || channels.next().unwrap_or_else(|| Err(invalid()));
                Ok(Self::rgb(next()?, next()?, next()?))
            },
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = StudioError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Replacement background painted behind a cutout
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundSpec {
    /// Keep the removed background fully transparent
    #[default]
    Transparent,
    /// Flood fill with one opaque color
    Solid { color: Color },
    /// Two-stop linear gradient along the 45° diagonal, `start` at the top-left
    Gradient { start: Color, end: Color },
    /// External image fetched at render time and scaled to cover the canvas
    Image { url: String },
}

impl BackgroundSpec {
    #[must_use]
    pub fn solid(color: Color) -> Self {
        Self::Solid { color }
    }

    #[must_use]
    pub fn gradient(start: Color, end: Color) -> Self {
        Self::Gradient { start, end }
    }

    /// External image background
    ///
    /// # Errors
    /// - `InvalidConfig` if the URL is not http(s)
    pub fn image_url<S: Into<String>>(url: S) -> Result<Self> {
        let url = url.into();
        validate_background_url(&url)?;
        Ok(Self::Image { url })
    }

    /// Short name of the active variant, for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Solid { .. } => "solid",
            Self::Gradient { .. } => "gradient",
            Self::Image { .. } => "image",
        }
    }
}

fn validate_background_url(url: &str) -> Result<()> {
    let lower = url.to_ascii_lowercase();
    let has_host = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty());
    if has_host {
        Ok(())
    } else {
        Err(StudioError::invalid_config(format!(
            "Background URL must start with http:// or https://, got '{url}'"
        )))
    }
}

impl FromStr for BackgroundSpec {
    type Err = StudioError;

    /// Accepted forms: `transparent`, `#ff0000`, `color:#ff0000`,
    /// `gradient:#667eea,#764ba2`, `url:https://...` or a bare `https://...`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("transparent") || s.eq_ignore_ascii_case("none") {
            return Ok(Self::Transparent);
        }
        if let Some(color) = s.strip_prefix("color:") {
            return Ok(Self::solid(color.parse()?));
        }
        if let Some(stops) = s.strip_prefix("gradient:") {
            let (start, end) = stops.split_once(',').ok_or_else(|| {
                StudioError::invalid_config(format!(
                    "Gradient '{s}' needs two colors, e.g. gradient:#667eea,#764ba2"
                ))
            })?;
            return Ok(Self::gradient(start.parse()?, end.parse()?));
        }
        if let Some(url) = s.strip_prefix("url:") {
            return Self::image_url(url);
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Self::image_url(s);
        }
        if s.starts_with('#') {
            return Ok(Self::solid(s.parse()?));
        }
        Err(StudioError::invalid_config(format!(
            "Unrecognized background '{s}': use transparent, #rrggbb, gradient:#a,#b or url:https://..."
        )))
    }
}

/// Lifecycle state of one batch entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStatus {
    /// Ingested, decode not finished
    Pending,
    /// Decoded and ready for removal
    Loaded,
    /// Input bytes are not a readable image
    DecodeFailed(String),
    /// Removal call in flight
    Submitted,
    /// Cutout available
    Processed,
    /// Last removal attempt failed; the entry is retried on the next run
    Failed(String),
}

impl ImageStatus {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::DecodeFailed(_) | Self::Failed(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Loaded => "loaded",
            Self::DecodeFailed(_) => "decode-failed",
            Self::Submitted => "submitted",
            Self::Processed => "processed",
            Self::Failed(_) => "failed",
        }
    }
}
