//! Upload format validation
//!
//! Sniffs the real content type from the payload's magic numbers (never from
//! a client-supplied name or header), checks it against the configured
//! allow-list and derives the extension the stored file gets.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raster formats the service knows how to anonymize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Bmp,
    Gif,
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    /// Every supported kind, in allow-list order
    pub const ALL: [ImageKind; 5] = [
        ImageKind::Bmp,
        ImageKind::Gif,
        ImageKind::Png,
        ImageKind::Jpeg,
        ImageKind::Webp,
    ];

    /// Map a sniffed MIME type onto a supported kind
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/bmp" => Some(Self::Bmp),
            "image/gif" => Some(Self::Gif),
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Canonical MIME type
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Bmp => "image/bmp",
            Self::Gif => "image/gif",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    /// File extension, including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bmp => ".bmp",
            Self::Gif => ".gif",
            Self::Png => ".png",
            Self::Jpeg => ".jpeg",
            Self::Webp => ".webp",
        }
    }
}

/// Rejections surfaced to the uploader as-is
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("no file provided")]
    Empty,

    #[error("file is too big")]
    TooBig { size: usize, limit: usize },

    #[error("file is not a picture")]
    NotAPicture { detected: Option<String> },
}

/// Sniff the MIME type of a payload from its leading bytes.
///
/// Returns `None` when nothing recognisable is found.
pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|kind| kind.mime_type())
}

/// Validator holding the size limit and allow-list
#[derive(Debug, Clone)]
pub struct FormatValidator {
    max_size: usize,
    allowed: Vec<ImageKind>,
}

impl FormatValidator {
    pub fn new(max_size: usize, allowed: Vec<ImageKind>) -> Self {
        Self { max_size, allowed }
    }

    /// Classify a payload.
    ///
    /// The size precondition is checked before any sniffing work, so an
    /// oversized payload is rejected as too big whatever it contains.
    pub fn classify(&self, bytes: &[u8]) -> Result<ImageKind, FormatError> {
        if bytes.is_empty() {
            return Err(FormatError::Empty);
        }

        if bytes.len() > self.max_size {
            return Err(FormatError::TooBig {
                size: bytes.len(),
                limit: self.max_size,
            });
        }

        let detected = sniff(bytes);
        match detected.and_then(ImageKind::from_mime) {
            Some(kind) if self.allowed.contains(&kind) => Ok(kind),
            _ => Err(FormatError::NotAPicture {
                detected: detected.map(str::to_string),
            }),
        }
    }
}

impl Default for FormatValidator {
    fn default() -> Self {
        Self::new(15 * 1024 * 1024, ImageKind::ALL.to_vec())
    }
}
