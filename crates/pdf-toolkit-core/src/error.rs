use thiserror::Error;

use crate::range::RangeError;

#[derive(Error, Debug)]
pub enum PdfToolkitError {
    #[error("Invalid page range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to load PDF: {0}")]
    Load(String),

    #[error("Document is encrypted and requires a password")]
    EncryptionRequired,

    #[error("Incorrect password")]
    Authentication,

    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("PDF operation failed: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure to decode or re-encode a single embedded image.
///
/// Never escapes the recompressor; it is turned into a warning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported image filter {0}")]
    UnsupportedFilter(String),

    #[error("unsupported color space {0}")]
    UnsupportedColorSpace(String),

    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),

    #[error("corrupt image data: {0}")]
    Corrupt(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, PdfToolkitError>;
