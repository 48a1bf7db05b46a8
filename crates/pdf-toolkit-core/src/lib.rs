//! PDF transformation engine
//!
//! Structural edits of PDF documents and their embedded images, built on
//! lopdf:
//! - [`merge`], [`split`] and [`rotate`] work at page level, copying pages
//!   with the objects they reference so shared fonts and images stay shared.
//! - [`recompress_all`] re-encodes embedded raster images as JPEG when that
//!   makes them smaller.
//! - [`encrypt`] and [`decrypt`] apply or remove password protection with
//!   the standard security handler.
//!
//! Every operation loads a [`Document`], applies one transform and
//! serializes once. Non-fatal outcomes are returned as [`Warning`]s.

pub mod codec;
pub mod command;
mod copy;
mod crypt;
pub mod document;
pub mod error;
pub mod images;
pub mod merge;
pub mod range;
pub mod recompress;
pub mod report;
pub mod rotate;
pub mod security;
pub mod split;

pub use codec::{JpegCodec, RasterCodec};
pub use command::{CommandOutput, PdfCommand, ProcessMetrics, ProcessResult};
pub use document::{Document, Page};
pub use error::{CodecError, PdfToolkitError};
pub use images::{ColorMode, ImageResource, PixelData, ReplacementImage};
pub use merge::{merge, merge_documents};
pub use range::{parse_ranges, PageSelection, RangeError};
pub use recompress::{compress_document, recompress_all, Recompressor};
pub use report::{Processed, RecompressionReport, Warning};
pub use rotate::{rotate, rotate_document, Rotation};
pub use security::{decrypt, decrypt_document, encrypt, encrypt_document, is_encrypted};
pub use split::{split, split_document};

/// Parse PDF bytes and return page count
///
/// Counts beyond `u32::MAX` saturate.
pub fn get_page_count(bytes: &[u8]) -> Result<u32, PdfToolkitError> {
    Ok(saturating_count(Document::load(bytes)?.page_count()))
}

fn saturating_count(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
