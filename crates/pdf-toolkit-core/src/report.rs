//! Non-fatal outcomes recorded while an operation runs
//!
//! Operations return their warnings instead of writing to a global sink;
//! each warning is also emitted as a `tracing` event when recorded.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum Warning {
    /// Requested pages (1-based, inclusive) that the document does not have.
    PagesOutOfRange {
        first: usize,
        last: usize,
        page_count: usize,
    },
    /// An embedded image was left untouched.
    ImageSkipped { object: (u32, u16), reason: String },
    /// Decrypt was asked for a document that has no encryption.
    NotEncrypted,
}

impl Warning {
    pub(crate) fn pages_out_of_range(pages: RangeInclusive<usize>, page_count: usize) -> Self {
        Warning::PagesOutOfRange {
            first: *pages.start(),
            last: *pages.end(),
            page_count,
        }
    }

    /// Emit the warning as a tracing event and hand it back.
    pub(crate) fn logged(self) -> Self {
        tracing::warn!("{}", self);
        self
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PagesOutOfRange {
                first,
                last,
                page_count,
            } if first == last => write!(
                f,
                "page {} skipped: document has {} pages",
                first, page_count
            ),
            Warning::PagesOutOfRange {
                first,
                last,
                page_count,
            } => write!(
                f,
                "pages {}-{} skipped: document has {} pages",
                first, last, page_count
            ),
            Warning::ImageSkipped { object, reason } => {
                write!(f, "image {} {} R left unchanged: {}", object.0, object.1, reason)
            }
            Warning::NotEncrypted => f.write_str("document is not encrypted; nothing to decrypt"),
        }
    }
}

/// A value produced together with the warnings recorded on the way.
#[derive(Debug)]
pub struct Processed<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Processed<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Summary of a recompression pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecompressionReport {
    pub images_found: usize,
    pub images_replaced: usize,
    /// Stored bytes saved across all replaced images.
    pub bytes_saved: usize,
    pub warnings: Vec<Warning>,
}
