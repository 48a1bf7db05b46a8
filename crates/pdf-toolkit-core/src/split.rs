//! PDF Split
//!
//! Extracts a selection of pages into a new document. Pages keep their
//! original relative order whatever order the ranges were written in.

use crate::document::Document;
use crate::error::{PdfToolkitError, Result};
use crate::range::{parse_ranges, PageSelection};
use crate::report::{Processed, Warning};

/// Copy the selected pages of `doc` into a new document.
///
/// Indices past the end of the document are skipped with
/// [`Warning::PagesOutOfRange`]. Fails with [`PdfToolkitError::Validation`]
/// when nothing is left to extract.
pub fn split(doc: &Document, selection: &PageSelection) -> Result<Processed<Document>> {
    let page_count = doc.page_count();
    let warnings: Vec<Warning> = selection
        .out_of_range(page_count)
        .into_iter()
        .map(|span| Warning::pages_out_of_range(span, page_count).logged())
        .collect();

    let indices: Vec<usize> = selection.within(page_count).collect();
    if indices.is_empty() {
        return Err(PdfToolkitError::Validation(format!(
            "No pages selected: document has {} pages",
            page_count
        )));
    }

    let extracted = Document::from_pages(&[(doc, indices.as_slice())])?;
    tracing::info!(
        selected = %selection,
        pages = indices.len(),
        skipped = warnings.len(),
        "split document"
    );
    Ok(Processed::new(extracted, warnings))
}

/// Load, split by a range expression such as `"1-3, 5"` and serialize.
pub fn split_document(bytes: &[u8], ranges: &str) -> Result<Processed<Vec<u8>>> {
    let selection = parse_ranges(ranges)?;
    let doc = Document::load(bytes)?;
    let Processed { value, warnings } = split(&doc, &selection)?;
    Ok(Processed::new(value.to_bytes()?, warnings))
}
