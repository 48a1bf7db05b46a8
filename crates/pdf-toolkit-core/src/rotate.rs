//! Page rotation
//!
//! Rotation is additive: the requested angle is added to the page's
//! effective rotation (which may be inherited from the page tree) and the
//! result is stored on the page itself, modulo 360.

use lopdf::Object;

use crate::document::{effective_rotation, normalize_rotation, Document};
use crate::error::{PdfToolkitError, Result};
use crate::range::{parse_ranges, PageSelection};
use crate::report::{Processed, Warning};

/// Clockwise rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl TryFrom<i64> for Rotation {
    type Error = PdfToolkitError;

    fn try_from(degrees: i64) -> Result<Self> {
        match degrees {
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(PdfToolkitError::Validation(format!(
                "Rotation must be 90, 180 or 270 degrees, got {}",
                other
            ))),
        }
    }
}

/// Rotate the selected pages, or every page when `selection` is `None`.
///
/// Selected indices past the end of the document are ignored and reported.
pub fn rotate(
    doc: &mut Document,
    rotation: Rotation,
    selection: Option<&PageSelection>,
) -> Vec<Warning> {
    let page_count = doc.page_count();
    let all = PageSelection::all(page_count);
    let selection = selection.unwrap_or(&all);

    let warnings: Vec<Warning> = selection
        .out_of_range(page_count)
        .into_iter()
        .map(|span| Warning::pages_out_of_range(span, page_count).logged())
        .collect();

    let page_ids = doc.page_ids();
    let mut rotated = 0usize;
    for index in selection.within(page_count) {
        let page_id = page_ids[index];
        let current = effective_rotation(&doc.inner, page_id);
        let updated = normalize_rotation(current as i64 + rotation.degrees() as i64);
        if let Ok(page) = doc
            .inner
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
        {
            page.set("Rotate", Object::Integer(updated as i64));
            rotated += 1;
        }
    }

    tracing::info!(degrees = rotation.degrees(), pages = rotated, "rotated pages");
    warnings
}

/// Load, rotate and serialize. `ranges` selects pages; `None` rotates all.
pub fn rotate_document(
    bytes: &[u8],
    degrees: i64,
    ranges: Option<&str>,
) -> Result<Processed<Vec<u8>>> {
    let rotation = Rotation::try_from(degrees)?;
    let selection = ranges.map(parse_ranges).transpose()?;
    let mut doc = Document::load(bytes)?;
    let warnings = rotate(&mut doc, rotation, selection.as_ref());
    Ok(Processed::new(doc.to_bytes()?, warnings))
}
