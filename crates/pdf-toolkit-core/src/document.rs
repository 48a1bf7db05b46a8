//! In-memory document model
//!
//! [`Document`] wraps a `lopdf` object arena: pages are addressed through the
//! page tree, shared resources (fonts, images, color spaces) are objects in
//! the arena referenced by id. Every transform mutates this model and calls
//! [`Document::to_bytes`] exactly once at the end.

use lopdf::{Dictionary, Object, ObjectId};

use crate::error::{PdfToolkitError, Result};

/// Attributes a page may inherit from its ancestors in the page tree.
pub(crate) const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Resource categories that map local names to shared objects.
const RESOURCE_CATEGORIES: [&[u8]; 7] = [
    b"Font",
    b"XObject",
    b"ExtGState",
    b"ColorSpace",
    b"Pattern",
    b"Shading",
    b"Properties",
];

/// Guard against reference cycles in malformed files.
const MAX_CHAIN: usize = 64;

#[derive(Debug, Clone)]
pub struct Document {
    pub(crate) inner: lopdf::Document,
}

impl Document {
    /// Parse document bytes.
    ///
    /// Protected documents fail with [`PdfToolkitError::EncryptionRequired`];
    /// open them through [`crate::security::decrypt`] instead.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let inner = parse(bytes)?;
        if is_protected(&inner) {
            return Err(PdfToolkitError::EncryptionRequired);
        }
        Self::from_lopdf(inner)
    }

    pub(crate) fn from_lopdf(inner: lopdf::Document) -> Result<Self> {
        let root = inner
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| PdfToolkitError::Load("No Root in trailer".into()))?;
        let catalog = inner
            .get_dictionary(root)
            .map_err(|_| PdfToolkitError::Load("Catalog not found".into()))?;
        let pages = catalog
            .get(b"Pages")
            .and_then(Object::as_reference)
            .map_err(|_| PdfToolkitError::Load("No Pages in catalog".into()))?;
        inner
            .get_dictionary(pages)
            .map_err(|_| PdfToolkitError::Load("Invalid pages dictionary".into()))?;

        Ok(Self { inner })
    }

    pub fn page_count(&self) -> usize {
        self.inner.get_pages().len()
    }

    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Page object ids in document order.
    pub(crate) fn page_ids(&self) -> Vec<ObjectId> {
        self.inner.get_pages().into_values().collect()
    }

    pub fn page(&self, index: usize) -> Option<Page<'_>> {
        self.page_ids().get(index).map(|&id| Page {
            doc: &self.inner,
            index,
            id,
        })
    }

    pub fn pages(&self) -> Vec<Page<'_>> {
        self.page_ids()
            .into_iter()
            .enumerate()
            .map(|(index, id)| Page {
                doc: &self.inner,
                index,
                id,
            })
            .collect()
    }

    /// Serialize to a structurally valid PDF.
    ///
    /// Document-level metadata (the trailer `Info` dictionary and the
    /// catalog `Metadata` stream) is dropped, unreachable objects are
    /// pruned and unfiltered streams are compressed.
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let mut inner = self.into_prepared();
        write(&mut inner)
    }

    /// Apply the serialization clean-up without writing.
    pub(crate) fn into_prepared(self) -> lopdf::Document {
        let mut inner = self.inner;
        strip_metadata(&mut inner);
        inner.prune_objects();
        inner.compress();
        inner
    }
}

/// Read-only view of one page.
#[derive(Debug, Clone, Copy)]
pub struct Page<'a> {
    doc: &'a lopdf::Document,
    index: usize,
    id: ObjectId,
}

impl<'a> Page<'a> {
    /// Zero-based position in the document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn object_id(&self) -> ObjectId {
        self.id
    }

    /// Effective rotation in degrees, one of 0, 90, 180, 270.
    pub fn rotation(&self) -> u16 {
        effective_rotation(self.doc, self.id)
    }

    /// Decoded, concatenated content stream bytes.
    pub fn content(&self) -> Vec<u8> {
        self.doc.get_page_content(self.id).unwrap_or_default()
    }

    /// Resource bindings as `Category/Name`, e.g. `Font/F1`.
    pub fn resource_names(&self) -> Vec<String> {
        let Some(resources) = page_resources(self.doc, self.id) else {
            return Vec::new();
        };

        let mut names = Vec::new();
        for category in RESOURCE_CATEGORIES {
            let Some(entries) = resources
                .get(category)
                .ok()
                .and_then(|o| resolve_dict(self.doc, o))
            else {
                continue;
            };
            for (name, _) in entries.iter() {
                names.push(format!(
                    "{}/{}",
                    String::from_utf8_lossy(category),
                    String::from_utf8_lossy(name)
                ));
            }
        }
        names
    }

    /// Object a resource name is bound to, e.g. `("Font", "F1")`.
    pub fn resource(&self, category: &str, name: &str) -> Option<ObjectId> {
        page_resources(self.doc, self.id)?
            .get(category.as_bytes())
            .ok()
            .and_then(|o| resolve_dict(self.doc, o))?
            .get(name.as_bytes())
            .and_then(Object::as_reference)
            .ok()
    }
}

pub(crate) fn parse(bytes: &[u8]) -> Result<lopdf::Document> {
    if !bytes.starts_with(b"%PDF-") {
        return Err(PdfToolkitError::Load(
            "Not a valid PDF file (missing %PDF- header)".into(),
        ));
    }
    lopdf::Document::load_mem(bytes).map_err(|e| PdfToolkitError::Load(e.to_string()))
}

pub(crate) fn is_protected(doc: &lopdf::Document) -> bool {
    doc.trailer.get(b"Encrypt").is_ok()
}

pub(crate) fn write(doc: &mut lopdf::Document) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfToolkitError::Serialization(format!("Save failed: {}", e)))?;
    Ok(buffer)
}

fn strip_metadata(doc: &mut lopdf::Document) {
    doc.trailer.remove(b"Info");

    let Ok(root) = doc.trailer.get(b"Root").and_then(Object::as_reference) else {
        return;
    };
    if let Ok(catalog) = doc.get_object_mut(root).and_then(Object::as_dict_mut) {
        catalog.remove(b"Metadata");
    }
}

/// Follow references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a lopdf::Document, mut object: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_CHAIN {
        match object {
            Object::Reference(id) => object = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn resolve_dict<'a>(doc: &'a lopdf::Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object)? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Look up `key` on the page or the nearest ancestor that defines it.
pub(crate) fn inherited<'a>(
    doc: &'a lopdf::Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_CHAIN {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn page_resources(doc: &lopdf::Document, page_id: ObjectId) -> Option<&Dictionary> {
    inherited(doc, page_id, b"Resources").and_then(|o| resolve_dict(doc, o))
}

pub(crate) fn effective_rotation(doc: &lopdf::Document, page_id: ObjectId) -> u16 {
    let degrees = inherited(doc, page_id, b"Rotate")
        .and_then(|o| resolve(doc, o))
        .and_then(|o| match o {
            Object::Integer(i) => Some(*i),
            Object::Real(r) => Some(*r as i64),
            _ => None,
        })
        .unwrap_or(0);
    normalize_rotation(degrees)
}

pub(crate) fn normalize_rotation(degrees: i64) -> u16 {
    degrees.rem_euclid(360) as u16
}

pub(crate) fn name_of(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(name) => Some(name),
        _ => None,
    }
}

pub(crate) fn integer_of(doc: &lopdf::Document, object: &Object) -> Option<i64> {
    match resolve(doc, object)? {
        Object::Integer(i) => Some(*i),
        Object::Real(r) => Some(*r as i64),
        _ => None,
    }
}

/// `/Type` of a dictionary-like object.
pub(crate) fn type_of(object: &Object) -> Option<&[u8]> {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => &stream.dict,
        _ => return None,
    };
    dict.get(b"Type").ok().and_then(name_of)
}
