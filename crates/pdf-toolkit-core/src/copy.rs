//! Copying pages between documents
//!
//! Pages are never moved between documents. A page is copied together with
//! every object it transitively references, renumbered into the destination
//! arena. Within one copy session (one source document) an object reached
//! twice, e.g. a font shared by many pages, is copied once and reused.
//!
//! References into the source page tree are cut: `Parent` is rewritten to the
//! destination tree and references to pages that are not being copied (link
//! destinations, annotation back-pointers) become `null`.

use std::collections::{HashMap, HashSet, VecDeque};

use lopdf::{Dictionary, Object, ObjectId};

use crate::document::{inherited, type_of, Document, INHERITABLE};
use crate::error::{PdfToolkitError, Result};

/// Accumulates copied pages into a fresh single-level page tree.
pub(crate) struct PageTreeBuilder {
    doc: lopdf::Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl PageTreeBuilder {
    pub(crate) fn new(version: &str) -> Self {
        let mut doc = lopdf::Document::with_version(version);
        let pages_id = doc.new_object_id();
        let catalog_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Copy the pages at `indices` (zero-based, in the given order) from
    /// `source`. Repeated indices are copied once.
    pub(crate) fn append_pages(&mut self, source: &Document, indices: &[usize]) -> Result<()> {
        let page_ids = source.page_ids();
        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(indices.len());
        for &index in indices {
            let id = *page_ids.get(index).ok_or_else(|| {
                PdfToolkitError::Operation(format!(
                    "Page index {} out of bounds ({} pages)",
                    index,
                    page_ids.len()
                ))
            })?;
            if seen.insert(id) {
                selected.push(id);
            }
        }

        let mut session = CopySession::new(&source.inner, &mut self.doc);

        // Reserve ids for every selected page first so references between
        // copied pages resolve to the copies.
        let new_ids: Vec<ObjectId> = selected
            .iter()
            .map(|&id| {
                let new_id = session.dest.new_object_id();
                session.map.insert(id, new_id);
                new_id
            })
            .collect();

        for (&old_id, &new_id) in selected.iter().zip(&new_ids) {
            let mut page = materialize_page(session.source, old_id)?;
            page.remove(b"Parent");
            let mut page = session.rewrite_dict(page);
            page.set("Parent", Object::Reference(self.pages_id));
            session.dest.objects.insert(new_id, Object::Dictionary(page));
        }
        session.drain()?;

        tracing::debug!(
            pages = new_ids.len(),
            objects = session.map.len(),
            "copied pages"
        );
        self.kids.extend(new_ids);
        Ok(())
    }

    pub(crate) fn page_count(&self) -> usize {
        self.kids.len()
    }

    pub(crate) fn finish(mut self) -> Result<Document> {
        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(self.kids.len() as i64)),
            (
                "Kids",
                Object::Array(self.kids.iter().map(|&id| Object::Reference(id)).collect()),
            ),
        ]);
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        Document::from_lopdf(self.doc)
    }
}

impl Document {
    /// Build a new document from page lists of one or more sources, in order.
    pub fn from_pages(sources: &[(&Document, &[usize])]) -> Result<Document> {
        let version = sources
            .iter()
            .map(|(doc, _)| doc.version())
            .max()
            .unwrap_or("1.7");
        let mut builder = PageTreeBuilder::new(version);
        for (doc, indices) in sources {
            builder.append_pages(doc, indices)?;
        }
        builder.finish()
    }
}

/// The page dictionary with inheritable attributes made explicit.
fn materialize_page(source: &lopdf::Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut page = source
        .get_dictionary(page_id)
        .map_err(|_| PdfToolkitError::Operation(format!("Page object {:?} missing", page_id)))?
        .clone();
    for key in INHERITABLE {
        if page.has(key) {
            continue;
        }
        if let Some(value) = inherited(source, page_id, key) {
            page.set(key.to_vec(), value.clone());
        }
    }
    Ok(page)
}

struct CopySession<'a> {
    source: &'a lopdf::Document,
    dest: &'a mut lopdf::Document,
    /// Source object id -> destination object id.
    map: HashMap<ObjectId, ObjectId>,
    pending: VecDeque<ObjectId>,
}

impl<'a> CopySession<'a> {
    fn new(source: &'a lopdf::Document, dest: &'a mut lopdf::Document) -> Self {
        Self {
            source,
            dest,
            map: HashMap::new(),
            pending: VecDeque::new(),
        }
    }

    /// Destination id for a source reference, or `None` if the reference
    /// must be cut.
    fn map_reference(&mut self, id: ObjectId) -> Option<ObjectId> {
        if let Some(&new_id) = self.map.get(&id) {
            return Some(new_id);
        }
        let object = self.source.get_object(id).ok()?;
        if matches!(type_of(object), Some(b"Page") | Some(b"Pages")) {
            return None;
        }
        let new_id = self.dest.new_object_id();
        self.map.insert(id, new_id);
        self.pending.push_back(id);
        Some(new_id)
    }

    fn rewrite(&mut self, object: Object) -> Object {
        match object {
            Object::Reference(id) => match self.map_reference(id) {
                Some(new_id) => Object::Reference(new_id),
                None => Object::Null,
            },
            Object::Array(items) => {
                Object::Array(items.into_iter().map(|o| self.rewrite(o)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.rewrite_dict(dict)),
            Object::Stream(mut stream) => {
                stream.dict = self.rewrite_dict(stream.dict);
                Object::Stream(stream)
            }
            other => other,
        }
    }

    fn rewrite_dict(&mut self, mut dict: Dictionary) -> Dictionary {
        for (_, value) in dict.iter_mut() {
            *value = self.rewrite(std::mem::replace(value, Object::Null));
        }
        dict
    }

    /// Copy every object queued by `map_reference` until the closure is done.
    fn drain(&mut self) -> Result<()> {
        while let Some(old_id) = self.pending.pop_front() {
            let new_id = self.map[&old_id];
            let object = self
                .source
                .get_object(old_id)
                .map_err(|e| PdfToolkitError::Operation(e.to_string()))?
                .clone();
            let copied = self.rewrite(object);
            self.dest.objects.insert(new_id, copied);
        }
        Ok(())
    }
}
