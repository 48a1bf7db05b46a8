//! PDF Merge
//!
//! Combines multiple documents into one, in input order and then page
//! order. Every source gets its own copy session, so resources shared
//! within one source stay shared in the result.

use crate::copy::PageTreeBuilder;
use crate::document::Document;
use crate::error::{PdfToolkitError, Result};

/// Merge documents into a fresh one.
///
/// Fails with [`PdfToolkitError::Validation`] for fewer than two inputs.
pub fn merge(documents: &[Document]) -> Result<Document> {
    if documents.len() < 2 {
        return Err(PdfToolkitError::Validation(format!(
            "Merge needs at least 2 documents, got {}",
            documents.len()
        )));
    }

    let version = documents
        .iter()
        .map(Document::version)
        .max()
        .unwrap_or("1.7");
    let mut builder = PageTreeBuilder::new(version);
    for doc in documents {
        let indices: Vec<usize> = (0..doc.page_count()).collect();
        builder.append_pages(doc, &indices)?;
    }

    tracing::info!(
        inputs = documents.len(),
        pages = builder.page_count(),
        "merged documents"
    );
    builder.finish()
}

/// Load, merge and serialize byte streams.
pub fn merge_documents(documents: Vec<Vec<u8>>) -> Result<Vec<u8>> {
    if documents.len() < 2 {
        return Err(PdfToolkitError::Validation(format!(
            "Merge needs at least 2 documents, got {}",
            documents.len()
        )));
    }

    let loaded = load_all(&documents)?;
    merge(&loaded)?.to_bytes()
}

/// Load each input, naming the first one that fails.
pub(crate) fn load_all(documents: &[Vec<u8>]) -> Result<Vec<Document>> {
    documents
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            Document::load(bytes).map_err(|e| match e {
                PdfToolkitError::Load(reason) => {
                    PdfToolkitError::Load(format!("document {}: {}", i + 1, reason))
                }
                other => other,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::test_support::{create_test_pdf, page_text};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_merge_empty_fails() {
        let result = merge_documents(vec![]);
        assert!(matches!(result, Err(PdfToolkitError::Validation(_))));
    }

    #[test]
    fn test_merge_single_document_fails() {
        let pdf = create_test_pdf(2, "Single");
        let result = merge_documents(vec![pdf]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("at least 2 documents"));
    }

    #[test]
    fn test_merge_two_documents_combines_pages() {
        let doc_a = create_test_pdf(2, "DocA");
        let doc_b = create_test_pdf(3, "DocB");

        let merged = merge_documents(vec![doc_a, doc_b]).unwrap();

        let doc = Document::load(&merged).unwrap();
        assert_eq!(doc.page_count(), 5, "Merged document should have 5 pages");
    }

    #[test]
    fn test_merge_preserves_page_order() {
        let doc1 = create_test_pdf(2, "First");
        let doc2 = create_test_pdf(1, "Second");
        let doc3 = create_test_pdf(2, "Third");

        let merged = merge_documents(vec![doc1, doc2, doc3]).unwrap();
        let doc = Document::load(&merged).unwrap();

        let expected = [
            "First-Page-1",
            "First-Page-2",
            "Second-Page-1",
            "Third-Page-1",
            "Third-Page-2",
        ];
        assert_eq!(doc.page_count(), expected.len());
        for (i, label) in expected.iter().enumerate() {
            assert!(
                page_text(&doc, i).contains(label),
                "page {} should be {}",
                i + 1,
                label
            );
        }
    }

    #[test]
    fn test_merge_handles_different_sizes() {
        let doc1 = create_test_pdf(10, "Large");
        let doc2 = create_test_pdf(1, "Small");
        let doc3 = create_test_pdf(5, "Medium");

        let merged = merge_documents(vec![doc1, doc2, doc3]).unwrap();

        let doc = Document::load(&merged).unwrap();
        assert_eq!(doc.page_count(), 16, "Merged document should have 16 pages");
    }

    #[test]
    fn test_merge_keeps_one_font_per_source() {
        let a = Document::load(&create_test_pdf(3, "A")).unwrap();
        let b = Document::load(&create_test_pdf(3, "B")).unwrap();
        let merged = merge(&[a, b]).unwrap();

        let font_a = merged.page(0).unwrap().resource("Font", "F1");
        let font_b = merged.page(3).unwrap().resource("Font", "F1");
        assert_eq!(merged.page(2).unwrap().resource("Font", "F1"), font_a);
        assert_eq!(merged.page(5).unwrap().resource("Font", "F1"), font_b);
        assert_ne!(font_a, font_b);
    }

    #[test]
    fn test_merge_same_document_twice() {
        let a = Document::load(&create_test_pdf(2, "Twice")).unwrap();
        let merged = merge(&[a.clone(), a]).unwrap();
        assert_eq!(merged.page_count(), 4);
        assert!(page_text(&merged, 2).contains("Twice-Page-1"));
    }

    #[test]
    fn test_merge_names_the_failing_input() {
        let good = create_test_pdf(1, "Good");
        let err = merge_documents(vec![good, b"garbage".to_vec()]).unwrap_err();
        assert!(matches!(err, PdfToolkitError::Load(_)));
        assert!(err.to_string().contains("document 2"));
    }

    #[test]
    fn test_merged_document_is_valid_pdf() {
        let merged =
            merge_documents(vec![create_test_pdf(2, "Valid1"), create_test_pdf(2, "Valid2")])
                .unwrap();

        let doc = lopdf::Document::load_mem(&merged);
        assert!(doc.is_ok(), "Merged document should be valid PDF");
        assert_eq!(doc.unwrap().get_pages().len(), 4);
    }
}
