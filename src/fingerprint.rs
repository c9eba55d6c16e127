//! Content identity for chunks.
//!
//! A fingerprint is the SHA-256 of `namespace`, `source_path` and the
//! normalized chunk text, joined by a unit separator (`0x1f`) so that no
//! two distinct triples hash the same input bytes. It is the only identity
//! key shared by the record store and the vector store.
//!
//! Normalization collapses every whitespace run to a single space and
//! trims the ends, so re-saving a document with different line endings or
//! indentation does not churn the index. Revision and modification time
//! are deliberately absent: unchanged content keeps its fingerprint.

use sha2::{Digest, Sha256};

use crate::chunk::chunk_text;
use crate::models::{Chunk, Fingerprint, Namespace, SourceDocument};

const FIELD_SEPARATOR: u8 = 0x1f;

/// Collapse whitespace runs and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Derive the fingerprint of one chunk.
pub fn fingerprint(namespace: &Namespace, source_path: &str, text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_str().as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(source_path.as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalize(text).as_bytes());
    Fingerprint::from_hex(hex::encode(hasher.finalize()))
}

/// Chunk a document and fingerprint every span.
pub fn chunk_document(
    namespace: &Namespace,
    doc: &SourceDocument,
    max_chars: usize,
    overlap: usize,
) -> Vec<Chunk> {
    chunk_text(&doc.content, max_chars, overlap)
        .into_iter()
        .map(|span| Chunk {
            namespace: namespace.clone(),
            source_path: doc.source_path.clone(),
            fingerprint: fingerprint(namespace, &doc.source_path, &span.text),
            text: span.text,
            sequence_index: span.sequence_index,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&ns("task-1"), "a.txt", "hello");
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_whitespace_only_changes_keep_fingerprint() {
        let a = fingerprint(&ns("t"), "a.txt", "Hello   world\r\n");
        let b = fingerprint(&ns("t"), "a.txt", "  Hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_origin_is_part_of_identity() {
        let base = fingerprint(&ns("t"), "a.txt", "same text");
        assert_ne!(base, fingerprint(&ns("t"), "b.txt", "same text"));
        assert_ne!(base, fingerprint(&ns("u"), "a.txt", "same text"));
        assert_ne!(base, fingerprint(&ns("t"), "a.txt", "other text"));
    }

    #[test]
    fn test_separator_prevents_field_shifting() {
        let a = fingerprint(&ns("t"), "ab", "c");
        let b = fingerprint(&ns("t"), "a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_chunk_document_is_stable() {
        let doc = SourceDocument::new(
            "notes.md",
            "Paragraph one is here.\n\nParagraph two is here.\n\nParagraph three.",
        );
        let first = chunk_document(&ns("t"), &doc, 30, 5);
        let second = chunk_document(&ns("t"), &doc, 30, 5);
        assert!(first.len() > 1);
        assert_eq!(first, second);
    }
}
