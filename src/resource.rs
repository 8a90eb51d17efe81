//! Result model for storage operations

use crate::stream::ChunkedReadStream;

/// A stored document handed back by GET, STORAGE_EXPAND, PUT and CLEANUP.
pub struct DocumentResource {
  /// Child name within a collection listing, when applicable
  pub name: Option<String>,
  /// Whether the document exists. PUT sets this to `false` on the
  /// `existingResource` conflict: the requested path would shadow a
  /// document somewhere on its ancestor chain. Unusual, but callers rely
  /// on the distinction between this and a plain not-found.
  pub exists: bool,
  /// Payload length in bytes
  pub length: usize,
  /// Version token of the stored payload
  pub etag: String,
  /// Lazy payload stream
  pub stream: Option<ChunkedReadStream>,
}

impl DocumentResource {
  /// A document with a readable payload.
  pub fn with_content(content: Vec<u8>, etag: String) -> Self {
    Self {
      name: None,
      exists: true,
      length: content.len(),
      etag,
      stream: Some(ChunkedReadStream::new(content)),
    }
  }

  /// The `existingResource` conflict marker: an ancestor of the requested
  /// path is already a document.
  pub fn shadowed() -> Self {
    Self {
      name: None,
      exists: false,
      length: 0,
      etag: String::new(),
      stream: None,
    }
  }
}

impl std::fmt::Debug for DocumentResource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DocumentResource")
      .field("name", &self.name)
      .field("exists", &self.exists)
      .field("length", &self.length)
      .field("etag", &self.etag)
      .finish()
  }
}

/// One entry of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionElement {
  /// A sub-collection; rendered to callers with a trailing `/`
  Collection(String),
  /// A document leaf
  Document(String),
}

impl CollectionElement {
  /// The bare child name.
  pub fn name(&self) -> &str {
    match self {
      CollectionElement::Collection(name) | CollectionElement::Document(name) => name,
    }
  }

  /// The externally rendered name: sub-collections carry a trailing `/`.
  pub fn display_name(&self) -> String {
    match self {
      CollectionElement::Collection(name) => format!("{}/", name),
      CollectionElement::Document(name) => name.clone(),
    }
  }

  fn sort_rank(&self) -> u8 {
    match self {
      CollectionElement::Collection(_) => 0,
      CollectionElement::Document(_) => 1,
    }
  }
}

impl Ord for CollectionElement {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self
      .sort_rank()
      .cmp(&other.sort_rank())
      .then_with(|| self.name().cmp(other.name()))
  }
}

impl PartialOrd for CollectionElement {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

/// A collection listing: sub-collections first, then documents, each sorted
/// lexicographically.
#[derive(Debug, Clone, Default)]
pub struct CollectionResource {
  pub name: Option<String>,
  pub items: Vec<CollectionElement>,
}

impl CollectionResource {
  pub fn new(mut items: Vec<CollectionElement>) -> Self {
    items.sort();
    Self { name: None, items }
  }

  /// The `existingCollection` conflict marker: the requested document path
  /// is already a collection.
  pub fn conflict() -> Self {
    Self::default()
  }
}

/// The terminal outcome of a storage operation. Every operation resolves
/// with exactly one of these.
#[derive(Debug)]
pub enum Resource {
  /// The path does not resolve
  NotFound,
  /// The caller's etag matches the stored one
  NotModified,
  /// DELETE on a non-empty collection without `recursive`
  NotEmpty,
  /// A conflicting lock blocked the write
  Rejected,
  /// Caller-visible validation failure
  Invalid(String),
  /// Backend or codec failure not otherwise classified
  Error(String),
  /// A successful delete; carries no payload
  Deleted,
  /// A document payload (also PUT's conflict/success markers, see
  /// [`DocumentResource::exists`])
  Document(DocumentResource),
  /// A collection listing (also PUT's `existingCollection` marker)
  Collection(CollectionResource),
}

impl Resource {
  pub fn is_error(&self) -> bool {
    matches!(self, Resource::Error(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_collection_sorting_collections_first() {
    let listing = CollectionResource::new(vec![
      CollectionElement::Document("zeta".into()),
      CollectionElement::Collection("beta".into()),
      CollectionElement::Document("alpha".into()),
      CollectionElement::Collection("delta".into()),
    ]);
    let names: Vec<String> = listing.items.iter().map(|e| e.display_name()).collect();
    assert_eq!(names, vec!["beta/", "delta/", "alpha", "zeta"]);
  }

  #[test]
  fn test_collection_element_display() {
    assert_eq!(
      CollectionElement::Collection("sub".into()).display_name(),
      "sub/"
    );
    assert_eq!(CollectionElement::Document("doc".into()).display_name(), "doc");
  }

  #[test]
  fn test_shadowed_document_marker() {
    let doc = DocumentResource::shadowed();
    assert!(!doc.exists);
    assert_eq!(doc.length, 0);
    assert!(doc.stream.is_none());
  }
}
