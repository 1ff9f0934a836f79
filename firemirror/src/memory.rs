//! In-memory [`DocumentStore`].
//!
//! Used by tests and examples in place of a live database. Documents are
//! enumerated in id order. A document created only as the parent of a
//! sub-collection has no fields and, like a Firestore "missing" document, is
//! not listed by its collection.
//!
use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{
    address::Address,
    error::StoreError,
    store::{DocumentSnapshot, DocumentStore},
    value::FieldMap,
};

type Collections = BTreeMap<String, CollectionNode>;

#[derive(Debug, Default)]
struct CollectionNode {
    documents: BTreeMap<String, DocumentNode>,
}

#[derive(Debug, Default)]
struct DocumentNode {
    fields: Option<FieldMap>,
    collections: Collections,
}

#[derive(Debug, Default)]
struct Inner {
    root: Collections,
    writes: Vec<Address>,
}

/// A database held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a document without recording it as a write.
    pub fn insert(&self, document: &Address, fields: FieldMap) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let node = document_entry(&mut inner.root, document.segments())
            .ok_or_else(|| not_a_document(document))?;
        node.fields = Some(fields);
        Ok(())
    }

    /// Fields of a document, or `None` if it does not exist.
    pub fn get(&self, document: &Address) -> Option<FieldMap> {
        let inner = self.inner.lock();
        find_document(&inner.root, document.segments()).and_then(|node| node.fields.clone())
    }

    /// Number of documents that have fields.
    pub fn document_count(&self) -> usize {
        fn count(collections: &Collections) -> usize {
            collections
                .values()
                .flat_map(|collection| collection.documents.values())
                .map(|doc| usize::from(doc.fields.is_some()) + count(&doc.collections))
                .sum()
        }
        count(&self.inner.lock().root)
    }

    /// Every document with fields, keyed by its database path (`Users/u1`).
    pub fn snapshot(&self) -> BTreeMap<String, FieldMap> {
        fn collect(collections: &Collections, prefix: &str, out: &mut BTreeMap<String, FieldMap>) {
            for (collection_id, collection) in collections {
                for (doc_id, doc) in &collection.documents {
                    let path = format!("{prefix}{collection_id}/{doc_id}");
                    if let Some(fields) = &doc.fields {
                        out.insert(path.clone(), fields.clone());
                    }
                    collect(&doc.collections, &format!("{path}/"), out);
                }
            }
        }
        let mut out = BTreeMap::new();
        collect(&self.inner.lock().root, "", &mut out);
        out
    }

    /// Addresses passed to [`DocumentStore::set_document`], in call order.
    pub fn writes(&self) -> Vec<Address> {
        self.inner.lock().writes.clone()
    }
}

impl DocumentStore for MemoryStore {
    async fn list_root_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().root.keys().cloned().collect())
    }

    async fn list_documents(&self, collection: &Address) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let inner = self.inner.lock();
        let Some(node) = find_collection(&inner.root, collection.segments()) else {
            return Ok(Vec::new());
        };
        Ok(node
            .documents
            .iter()
            .filter_map(|(id, doc)| {
                doc.fields
                    .as_ref()
                    .map(|fields| DocumentSnapshot::new(id.clone(), fields.clone()))
            })
            .collect())
    }

    async fn list_subcollections(&self, document: &Address) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        Ok(find_document(&inner.root, document.segments())
            .map(|node| node.collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_document(&self, document: &Address, fields: &FieldMap) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let node = document_entry(&mut inner.root, document.segments())
            .ok_or_else(|| not_a_document(document))?;
        node.fields = Some(fields.clone());
        inner.writes.push(document.clone());
        Ok(())
    }
}

fn not_a_document(address: &Address) -> StoreError {
    StoreError::Other {
        message: format!("'{address}' is not a document address"),
    }
}

fn find_collection<'a>(collections: &'a Collections, segments: &[String]) -> Option<&'a CollectionNode> {
    match segments {
        [collection] => collections.get(collection),
        [collection, document, rest @ ..] => find_collection(
            &collections.get(collection)?.documents.get(document)?.collections,
            rest,
        ),
        [] => None,
    }
}

fn find_document<'a>(collections: &'a Collections, segments: &[String]) -> Option<&'a DocumentNode> {
    let [collection, document, rest @ ..] = segments else {
        return None;
    };
    let node = collections.get(collection)?.documents.get(document)?;
    if rest.is_empty() {
        Some(node)
    } else {
        find_document(&node.collections, rest)
    }
}

/// Finds or creates the document node at `segments`, creating empty parents.
fn document_entry<'a>(collections: &'a mut Collections, segments: &[String]) -> Option<&'a mut DocumentNode> {
    let [collection, document, rest @ ..] = segments else {
        return None;
    };
    if rest.len() == 1 {
        return None;
    }
    let node = collections
        .entry(collection.clone())
        .or_default()
        .documents
        .entry(document.clone())
        .or_default();
    if rest.is_empty() {
        Some(node)
    } else {
        document_entry(&mut node.collections, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::field_map;

    fn addr(path: &str) -> Address {
        Address::parse(path).unwrap()
    }

    #[tokio::test]
    async fn lists_in_id_order() {
        let store = MemoryStore::new();
        for id in ["d2", "d1", "d3"] {
            store
                .insert(&addr(&format!("A/{id}")), field_map([("id", id)]))
                .unwrap();
        }
        store.insert(&addr("B/x"), FieldMap::new()).unwrap();

        assert_eq!(store.list_root_collections().await.unwrap(), vec!["A", "B"]);
        let ids: Vec<String> = store
            .list_documents(&addr("A"))
            .await
            .unwrap()
            .into_iter()
            .map(|snapshot| snapshot.id)
            .collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);
        assert!(store.list_documents(&addr("Nope")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_parents_are_not_listed() {
        let store = MemoryStore::new();
        store.insert(&addr("A/ghost/B/d3"), FieldMap::new()).unwrap();

        assert!(store.list_documents(&addr("A")).await.unwrap().is_empty());
        assert_eq!(
            store.list_subcollections(&addr("A/ghost")).await.unwrap(),
            vec!["B"]
        );
        assert_eq!(store.document_count(), 1);
        assert!(store.get(&addr("A/ghost")).is_none());
    }

    #[tokio::test]
    async fn set_document_overwrites_and_records() {
        let store = MemoryStore::new();
        store.insert(&addr("A/d1"), field_map([("a", 1i64)])).unwrap();
        store
            .set_document(&addr("A/d1"), &field_map([("b", 2i64)]))
            .await
            .unwrap();

        assert_eq!(store.get(&addr("A/d1")).unwrap(), field_map([("b", 2i64)]));
        assert_eq!(store.writes(), vec![addr("A/d1")]);
        assert_eq!(store.snapshot().keys().collect::<Vec<_>>(), vec!["A/d1"]);
        assert!(store.set_document(&addr("A"), &FieldMap::new()).await.is_err());
    }
}
