//! The database collaborator.
//!
//! Walkers only need four capabilities from a database, captured by
//! [`DocumentStore`]. Implementations: [`crate::firestore::FirestoreClient`]
//! for Cloud Firestore and [`crate::memory::MemoryStore`] for tests.
//!
use crate::{address::Address, error::StoreError, value::FieldMap};

/// A document read from a collection listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub fields: FieldMap,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Capabilities a walker needs from a hierarchical document database.
///
/// Enumeration order is not guaranteed to be stable between calls.
pub trait DocumentStore: Send + Sync {
    /// Ids of the collections at the database root.
    fn list_root_collections(
        &self,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Documents directly inside `collection`, with their fields.
    fn list_documents(
        &self,
        collection: &Address,
    ) -> impl Future<Output = Result<Vec<DocumentSnapshot>, StoreError>> + Send;

    /// Ids of the sub-collections of `document`.
    fn list_subcollections(
        &self,
        document: &Address,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Creates or overwrites the document at `document` with exactly `fields`.
    fn set_document(
        &self,
        document: &Address,
        fields: &FieldMap,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
