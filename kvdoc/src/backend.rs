use crate::document::Document;
use crate::error::Result;
use crate::store::{Order, Store};

/// The document operations every storage variant offers.
///
/// [`Store`] is the embedded variant. Callers that only need document
/// access can hold a `&dyn DocumentBackend` (or `Arc<dyn DocumentBackend>`)
/// and stay independent of how documents are kept.
pub trait DocumentBackend: Send + Sync {
    /// Insert a new document and return it as stored, including the
    /// assigned `_id` and `_created`.
    fn create(&self, collection: &str, data: Document) -> Result<Document>;

    fn get_by_id(&self, collection: &str, id: &str) -> Result<Document>;

    /// Replace the document identified by `data["_id"]`.
    fn update(&self, collection: &str, data: Document) -> Result<()>;

    fn delete(&self, collection: &str, id: &str) -> Result<()>;

    fn count(&self, collection: &str) -> Result<usize>;

    /// One page of documents. `offset` is a 1-based page number.
    fn list(&self, collection: &str, offset: usize, limit: usize, order: Order)
        -> Result<Vec<Document>>;

    fn find_one(&self, collection: &str, query: &str) -> Result<Option<Document>>;
}

impl DocumentBackend for Store {
    fn create(&self, collection: &str, data: Document) -> Result<Document> {
        Store::create(self, collection, data)
    }

    fn get_by_id(&self, collection: &str, id: &str) -> Result<Document> {
        Store::get_by_id(self, collection, id)
    }

    fn update(&self, collection: &str, data: Document) -> Result<()> {
        Store::update(self, collection, data)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        Store::delete(self, collection, id)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        Store::count(self, collection)
    }

    fn list(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
        order: Order,
    ) -> Result<Vec<Document>> {
        Store::list(self, collection, offset, limit, order)
    }

    fn find_one(&self, collection: &str, query: &str) -> Result<Option<Document>> {
        Store::find_one(self, collection, query)
    }
}
