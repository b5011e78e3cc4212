use crate::locks::DocumentLock;
use crate::models::{ChunkId, DocumentId, DocumentRef, NewChunk, ProductId, Scope};
use crate::store::{SimilarRow, StoredChunk};
use crate::RetrievalError;
use async_trait::async_trait;
use std::ops::RangeInclusive;

/// Chunk persistence with a vector index. Reads may run concurrently.
#[async_trait]
pub trait ChunkStore {
    /// Writes all rows or none of them.
    async fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<ChunkId>, RetrievalError>;

    async fn insert(&self, chunk: &NewChunk) -> Result<ChunkId, RetrievalError> {
        let ids = self.insert_batch(std::slice::from_ref(chunk)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| RetrievalError::Storage("insert returned no id".to_string()))
    }

    /// Vectorized chunks in scope with similarity strictly above `threshold`, best first,
    /// at most `limit` rows.
    async fn query_similar(
        &self,
        scope: &Scope,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarRow>, RetrievalError>;

    /// Chunks of one document in scope whose page lies in `pages`, ordered by page.
    async fn query_window(
        &self,
        scope: &Scope,
        document_id: DocumentId,
        pages: RangeInclusive<u32>,
    ) -> Result<Vec<StoredChunk>, RetrievalError>;

    async fn delete_document_chunks(&self, document_id: DocumentId) -> Result<u64, RetrievalError>;

    /// Waits until no other writer holds `document_id`, across every handle to the
    /// same backing store. Held until the returned lock is dropped.
    async fn lock_document(&self, document_id: DocumentId) -> Result<DocumentLock, RetrievalError>;
}

/// Externally owned document/product identity.
#[async_trait]
pub trait DocumentRegistry {
    async fn document(&self, id: DocumentId) -> Result<Option<DocumentRef>, RetrievalError>;

    async fn product_exists(&self, id: ProductId) -> Result<bool, RetrievalError>;

    async fn ensure_scope(&self, scope: &Scope) -> Result<(), RetrievalError> {
        match scope {
            Scope::Document(id) => {
                if self.document(*id).await?.is_none() {
                    return Err(RetrievalError::NotFound(format!("document {id}")));
                }
            }
            Scope::Product(id) => {
                if !self.product_exists(*id).await? {
                    return Err(RetrievalError::NotFound(format!("product {id}")));
                }
            }
        }
        Ok(())
    }
}
