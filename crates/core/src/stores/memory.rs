use crate::locks::{DocumentLock, DocumentLocks};
use crate::models::{ChunkId, DocumentId, DocumentRef, NewChunk, ProductId, Scope};
use crate::search::cosine_similarity;
use crate::store::{SimilarRow, StoredChunk};
use crate::traits::{ChunkStore, DocumentRegistry};
use crate::RetrievalError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct ChunkRow {
    id: ChunkId,
    chunk: NewChunk,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<DocumentId, DocumentRef>,
    products: HashSet<ProductId>,
    chunks: Vec<ChunkRow>,
    next_id: ChunkId,
}

/// Brute-force cosine search over chunks held in memory. Doubles as the document
/// registry so it can stand in for the full backend.
#[derive(Debug)]
pub struct InMemoryStore {
    dimensions: usize,
    state: RwLock<MemoryState>,
    locks: DocumentLocks,
}

impl InMemoryStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            locks: DocumentLocks::default(),
        }
    }

    pub fn register_product(&self, id: ProductId) {
        self.write_state_lossy().products.insert(id);
    }

    pub fn register_document(&self, document: DocumentRef) {
        let mut state = self.write_state_lossy();
        if let Some(product_id) = document.product_id {
            state.products.insert(product_id);
        }
        state.documents.insert(document.id, document);
    }

    /// Drops a document and, like the relational cascade, all of its chunks.
    pub fn remove_document(&self, id: DocumentId) {
        let mut state = self.write_state_lossy();
        state.documents.remove(&id);
        state.chunks.retain(|row| row.chunk.document_id != id);
    }

    pub fn chunk_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.chunks.len())
            .unwrap_or_default()
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, MemoryState>, RetrievalError> {
        self.state
            .read()
            .map_err(|_| RetrievalError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, RetrievalError> {
        self.state
            .write()
            .map_err(|_| RetrievalError::Storage("in-memory store lock poisoned".to_string()))
    }

    fn write_state_lossy(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn stored(&self, row: &ChunkRow) -> Option<StoredChunk> {
        let document = self.documents.get(&row.chunk.document_id)?;
        Some(StoredChunk {
            id: row.id,
            document: document.clone(),
            content: row.chunk.content.clone(),
            embedding: row.chunk.embedding.clone(),
            metadata: row.chunk.metadata.clone(),
        })
    }

    fn in_scope<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = StoredChunk> + 'a {
        self.chunks
            .iter()
            .filter_map(|row| self.stored(row))
            .filter(move |chunk| scope.includes(&chunk.document))
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<ChunkId>, RetrievalError> {
        let mut state = self.write_state()?;

        for chunk in chunks {
            if !state.documents.contains_key(&chunk.document_id) {
                return Err(RetrievalError::Storage(format!(
                    "chunk references unknown document {}",
                    chunk.document_id
                )));
            }
            if chunk.content.trim().is_empty() {
                return Err(RetrievalError::Storage(
                    "chunk content must not be empty".to_string(),
                ));
            }
            if let Some(embedding) = &chunk.embedding {
                if embedding.len() != self.dimensions {
                    return Err(RetrievalError::Storage(format!(
                        "expected {} dimensions, not {}",
                        self.dimensions,
                        embedding.len()
                    )));
                }
            }
        }

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = state.next_id;
            state.next_id += 1;
            state.chunks.push(ChunkRow {
                id,
                chunk: chunk.clone(),
            });
            ids.push(id);
        }

        Ok(ids)
    }

    async fn query_similar(
        &self,
        scope: &Scope,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarRow>, RetrievalError> {
        let state = self.read_state()?;

        let mut rows: Vec<SimilarRow> = state
            .in_scope(scope)
            .filter_map(|chunk| {
                let similarity = cosine_similarity(chunk.embedding.as_deref()?, query_vector)?;
                (similarity > threshold).then_some(SimilarRow { chunk, similarity })
            })
            .collect();

        rows.sort_by(|left, right| {
            right
                .similarity
                .total_cmp(&left.similarity)
                .then_with(|| left.chunk.id.cmp(&right.chunk.id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn query_window(
        &self,
        scope: &Scope,
        document_id: DocumentId,
        pages: RangeInclusive<u32>,
    ) -> Result<Vec<StoredChunk>, RetrievalError> {
        let state = self.read_state()?;

        let mut rows: Vec<StoredChunk> = state
            .in_scope(scope)
            .filter(|chunk| chunk.document.id == document_id)
            .filter(|chunk| pages.contains(&chunk.page_number()))
            .collect();

        rows.sort_by(|left, right| {
            left.page_number()
                .cmp(&right.page_number())
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(rows)
    }

    async fn delete_document_chunks(&self, document_id: DocumentId) -> Result<u64, RetrievalError> {
        let mut state = self.write_state()?;
        let before = state.chunks.len();
        state.chunks.retain(|row| row.chunk.document_id != document_id);
        Ok((before - state.chunks.len()) as u64)
    }

    async fn lock_document(&self, document_id: DocumentId) -> Result<DocumentLock, RetrievalError> {
        Ok(self.locks.acquire(document_id).await)
    }
}

#[async_trait]
impl DocumentRegistry for InMemoryStore {
    async fn document(&self, id: DocumentId) -> Result<Option<DocumentRef>, RetrievalError> {
        Ok(self.read_state()?.documents.get(&id).cloned())
    }

    async fn product_exists(&self, id: ProductId) -> Result<bool, RetrievalError> {
        Ok(self.read_state()?.products.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, ChunkMetadata};

    fn document(id: DocumentId, product_id: Option<ProductId>) -> DocumentRef {
        DocumentRef {
            id,
            filename: format!("doc-{id}.pdf"),
            version: None,
            product_id,
        }
    }

    fn chunk(document_id: DocumentId, page: u32, embedding: Option<Vec<f32>>) -> NewChunk {
        NewChunk {
            document_id,
            content: "Check the coolant level.".to_string(),
            embedding,
            metadata: ChunkMetadata {
                page_number: page,
                bbox: None,
                kind: ChunkKind::Text,
                images: Vec::new(),
                tables: Vec::new(),
            },
        }
    }

    #[tokio::test]
    async fn failed_batch_writes_nothing() {
        let store = InMemoryStore::new(2);
        store.register_document(document(1, None));

        let result = store
            .insert_batch(&[chunk(1, 1, Some(vec![1.0, 0.0])), chunk(1, 2, Some(vec![1.0]))])
            .await;

        assert!(matches!(result, Err(RetrievalError::Storage(_))));
        assert_eq!(store.chunk_count(), 0);
    }

    #[tokio::test]
    async fn unknown_document_is_rejected() {
        let store = InMemoryStore::new(2);
        let result = store.insert(&chunk(99, 1, None)).await;
        assert!(matches!(result, Err(RetrievalError::Storage(_))));
    }

    #[tokio::test]
    async fn vectorless_chunks_never_match() {
        let store = InMemoryStore::new(2);
        store.register_document(document(1, None));
        store.insert(&chunk(1, 1, None)).await.unwrap();

        let rows = store
            .query_similar(&Scope::Document(1), &[1.0, 0.0], -1.0, 10)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn product_scope_resolves_through_documents() {
        let store = InMemoryStore::new(2);
        store.register_document(document(1, Some(5)));
        store.register_document(document(2, Some(6)));
        store
            .insert_batch(&[chunk(1, 1, Some(vec![1.0, 0.0])), chunk(2, 1, Some(vec![1.0, 0.0]))])
            .await
            .unwrap();

        let rows = store
            .query_similar(&Scope::Product(5), &[1.0, 0.0], 0.5, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chunk.document.id, 1);
        assert!(store.product_exists(6).await.unwrap());
        assert!(!store.product_exists(7).await.unwrap());
    }

    #[tokio::test]
    async fn removing_a_document_cascades_to_chunks() {
        let store = InMemoryStore::new(2);
        store.register_document(document(1, None));
        store.register_document(document(2, None));
        store
            .insert_batch(&[chunk(1, 1, None), chunk(2, 1, None)])
            .await
            .unwrap();

        store.remove_document(1);
        assert_eq!(store.chunk_count(), 1);
        assert_eq!(store.delete_document_chunks(2).await.unwrap(), 1);
        assert_eq!(store.chunk_count(), 0);
    }
}
