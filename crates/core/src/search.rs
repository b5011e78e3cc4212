use crate::models::{Scope, SearchOptions};
use crate::store::{SimilarRow, WindowRow};
use crate::traits::ChunkStore;
use crate::RetrievalError;
use tracing::debug;

/// `1 - cosine_distance`. `None` for mismatched lengths or zero vectors.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f32> {
    if left.len() != right.len() || left.is_empty() {
        return None;
    }

    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    let denominator = (left_norm * right_norm).sqrt();
    if denominator <= f32::EPSILON {
        return None;
    }
    Some(dot / denominator)
}

pub struct SimilaritySearcher<'a, S> {
    store: &'a S,
}

impl<'a, S> SimilaritySearcher<'a, S>
where
    S: ChunkStore + Send + Sync,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Initial matches above the threshold, each expanded to every chunk of its document
    /// within `context_pages` pages. Rows carry the originating match's score and are
    /// ordered by that score, then by page.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        scope: &Scope,
        options: &SearchOptions,
    ) -> Result<Vec<WindowRow>, RetrievalError> {
        if query_embedding.is_empty() {
            return Err(RetrievalError::Validation(
                "query embedding is empty".to_string(),
            ));
        }
        if !options.threshold.is_finite() {
            return Err(RetrievalError::Validation(
                "similarity threshold must be a finite number".to_string(),
            ));
        }
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let matches = self.initial_matches(query_embedding, scope, options).await?;
        debug!(matches = matches.len(), "initial similarity matches");

        let mut rows = Vec::new();
        for matched in matches {
            let page = matched.chunk.page_number();
            let pages = page.saturating_sub(options.context_pages)
                ..=page.saturating_add(options.context_pages);

            let window = self
                .store
                .query_window(scope, matched.chunk.document.id, pages)
                .await?;

            for chunk in window {
                // Recomputing the match's score here could drift below the threshold the
                // store already applied.
                let own_similarity = if chunk.id == matched.chunk.id {
                    Some(matched.similarity)
                } else {
                    chunk
                        .embedding
                        .as_deref()
                        .and_then(|embedding| cosine_similarity(embedding, query_embedding))
                };
                rows.push(WindowRow {
                    chunk,
                    similarity: matched.similarity,
                    own_similarity,
                });
            }
        }

        rows.sort_by(|left, right| {
            right
                .similarity
                .total_cmp(&left.similarity)
                .then_with(|| left.chunk.page_number().cmp(&right.chunk.page_number()))
        });

        Ok(rows)
    }

    async fn initial_matches(
        &self,
        query_embedding: &[f32],
        scope: &Scope,
        options: &SearchOptions,
    ) -> Result<Vec<SimilarRow>, RetrievalError> {
        let mut matches = self
            .store
            .query_similar(scope, query_embedding, options.threshold, options.limit)
            .await?;

        // Store guarantees are re-applied so every backend yields the same candidate set.
        matches.retain(|row| row.similarity > options.threshold);
        matches.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        matches.truncate(options.limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkKind, ChunkMetadata, DocumentRef, NewChunk};
    use crate::assembler::assemble;
    use crate::locks::DocumentLock;
    use crate::models::{ChunkId, DocumentId};
    use crate::store::StoredChunk;
    use crate::stores::InMemoryStore;
    use crate::traits::ChunkStore;
    use async_trait::async_trait;
    use std::ops::RangeInclusive;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    fn chunk(document_id: i64, page: u32, embedding: Option<Vec<f32>>) -> NewChunk {
        NewChunk {
            document_id,
            content: format!("doc {document_id} page {page}"),
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

    fn store() -> InMemoryStore {
        let store = InMemoryStore::new(2);
        store.register_product(10);
        for id in [1, 2] {
            store.register_document(DocumentRef {
                id,
                filename: format!("manual-{id}.pdf"),
                version: Some("VA40".to_string()),
                product_id: Some(10),
            });
        }
        store
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        let same = cosine_similarity(&[0.6, 0.8], &[0.6, 0.8]).unwrap();
        assert!((same - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn window_rows_inherit_match_score_and_sort_by_page() {
        let store = store();
        store
            .insert_batch(&[
                chunk(1, 1, Some(unit(0.0, 1.0))),
                chunk(1, 5, Some(unit(1.0, 0.0))),
                chunk(1, 6, None),
                chunk(1, 4, Some(unit(0.0, 1.0))),
                chunk(1, 20, Some(unit(0.0, 1.0))),
            ])
            .await
            .unwrap();

        let options = SearchOptions {
            limit: 5,
            threshold: 0.7,
            context_pages: 1,
        };
        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(1), &options)
            .await
            .unwrap();

        let pages: Vec<u32> = rows.iter().map(|row| row.chunk.page_number()).collect();
        assert_eq!(pages, vec![4, 5, 6]);
        assert!(rows.iter().all(|row| (row.similarity - 1.0).abs() < 1e-5));
        assert_eq!(rows[2].own_similarity, None);
        assert!(rows[0].own_similarity.unwrap().abs() < 1e-5);
    }

    #[tokio::test]
    async fn rows_order_by_match_score_then_page() {
        let store = store();
        store
            .insert_batch(&[
                chunk(1, 9, Some(unit(0.9, 0.1))),
                chunk(1, 2, Some(unit(1.0, 0.0))),
                chunk(1, 1, Some(unit(0.0, 1.0))),
            ])
            .await
            .unwrap();

        let options = SearchOptions {
            limit: 5,
            threshold: 0.5,
            context_pages: 1,
        };
        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(1), &options)
            .await
            .unwrap();

        let pages: Vec<u32> = rows.iter().map(|row| row.chunk.page_number()).collect();
        assert_eq!(pages, vec![1, 2, 9]);
        assert!(rows[0].similarity > rows[2].similarity);
    }

    #[tokio::test]
    async fn window_stays_inside_the_matched_document() {
        let store = store();
        store
            .insert_batch(&[
                chunk(1, 3, Some(unit(1.0, 0.0))),
                chunk(2, 3, Some(unit(0.0, 1.0))),
            ])
            .await
            .unwrap();

        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Product(10), &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chunk.document.id, 1);
    }

    #[tokio::test]
    async fn nothing_above_threshold_is_an_empty_result() {
        let store = store();
        store
            .insert_batch(&[chunk(1, 1, Some(unit(0.0, 1.0)))])
            .await
            .unwrap();

        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(1), &SearchOptions::default())
            .await
            .unwrap();
        assert!(rows.is_empty());

        let empty_scope = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(2), &SearchOptions::default())
            .await
            .unwrap();
        assert!(empty_scope.is_empty());
    }

    #[tokio::test]
    async fn limit_caps_initial_matches() {
        let store = store();
        store
            .insert_batch(&[
                chunk(1, 1, Some(unit(1.0, 0.0))),
                chunk(1, 50, Some(unit(1.0, 0.1))),
                chunk(1, 100, Some(unit(1.0, 0.2))),
            ])
            .await
            .unwrap();

        let options = SearchOptions {
            limit: 2,
            threshold: 0.5,
            context_pages: 0,
        };
        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(1), &options)
            .await
            .unwrap();

        let pages: Vec<u32> = rows.iter().map(|row| row.chunk.page_number()).collect();
        assert_eq!(pages, vec![1, 50]);
    }

    /// Scores matches with its own arithmetic, like a database computing distances in
    /// double precision, instead of the in-memory f32 cosine.
    struct BackendScoredStore {
        inner: InMemoryStore,
        reported: f32,
    }

    #[async_trait]
    impl ChunkStore for BackendScoredStore {
        async fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<ChunkId>, RetrievalError> {
            self.inner.insert_batch(chunks).await
        }

        async fn query_similar(
            &self,
            scope: &Scope,
            query_vector: &[f32],
            threshold: f32,
            limit: usize,
        ) -> Result<Vec<SimilarRow>, RetrievalError> {
            let rows = self.inner.query_similar(scope, query_vector, -1.0, limit).await?;
            Ok(rows
                .into_iter()
                .map(|row| SimilarRow {
                    chunk: row.chunk,
                    similarity: self.reported,
                })
                .filter(|row| row.similarity > threshold)
                .collect())
        }

        async fn query_window(
            &self,
            scope: &Scope,
            document_id: DocumentId,
            pages: RangeInclusive<u32>,
        ) -> Result<Vec<StoredChunk>, RetrievalError> {
            self.inner.query_window(scope, document_id, pages).await
        }

        async fn delete_document_chunks(&self, document_id: DocumentId) -> Result<u64, RetrievalError> {
            self.inner.delete_document_chunks(document_id).await
        }

        async fn lock_document(&self, document_id: DocumentId) -> Result<DocumentLock, RetrievalError> {
            self.inner.lock_document(document_id).await
        }
    }

    #[tokio::test]
    async fn store_scored_match_always_opens_a_group() {
        let inner = store();
        inner
            .insert_batch(&[
                chunk(1, 3, Some(unit(0.6, 0.8))),
                chunk(1, 4, Some(unit(0.0, 1.0))),
            ])
            .await
            .unwrap();
        let store = BackendScoredStore {
            inner,
            reported: 0.75,
        };

        let options = SearchOptions {
            limit: 1,
            threshold: 0.7,
            context_pages: 1,
        };
        let rows = SimilaritySearcher::new(&store)
            .search(&unit(1.0, 0.0), &Scope::Document(1), &options)
            .await
            .unwrap();

        // Recomputed locally the match would score 0.6, under the threshold.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].chunk.page_number(), 3);
        assert_eq!(rows[0].own_similarity, Some(0.75));

        let groups = assemble(rows, options.threshold);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].context.metadata.page_number, 3);
        assert_eq!(groups[0].pages.len(), 2);
    }
}
