use crate::answer::{collect_images, AnswerContext, AnswerImage};
use crate::assembler::assemble;
use crate::embeddings::{Embedder, EmbeddingEncoder};
use crate::models::{
    BoundingBox, ContextGroup, DocumentId, Scope, SearchOptions, SearchQuery,
};
use crate::search::SimilaritySearcher;
use crate::traits::{ChunkStore, DocumentRegistry};
use crate::RetrievalError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub groups: Vec<ContextGroup>,
    pub images: Vec<AnswerImage>,
}

impl SearchResponse {
    pub fn page_count(&self) -> usize {
        self.groups.iter().map(|group| group.pages.len()).sum()
    }

    pub fn answer_context(&self) -> AnswerContext {
        AnswerContext::new(&self.query, &self.groups)
    }
}

/// Query text -> vector -> matches and windows -> context groups.
pub struct RetrievalService<S, M> {
    store: Arc<S>,
    encoder: Arc<EmbeddingEncoder<M>>,
}

impl<S, M> RetrievalService<S, M>
where
    S: ChunkStore + DocumentRegistry + Send + Sync,
    M: Embedder + Send + Sync + 'static,
{
    pub fn new(store: Arc<S>, encoder: Arc<EmbeddingEncoder<M>>) -> Self {
        Self { store, encoder }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, RetrievalError> {
        if query.text.trim().is_empty() {
            return Err(RetrievalError::Validation("query is empty".to_string()));
        }
        self.store.ensure_scope(&query.scope).await?;

        let embedding = self.encode(query.text.clone()).await?;
        let rows = SimilaritySearcher::new(self.store.as_ref())
            .search(&embedding, &query.scope, &query.options)
            .await?;
        debug!(rows = rows.len(), "windowed rows");

        let groups = assemble(rows, query.options.threshold);
        let response = SearchResponse {
            query: query.text.clone(),
            images: collect_images(&groups),
            groups,
        };

        info!(
            groups = response.groups.len(),
            pages = response.page_count(),
            images = response.images.len(),
            "search finished"
        );
        Ok(response)
    }

    /// Searches with the text of the chunk that overlaps `region` most on the given page.
    pub async fn search_by_region(
        &self,
        document_id: DocumentId,
        page_number: u32,
        region: BoundingBox,
        options: SearchOptions,
    ) -> Result<SearchResponse, RetrievalError> {
        let document = self
            .store
            .document(document_id)
            .await?
            .ok_or_else(|| RetrievalError::NotFound(format!("document {document_id}")))?;

        let page_chunks = self
            .store
            .query_window(&Scope::Document(document_id), document_id, page_number..=page_number)
            .await?;

        let best = page_chunks
            .into_iter()
            .filter_map(|chunk| {
                let area = chunk.metadata.bbox?.intersection_area(&region);
                (area > 0.0).then_some((area, chunk))
            })
            .max_by(|(left, _), (right, _)| left.total_cmp(right));

        let Some((_, chunk)) = best else {
            info!(document_id, page_number, "no chunk under the selected region");
            return Ok(SearchResponse {
                query: String::new(),
                groups: Vec::new(),
                images: Vec::new(),
            });
        };

        let scope = match document.product_id {
            Some(product_id) => Scope::Product(product_id),
            None => Scope::Document(document_id),
        };

        self.search(&SearchQuery {
            text: chunk.content,
            scope,
            options,
        })
        .await
    }

    async fn encode(&self, text: String) -> Result<Vec<f32>, RetrievalError> {
        let encoder = Arc::clone(&self.encoder);
        tokio::task::spawn_blocking(move || encoder.encode(&text))
            .await
            .map_err(|err| {
                RetrievalError::ExternalService(format!("embedding task failed: {err}"))
            })?
    }
}
