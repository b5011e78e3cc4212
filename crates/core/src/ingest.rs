use crate::chunking::{build_chunks, Chunker, ChunkingConfig};
use crate::embeddings::{Embedder, EmbeddingEncoder};
use crate::extractor::PageSource;
use crate::models::{DocumentId, IngestionOptions, NewChunk, PageContent};
use crate::proximity::ProximityLinker;
use crate::traits::{ChunkStore, DocumentRegistry};
use crate::RetrievalError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub document_id: DocumentId,
    pub chunks_created: usize,
    pub batches_committed: usize,
    pub replaced_chunks: u64,
    pub finished_at: DateTime<Utc>,
}

/// Page content -> chunks -> vectors -> linked media -> committed batches.
pub struct IngestionPipeline<S, M> {
    store: Arc<S>,
    encoder: Arc<EmbeddingEncoder<M>>,
    chunker: Chunker,
    linker: ProximityLinker,
    options: IngestionOptions,
}

impl<S, M> IngestionPipeline<S, M>
where
    S: ChunkStore + DocumentRegistry + Send + Sync,
    M: Embedder + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<S>,
        encoder: Arc<EmbeddingEncoder<M>>,
        options: IngestionOptions,
    ) -> Result<Self, RetrievalError> {
        if options.batch_size == 0 {
            return Err(RetrievalError::Validation(
                "batch size must be positive".to_string(),
            ));
        }

        Ok(Self {
            store,
            encoder,
            chunker: Chunker::new(ChunkingConfig::from(&options))?,
            linker: ProximityLinker::for_strategy(options.strategy),
            options,
        })
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    /// Unvectorized chunk rows for a document's pages.
    pub fn plan_chunks(
        &self,
        document_id: DocumentId,
        pages: &[PageContent],
    ) -> Result<Vec<NewChunk>, RetrievalError> {
        let mut chunks = Vec::new();
        for page in pages {
            chunks.extend(build_chunks(
                document_id,
                page,
                &self.chunker,
                &self.linker,
                self.options.strategy,
            )?);
        }
        Ok(chunks)
    }

    pub async fn ingest_from_source<P>(
        &self,
        source: Arc<P>,
        document_id: DocumentId,
    ) -> Result<IngestionReport, RetrievalError>
    where
        P: PageSource + Send + Sync + 'static,
    {
        let processed = tokio::task::spawn_blocking(move || source.load_pages(document_id))
            .await
            .map_err(|err| RetrievalError::Storage(format!("page loading task failed: {err}")))??;
        self.ingest_document(document_id, &processed.pages).await
    }

    /// Batches commit independently: on failure, batches committed earlier stay
    /// and the error carries how many rows they hold. The store's document lock is
    /// held from the optional delete through the last batch.
    pub async fn ingest_document(
        &self,
        document_id: DocumentId,
        pages: &[PageContent],
    ) -> Result<IngestionReport, RetrievalError> {
        if self.store.document(document_id).await?.is_none() {
            return Err(RetrievalError::NotFound(format!("document {document_id}")));
        }

        let chunks = self.plan_chunks(document_id, pages)?;
        let _lock = self.store.lock_document(document_id).await?;

        let replaced_chunks = if self.options.replace_existing {
            self.store.delete_document_chunks(document_id).await?
        } else {
            0
        };

        let mut committed = 0usize;
        let mut batches_committed = 0usize;

        for batch in chunks.chunks(self.options.batch_size) {
            let written = self.commit_batch(batch.to_vec()).await;
            match written {
                Ok(count) => {
                    committed += count;
                    batches_committed += 1;
                }
                Err(source) => {
                    warn!(
                        document_id,
                        committed,
                        error = %source,
                        "ingestion aborted"
                    );
                    return Err(RetrievalError::PartialIngestion {
                        document_id,
                        committed,
                        source: Box::new(source),
                    });
                }
            }
        }

        info!(
            document_id,
            chunks_created = committed,
            batches_committed,
            replaced_chunks,
            "document ingested"
        );

        Ok(IngestionReport {
            document_id,
            chunks_created: committed,
            batches_committed,
            replaced_chunks,
            finished_at: Utc::now(),
        })
    }

    async fn commit_batch(&self, batch: Vec<NewChunk>) -> Result<usize, RetrievalError> {
        let encoder = Arc::clone(&self.encoder);
        let vectorized = tokio::task::spawn_blocking(move || {
            batch
                .into_iter()
                .map(|mut chunk| {
                    chunk.embedding = Some(encoder.encode(&chunk.content)?);
                    Ok(chunk)
                })
                .collect::<Result<Vec<_>, RetrievalError>>()
        })
        .await
        .map_err(|err| RetrievalError::ExternalService(format!("embedding task failed: {err}")))??;

        let ids = self.store.insert_batch(&vectorized).await?;
        Ok(ids.len())
    }
}
