pub mod answer;
pub mod assembler;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod locks;
pub mod models;
pub mod orchestrator;
pub mod proximity;
pub mod search;
pub mod store;
pub mod stores;
pub mod traits;

pub use answer::{AnswerContext, AnswerImage};
pub use assembler::assemble;
pub use chunking::{build_chunks, normalize_whitespace, Chunker, ChunkingConfig};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbeddingEncoder, EmbeddingModel, HttpEmbedder,
    HttpEmbedderConfig, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ErrorKind, Result, RetrievalError};
pub use extractor::{
    discover_processed_documents, load_processed_document, PageSource, ProcessedDirSource,
    ProcessedDocument,
};
pub use ingest::{IngestionPipeline, IngestionReport};
pub use locks::{DocumentLock, DocumentLocks};
pub use models::{
    BoundingBox, ChunkResult, ContextGroup, DocumentId, DocumentRef, IngestionOptions,
    IngestionStrategy, PageContent, ProductId, Scope, SearchOptions, SearchQuery,
};
pub use orchestrator::{RetrievalService, SearchResponse};
pub use proximity::{ProximityLinker, ProximityPolicy};
pub use search::SimilaritySearcher;
pub use stores::{InMemoryStore, PgVectorStore};
pub use traits::{ChunkStore, DocumentRegistry};
