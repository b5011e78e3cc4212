use crate::models::{
    ChunkId, ChunkMetadata, ChunkResult, DocumentRef, ImageRef, ResultMetadata,
};

/// A persisted chunk joined with its document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub document: DocumentRef,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

impl StoredChunk {
    pub fn page_number(&self) -> u32 {
        self.metadata.page_number
    }

    pub(crate) fn into_result(self, similarity: f32, images: Vec<ImageRef>) -> ChunkResult {
        ChunkResult {
            chunk_id: self.id,
            content: self.content,
            document: self.document,
            metadata: ResultMetadata {
                page_number: self.metadata.page_number,
                bbox: self.metadata.bbox,
            },
            similarity,
            images,
            tables: self.metadata.tables,
        }
    }
}

/// Initial match: a chunk scoring above the query threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarRow {
    pub chunk: StoredChunk,
    pub similarity: f32,
}

/// A chunk inside some match's page window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRow {
    pub chunk: StoredChunk,
    /// Score of the match whose window produced this row.
    pub similarity: f32,
    /// This chunk's own score against the query; `None` when it has no vector. For the
    /// match itself this is the store's score, so a match always clears the threshold.
    pub own_similarity: Option<f32>,
}
