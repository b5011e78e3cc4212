use crate::error::RetrievalError;
use crate::models::{
    BoundingBox, ChunkKind, ChunkMetadata, DocumentId, IngestionOptions, IngestionStrategy,
    NewChunk, PageContent,
};
use crate::proximity::ProximityLinker;
use regex::Regex;

/// Sentence end followed by a capitalized word. Lowercase continuations stay glued.
const SENTENCE_BOUNDARY: &str = r"[.!?]\s+[A-Z]";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    /// Carried for configuration parity; chunks never overlap.
    pub overlap_tokens: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_tokens: value.chunk_size,
            overlap_tokens: value.chunk_overlap,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    boundary: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, RetrievalError> {
        if config.max_tokens == 0 {
            return Err(RetrievalError::Validation(
                "chunk size must be at least one token".to_string(),
            ));
        }

        Ok(Self {
            config,
            boundary: Regex::new(SENTENCE_BOUNDARY)?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn split_sentences(&self, normalized: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.boundary.find_iter(normalized) {
            // Both ends of the match are single-byte ASCII.
            let end = boundary.start() + 1;
            let sentence = normalized[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = boundary.end() - 1;
        }

        let tail = normalized[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }

        sentences
    }

    /// Greedy sentence packing under the token budget. A sentence that alone exceeds
    /// the budget is emitted whole.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let normalized = normalize_whitespace(text);
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in self.split_sentences(&normalized) {
            let sentence_tokens = token_count(&sentence);

            if current_tokens + sentence_tokens > self.config.max_tokens {
                if !current.is_empty() {
                    chunks.push(current.join(" "));
                }
                current = vec![sentence];
                current_tokens = sentence_tokens;
            } else {
                current.push(sentence);
                current_tokens += sentence_tokens;
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }

        chunks
    }
}

/// Turns one extracted page into unvectorized chunk rows with their linked media.
pub fn build_chunks(
    document_id: DocumentId,
    page: &PageContent,
    chunker: &Chunker,
    linker: &ProximityLinker,
    strategy: IngestionStrategy,
) -> Result<Vec<NewChunk>, RetrievalError> {
    if page.page_number == 0 {
        return Err(RetrievalError::Validation(format!(
            "document {document_id} has a page numbered 0; pages start at 1"
        )));
    }

    let mut chunks = Vec::new();

    for block in &page.text_blocks {
        if block.text.trim().is_empty() {
            continue;
        }

        let pieces = match strategy {
            IngestionStrategy::SentenceChunks => chunker.chunk(&block.text),
            IngestionStrategy::TextBlocks => vec![block.text.clone()],
        };
        let media = linker.link(block.bbox.as_ref(), page);
        let bbox = block.bbox.as_ref().and_then(BoundingBox::from_value);

        for content in pieces {
            chunks.push(NewChunk {
                document_id,
                content,
                embedding: None,
                metadata: ChunkMetadata {
                    page_number: page.page_number,
                    bbox,
                    kind: ChunkKind::Text,
                    images: media.images.clone(),
                    tables: media.tables.clone(),
                },
            });
        }
    }

    Ok(chunks)
}
