use crate::error::RetrievalError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Raw text-to-vector capability. Implementations need not normalize.
pub trait Embedder {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Deterministic hashed character-trigram model; needs no network or weights.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.trim().to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.len() < 3 {
            if !chars.is_empty() {
                let bucket = (fnv1a(&lowered) % vector.len() as u64) as usize;
                vector[bucket] += 1.0;
            }
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let bucket = (fnv1a(&token) % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
}

impl HttpEmbedderConfig {
    /// Reads `EMBEDDING_ENDPOINT`, `EMBEDDING_API_KEY` and `EMBEDDING_MODEL`.
    /// Returns `None` when no endpoint is configured.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("EMBEDDING_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("EMBEDDING_API_KEY").ok().and_then(|value| {
            let key = value.trim().to_string();
            if key.is_empty() {
                None
            } else {
                Some(key)
            }
        });

        let model = std::env::var("EMBEDDING_MODEL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "all-MiniLM-L6-v2".to_string());

        Some(Self {
            endpoint,
            api_key,
            model,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Blocking client for an OpenAI-compatible `/embeddings` endpoint.
/// Call it from a blocking context (`spawn_blocking`), never from async code directly.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, RetrievalError> {
        let base = Url::parse(config.endpoint.trim_end_matches('/'))?;
        let endpoint = Url::parse(&format!("{}/embeddings", base.as_str().trim_end_matches('/')))?;
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            model: config.model,
            dimensions: config.dimensions,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(RetrievalError::ExternalService(format!(
                "embedding request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json()?;
        payload
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| {
                RetrievalError::ExternalService("embedding response had no data".to_string())
            })
    }
}

/// Closed set of model backends, chosen once at start-up.
#[derive(Debug, Clone)]
pub enum EmbeddingModel {
    Local(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

impl EmbeddingModel {
    /// Remote model when `EMBEDDING_ENDPOINT` is set, local trigram model otherwise.
    pub fn from_env() -> Result<Self, RetrievalError> {
        match HttpEmbedderConfig::from_env() {
            Some(config) => Ok(Self::Http(HttpEmbedder::new(config)?)),
            None => Ok(Self::Local(CharacterNgramEmbedder::default())),
        }
    }
}

impl Embedder for EmbeddingModel {
    fn dimensions(&self) -> usize {
        match self {
            Self::Local(model) => model.dimensions(),
            Self::Http(model) => model.dimensions(),
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        match self {
            Self::Local(model) => model.embed(text),
            Self::Http(model) => model.embed(text),
        }
    }
}

/// Wraps a model and guarantees unit-length vectors of a fixed dimension.
/// Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct EmbeddingEncoder<M> {
    model: M,
    dimensions: usize,
}

impl<M: Embedder> EmbeddingEncoder<M> {
    pub fn new(model: M, dimensions: usize) -> Result<Self, RetrievalError> {
        if dimensions == 0 {
            return Err(RetrievalError::Validation(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { model, dimensions })
    }

    pub fn with_model_dimensions(model: M) -> Result<Self, RetrievalError> {
        let dimensions = model.dimensions();
        Self::new(model, dimensions)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn encode(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "empty text provided for embedding".to_string(),
            ));
        }

        let raw = self.model.embed(text)?;
        if raw.is_empty() || raw.iter().any(|value| !value.is_finite()) {
            return Err(RetrievalError::ExternalService(
                "embedding model returned a malformed vector".to_string(),
            ));
        }

        let mut vector = fit_dimensions(raw, self.dimensions);
        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude <= f32::EPSILON {
            return Err(RetrievalError::ExternalService(
                "embedding model returned a zero vector".to_string(),
            ));
        }

        for value in &mut vector {
            *value /= magnitude;
        }

        Ok(vector)
    }
}

/// Truncates or zero-pads to exactly `dimensions`. Lossy, and kept that way so new
/// vectors stay comparable with ones already stored.
pub fn fit_dimensions(mut vector: Vec<f32>, dimensions: usize) -> Vec<f32> {
    if vector.len() != dimensions {
        warn!(
            expected = dimensions,
            actual = vector.len(),
            "embedding dimension mismatch"
        );
        vector.resize(dimensions, 0.0);
    }
    vector
}
