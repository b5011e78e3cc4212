use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type DocumentId = i64;
pub type ProductId = i64;
pub type ChunkId = i64;

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Axis-aligned page rectangle `[x0, y0, x1, y1]` in PDF units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x0, y0, x1, y1]: [f64; 4]) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(value: BoundingBox) -> Self {
        [value.x0, value.y0, value.x1, value.y1]
    }
}

impl BoundingBox {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Reads a box as emitted by the extraction collaborator. Anything other than a
    /// four-element list of finite numbers (or numeric strings) is rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }

        let mut coords = [0f64; 4];
        for (slot, item) in coords.iter_mut().zip(items) {
            let number = match item {
                Value::Number(number) => number.as_f64()?,
                Value::String(text) => text.trim().parse::<f64>().ok()?,
                _ => return None,
            };
            if !number.is_finite() {
                return None;
            }
            *slot = number;
        }

        Some(Self::from(coords))
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Strict overlap on both axes; touching edges do not count.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.x0 < other.x1 && self.x1 > other.x0 && self.y0 < other.y1 && self.y1 > other.y0
    }

    pub fn intersection_area(&self, other: &Self) -> f64 {
        let width = self.x1.min(other.x1) - self.x0.max(other.x0);
        let height = self.y1.min(other.y1) - self.y0.max(other.y0);
        if width <= 0.0 || height <= 0.0 {
            0.0
        } else {
            width * height
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub filename: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRef {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    #[default]
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub page_number: u32,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(rename = "type", default)]
    pub kind: ChunkKind,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub tables: Vec<TableRef>,
}

/// A chunk row ready to be written; `embedding` stays `None` until vectorized.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub document_id: DocumentId,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub filename: String,
    pub version: Option<String>,
    pub product_id: Option<ProductId>,
}

/// Filter dimension of a similarity query. Exactly one key is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Document(DocumentId),
    Product(ProductId),
}

impl Scope {
    pub fn from_parts(
        document_id: Option<DocumentId>,
        product_id: Option<ProductId>,
    ) -> Result<Self, crate::RetrievalError> {
        match (document_id, product_id) {
            (Some(document_id), None) => Ok(Self::Document(document_id)),
            (None, Some(product_id)) => Ok(Self::Product(product_id)),
            (Some(_), Some(_)) => Err(crate::RetrievalError::Validation(
                "scope must name a document or a product, not both".to_string(),
            )),
            (None, None) => Err(crate::RetrievalError::Validation(
                "scope requires a document_id or a product_id".to_string(),
            )),
        }
    }

    pub fn includes(&self, document: &DocumentRef) -> bool {
        match self {
            Self::Document(id) => document.id == *id,
            Self::Product(id) => document.product_id == Some(*id),
        }
    }
}

/// One page as handed over by the PDF extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageContent {
    pub page_number: u32,
    #[serde(rename = "text", alias = "text_blocks", default)]
    pub text_blocks: Vec<TextBlock>,
    #[serde(default)]
    pub images: Vec<PageImage>,
    #[serde(default)]
    pub tables: Vec<PageTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageImage {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageTable {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMetadata {
    pub page_number: u32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkResult {
    pub chunk_id: ChunkId,
    pub content: String,
    pub document: DocumentRef,
    pub metadata: ResultMetadata,
    pub similarity: f32,
    pub images: Vec<ImageRef>,
    pub tables: Vec<TableRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextGroup {
    pub context: ChunkResult,
    pub pages: Vec<ChunkResult>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStrategy {
    /// Sentence-aligned chunks per text block, tables linked by overlap or center distance.
    #[default]
    SentenceChunks,
    /// One chunk per text block, tables linked by vertical gap.
    TextBlocks,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub strategy: IngestionStrategy,
    pub replace_existing: bool,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            batch_size: DEFAULT_BATCH_SIZE,
            strategy: IngestionStrategy::default(),
            replace_existing: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    pub context_pages: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.7,
            context_pages: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub scope: Scope,
    pub options: SearchOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bbox_parsing_accepts_numbers_and_numeric_strings() {
        let parsed = BoundingBox::from_value(&json!([0, "1.5", 10.0, 12]));
        assert_eq!(parsed, Some(BoundingBox::new(0.0, 1.5, 10.0, 12.0)));
    }

    #[test]
    fn bbox_parsing_rejects_malformed_values() {
        assert_eq!(BoundingBox::from_value(&json!([0, 1, 2])), None);
        assert_eq!(BoundingBox::from_value(&json!([0, 1, 2, 3, 4])), None);
        assert_eq!(BoundingBox::from_value(&json!([0, "top", 2, 3])), None);
        assert_eq!(BoundingBox::from_value(&json!({"x0": 0})), None);
        assert_eq!(BoundingBox::from_value(&Value::Null), None);
    }

    #[test]
    fn bbox_serializes_as_coordinate_list() {
        let value = serde_json::to_value(BoundingBox::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(value, json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn scope_requires_exactly_one_key() {
        assert_eq!(Scope::from_parts(Some(3), None).unwrap(), Scope::Document(3));
        assert_eq!(Scope::from_parts(None, Some(9)).unwrap(), Scope::Product(9));
        assert!(Scope::from_parts(Some(3), Some(9)).is_err());
        assert!(Scope::from_parts(None, None).is_err());
    }

    #[test]
    fn chunk_metadata_uses_type_key() {
        let metadata = ChunkMetadata {
            page_number: 4,
            bbox: None,
            kind: ChunkKind::Text,
            images: Vec::new(),
            tables: Vec::new(),
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["type"], json!("text"));
        assert_eq!(value["page_number"], json!(4));
    }
}
