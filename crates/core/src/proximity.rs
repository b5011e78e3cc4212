//! Spatial association of page media with text chunks.
//!
//! Two table policies coexist: ingestion-time chunking uses overlap-or-center-distance,
//! block-level vectorization uses the vertical gap between boxes. Images are never
//! filtered by position.

use crate::models::{BoundingBox, ImageRef, IngestionStrategy, PageContent, TableRef};
use serde_json::Value;
use tracing::debug;

pub const CENTER_DISTANCE_THRESHOLD: f64 = 200.0;
pub const VERTICAL_GAP_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProximityPolicy {
    /// Near when the boxes overlap on both axes or their centers are closer than the threshold.
    OverlapOrCenterDistance { max_distance: f64 },
    /// Near when the smaller bottom-to-top gap, in either direction, is below the threshold.
    VerticalGap { max_gap: f64 },
}

impl ProximityPolicy {
    pub fn center_distance() -> Self {
        Self::OverlapOrCenterDistance {
            max_distance: CENTER_DISTANCE_THRESHOLD,
        }
    }

    pub fn vertical_gap() -> Self {
        Self::VerticalGap {
            max_gap: VERTICAL_GAP_THRESHOLD,
        }
    }

    pub fn near(&self, first: &BoundingBox, second: &BoundingBox) -> bool {
        match *self {
            Self::OverlapOrCenterDistance { max_distance } => {
                if first.overlaps(second) {
                    return true;
                }
                let (ax, ay) = first.center();
                let (bx, by) = second.center();
                let distance = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();
                debug!(?first, ?second, distance, max_distance, "center distance check");
                distance < max_distance
            }
            Self::VerticalGap { max_gap } => {
                let gap = (first.y1 - second.y0).abs().min((second.y1 - first.y0).abs());
                debug!(?first, ?second, gap, max_gap, "vertical gap check");
                gap < max_gap
            }
        }
    }

    /// Same test over raw extraction boxes; malformed input is never near.
    pub fn near_values(&self, first: &Value, second: &Value) -> bool {
        match (BoundingBox::from_value(first), BoundingBox::from_value(second)) {
            (Some(first), Some(second)) => self.near(&first, &second),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLinking {
    /// Every image on the page goes to every chunk of the page.
    WholePage,
    /// Only images tagged `image`, and only for text that carries a list-shaped bbox.
    TaggedWithAnchor,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedMedia {
    pub images: Vec<ImageRef>,
    pub tables: Vec<TableRef>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProximityLinker {
    pub table_policy: ProximityPolicy,
    pub images: ImageLinking,
}

impl ProximityLinker {
    pub fn for_strategy(strategy: IngestionStrategy) -> Self {
        match strategy {
            IngestionStrategy::SentenceChunks => Self {
                table_policy: ProximityPolicy::center_distance(),
                images: ImageLinking::WholePage,
            },
            IngestionStrategy::TextBlocks => Self {
                table_policy: ProximityPolicy::vertical_gap(),
                images: ImageLinking::TaggedWithAnchor,
            },
        }
    }

    pub fn link(&self, chunk_bbox: Option<&Value>, page: &PageContent) -> LinkedMedia {
        let anchored = chunk_bbox.is_some_and(Value::is_array);

        let images = page
            .images
            .iter()
            .filter(|image| match self.images {
                ImageLinking::WholePage => true,
                ImageLinking::TaggedWithAnchor => {
                    anchored && image.kind.as_deref() == Some("image")
                }
            })
            .map(|image| ImageRef {
                filename: image.filename.clone(),
                path: image.path.clone(),
            })
            .collect();

        let tables = match chunk_bbox {
            Some(chunk_bbox) => page
                .tables
                .iter()
                .filter(|table| {
                    table
                        .bbox
                        .as_ref()
                        .is_some_and(|bbox| self.table_policy.near_values(chunk_bbox, bbox))
                })
                .map(|table| TableRef {
                    filename: table.filename.clone(),
                    path: table.path.clone(),
                    bbox: table.bbox.as_ref().and_then(BoundingBox::from_value),
                })
                .collect(),
            None => Vec::new(),
        };

        LinkedMedia { images, tables }
    }
}
