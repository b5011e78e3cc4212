//! Hand-off toward answer generation: context text, the image list, and the
//! `[IMAGE:<path>]` reference convention generated answers must follow.

use crate::error::RetrievalError;
use crate::models::ContextGroup;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const IMAGE_REFERENCE_PATTERN: &str = r"\[IMAGE:([^\]]+)\]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerImage {
    pub path: String,
    pub page_number: u32,
}

pub fn image_reference(path: &str) -> String {
    format!("[IMAGE:{path}]")
}

/// Every image attached to the groups, first occurrence of each path kept, in
/// context-then-pages order.
pub fn collect_images(groups: &[ContextGroup]) -> Vec<AnswerImage> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for group in groups {
        for result in std::iter::once(&group.context).chain(group.pages.iter()) {
            for image in &result.images {
                if seen.insert(image.path.clone()) {
                    images.push(AnswerImage {
                        path: image.path.clone(),
                        page_number: result.metadata.page_number,
                    });
                }
            }
        }
    }

    images
}

pub fn render_context(groups: &[ContextGroup]) -> String {
    let mut parts = Vec::new();

    for group in groups {
        parts.push(format!(
            "\nMain Context (Page {}):",
            group.context.metadata.page_number
        ));
        parts.push(group.context.content.clone());

        for page in group
            .pages
            .iter()
            .filter(|page| page.chunk_id != group.context.chunk_id)
        {
            parts.push(format!("\nRelated Page {}:", page.metadata.page_number));
            parts.push(page.content.clone());
        }
    }

    parts.join("\n")
}

pub fn render_image_list(images: &[AnswerImage]) -> String {
    if images.is_empty() {
        return "No images available".to_string();
    }
    images
        .iter()
        .map(|image| format!("- {}", image.path))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn extract_image_references(response: &str) -> Result<Vec<String>, RetrievalError> {
    let pattern = Regex::new(IMAGE_REFERENCE_PATTERN)?;
    Ok(pattern
        .captures_iter(response)
        .filter_map(|capture| capture.get(1).map(|path| path.as_str().trim().to_string()))
        .collect())
}

/// References in a generated answer that do not name a provided image path verbatim.
pub fn unknown_image_references(
    response: &str,
    images: &[AnswerImage],
) -> Result<Vec<String>, RetrievalError> {
    let known: HashSet<&str> = images.iter().map(|image| image.path.as_str()).collect();
    Ok(extract_image_references(response)?
        .into_iter()
        .filter(|path| !known.contains(path.as_str()))
        .collect())
}

/// What the generation layer receives for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerContext {
    pub query: String,
    pub context: String,
    pub images: Vec<AnswerImage>,
}

impl AnswerContext {
    pub fn new(query: &str, groups: &[ContextGroup]) -> Self {
        Self {
            query: query.to_string(),
            context: render_context(groups),
            images: collect_images(groups),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkResult, DocumentRef, ImageRef, ResultMetadata};

    fn result(chunk_id: i64, page: u32, images: &[&str]) -> ChunkResult {
        ChunkResult {
            chunk_id,
            content: format!("text {chunk_id}"),
            document: DocumentRef {
                id: 1,
                filename: "guide.pdf".to_string(),
                version: None,
                product_id: None,
            },
            metadata: ResultMetadata {
                page_number: page,
                bbox: None,
            },
            similarity: 0.9,
            images: images
                .iter()
                .map(|path| ImageRef {
                    filename: path.rsplit('/').next().unwrap_or(path).to_string(),
                    path: path.to_string(),
                })
                .collect(),
            tables: Vec::new(),
        }
    }

    fn groups() -> Vec<ContextGroup> {
        let context = result(1, 38, &["data/processed/1/images/page_38_img_0.png"]);
        vec![ContextGroup {
            context: context.clone(),
            pages: vec![context, result(2, 39, &["data/processed/1/images/page_39_img_0.png"])],
        }]
    }

    #[test]
    fn context_text_lists_main_and_related_pages_once() {
        let text = render_context(&groups());
        assert!(text.contains("Main Context (Page 38):\ntext 1"));
        assert!(text.contains("Related Page 39:\ntext 2"));
        assert_eq!(text.matches("text 1").count(), 1);
    }

    #[test]
    fn images_are_listed_once_with_their_page() {
        let images = collect_images(&groups());
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].page_number, 38);
        assert_eq!(images[1].page_number, 39);
        assert!(render_image_list(&images).starts_with("- data/processed/1/images/page_38"));
        assert_eq!(render_image_list(&[]), "No images available");
    }

    #[test]
    fn image_references_round_trip_through_responses() {
        let images = collect_images(&groups());
        let response = format!(
            "Open the panel.\n{}\nThen check {}",
            image_reference(&images[0].path),
            image_reference("data/processed/9/images/invented.png")
        );

        let found = extract_image_references(&response).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(
            unknown_image_references(&response, &images).unwrap(),
            vec!["data/processed/9/images/invented.png".to_string()]
        );
    }
}
