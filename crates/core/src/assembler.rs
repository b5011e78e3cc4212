use crate::models::{ChunkId, ChunkResult, ContextGroup, ImageRef};
use crate::store::WindowRow;
use std::collections::HashSet;

/// Single-pass grouping of windowed rows into context groups.
///
/// A row whose own similarity exceeds `threshold` opens a group; other rows join the
/// open group or, when none is open yet, are dropped. Chunk ids and image filenames are
/// deduplicated across the whole call; pages are deduplicated per group.
pub fn assemble(rows: Vec<WindowRow>, threshold: f32) -> Vec<ContextGroup> {
    let mut assembler = Assembler::default();
    for row in rows {
        assembler.push(row, threshold);
    }
    assembler.finish()
}

#[derive(Default)]
struct Assembler {
    seen_chunks: HashSet<ChunkId>,
    seen_images: HashSet<String>,
    open: Option<ContextGroup>,
    groups: Vec<ContextGroup>,
}

impl Assembler {
    fn push(&mut self, row: WindowRow, threshold: f32) {
        if !self.seen_chunks.insert(row.chunk.id) {
            return;
        }

        let images = self.unseen_images(&row.chunk.metadata.images);
        let opens_group = row.own_similarity.is_some_and(|own| own > threshold);
        let result = row.chunk.into_result(row.similarity, images);

        if opens_group {
            self.flush();
            self.open = Some(ContextGroup {
                context: result.clone(),
                pages: vec![result],
            });
        } else if let Some(group) = self.open.as_mut() {
            group.pages.push(result);
        }
    }

    fn unseen_images(&mut self, images: &[ImageRef]) -> Vec<ImageRef> {
        images
            .iter()
            .filter(|image| self.seen_images.insert(image.filename.clone()))
            .cloned()
            .collect()
    }

    fn flush(&mut self) {
        if let Some(mut group) = self.open.take() {
            group.pages = unique_pages(group.pages);
            self.groups.push(group);
        }
    }

    fn finish(mut self) -> Vec<ContextGroup> {
        self.flush();
        self.groups
    }
}

/// First occurrence of each page number wins.
fn unique_pages(pages: Vec<ChunkResult>) -> Vec<ChunkResult> {
    let mut seen = HashSet::new();
    pages
        .into_iter()
        .filter(|page| seen.insert(page.metadata.page_number))
        .collect()
}
