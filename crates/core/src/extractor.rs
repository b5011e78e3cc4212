use crate::error::RetrievalError;
use crate::models::{DocumentId, PageContent};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const PROCESSED_METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub page_count: usize,
}

/// Output of the PDF extraction collaborator for one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedDocument {
    #[serde(default)]
    pub metadata: DocumentInfo,
    pub pages: Vec<PageContent>,
}

/// Source of extracted pages for a registered document.
pub trait PageSource {
    fn load_pages(&self, document_id: DocumentId) -> Result<ProcessedDocument, RetrievalError>;
}

/// Reads `<root>/<document_id>/metadata.json` as laid out by the extraction step.
#[derive(Debug, Clone)]
pub struct ProcessedDirSource {
    root: PathBuf,
}

impl ProcessedDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn metadata_path(&self, document_id: DocumentId) -> PathBuf {
        self.root
            .join(document_id.to_string())
            .join(PROCESSED_METADATA_FILE)
    }
}

impl PageSource for ProcessedDirSource {
    fn load_pages(&self, document_id: DocumentId) -> Result<ProcessedDocument, RetrievalError> {
        let path = self.metadata_path(document_id);
        if !path.is_file() {
            return Err(RetrievalError::NotFound(format!(
                "no processed content for document {document_id} at {}",
                path.display()
            )));
        }
        load_processed_document(&path)
    }
}

pub fn load_processed_document(path: &Path) -> Result<ProcessedDocument, RetrievalError> {
    let raw = fs::read_to_string(path)?;
    let document: ProcessedDocument = serde_json::from_str(&raw)?;

    if let Some(page) = document.pages.iter().find(|page| page.page_number == 0) {
        return Err(RetrievalError::Validation(format!(
            "{} contains page number {}; pages start at 1",
            path.display(),
            page.page_number
        )));
    }

    Ok(document)
}

/// Document ids that have a processed `metadata.json` under `root`, ascending.
pub fn discover_processed_documents(root: &Path) -> Vec<DocumentId> {
    let mut ids = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() || entry.file_name() != PROCESSED_METADATA_FILE {
            continue;
        }

        let document_id = entry
            .path()
            .parent()
            .and_then(|parent| parent.file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<DocumentId>().ok());

        if let Some(document_id) = document_id {
            ids.push(document_id);
        }
    }

    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> serde_json::Value {
        json!({
            "metadata": {"title": "Service Manual", "page_count": 2},
            "pages": [
                {
                    "page_number": 1,
                    "text": [
                        {"text": "Safety first. Read all steps.", "bbox": [10, 10, 300, 40], "type": "text"}
                    ],
                    "images": [
                        {"filename": "page_1_img_0_ab.png", "path": "data/processed/4/images/page_1_img_0_ab.png",
                         "bbox": [10, 60, 200, 160], "type": "image"}
                    ],
                    "tables": []
                },
                {
                    "page_number": 2,
                    "text": [],
                    "images": [],
                    "tables": [
                        {"filename": "page_2_table_0.json", "path": "data/processed/4/tables/page_2_table_0.json",
                         "bbox": [0, 0, 100, 100], "data": [{"0": "Pressure", "1": "4 bar"}]}
                    ]
                }
            ]
        })
    }

    #[test]
    fn processed_document_is_loaded_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let folder = dir.path().join("4");
        fs::create_dir(&folder)?;
        fs::write(folder.join(PROCESSED_METADATA_FILE), sample().to_string())?;

        let document = ProcessedDirSource::new(dir.path()).load_pages(4)?;
        assert_eq!(document.metadata.title, "Service Manual");
        assert_eq!(document.pages.len(), 2);
        assert_eq!(document.pages[0].text_blocks.len(), 1);
        assert_eq!(document.pages[0].images[0].kind.as_deref(), Some("image"));
        assert_eq!(document.pages[1].tables[0].filename, "page_2_table_0.json");
        Ok(())
    }

    #[test]
    fn missing_document_folder_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ProcessedDirSource::new(dir.path()).load_pages(12);
        assert!(matches!(result, Err(RetrievalError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn page_zero_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join(PROCESSED_METADATA_FILE);
        fs::write(&path, json!({"pages": [{"page_number": 0, "text": []}]}).to_string())?;

        let result = load_processed_document(&path);
        assert!(matches!(result, Err(RetrievalError::Validation(_))));
        Ok(())
    }

    #[test]
    fn discovery_only_returns_numeric_folders() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        for name in ["7", "2", "scratch"] {
            let folder = dir.path().join(name);
            fs::create_dir(&folder)?;
            fs::write(folder.join(PROCESSED_METADATA_FILE), "{}")?;
        }
        fs::create_dir(dir.path().join("9"))?;

        assert_eq!(discover_processed_documents(dir.path()), vec![2, 7]);
        Ok(())
    }
}
