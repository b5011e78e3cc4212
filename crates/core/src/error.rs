use crate::models::DocumentId;
use thiserror::Error;

/// Failure classes callers branch on. Zero matches is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Storage,
    ExternalService,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed extraction output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("ingestion of document {document_id} aborted after {committed} committed chunks: {source}")]
    PartialIngestion {
        document_id: DocumentId,
        committed: usize,
        #[source]
        source: Box<RetrievalError>,
    },
}

impl RetrievalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::Regex(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) | Self::Postgres(_) | Self::Io(_) => ErrorKind::Storage,
            Self::ExternalService(_) | Self::Http(_) | Self::Url(_) => ErrorKind::ExternalService,
            Self::PartialIngestion { source, .. } => source.kind(),
        }
    }
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ingestion_reports_cause_kind() {
        let error = RetrievalError::PartialIngestion {
            document_id: 7,
            committed: 200,
            source: Box::new(RetrievalError::Storage("connection reset".to_string())),
        };

        assert_eq!(error.kind(), ErrorKind::Storage);
        assert!(error.to_string().contains("after 200 committed chunks"));
    }
}
