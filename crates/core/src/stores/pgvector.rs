use crate::locks::{DocumentLock, DocumentLocks};
use crate::models::{ChunkId, ChunkMetadata, DocumentId, DocumentRef, NewChunk, ProductId, Scope};
use crate::store::{SimilarRow, StoredChunk};
use crate::traits::{ChunkStore, DocumentRegistry};
use crate::RetrievalError;
use async_trait::async_trait;
use pgvector::Vector;
use std::ops::RangeInclusive;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::error;

const CHUNK_COLUMNS: &str = "dc.id::bigint AS id, \
     dc.document_id::bigint AS document_id, \
     dc.content, \
     dc.embedding, \
     dc.chunk_metadata::text AS chunk_metadata, \
     d.filename, \
     d.version, \
     d.product_id::bigint AS product_id";

/// `document_chunks` in Postgres with a pgvector column. Reads share one connection;
/// writes are serialized on a second one so each batch is its own transaction.
/// Document locks are session advisory locks, each on its own short-lived connection.
pub struct PgVectorStore {
    database_url: String,
    reader: Client,
    writer: Mutex<Client>,
    locks: DocumentLocks,
    dimensions: usize,
}

async fn connect(database_url: &str) -> Result<Client, RetrievalError> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(error = %err, "postgres connection error");
        }
    });
    Ok(client)
}

fn scope_filter(scope: &Scope, placeholder: usize) -> (String, i64) {
    match scope {
        Scope::Document(id) => (format!("d.id = ${placeholder}::bigint"), *id),
        Scope::Product(id) => (format!("d.product_id = ${placeholder}::bigint"), *id),
    }
}

fn page_bound(page: u32) -> i32 {
    i32::try_from(page).unwrap_or(i32::MAX)
}

fn row_to_chunk(row: &Row) -> Result<StoredChunk, RetrievalError> {
    let id: i64 = row.try_get("id")?;
    let raw_metadata: String = row.try_get("chunk_metadata")?;
    let metadata: ChunkMetadata = serde_json::from_str(&raw_metadata).map_err(|err| {
        RetrievalError::Storage(format!("malformed metadata on chunk {id}: {err}"))
    })?;
    let embedding: Option<Vector> = row.try_get("embedding")?;

    Ok(StoredChunk {
        id,
        document: DocumentRef {
            id: row.try_get("document_id")?,
            filename: row.try_get("filename")?,
            version: row.try_get("version")?,
            product_id: row.try_get("product_id")?,
        },
        content: row.try_get("content")?,
        embedding: embedding.map(|vector| vector.to_vec()),
        metadata,
    })
}

impl PgVectorStore {
    pub async fn connect(database_url: &str, dimensions: usize) -> Result<Self, RetrievalError> {
        if dimensions == 0 {
            return Err(RetrievalError::Validation(
                "embedding dimension must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url: database_url.to_string(),
            reader: connect(database_url).await?,
            writer: Mutex::new(connect(database_url).await?),
            locks: DocumentLocks::default(),
            dimensions,
        })
    }

    /// Creates the chunk table and its vector index. `documents` and `products` belong
    /// to the relational registry and must already exist.
    pub async fn ensure_schema(&self) -> Result<(), RetrievalError> {
        let ddl = format!(
            "CREATE EXTENSION IF NOT EXISTS vector;
             CREATE TABLE IF NOT EXISTS document_chunks (
                 id SERIAL PRIMARY KEY,
                 document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                 content TEXT NOT NULL,
                 embedding VECTOR({dims}),
                 chunk_metadata JSON NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );
             CREATE INDEX IF NOT EXISTS idx_document_chunks_embedding
                 ON document_chunks USING ivfflat (embedding vector_cosine_ops)
                 WITH (lists = 100);
             CREATE INDEX IF NOT EXISTS idx_document_chunks_document
                 ON document_chunks (document_id);",
            dims = self.dimensions
        );
        self.writer.lock().await.batch_execute(&ddl).await?;
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for PgVectorStore {
    async fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<ChunkId>, RetrievalError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut client = self.writer.lock().await;
        let transaction = client.transaction().await?;
        let statement = transaction
            .prepare(
                "INSERT INTO document_chunks (document_id, content, embedding, chunk_metadata)
                 VALUES ($1::bigint, $2, $3, $4::text::json)
                 RETURNING id::bigint",
            )
            .await?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if let Some(embedding) = &chunk.embedding {
                if embedding.len() != self.dimensions {
                    return Err(RetrievalError::Storage(format!(
                        "expected {} dimensions, not {}",
                        self.dimensions,
                        embedding.len()
                    )));
                }
            }

            let embedding = chunk.embedding.clone().map(Vector::from);
            let metadata = serde_json::to_string(&chunk.metadata)?;
            let row = transaction
                .query_one(
                    &statement,
                    &[&chunk.document_id, &chunk.content, &embedding, &metadata],
                )
                .await?;
            ids.push(row.try_get::<_, i64>(0)?);
        }

        // Dropping the transaction on an early return rolls the whole batch back.
        transaction.commit().await?;
        Ok(ids)
    }

    async fn query_similar(
        &self,
        scope: &Scope,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarRow>, RetrievalError> {
        let (filter, scope_id) = scope_filter(scope, 4);
        let sql = format!(
            "SELECT {CHUNK_COLUMNS},
                    (1 - (dc.embedding <=> $1::vector))::real AS similarity
             FROM document_chunks dc
             JOIN documents d ON d.id = dc.document_id
             WHERE dc.embedding IS NOT NULL
               AND 1 - (dc.embedding <=> $1::vector) > $2::float8
               AND {filter}
             ORDER BY similarity DESC, dc.id ASC
             LIMIT $3::bigint"
        );

        let query = Vector::from(query_vector.to_vec());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .reader
            .query(&sql, &[&query, &f64::from(threshold), &limit, &scope_id])
            .await?;

        rows.iter()
            .map(|row| -> Result<SimilarRow, RetrievalError> {
                Ok(SimilarRow {
                    chunk: row_to_chunk(row)?,
                    similarity: row.try_get("similarity")?,
                })
            })
            .collect()
    }

    async fn query_window(
        &self,
        scope: &Scope,
        document_id: DocumentId,
        pages: RangeInclusive<u32>,
    ) -> Result<Vec<StoredChunk>, RetrievalError> {
        let (filter, scope_id) = scope_filter(scope, 1);
        let sql = format!(
            "SELECT {CHUNK_COLUMNS}
             FROM document_chunks dc
             JOIN documents d ON d.id = dc.document_id
             WHERE {filter}
               AND dc.document_id = $2::bigint
               AND (dc.chunk_metadata->>'page_number')::int BETWEEN $3::int AND $4::int
             ORDER BY (dc.chunk_metadata->>'page_number')::int ASC, dc.id ASC"
        );

        let rows = self
            .reader
            .query(
                &sql,
                &[
                    &scope_id,
                    &document_id,
                    &page_bound(*pages.start()),
                    &page_bound(*pages.end()),
                ],
            )
            .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_document_chunks(&self, document_id: DocumentId) -> Result<u64, RetrievalError> {
        let client = self.writer.lock().await;
        let deleted = client
            .execute(
                "DELETE FROM document_chunks WHERE document_id = $1::bigint",
                &[&document_id],
            )
            .await?;
        Ok(deleted)
    }

    async fn lock_document(&self, document_id: DocumentId) -> Result<DocumentLock, RetrievalError> {
        // Session advisory locks are reentrant, so in-process writers queue first.
        let lock = self.locks.acquire(document_id).await;
        let session = connect(&self.database_url).await?;
        session
            .execute("SELECT pg_advisory_lock($1::bigint)", &[&document_id])
            .await?;
        // Closing the session releases the advisory lock.
        Ok(lock.with_session(session))
    }
}

#[async_trait]
impl DocumentRegistry for PgVectorStore {
    async fn document(&self, id: DocumentId) -> Result<Option<DocumentRef>, RetrievalError> {
        let row = self
            .reader
            .query_opt(
                "SELECT id::bigint AS id, filename, version, product_id::bigint AS product_id
                 FROM documents WHERE id = $1::bigint",
                &[&id],
            )
            .await?;

        row.map(|row| -> Result<DocumentRef, RetrievalError> {
            Ok(DocumentRef {
                id: row.try_get("id")?,
                filename: row.try_get("filename")?,
                version: row.try_get("version")?,
                product_id: row.try_get("product_id")?,
            })
        })
        .transpose()
    }

    async fn product_exists(&self, id: ProductId) -> Result<bool, RetrievalError> {
        let row = self
            .reader
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM products WHERE id = $1::bigint)",
                &[&id],
            )
            .await?;
        Ok(row.try_get(0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_filter_targets_the_right_column() {
        assert_eq!(
            scope_filter(&Scope::Document(3), 4),
            ("d.id = $4::bigint".to_string(), 3)
        );
        assert_eq!(
            scope_filter(&Scope::Product(8), 1),
            ("d.product_id = $1::bigint".to_string(), 8)
        );
    }

    #[test]
    fn page_bounds_saturate() {
        assert_eq!(page_bound(12), 12);
        assert_eq!(page_bound(u32::MAX), i32::MAX);
    }
}
