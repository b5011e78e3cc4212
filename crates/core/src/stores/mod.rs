pub mod memory;
pub mod pgvector;

pub use self::memory::InMemoryStore;
pub use self::pgvector::PgVectorStore;
