//! Indexes and ranking
//!
//! Keyword ranking runs on the SQLite FTS5 index; semantic ranking compares
//! embeddings stored in the same database.

pub mod database;
pub mod embedding;
pub mod engine;
pub mod metadata;
pub mod vectordb;

pub use database::Database;
pub use embedding::{create_backend, cosine_similarity, EmbeddingBackend, EmbeddingHandle, ModelInfo};
pub use engine::{EngineStats, IndexingStats, ScoredRecord, SearchEngine, SemanticResults};
pub use metadata::{HeaderUpdate, IndexStats, KeywordHit, MetadataIndex};
pub use vectordb::VectorIndex;
