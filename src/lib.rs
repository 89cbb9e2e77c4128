//! memstore library
//!
//! Persistent memory store for conversations, knowledge and notes, with
//! keyword and semantic search.
//!
//! # Modules
//!
//! - `core`: Record types, on-disk documents and the content store
//! - `search`: Metadata index, vector index, embedding backends and ranking
//! - `manager`: Storage manager coordinating both stores
//! - `config`: Defaults, `config.yaml` and environment overrides

pub mod config;
pub mod core;
pub mod error;
pub mod manager;
pub mod search;

// Re-exports for convenience
pub use crate::config::MemoryConfig;
pub use crate::core::paths::StorePaths;
pub use crate::core::types::{
    Conversation, KnowledgeEntry, Message, Metadata, Record, RecordFilter, RecordKind, RecordUpdate, Role,
    SessionState, VectorEmbedding,
};
pub use crate::error::{MemoryError, Result};
pub use crate::manager::{NewKnowledge, NewRecord, NewSession, ReconcileReport, StorageManager, StoreStats};
pub use crate::search::{EmbeddingBackend, EmbeddingHandle, ModelInfo, ScoredRecord, SemanticResults};
