//! Storage manager
//!
//! Coordinates the content store (documents on disk) and the metadata index
//! (SQLite). Writes go to the content store first, then the index. When the
//! second half fails the caller gets [`MemoryError::PartialWrite`] and nothing
//! is rolled back; [`StorageManager::reconcile`] repairs documents that never
//! reached the index.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::core::content_store::ContentStore;
use crate::core::paths::StorePaths;
use crate::core::schema::{normalize_tags, validate_id, validate_title};
use crate::core::types::{
    from_millis, now, Conversation, KnowledgeEntry, Message, Metadata, Record, RecordFilter, RecordHeader, RecordKind,
    RecordUpdate, SessionState,
};
use crate::error::{MemoryError, Result, StoreSide};
use crate::search::database::Database;
use crate::search::embedding::{create_backend, EmbeddingHandle};
use crate::search::engine::{embedding_text, IndexingStats, ScoredRecord, SearchEngine, SemanticResults};
use crate::search::metadata::{HeaderUpdate, MetadataIndex};
use crate::search::vectordb::VectorIndex;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const LAST_BACKFILL_KEY: &str = "last_backfill";

/// Input for [`StorageManager::create_memory`]
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Option<Metadata>,
}

impl NewRecord {
    pub fn new(kind: RecordKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Input for [`StorageManager::save_knowledge`]
#[derive(Debug, Clone, Default)]
pub struct NewKnowledge {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub source_conversation_id: Option<String>,
    pub metadata: Option<Metadata>,
}

/// Input for [`StorageManager::save_session`]
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub title: String,
    pub context: String,
    pub files: Vec<String>,
    pub variables: Metadata,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub conversations: usize,
    pub knowledge: usize,
    pub notes: usize,
    pub archived: usize,
    pub sessions: usize,
    pub embeddings: usize,
    pub total_bytes: u64,
    pub size_mb: f64,
    pub embedding_model: String,
}

impl StoreStats {
    pub fn total_records(&self) -> usize {
        self.conversations + self.knowledge + self.notes
    }
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Documents on disk that had no index row and were indexed
    pub reindexed: Vec<String>,
    /// Index rows whose document is gone
    pub missing_documents: Vec<String>,
    /// Documents that could not be parsed
    pub unreadable: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.reindexed.is_empty() && self.missing_documents.is_empty() && self.unreadable.is_empty()
    }
}

pub struct StorageManager {
    config: MemoryConfig,
    content: ContentStore,
    index: MetadataIndex,
    engine: SearchEngine,
}

impl StorageManager {
    /// Open the store described by `config` with a caller-owned embedding backend
    pub fn open(config: MemoryConfig, embedder: Arc<EmbeddingHandle>) -> Result<Self> {
        let paths = StorePaths::from_root(config.memory_dir.clone());
        let content = ContentStore::open(paths.clone())?;
        let db = Database::open(&paths.database)?;

        let index = MetadataIndex::new(db.clone());
        let engine = SearchEngine::new(index.clone(), VectorIndex::new(db), embedder)
            .with_batch_size(config.index_batch_size);

        debug!(root = %paths.root.display(), model = %engine.model_id(), "opened memory store");
        Ok(Self {
            config,
            content,
            index,
            engine,
        })
    }

    /// Open with the backend named in the config
    pub fn open_with_config(config: MemoryConfig) -> Result<Self> {
        let embedder = Arc::new(EmbeddingHandle::new(create_backend(&config.embedding_model)));
        Self::open(config, embedder)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn index(&self) -> &MetadataIndex {
        &self.index
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn create_memory(&self, new: NewRecord) -> Result<Record> {
        validate_title(&new.title)?;
        let tags = normalize_tags(&new.tags)?;

        let t = now();
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            kind: new.kind,
            title: new.title,
            content: new.content,
            tags,
            created_at: t,
            updated_at: t,
            metadata: new.metadata,
            archived: false,
        };

        let saved = self.content.save(&record)?;
        let header = RecordHeader::from_record(&record, saved.byte_size);
        self.index
            .insert(&header, &record.content)
            .map_err(|e| MemoryError::partial("create", &record.id, StoreSide::Content, e))?;

        info!(id = %record.id, kind = %record.kind, "created memory");
        self.auto_index(&record);
        self.check_size_limit();
        Ok(record)
    }

    /// Active record by id. Archived records are not found.
    pub fn get_memory(&self, id: &str) -> Result<Record> {
        let header = self
            .index
            .get_header(id, false)?
            .ok_or_else(|| MemoryError::not_found(id))?;
        self.read_record(&header)
    }

    /// Record by id, archived or not
    pub fn load_memory(&self, id: &str) -> Result<Record> {
        let header = self
            .index
            .get_header(id, true)?
            .ok_or_else(|| MemoryError::not_found(id))?;
        self.read_record(&header)
    }

    /// Apply a partial update. Archived records are read-only.
    pub fn update_memory(&self, id: &str, update: RecordUpdate) -> Result<Record> {
        let mut record = self.get_memory(id)?;
        if update.is_empty() {
            return Ok(record);
        }

        if let Some(ref title) = update.title {
            validate_title(title)?;
        }
        let tags = update.tags.as_deref().map(normalize_tags).transpose()?;

        let old_text = embedding_text(&record).to_string();
        if let Some(title) = update.title.clone() {
            record.title = title;
        }
        if let Some(content) = update.content.clone() {
            record.content = content;
        }
        if let Some(ref tags) = tags {
            record.tags = tags.clone();
        }
        if let Some(metadata) = update.metadata.clone() {
            record.metadata = Some(metadata);
        }
        record.updated_at = now().max(record.updated_at);

        let saved = self.content.save(&record)?;
        let header_update = HeaderUpdate {
            title: update.title,
            tags,
            metadata: update.metadata,
            content: update.content,
            updated_at: Some(record.updated_at),
            byte_size: Some(saved.byte_size),
        };
        self.index
            .update(id, &header_update)
            .map_err(|e| MemoryError::partial("update", id, StoreSide::Content, e))?;

        if embedding_text(&record) != old_text {
            if let Err(e) = self.engine.remove_record(id) {
                warn!(id = %id, error = %e, "failed to drop stale vectors");
            }
            self.auto_index(&record);
        }

        info!(id = %id, "updated memory");
        Ok(record)
    }

    /// Hard delete. Vectors are removed with the index row.
    pub fn delete_memory(&self, id: &str) -> Result<()> {
        let header = self
            .index
            .get_header(id, true)?
            .ok_or_else(|| MemoryError::not_found(id))?;

        self.content.delete(id, header.kind)?;
        self.index
            .delete(id)
            .map_err(|e| MemoryError::partial("delete", id, StoreSide::Content, e))?;

        info!(id = %id, kind = %header.kind, "deleted memory");
        Ok(())
    }

    /// Soft delete. Idempotent for records that are already archived.
    pub fn archive_memory(&self, id: &str) -> Result<()> {
        let header = self
            .index
            .get_header(id, true)?
            .ok_or_else(|| MemoryError::not_found(id))?;
        if header.archived {
            return Ok(());
        }

        self.content.archive(id, header.kind)?;
        self.index
            .archive(id)
            .map_err(|e| MemoryError::partial("archive", id, StoreSide::Content, e))?;

        info!(id = %id, kind = %header.kind, "archived memory");
        Ok(())
    }

    pub fn list_memories(&self, filter: &RecordFilter) -> Result<Vec<Record>> {
        let headers = self.index.list(filter)?;
        let mut records = Vec::with_capacity(headers.len());
        for header in headers {
            if let Some(record) = self.read_record_lenient(&header)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Keyword search over active records, with current content
    pub fn search_memories(&self, query: &str, limit: usize) -> Result<Vec<ScoredRecord>> {
        let hits = self.engine.keyword_search(query, limit)?;
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(record) = self.read_record_lenient(&hit.header)? {
                results.push(ScoredRecord {
                    record,
                    score: hit.score as f32,
                });
            }
        }
        Ok(results)
    }

    /// Semantic search over the records `filter` selects
    pub fn semantic_search(&self, query: &str, filter: &RecordFilter, limit: usize) -> Result<SemanticResults> {
        let candidates = self.list_memories(filter)?;
        self.engine.semantic_search(query, candidates, limit)
    }

    pub fn save_conversation(
        &self,
        title: &str,
        messages: Vec<Message>,
        metadata: Option<Metadata>,
    ) -> Result<Conversation> {
        validate_title(title)?;

        let t = now();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            messages,
            created_at: t,
            updated_at: t,
            metadata,
        };

        let saved = self.content.save_conversation(&conversation)?;
        // index the transcript exactly as it will be read back
        let record = self.read_record(&RecordHeader {
            id: conversation.id.clone(),
            kind: RecordKind::Conversation,
            title: conversation.title.clone(),
            tags: Vec::new(),
            created_at: t,
            updated_at: t,
            metadata: conversation.metadata.clone(),
            archived: false,
            byte_size: saved.byte_size,
        })
        .map_err(|e| MemoryError::partial("save_conversation", &conversation.id, StoreSide::Content, e))?;

        self.index
            .insert(&RecordHeader::from_record(&record, saved.byte_size), &record.content)
            .map_err(|e| MemoryError::partial("save_conversation", &conversation.id, StoreSide::Content, e))?;

        info!(id = %conversation.id, messages = conversation.messages.len(), "saved conversation");
        self.auto_index(&record);
        self.check_size_limit();
        Ok(conversation)
    }

    pub fn load_conversation(&self, id: &str) -> Result<Conversation> {
        self.content
            .load_conversation(id)?
            .ok_or_else(|| MemoryError::not_found_kind(RecordKind::Conversation, id))
    }

    pub fn save_knowledge(&self, new: NewKnowledge) -> Result<KnowledgeEntry> {
        validate_title(&new.title)?;
        let tags = normalize_tags(&new.tags)?;

        let t = now();
        let entry = KnowledgeEntry {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            content: new.content,
            category: new.category.filter(|c| !c.trim().is_empty()),
            tags,
            created_at: t,
            updated_at: t,
            source_conversation_id: new.source_conversation_id,
            metadata: new.metadata,
        };

        let saved = self.content.save_knowledge(&entry)?;
        let record = Record {
            id: entry.id.clone(),
            kind: RecordKind::Knowledge,
            title: entry.title.clone(),
            content: entry.content.clone(),
            tags: entry.tags.clone(),
            created_at: t,
            updated_at: t,
            metadata: entry.metadata.clone(),
            archived: false,
        };
        self.index
            .insert(&RecordHeader::from_record(&record, saved.byte_size), &record.content)
            .map_err(|e| MemoryError::partial("save_knowledge", &entry.id, StoreSide::Content, e))?;

        info!(id = %entry.id, category = ?entry.category, "saved knowledge");
        self.auto_index(&record);
        self.check_size_limit();
        Ok(entry)
    }

    pub fn load_knowledge(&self, id: &str) -> Result<KnowledgeEntry> {
        self.content
            .load_knowledge(id)?
            .ok_or_else(|| MemoryError::not_found_kind(RecordKind::Knowledge, id))
    }

    /// Sessions live only in the content store and are never indexed
    pub fn save_session(&self, new: NewSession) -> Result<SessionState> {
        validate_title(&new.title)?;
        let session = SessionState {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            context: new.context,
            files: new.files,
            variables: new.variables,
            created_at: now(),
            metadata: new.metadata,
        };
        self.content.save_session(&session)?;
        debug!(id = %session.id, "saved session");
        Ok(session)
    }

    pub fn load_session(&self, id: &str) -> Result<SessionState> {
        self.content
            .load_session(id)?
            .ok_or_else(|| MemoryError::NotFound {
                kind: None,
                id: format!("session {}", id),
            })
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        if !self.content.delete_session(id)? {
            return Err(MemoryError::NotFound {
                kind: None,
                id: format!("session {}", id),
            });
        }
        Ok(())
    }

    /// Archive active records created more than `days` ago.
    ///
    /// Returns the number newly archived; a second call right after returns 0.
    pub fn archive_old_memories(&self, days: Option<u32>) -> Result<usize> {
        let days = days.unwrap_or(self.config.auto_archive_days);
        let cutoff = now() - Duration::days(i64::from(days));

        let archived = self.index.archive_older_than(cutoff)?;
        let mut first_failure = None;
        for (id, kind) in &archived {
            if let Err(e) = self.content.archive(id, *kind) {
                warn!(id = %id, error = %e, "failed to move archived document");
                if first_failure.is_none() {
                    first_failure = Some((id.clone(), e));
                }
            }
        }

        if let Some((id, e)) = first_failure {
            return Err(MemoryError::partial("archive_old_memories", &id, StoreSide::Index, e));
        }

        info!(days = days, archived = archived.len(), "archived old memories");
        Ok(archived.len())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let index = self.index.stats()?;
        Ok(StoreStats {
            conversations: index.conversations,
            knowledge: index.knowledge,
            notes: index.notes,
            archived: index.archived,
            sessions: self.content.count_sessions(),
            embeddings: index.embeddings,
            total_bytes: index.total_bytes,
            size_mb: index.total_bytes as f64 / BYTES_PER_MB,
            embedding_model: self.engine.model_id(),
        })
    }

    /// Index documents that have no index row and report rows without a document
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let indexed: HashSet<String> = self.index.all_ids()?.into_iter().map(|(id, _)| id).collect();

        let documents = self.content.list_documents();
        let on_disk: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();

        for entry in &documents {
            if indexed.contains(&entry.id) {
                continue;
            }

            if let Err(e) = validate_id(&entry.id) {
                warn!(path = %entry.path.display(), error = %e, "document name is not a valid id");
                report.unreadable.push(entry.id.clone());
                continue;
            }

            let stored = match self.content.read_document(&entry.id, &entry.path, entry.archived) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(id = %entry.id, path = %entry.path.display(), error = %e, "unreadable document");
                    report.unreadable.push(entry.id.clone());
                    continue;
                }
            };

            let fallback = if entry.path.starts_with(&self.content.paths().conversations) {
                RecordKind::Conversation
            } else {
                RecordKind::Knowledge
            };
            let record = stored.into_record(fallback);
            let byte_size = self.content.size_of(&record.id, record.kind)?;

            self.index
                .insert(&RecordHeader::from_record(&record, byte_size), &record.content)?;
            info!(id = %record.id, kind = %record.kind, "reindexed document");
            report.reindexed.push(record.id);
        }

        for id in &indexed {
            if !on_disk.contains(id.as_str()) {
                warn!(id = %id, "index row has no document");
                report.missing_documents.push(id.clone());
            }
        }
        report.missing_documents.sort();

        Ok(report)
    }

    /// Generate vectors for every active record that lacks one for the active model
    pub fn backfill_embeddings(&self) -> Result<IndexingStats> {
        let mut items = Vec::new();
        for id in self.engine.unindexed_records()? {
            let Some(header) = self.index.get_header(&id, false)? else {
                continue;
            };
            if let Some(record) = self.read_record_lenient(&header)? {
                items.push((record.id.clone(), embedding_text(&record).to_string()));
            }
        }
        let stats = self.engine.batch_index(&items)?;
        self.index
            .database()
            .set_meta(LAST_BACKFILL_KEY, &now().timestamp_millis().to_string())?;
        Ok(stats)
    }

    /// When `backfill_embeddings` last completed
    pub fn last_backfill(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .index
            .database()
            .get_meta(LAST_BACKFILL_KEY)?
            .and_then(|v| v.parse::<i64>().ok())
            .map(from_millis))
    }

    fn read_record(&self, header: &RecordHeader) -> Result<Record> {
        let mut record = self
            .content
            .load(&header.id, header.kind)?
            .ok_or_else(|| MemoryError::not_found_kind(header.kind, header.id.clone()))?;
        record.kind = header.kind;
        record.archived = header.archived;
        Ok(record)
    }

    /// Like `read_record`, but an index row without a document is skipped
    fn read_record_lenient(&self, header: &RecordHeader) -> Result<Option<Record>> {
        match self.read_record(header) {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => {
                warn!(id = %header.id, "index row has no document, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn auto_index(&self, record: &Record) {
        if !self.config.enable_auto_indexing {
            return;
        }
        if let Err(e) = self.engine.index_record(&record.id, embedding_text(record)) {
            warn!(id = %record.id, error = %e, "auto-indexing failed, vector will be built on demand");
        }
    }

    fn check_size_limit(&self) {
        let total_bytes = match self.index.stats() {
            Ok(stats) => stats.total_bytes,
            Err(e) => {
                warn!(error = %e, "could not compute store size");
                return;
            }
        };
        if total_bytes > self.config.max_memory_bytes() {
            warn!(
                size_mb = total_bytes as f64 / BYTES_PER_MB,
                limit_mb = self.config.max_memory_size_mb,
                "memory store exceeds its size limit"
            );
        }
    }
}
