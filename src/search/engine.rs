//! Search orchestrator - keyword ranking plus semantic ranking with lazy indexing

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::embedding::{cosine_similarity, EmbeddingHandle, ModelInfo};
use super::metadata::{KeywordHit, MetadataIndex};
use super::vectordb::VectorIndex;
use crate::core::types::{now, Record, VectorEmbedding};
use crate::error::Result;

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Record with a similarity score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f32,
}

impl From<(Record, f32)> for ScoredRecord {
    fn from((record, score): (Record, f32)) -> Self {
        Self { record, score }
    }
}

/// Ranked semantic results
#[derive(Debug, Clone, Default, Serialize)]
pub struct SemanticResults {
    pub results: Vec<ScoredRecord>,
    /// Lazily generated vectors that were scored but could not be stored
    pub unpersisted: usize,
}

/// Batch indexing statistics
#[derive(Debug, Clone, Default)]
pub struct IndexingStats {
    pub indexed: usize,
    pub batches: usize,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub embeddings: usize,
    pub model: ModelInfo,
    pub ready: bool,
}

/// Text a record is embedded from: its content, or the title when content is blank
pub fn embedding_text(record: &Record) -> &str {
    if record.content.trim().is_empty() {
        &record.title
    } else {
        &record.content
    }
}

pub struct SearchEngine {
    index: MetadataIndex,
    vectors: VectorIndex,
    embedder: Arc<EmbeddingHandle>,
    batch_size: usize,
}

impl SearchEngine {
    pub fn new(index: MetadataIndex, vectors: VectorIndex, embedder: Arc<EmbeddingHandle>) -> Self {
        Self {
            index,
            vectors,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Active model id. Does not initialize the backend.
    pub fn model_id(&self) -> String {
        self.embedder.model_info().id
    }

    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        self.index.keyword_search(query, limit, false)
    }

    /// Rank `candidates` by cosine similarity to `query`.
    ///
    /// Candidates without a vector for the active model are embedded and
    /// persisted before scoring. A vector that fails to persist is still
    /// scored and counted in `unpersisted`. Fails only when the backend fails.
    pub fn semantic_search(&self, query: &str, candidates: Vec<Record>, limit: usize) -> Result<SemanticResults> {
        if candidates.is_empty() || limit == 0 {
            return Ok(SemanticResults::default());
        }

        let query_embedding = self.embedder.embed(query)?;
        let model = self.embedder.ensure_ready()?.clone();

        let wanted: HashSet<&str> = candidates.iter().map(|r| r.id.as_str()).collect();
        let mut known: HashMap<String, Vec<f32>> = self
            .vectors
            .all_for_model(&model.id)?
            .into_iter()
            .filter(|v| wanted.contains(v.memory_id.as_str()))
            .map(|v| (v.memory_id, v.embedding))
            .collect();

        let mut unpersisted = 0;
        let missing: Vec<&Record> = candidates.iter().filter(|r| !known.contains_key(&r.id)).collect();
        for chunk in missing.chunks(self.batch_size) {
            let texts: Vec<&str> = chunk.iter().map(|r| embedding_text(r)).collect();
            let generated = self.embedder.embed_batch(&texts)?;

            for (record, embedding) in chunk.iter().zip(generated) {
                debug!(id = %record.id, model = %model.id, "lazily indexed record");
                let vector = new_vector(&record.id, embedding, &model);
                if let Err(e) = self.vectors.put(&vector, &model) {
                    warn!(id = %record.id, error = %e, "failed to persist lazily generated vector");
                    unpersisted += 1;
                }
                known.insert(vector.memory_id, vector.embedding);
            }
        }

        let mut results: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|record| {
                let score = known
                    .get(&record.id)
                    .map(|v| cosine_similarity(&query_embedding, v))
                    .unwrap_or(0.0);
                ScoredRecord::from((record, score))
            })
            .collect();

        // sort_by is stable: equal scores keep candidate order
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        Ok(SemanticResults { results, unpersisted })
    }

    /// Embed one record's text and upsert its vector
    pub fn index_record(&self, id: &str, text: &str) -> Result<()> {
        let embedding = self.embedder.embed(text)?;
        let model = self.embedder.ensure_ready()?;
        self.vectors.put(&new_vector(id, embedding, model), model)?;
        debug!(id = %id, model = %model.id, "indexed record");
        Ok(())
    }

    /// Embed `(id, text)` pairs in batches of at most `batch_size`
    pub fn batch_index(&self, items: &[(String, String)]) -> Result<IndexingStats> {
        let start = Instant::now();
        let mut stats = IndexingStats::default();
        if items.is_empty() {
            return Ok(stats);
        }

        let model = self.embedder.ensure_ready()?.clone();

        for chunk in items.chunks(self.batch_size) {
            let texts: Vec<&str> = chunk.iter().map(|(_, text)| text.as_str()).collect();
            let embeddings = self.embedder.embed_batch(&texts)?;

            for ((id, _), embedding) in chunk.iter().zip(embeddings) {
                self.vectors.put(&new_vector(id, embedding, &model), &model)?;
                stats.indexed += 1;
            }
            stats.batches += 1;
        }

        stats.duration_ms = start.elapsed().as_millis();
        info!(
            indexed = stats.indexed,
            batches = stats.batches,
            duration_ms = stats.duration_ms as u64,
            model = %model.id,
            "batch indexing complete"
        );
        Ok(stats)
    }

    pub fn remove_record(&self, id: &str) -> Result<usize> {
        self.vectors.delete_for_record(id)
    }

    pub fn index_stats(&self) -> Result<EngineStats> {
        let model = self.embedder.model_info();
        Ok(EngineStats {
            embeddings: self.vectors.count(Some(&model.id))?,
            ready: self.embedder.is_ready(),
            model,
        })
    }

    /// Active records lacking a vector for the current model
    pub fn unindexed_records(&self) -> Result<Vec<String>> {
        self.vectors.records_without_vector(&self.model_id())
    }
}

fn new_vector(memory_id: &str, embedding: Vec<f32>, model: &ModelInfo) -> VectorEmbedding {
    VectorEmbedding {
        id: uuid::Uuid::new_v4().to_string(),
        memory_id: memory_id.to_string(),
        embedding,
        model: model.id.clone(),
        created_at: now(),
    }
}
