//! Vector index on top of the shared SQLite database
//!
//! Stores embeddings as little-endian f32 BLOBs and computes similarity in Rust.
//! At most one vector exists per (record, model); writes are upserts.

use rusqlite::{params, OptionalExtension};

use super::database::Database;
use super::embedding::ModelInfo;
use crate::core::types::{from_millis, VectorEmbedding};
use crate::error::{MemoryError, Result};

#[derive(Clone)]
pub struct VectorIndex {
    db: Database,
}

impl VectorIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the vector for `(memory_id, model)`
    pub fn put(&self, embedding: &VectorEmbedding, model: &ModelInfo) -> Result<()> {
        if embedding.model != model.id {
            return Err(MemoryError::Validation(format!(
                "embedding model '{}' does not match '{}'",
                embedding.model, model.id
            )));
        }
        if embedding.embedding.len() != model.dimensions {
            return Err(MemoryError::Validation(format!(
                "embedding has {} dimensions, model {} produces {}",
                embedding.embedding.len(),
                model.id,
                model.dimensions
            )));
        }

        self.db.lock().execute(
            r#"
            INSERT INTO embeddings (id, record_id, vector, model, dimensions, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(record_id, model) DO UPDATE SET
                vector = excluded.vector,
                dimensions = excluded.dimensions,
                created_at = excluded.created_at
            "#,
            params![
                embedding.id,
                embedding.memory_id,
                embedding_to_blob(&embedding.embedding),
                embedding.model,
                embedding.embedding.len() as i64,
                embedding.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, memory_id: &str, model: &str) -> Result<Option<VectorEmbedding>> {
        let row = self
            .db
            .lock()
            .query_row(
                r#"
                SELECT id, record_id, vector, model, created_at
                FROM embeddings WHERE record_id = ?1 AND model = ?2
                "#,
                params![memory_id, model],
                raw_row,
            )
            .optional()?;

        row.map(RawVector::into_embedding).transpose()
    }

    /// Every stored vector for one model
    pub fn all_for_model(&self, model: &str) -> Result<Vec<VectorEmbedding>> {
        let raw = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare(
                "SELECT id, record_id, vector, model, created_at FROM embeddings WHERE model = ?1",
            )?;
            let rows = stmt.query_map(params![model], raw_row)?;
            let mut raw = Vec::new();
            for row in rows {
                raw.push(row?);
            }
            raw
        };

        raw.into_iter().map(RawVector::into_embedding).collect()
    }

    /// Drop every vector of a record, across models
    pub fn delete_for_record(&self, memory_id: &str) -> Result<usize> {
        Ok(self
            .db
            .lock()
            .execute("DELETE FROM embeddings WHERE record_id = ?1", params![memory_id])?)
    }

    pub fn count(&self, model: Option<&str>) -> Result<usize> {
        let conn = self.db.lock();
        let count: i64 = match model {
            Some(m) => conn.query_row(
                "SELECT COUNT(*) FROM embeddings WHERE model = ?1",
                params![m],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?,
        };
        Ok(count as usize)
    }

    /// Active records that have no vector for `model`, oldest first
    pub fn records_without_vector(&self, model: &str) -> Result<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT r.id FROM records r
            WHERE r.archived = 0
              AND NOT EXISTS (
                SELECT 1 FROM embeddings e WHERE e.record_id = r.id AND e.model = ?1
              )
            ORDER BY r.created_at, r.rowid
            "#,
        )?;
        let rows = stmt.query_map(params![model], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

struct RawVector {
    id: String,
    memory_id: String,
    blob: Vec<u8>,
    model: String,
    created_at: i64,
}

impl RawVector {
    fn into_embedding(self) -> Result<VectorEmbedding> {
        Ok(VectorEmbedding {
            embedding: blob_to_embedding(&self.blob)?,
            id: self.id,
            memory_id: self.memory_id,
            model: self.model,
            created_at: from_millis(self.created_at),
        })
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawVector> {
    Ok(RawVector {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        blob: row.get(2)?,
        model: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding
fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(MemoryError::Validation(format!(
            "vector blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{now, RecordKind};
    use crate::search::embedding::{EMBEDDING_DIM, HTP_MODEL_ID};

    fn model() -> ModelInfo {
        ModelInfo {
            id: HTP_MODEL_ID.to_string(),
            dimensions: EMBEDDING_DIM,
            max_input_length: 2048,
        }
    }

    fn setup() -> (Database, VectorIndex) {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock();
            for id in ["a", "b"] {
                conn.execute(
                    "INSERT INTO records (id, kind, title, created_at, updated_at) VALUES (?1, ?2, 't', 0, 0)",
                    params![id, RecordKind::Note],
                )
                .unwrap();
            }
        }
        let index = VectorIndex::new(db.clone());
        (db, index)
    }

    fn vector(memory_id: &str, value: f32) -> VectorEmbedding {
        VectorEmbedding {
            id: uuid::Uuid::new_v4().to_string(),
            memory_id: memory_id.to_string(),
            embedding: vec![value; EMBEDDING_DIM],
            model: HTP_MODEL_ID.to_string(),
            created_at: now(),
        }
    }

    #[test]
    fn test_blob_conversion() {
        let embedding = vec![1.0, 2.0, 3.0, -0.5];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob_to_embedding(&blob).unwrap(), embedding);
        assert!(blob_to_embedding(&blob[..7]).is_err());
    }

    #[test]
    fn test_put_is_upsert() -> Result<()> {
        let (_db, index) = setup();
        index.put(&vector("a", 0.1), &model())?;
        index.put(&vector("a", 0.2), &model())?;

        assert_eq!(index.count(None)?, 1);
        let stored = index.get("a", HTP_MODEL_ID)?.unwrap();
        assert_eq!(stored.embedding[0], 0.2);
        assert!(index.get("a", "other-model")?.is_none());
        Ok(())
    }

    #[test]
    fn test_rejects_wrong_dimensions() {
        let (_db, index) = setup();
        let mut v = vector("a", 0.1);
        v.embedding.truncate(10);
        let err = index.put(&v, &model()).unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_missing_vectors_and_cascade() -> Result<()> {
        let (db, index) = setup();
        index.put(&vector("a", 0.1), &model())?;
        assert_eq!(index.records_without_vector(HTP_MODEL_ID)?, vec!["b".to_string()]);

        db.lock().execute("DELETE FROM records WHERE id = 'a'", [])?;
        assert_eq!(index.count(Some(HTP_MODEL_ID))?, 0);

        index.put(&vector("b", 0.3), &model())?;
        assert_eq!(index.all_for_model(HTP_MODEL_ID)?.len(), 1);
        assert_eq!(index.delete_for_record("b")?, 1);
        assert_eq!(index.count(None)?, 0);
        Ok(())
    }
}
