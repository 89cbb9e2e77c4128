//! Metadata index: record headers plus an FTS5 keyword index
//!
//! The index never stores content as the record of truth. The `records_fts`
//! table keeps a snapshot of the text purely for keyword ranking.

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use super::database::Database;
use crate::core::types::{from_millis, Metadata, RecordFilter, RecordHeader, RecordKind};
use crate::error::{MemoryError, Result};

const HEADER_COLUMNS: &str =
    "r.id, r.kind, r.title, r.tags, r.created_at, r.updated_at, r.metadata, r.archived, r.byte_size";

/// Partial header update. `content` refreshes the keyword snapshot.
#[derive(Debug, Clone, Default)]
pub struct HeaderUpdate {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Metadata>,
    pub content: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub byte_size: Option<u64>,
}

/// Keyword search hit
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub header: RecordHeader,
    pub score: f64,
}

/// Index statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub conversations: usize,
    pub knowledge: usize,
    pub notes: usize,
    pub archived: usize,
    pub embeddings: usize,
    pub total_bytes: u64,
}

impl IndexStats {
    pub fn total_records(&self) -> usize {
        self.conversations + self.knowledge + self.notes
    }
}

#[derive(Clone)]
pub struct MetadataIndex {
    db: Database,
}

impl MetadataIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert a new header and its keyword entry in one transaction
    pub fn insert(&self, header: &RecordHeader, content: &str) -> Result<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO records (id, kind, title, tags, created_at, updated_at, metadata, archived, byte_size)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                header.id,
                header.kind,
                header.title,
                serde_json::to_string(&header.tags)?,
                header.created_at.timestamp_millis(),
                header.updated_at.timestamp_millis(),
                metadata_json(header.metadata.as_ref())?,
                header.archived,
                header.byte_size as i64,
            ],
        )?;
        sync_fts(&tx, &header.id, &header.title, content, &header.tags)?;

        tx.commit()?;
        debug!(id = %header.id, kind = %header.kind, "indexed record header");
        Ok(())
    }

    pub fn update(&self, id: &str, update: &HeaderUpdate) -> Result<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let current = get_header(&tx, id, true)?.ok_or_else(|| MemoryError::not_found(id))?;

        let title = update.title.as_ref().unwrap_or(&current.title);
        let tags = update.tags.as_ref().unwrap_or(&current.tags);
        let metadata = update.metadata.as_ref().or(current.metadata.as_ref());
        let updated_at = update.updated_at.unwrap_or(current.updated_at);
        let byte_size = update.byte_size.unwrap_or(current.byte_size);

        tx.execute(
            r#"
            UPDATE records
            SET title = ?2, tags = ?3, metadata = ?4, updated_at = ?5, byte_size = ?6
            WHERE id = ?1
            "#,
            params![
                id,
                title,
                serde_json::to_string(tags)?,
                metadata_json(metadata)?,
                updated_at.timestamp_millis(),
                byte_size as i64,
            ],
        )?;

        if update.title.is_some() || update.tags.is_some() || update.content.is_some() {
            let content = match update.content {
                Some(ref c) => c.clone(),
                None => fts_content(&tx, id)?,
            };
            sync_fts(&tx, id, title, &content, tags)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Header by id. Archived rows only when `include_archived`.
    pub fn get_header(&self, id: &str, include_archived: bool) -> Result<Option<RecordHeader>> {
        get_header(&self.db.lock(), id, include_archived)
    }

    /// Conjunctive filter, newest first
    pub fn list(&self, filter: &RecordFilter) -> Result<Vec<RecordHeader>> {
        let mut sql = format!("SELECT {} FROM records r WHERE 1 = 1", HEADER_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if !filter.include_archived {
            sql.push_str(" AND r.archived = 0");
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND r.kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(start) = filter.start {
            sql.push_str(" AND r.created_at >= ?");
            values.push(Value::Integer(start.timestamp_millis()));
        }
        if let Some(end) = filter.end {
            sql.push_str(" AND r.created_at <= ?");
            values.push(Value::Integer(end.timestamp_millis()));
        }
        if !filter.tags.is_empty() {
            let placeholders = vec!["?"; filter.tags.len()].join(", ");
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(r.tags) WHERE json_each.value IN ({}))",
                placeholders
            ));
            values.extend(filter.tags.iter().map(|t| Value::Text(t.clone())));
        }

        sql.push_str(" ORDER BY r.created_at DESC, r.rowid DESC");

        if filter.limit.is_some() || filter.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            values.push(Value::Integer(filter.limit.map(|l| l as i64).unwrap_or(-1)));
            values.push(Value::Integer(filter.offset.unwrap_or(0) as i64));
        }

        let conn = self.db.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), header_from_row)?;

        let mut headers = Vec::new();
        for row in rows {
            headers.push(row?);
        }
        Ok(headers)
    }

    /// Hard delete. Vectors go with the row through the cascade.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM records WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM records_fts WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn archive(&self, id: &str) -> Result<bool> {
        let changed = self
            .db
            .lock()
            .execute("UPDATE records SET archived = 1 WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Archive every active record created before `cutoff` in one statement
    pub fn archive_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<(String, RecordKind)>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            r#"
            UPDATE records SET archived = 1
            WHERE created_at < ?1 AND archived = 0
            RETURNING id, kind
            "#,
        )?;
        let rows = stmt.query_map(params![cutoff.timestamp_millis()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

        let mut archived = Vec::new();
        for row in rows {
            archived.push(row?);
        }
        Ok(archived)
    }

    /// Rank records by BM25 over title, content and tags.
    ///
    /// Scores are positive, larger is better. Equal scores keep insertion order.
    pub fn keyword_search(&self, query: &str, limit: usize, include_archived: bool) -> Result<Vec<KeywordHit>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            SELECT {}, bm25(records_fts) AS rank
            FROM records_fts
            JOIN records r ON r.id = records_fts.id
            WHERE records_fts MATCH ?1 AND (?2 OR r.archived = 0)
            ORDER BY rank ASC, r.rowid ASC
            LIMIT ?3
            "#,
            HEADER_COLUMNS
        );

        let conn = self.db.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![fts_query, include_archived, limit as i64], |row| {
            let rank: f64 = row.get(9)?;
            Ok(KeywordHit {
                header: header_from_row(row)?,
                score: -rank,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    /// Every indexed `(id, kind)`, archived included
    pub fn all_ids(&self) -> Result<Vec<(String, RecordKind)>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT id, kind FROM records ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Counts by kind and stored size of active records
    pub fn stats(&self) -> Result<IndexStats> {
        let conn = self.db.lock();
        let mut stats = IndexStats::default();

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*), COALESCE(SUM(byte_size), 0) FROM records WHERE archived = 0 GROUP BY kind",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, RecordKind>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (kind, count, bytes) = row?;
            match kind {
                RecordKind::Conversation => stats.conversations = count as usize,
                RecordKind::Knowledge => stats.knowledge = count as usize,
                RecordKind::Note => stats.notes = count as usize,
            }
            stats.total_bytes += bytes as u64;
        }

        let archived: i64 =
            conn.query_row("SELECT COUNT(*) FROM records WHERE archived = 1", [], |row| row.get(0))?;
        let embeddings: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        stats.archived = archived as usize;
        stats.embeddings = embeddings as usize;

        Ok(stats)
    }
}

fn get_header(conn: &Connection, id: &str, include_archived: bool) -> Result<Option<RecordHeader>> {
    let sql = format!(
        "SELECT {} FROM records r WHERE r.id = ?1 AND (?2 OR r.archived = 0)",
        HEADER_COLUMNS
    );
    conn.query_row(&sql, params![id, include_archived], header_from_row)
        .optional()
        .map_err(|e| e.into())
}

fn header_from_row(row: &Row<'_>) -> rusqlite::Result<RecordHeader> {
    let tags_json: String = row.get(3)?;
    let metadata_json: Option<String> = row.get(6)?;
    Ok(RecordHeader {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        tags: serde_json::from_str(&tags_json).map_err(|e| json_column_error(3, e))?,
        created_at: from_millis(row.get(4)?),
        updated_at: from_millis(row.get(5)?),
        metadata: metadata_json
            .map(|m| serde_json::from_str(&m))
            .transpose()
            .map_err(|e| json_column_error(6, e))?,
        archived: row.get(7)?,
        byte_size: row.get::<_, i64>(8)? as u64,
    })
}

fn json_column_error(column: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e))
}

fn metadata_json(metadata: Option<&Metadata>) -> Result<Option<String>> {
    Ok(metadata.map(serde_json::to_string).transpose()?)
}

fn sync_fts(conn: &Connection, id: &str, title: &str, content: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM records_fts WHERE id = ?1", params![id])?;
    conn.execute(
        "INSERT INTO records_fts (id, title, content, tags) VALUES (?1, ?2, ?3, ?4)",
        params![id, title, content, tags.join(" ")],
    )?;
    Ok(())
}

fn fts_content(conn: &Connection, id: &str) -> Result<String> {
    Ok(conn
        .query_row(
            "SELECT content FROM records_fts WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or_default())
}

/// Quote each alphanumeric term so user text never hits FTS5 syntax.
/// Terms are OR-ed; BM25 rewards records matching more of them.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::now;
    use chrono::Duration;

    fn header(id: &str, kind: RecordKind, title: &str, tags: &[&str], age_days: i64) -> RecordHeader {
        let t = now() - Duration::days(age_days);
        RecordHeader {
            id: id.to_string(),
            kind,
            title: title.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: t,
            updated_at: t,
            metadata: None,
            archived: false,
            byte_size: 100,
        }
    }

    fn index() -> MetadataIndex {
        MetadataIndex::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_insert_get_delete() -> Result<()> {
        let idx = index();
        let h = header("a", RecordKind::Knowledge, "Alpha", &["x"], 0);
        idx.insert(&h, "alpha beta gamma")?;

        assert_eq!(idx.get_header("a", false)?, Some(h));
        assert!(idx.delete("a")?);
        assert!(idx.get_header("a", true)?.is_none());
        assert!(idx.keyword_search("beta", 10, true)?.is_empty());
        assert!(!idx.delete("a")?);
        Ok(())
    }

    #[test]
    fn test_filters_are_conjunctive_and_tags_disjunctive() -> Result<()> {
        let idx = index();
        idx.insert(&header("n1", RecordKind::Note, "one", &["rust"], 3), "")?;
        idx.insert(&header("n2", RecordKind::Note, "two", &["go"], 2), "")?;
        idx.insert(&header("n3", RecordKind::Note, "three", &["python"], 1), "")?;
        idx.insert(&header("k1", RecordKind::Knowledge, "four", &["rust"], 0), "")?;

        let filter = RecordFilter {
            kind: Some(RecordKind::Note),
            tags: vec!["rust".to_string(), "go".to_string()],
            ..RecordFilter::default()
        };
        let ids: Vec<_> = idx.list(&filter)?.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["n2", "n1"]);

        let page = RecordFilter {
            limit: Some(2),
            offset: Some(1),
            ..RecordFilter::default()
        };
        let ids: Vec<_> = idx.list(&page)?.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["n3", "n2"]);

        let range = RecordFilter {
            start: Some(now() - Duration::days(2) - Duration::hours(1)),
            end: Some(now() - Duration::hours(12)),
            ..RecordFilter::default()
        };
        let ids: Vec<_> = idx.list(&range)?.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["n3", "n2"]);
        Ok(())
    }

    #[test]
    fn test_archived_hidden_unless_requested() -> Result<()> {
        let idx = index();
        idx.insert(&header("a", RecordKind::Note, "Alpha", &[], 0), "searchable words")?;
        assert!(idx.archive("a")?);

        assert!(idx.get_header("a", false)?.is_none());
        assert!(idx.get_header("a", true)?.unwrap().archived);
        assert!(idx.list(&RecordFilter::default())?.is_empty());
        assert!(idx.keyword_search("searchable", 5, false)?.is_empty());
        assert_eq!(idx.keyword_search("searchable", 5, true)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_keyword_ranking() -> Result<()> {
        let idx = index();
        idx.insert(&header("weak", RecordKind::Note, "misc", &[], 0), "beta appears once among many other words here")?;
        idx.insert(&header("strong", RecordKind::Note, "beta", &["beta"], 0), "beta beta")?;
        idx.insert(&header("none", RecordKind::Note, "other", &[], 0), "nothing relevant")?;

        let hits = idx.keyword_search("beta", 10, false)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].header.id, "strong");
        assert!(hits.iter().all(|h| h.score > 0.0));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        Ok(())
    }

    #[test]
    fn test_query_syntax_is_neutralized() -> Result<()> {
        let idx = index();
        idx.insert(&header("a", RecordKind::Note, "t", &[], 0), "alpha-beta NEAR( \"quoted\"")?;
        assert_eq!(idx.keyword_search("alpha-beta", 5, false)?.len(), 1);
        assert_eq!(idx.keyword_search("NEAR(", 5, false)?.len(), 1);
        assert!(idx.keyword_search("  ***  ", 5, false)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_update_resyncs_keyword_index() -> Result<()> {
        let idx = index();
        idx.insert(&header("a", RecordKind::Note, "Old title", &["old"], 0), "original body")?;

        idx.update(
            "a",
            &HeaderUpdate {
                title: Some("Fresh title".to_string()),
                ..HeaderUpdate::default()
            },
        )?;
        assert_eq!(idx.keyword_search("fresh", 5, false)?.len(), 1);
        // content snapshot survives a title-only update
        assert_eq!(idx.keyword_search("original", 5, false)?.len(), 1);

        idx.update(
            "a",
            &HeaderUpdate {
                content: Some("replacement body".to_string()),
                tags: Some(vec!["new".to_string()]),
                ..HeaderUpdate::default()
            },
        )?;
        assert!(idx.keyword_search("original", 5, false)?.is_empty());
        assert_eq!(idx.keyword_search("replacement", 5, false)?.len(), 1);
        assert_eq!(idx.get_header("a", false)?.unwrap().tags, vec!["new"]);

        let err = idx.update("missing", &HeaderUpdate::default()).unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn test_corrupt_json_columns_are_errors() -> Result<()> {
        let idx = index();
        idx.insert(&header("a", RecordKind::Note, "t", &["x"], 0), "")?;
        idx.insert(&header("b", RecordKind::Note, "t", &[], 0), "")?;
        {
            let conn = idx.database().lock();
            conn.execute("UPDATE records SET tags = 'not json' WHERE id = 'a'", [])?;
            conn.execute("UPDATE records SET metadata = '{broken' WHERE id = 'b'", [])?;
        }

        for id in ["a", "b"] {
            let err = idx.get_header(id, false).unwrap_err();
            assert!(matches!(
                err,
                MemoryError::Database(rusqlite::Error::FromSqlConversionFailure(..))
            ));
        }
        assert!(idx.list(&RecordFilter::default()).is_err());
        Ok(())
    }

    #[test]
    fn test_keyword_ties_keep_insertion_order() -> Result<()> {
        let idx = index();
        for id in ["first", "second", "third"] {
            idx.insert(&header(id, RecordKind::Note, "same", &[], 0), "identical words")?;
        }

        let hits = idx.keyword_search("identical", 10, false)?;
        let ids: Vec<_> = hits.iter().map(|h| h.header.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert!(hits.windows(2).all(|w| w[0].score == w[1].score));
        Ok(())
    }

    #[test]
    fn test_time_range_bounds_are_inclusive() -> Result<()> {
        let idx = index();
        let h = header("exact", RecordKind::Note, "t", &[], 5);
        idx.insert(&h, "")?;
        idx.insert(&header("later", RecordKind::Note, "t", &[], 1), "")?;

        let exact = RecordFilter {
            start: Some(h.created_at),
            end: Some(h.created_at),
            ..RecordFilter::default()
        };
        let ids: Vec<_> = idx.list(&exact)?.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["exact"]);

        let after = RecordFilter {
            start: Some(h.created_at + Duration::milliseconds(1)),
            ..RecordFilter::default()
        };
        let ids: Vec<_> = idx.list(&after)?.into_iter().map(|h| h.id).collect();
        assert_eq!(ids, vec!["later"]);
        Ok(())
    }

    #[test]
    fn test_archive_older_than_and_stats() -> Result<()> {
        let idx = index();
        idx.insert(&header("old", RecordKind::Knowledge, "A", &[], 100), "")?;
        idx.insert(&header("new", RecordKind::Conversation, "B", &[], 10), "")?;

        let cutoff = now() - Duration::days(90);
        let archived = idx.archive_older_than(cutoff)?;
        assert_eq!(archived, vec![("old".to_string(), RecordKind::Knowledge)]);
        assert!(idx.archive_older_than(cutoff)?.is_empty());

        let stats = idx.stats()?;
        assert_eq!(stats.conversations, 1);
        assert_eq!(stats.knowledge, 0);
        assert_eq!(stats.archived, 1);
        assert_eq!(stats.total_bytes, 100);
        assert_eq!(stats.total_records(), 1);
        assert_eq!(idx.all_ids()?.len(), 2);
        Ok(())
    }
}
