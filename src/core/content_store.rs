//! Durable document storage, one file per record

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::document::{parse_transcript, render_transcript, Document};
use super::paths::StorePaths;
use super::schema::validate_id;
use super::types::{Conversation, KnowledgeEntry, Record, RecordKind, SessionState};
use crate::error::Result;

/// Where a document landed and how large it is
#[derive(Debug, Clone)]
pub struct SavedDocument {
    pub path: PathBuf,
    pub byte_size: u64,
}

/// A parsed document together with its location
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub path: PathBuf,
    pub archived: bool,
    pub document: Document,
}

impl StoredDocument {
    pub fn into_record(self, fallback_kind: RecordKind) -> Record {
        Record {
            kind: self.document.kind.unwrap_or(fallback_kind),
            id: self.id,
            title: self.document.title,
            content: self.document.body,
            tags: self.document.tags,
            created_at: self.document.created_at,
            updated_at: self.document.updated_at,
            metadata: self.document.metadata,
            archived: self.archived,
        }
    }
}

/// A document file found on disk, not yet parsed
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub id: String,
    pub path: PathBuf,
    pub archived: bool,
}

pub struct ContentStore {
    paths: StorePaths,
}

impl ContentStore {
    pub fn open(paths: StorePaths) -> Result<Self> {
        paths.ensure()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Write a record's document. `Category` and `Source` headers of an
    /// existing document are kept, since records do not carry them.
    pub fn save(&self, record: &Record) -> Result<SavedDocument> {
        let (category, source) = match self.load_document(&record.id, record.kind)? {
            Some(existing) => (existing.document.category, existing.document.source),
            None => (None, None),
        };
        let document = Document {
            title: record.title.clone(),
            kind: Some(record.kind),
            tags: record.tags.clone(),
            category,
            created_at: record.created_at,
            updated_at: record.updated_at,
            source,
            body: record.content.clone(),
            metadata: record.metadata.clone(),
        };
        self.save_document(record.kind, &record.id, &document)
    }

    /// Write a document into the active area for `kind`
    pub fn save_document(&self, kind: RecordKind, id: &str, document: &Document) -> Result<SavedDocument> {
        validate_id(id)?;
        let path = self.paths.document(kind, id);
        let text = document.render()?;
        write_atomic(&path, text.as_bytes())?;

        debug!(id = %id, kind = %kind, bytes = text.len(), "saved document");
        Ok(SavedDocument {
            path,
            byte_size: text.len() as u64,
        })
    }

    pub fn load(&self, id: &str, kind: RecordKind) -> Result<Option<Record>> {
        Ok(self
            .load_document(id, kind)?
            .map(|stored| stored.into_record(kind)))
    }

    /// Load from the active area, falling back to the archive
    pub fn load_document(&self, id: &str, kind: RecordKind) -> Result<Option<StoredDocument>> {
        validate_id(id)?;
        let active = self.paths.document(kind, id);
        if active.exists() {
            return self.read_document(id, &active, false).map(Some);
        }

        let archived = self.paths.archived_document(id);
        if archived.exists() {
            return self.read_document(id, &archived, true).map(Some);
        }

        Ok(None)
    }

    pub fn read_document(&self, id: &str, path: &Path, archived: bool) -> Result<StoredDocument> {
        let text = fs::read_to_string(path)?;
        Ok(StoredDocument {
            id: id.to_string(),
            path: path.to_path_buf(),
            archived,
            document: Document::parse(&text)?,
        })
    }

    /// Remove the document from both areas. Returns whether anything existed.
    pub fn delete(&self, id: &str, kind: RecordKind) -> Result<bool> {
        validate_id(id)?;
        let mut removed = false;
        for path in [self.paths.document(kind, id), self.paths.archived_document(id)] {
            if path.exists() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Move the document into the archive area.
    ///
    /// Returns false when the document exists in neither area.
    pub fn archive(&self, id: &str, kind: RecordKind) -> Result<bool> {
        validate_id(id)?;
        let source = self.paths.document(kind, id);
        let target = self.paths.archived_document(id);

        if source.exists() {
            fs::rename(&source, &target)?;
            debug!(id = %id, kind = %kind, "archived document");
            return Ok(true);
        }

        Ok(target.exists())
    }

    pub fn size_of(&self, id: &str, kind: RecordKind) -> Result<u64> {
        validate_id(id)?;
        for path in [self.paths.document(kind, id), self.paths.archived_document(id)] {
            if path.exists() {
                return Ok(fs::metadata(&path)?.len());
            }
        }
        Ok(0)
    }

    pub fn save_conversation(&self, conversation: &Conversation) -> Result<SavedDocument> {
        let document = Document {
            title: conversation.title.clone(),
            kind: Some(RecordKind::Conversation),
            tags: Vec::new(),
            category: None,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            source: None,
            body: render_transcript(&conversation.messages),
            metadata: conversation.metadata.clone(),
        };
        self.save_document(RecordKind::Conversation, &conversation.id, &document)
    }

    pub fn load_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self
            .load_document(id, RecordKind::Conversation)?
            .map(|stored| Conversation {
                id: stored.id,
                title: stored.document.title,
                messages: parse_transcript(&stored.document.body),
                created_at: stored.document.created_at,
                updated_at: stored.document.updated_at,
                metadata: stored.document.metadata,
            }))
    }

    pub fn save_knowledge(&self, entry: &KnowledgeEntry) -> Result<SavedDocument> {
        let document = Document {
            title: entry.title.clone(),
            kind: Some(RecordKind::Knowledge),
            tags: entry.tags.clone(),
            category: entry.category.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            source: entry.source_conversation_id.clone(),
            body: entry.content.clone(),
            metadata: entry.metadata.clone(),
        };
        self.save_document(RecordKind::Knowledge, &entry.id, &document)
    }

    pub fn load_knowledge(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        Ok(self
            .load_document(id, RecordKind::Knowledge)?
            .map(|stored| KnowledgeEntry {
                id: stored.id,
                title: stored.document.title,
                content: stored.document.body,
                category: stored.document.category,
                tags: stored.document.tags,
                created_at: stored.document.created_at,
                updated_at: stored.document.updated_at,
                source_conversation_id: stored.document.source,
                metadata: stored.document.metadata,
            }))
    }

    pub fn save_session(&self, session: &SessionState) -> Result<SavedDocument> {
        validate_id(&session.id)?;
        let path = self.paths.session(&session.id);
        let json = serde_json::to_string_pretty(session)?;
        write_atomic(&path, json.as_bytes())?;
        Ok(SavedDocument {
            path,
            byte_size: json.len() as u64,
        })
    }

    pub fn load_session(&self, id: &str) -> Result<Option<SessionState>> {
        validate_id(id)?;
        let path = self.paths.session(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let path = self.paths.session(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    pub fn count_sessions(&self) -> usize {
        count_files(&self.paths.sessions, "json")
    }

    /// Every record document on disk, active and archived
    pub fn list_documents(&self) -> Vec<DocumentEntry> {
        let mut entries = Vec::new();

        for dir in self.paths.content_dirs() {
            if !dir.exists() {
                continue;
            }
            let archived = *dir == self.paths.archive;
            for entry in WalkDir::new(dir).max_depth(1).into_iter().flatten() {
                let path = entry.path();
                if !path.is_file() || path.extension().map(|e| e != "md").unwrap_or(true) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    entries.push(DocumentEntry {
                        id: stem.to_string(),
                        path: path.to_path_buf(),
                        archived,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }
}

fn count_files(dir: &Path, ext: &str) -> usize {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .flatten()
        .filter(|e| e.path().is_file() && e.path().extension().map(|x| x == ext).unwrap_or(false))
        .count()
}

/// Write through a temporary sibling and rename over the target
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
