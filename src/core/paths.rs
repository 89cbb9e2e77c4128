use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::types::RecordKind;

pub const DB_FILE: &str = "memory.db";
pub const CONFIG_FILE: &str = "config.yaml";

/// On-disk layout of one memory root
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub root: PathBuf,
    pub conversations: PathBuf,
    pub knowledge: PathBuf,
    pub sessions: PathBuf,
    pub archive: PathBuf,
    pub database: PathBuf,
}

impl StorePaths {
    pub fn from_root(root: PathBuf) -> Self {
        Self {
            conversations: root.join("conversations"),
            knowledge: root.join("knowledge"),
            sessions: root.join("sessions"),
            archive: root.join("archive"),
            database: root.join(DB_FILE),
            root,
        }
    }

    /// Active area for a record kind. Notes live alongside knowledge entries.
    pub fn area_for(&self, kind: RecordKind) -> &Path {
        match kind {
            RecordKind::Conversation => &self.conversations,
            RecordKind::Knowledge | RecordKind::Note => &self.knowledge,
        }
    }

    pub fn document(&self, kind: RecordKind, id: &str) -> PathBuf {
        self.area_for(kind).join(format!("{}.md", id))
    }

    pub fn archived_document(&self, id: &str) -> PathBuf {
        self.archive.join(format!("{}.md", id))
    }

    pub fn session(&self, id: &str) -> PathBuf {
        self.sessions.join(format!("{}.json", id))
    }

    pub fn content_dirs(&self) -> Vec<&PathBuf> {
        vec![&self.conversations, &self.knowledge, &self.archive]
    }

    pub fn ensure(&self) -> io::Result<()> {
        for dir in [
            &self.root,
            &self.conversations,
            &self.knowledge,
            &self.sessions,
            &self.archive,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = StorePaths::from_root(PathBuf::from("/tmp/mem"));
        assert_eq!(
            paths.document(RecordKind::Note, "n1"),
            PathBuf::from("/tmp/mem/knowledge/n1.md")
        );
        assert_eq!(
            paths.document(RecordKind::Conversation, "c1"),
            PathBuf::from("/tmp/mem/conversations/c1.md")
        );
        assert_eq!(paths.session("s1"), PathBuf::from("/tmp/mem/sessions/s1.json"));
        assert_eq!(paths.database, PathBuf::from("/tmp/mem/memory.db"));
    }
}
