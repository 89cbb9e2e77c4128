use std::collections::HashSet;

use crate::error::MemoryError;

pub const MAX_TITLE_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    EmptyTitle,
    MultilineTitle,
    TitleTooLong(usize),
    EmptyTag,
    InvalidTagChar(String),
    MissingDelimiter,
    MissingTitleLine,
    InvalidId(String),
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "Title must not be empty"),
            Self::MultilineTitle => write!(f, "Title must be a single line"),
            Self::TitleTooLong(n) => {
                write!(f, "Title too long: {} chars (max {})", n, MAX_TITLE_CHARS)
            }
            Self::EmptyTag => write!(f, "Tags must not be empty"),
            Self::InvalidTagChar(t) => {
                write!(f, "Tag must not contain commas or line breaks: {:?}", t)
            }
            Self::MissingDelimiter => write!(f, "Document has no '---' body delimiter"),
            Self::MissingTitleLine => write!(f, "Document does not start with a '# ' title line"),
            Self::InvalidId(id) => write!(f, "Invalid id {:?}: ids must not contain path separators or '..'", id),
        }
    }
}

impl From<SchemaViolation> for MemoryError {
    fn from(v: SchemaViolation) -> Self {
        MemoryError::Validation(v.to_string())
    }
}

pub fn validate_title(title: &str) -> Result<(), SchemaViolation> {
    if title.trim().is_empty() {
        return Err(SchemaViolation::EmptyTitle);
    }
    if title.contains('\n') || title.contains('\r') {
        return Err(SchemaViolation::MultilineTitle);
    }
    let len = title.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(SchemaViolation::TitleTooLong(len));
    }
    Ok(())
}

/// Ids name files inside one area, so they must stay a single path component
pub fn validate_id(id: &str) -> Result<(), SchemaViolation> {
    if id.trim().is_empty() || id.contains(['/', '\\', '\0']) || id.contains("..") {
        return Err(SchemaViolation::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Trim, reject unrepresentable tags and drop duplicates keeping first occurrence
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, SchemaViolation> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(tags.len());

    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(SchemaViolation::EmptyTag);
        }
        if tag.contains(',') || tag.contains('\n') || tag.contains('\r') {
            return Err(SchemaViolation::InvalidTagChar(tag.to_string()));
        }
        if seen.insert(tag.to_string()) {
            out.push(tag.to_string());
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_rules() {
        assert!(validate_title("Rust ownership").is_ok());
        assert_eq!(validate_title("  "), Err(SchemaViolation::EmptyTitle));
        assert_eq!(validate_title("a\nb"), Err(SchemaViolation::MultilineTitle));
        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        assert_eq!(
            validate_title(&long),
            Err(SchemaViolation::TitleTooLong(MAX_TITLE_CHARS + 1))
        );
    }

    #[test]
    fn test_id_rules() {
        assert!(validate_id("0b6f3c1e-2d4a-4f7e-9a51-1c2d3e4f5a6b").is_ok());
        assert!(validate_id("rec-1").is_ok());
        for bad in ["", "../conversations/c1", "a/b", "a\\b", "..", "x..y"] {
            assert!(
                matches!(validate_id(bad), Err(SchemaViolation::InvalidId(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_normalize_tags() {
        let tags = vec![" rust ".to_string(), "db".to_string(), "rust".to_string()];
        assert_eq!(normalize_tags(&tags).unwrap(), vec!["rust", "db"]);

        let bad = vec!["a,b".to_string()];
        assert!(matches!(
            normalize_tags(&bad),
            Err(SchemaViolation::InvalidTagChar(_))
        ));
        assert_eq!(normalize_tags(&["".to_string()]), Err(SchemaViolation::EmptyTag));
    }
}
