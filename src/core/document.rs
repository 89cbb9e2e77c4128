//! Self-describing record documents
//!
//! A document is a `# title` line, a block of `Key: value` header lines,
//! a `---` delimiter, then the content verbatim. An optional metadata
//! trailer (a second delimiter and a fenced JSON object) may close the file.
//!
//! Header keys are a fixed set. Unknown lines inside the header are skipped;
//! everything after the delimiter is content. The trailer is only split off
//! when the header carries `Metadata: json`, so content that merely looks like
//! a trailer stays content.

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use super::schema::SchemaViolation;
use super::types::{now, Message, Metadata, RecordKind, Role};
use crate::error::Result;

pub const DELIMITER: &str = "---";
const METADATA_OPEN: &str = "\n---\nMetadata:\n```json\n";
const METADATA_CLOSE: &str = "\n```\n";
const METADATA_MARKER: &str = "json";

lazy_static! {
    static ref HEADER_RE: Regex =
        Regex::new(r"^(Tags|Category|Created|Updated|Source|Type|Metadata):[ \t]*(.*?)\s*$").unwrap();
    static ref TURN_RE: Regex = Regex::new(r"^## (USER|ASSISTANT|SYSTEM) @ (\S+)\s*$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub title: String,
    pub kind: Option<RecordKind>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source: Option<String>,
    pub body: String,
    pub metadata: Option<Metadata>,
}

impl Document {
    pub fn render(&self) -> Result<String> {
        let mut out = format!("# {}\n", self.title);

        if let Some(kind) = self.kind {
            out.push_str(&format!("Type: {}\n", kind));
        }
        if !self.tags.is_empty() {
            out.push_str(&format!("Tags: {}\n", self.tags.join(", ")));
        }
        if let Some(ref category) = self.category {
            out.push_str(&format!("Category: {}\n", category));
        }
        out.push_str(&format!("Created: {}\n", format_time(&self.created_at)));
        out.push_str(&format!("Updated: {}\n", format_time(&self.updated_at)));
        if let Some(ref source) = self.source {
            out.push_str(&format!("Source: {}\n", source));
        }
        if self.metadata.is_some() {
            out.push_str(&format!("Metadata: {}\n", METADATA_MARKER));
        }

        out.push_str(DELIMITER);
        out.push('\n');
        out.push_str(&self.body);

        if let Some(ref metadata) = self.metadata {
            out.push_str(METADATA_OPEN);
            out.push_str(&serde_json::to_string_pretty(metadata)?);
            out.push_str(METADATA_CLOSE);
        }

        Ok(out)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut title: Option<String> = None;
        let mut kind = None;
        let mut tags = Vec::new();
        let mut category = None;
        let mut created: Option<DateTime<Utc>> = None;
        let mut updated: Option<DateTime<Utc>> = None;
        let mut source = None;
        let mut has_metadata = false;
        let mut body_start = None;

        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            offset += line.len();
            let line = line.trim_end_matches(['\n', '\r']);

            if title.is_none() {
                if line.trim().is_empty() {
                    continue;
                }
                match line.strip_prefix("# ") {
                    Some(t) if !t.trim().is_empty() => title = Some(t.to_string()),
                    Some(_) => title = Some("Untitled".to_string()),
                    None => return Err(SchemaViolation::MissingTitleLine.into()),
                }
                continue;
            }

            if line == DELIMITER {
                body_start = Some(offset);
                break;
            }

            let Some(caps) = HEADER_RE.captures(line) else {
                continue;
            };
            let value = &caps[2];
            match &caps[1] {
                "Type" => kind = Some(value.parse::<RecordKind>()?),
                "Tags" => {
                    tags = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect()
                }
                "Category" if !value.is_empty() => category = Some(value.to_string()),
                "Source" if !value.is_empty() => source = Some(value.to_string()),
                "Created" => created = Some(parse_time(value)),
                "Updated" => updated = Some(parse_time(value)),
                "Metadata" => has_metadata = value == METADATA_MARKER,
                _ => {}
            }
        }

        let title = title.ok_or(SchemaViolation::MissingTitleLine)?;
        let body_start = body_start.ok_or(SchemaViolation::MissingDelimiter)?;
        let rest = &text[body_start..];
        let (body, metadata) = if has_metadata {
            split_metadata(rest)
        } else {
            (rest, None)
        };
        let created_at = created.unwrap_or_else(now);

        Ok(Self {
            title,
            kind,
            tags,
            category,
            created_at,
            updated_at: updated.unwrap_or(created_at),
            source,
            body: body.to_string(),
            metadata,
        })
    }
}

/// Split off the trailing metadata block the header announced.
/// A trailer that does not parse is kept as content.
fn split_metadata(rest: &str) -> (&str, Option<Metadata>) {
    let Some(open) = rest.rfind(METADATA_OPEN) else {
        return (rest, None);
    };
    let tail = &rest[open + METADATA_OPEN.len()..];
    let Some(json) = tail.strip_suffix(METADATA_CLOSE) else {
        return (rest, None);
    };
    match serde_json::from_str::<Metadata>(json) {
        Ok(metadata) => (&rest[..open], Some(metadata)),
        Err(e) => {
            debug!(error = %e, "metadata trailer is not a JSON object, keeping it as content");
            (rest, None)
        }
    }
}

pub fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Unparsable timestamps fall back to the current time
pub fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| now())
}

/// Render conversation turns as the body of a conversation document
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        out.push_str(&format!(
            "## {} @ {}\n{}\n",
            msg.role.heading(),
            format_time(&msg.timestamp),
            msg.content
        ));
    }
    out
}

/// Parse turns back out of a transcript body, preserving order
pub fn parse_transcript(body: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current: Option<(Role, DateTime<Utc>, usize)> = None;

    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let Some(caps) = TURN_RE.captures(line.trim_end_matches(['\n', '\r'])) else {
            continue;
        };
        let Some(role) = Role::from_heading(&caps[1]) else {
            continue;
        };

        if let Some((role, timestamp, start)) = current.take() {
            messages.push(turn(role, timestamp, &body[start..line_start]));
        }
        current = Some((role, parse_time(&caps[2]), offset));
    }

    if let Some((role, timestamp, start)) = current {
        messages.push(turn(role, timestamp, &body[start..]));
    }

    messages
}

fn turn(role: Role, timestamp: DateTime<Utc>, segment: &str) -> Message {
    Message {
        role,
        content: segment.strip_suffix('\n').unwrap_or(segment).to_string(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        Document {
            title: "Rust notes".to_string(),
            kind: Some(RecordKind::Knowledge),
            tags: vec!["rust".to_string(), "ownership rules".to_string()],
            category: Some("programming".to_string()),
            created_at: parse_time("2026-01-02T03:04:05.678Z"),
            updated_at: parse_time("2026-01-03T00:00:00.000Z"),
            source: Some("conv-1".to_string()),
            body: "alpha beta gamma\n---\nnot a delimiter for us\n".to_string(),
            metadata: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let doc = sample();
        let text = doc.render().unwrap();
        assert_eq!(Document::parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut doc = sample();
        let json = json!({"project": "memstore", "priority": 2, "nested": {"a": [1, 2]}});
        doc.metadata = json.as_object().cloned();
        let text = doc.render().unwrap();
        assert!(text.contains("Metadata:\n```json\n"));
        assert_eq!(Document::parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_minimal_document_defaults() {
        let doc = Document::parse("# Bare\n---\nhello").unwrap();
        assert_eq!(doc.title, "Bare");
        assert!(doc.tags.is_empty());
        assert!(doc.kind.is_none());
        assert_eq!(doc.body, "hello");
        assert_eq!(doc.created_at, doc.updated_at);
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_now() {
        let before = now();
        let doc = Document::parse("# T\nCreated: yesterday-ish\n---\n").unwrap();
        assert!(doc.created_at >= before);
    }

    #[test]
    fn test_unknown_header_lines_are_skipped() {
        let doc = Document::parse("# T\nAuthor: me\n\nTags: a, b\n---\nbody\nTags: c\n").unwrap();
        assert_eq!(doc.tags, vec!["a", "b"]);
        assert_eq!(doc.body, "body\nTags: c\n");
    }

    #[test]
    fn test_malformed_documents() {
        let err = Document::parse("no title here\n---\nx").unwrap_err();
        assert_eq!(err.code(), "validation");

        let err = Document::parse("# Title\nTags: a\nbody without delimiter").unwrap_err();
        assert_eq!(err.code(), "validation");

        let err = Document::parse("# Title\nType: photo\n---\n").unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[test]
    fn test_trailer_shaped_content_without_metadata_roundtrips() {
        let mut doc = sample();
        doc.body = "notes\n---\nMetadata:\n```json\n{\"a\": 1}\n```\n".to_string();
        let text = doc.render().unwrap();
        assert!(!text.contains("\nMetadata: json\n"));
        assert_eq!(Document::parse(&text).unwrap(), doc);

        // with real metadata only the last trailer is split off
        doc.metadata = json!({"b": 2}).as_object().cloned();
        let text = doc.render().unwrap();
        assert_eq!(Document::parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_broken_trailer_stays_content() {
        let text = "# T\nMetadata: json\n---\nbody\n---\nMetadata:\n```json\nnot json\n```\n";
        let doc = Document::parse(text).unwrap();
        assert!(doc.metadata.is_none());
        assert!(doc.body.ends_with("not json\n```\n"));
    }

    #[test]
    fn test_transcript_roundtrip_preserves_order() {
        let messages = vec![
            Message {
                role: Role::User,
                content: "How do lifetimes work?".to_string(),
                timestamp: parse_time("2026-02-01T10:00:00.000Z"),
            },
            Message {
                role: Role::Assistant,
                content: "They describe borrows.\n\nMulti-line answer.\n".to_string(),
                timestamp: parse_time("2026-02-01T09:59:00.000Z"),
            },
            Message {
                role: Role::System,
                content: String::new(),
                timestamp: parse_time("2026-02-01T10:01:00.000Z"),
            },
        ];
        let body = render_transcript(&messages);
        assert_eq!(parse_transcript(&body), messages);
    }
}
