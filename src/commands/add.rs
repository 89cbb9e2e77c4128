//! Add command - store a new record

use std::io::Read;

use anyhow::{Context, Result};
use colored::Colorize;
use memstore::{NewRecord, RecordKind, StorageManager};

pub fn run(
    store: &StorageManager,
    title: String,
    content: Option<String>,
    kind: &str,
    tags: Vec<String>,
    json: bool,
) -> Result<()> {
    let kind: RecordKind = kind.parse()?;
    let content = match content {
        Some(c) => c,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read content from stdin")?;
            buf
        }
    };

    let record = store.create_memory(NewRecord::new(kind, title, content).with_tags(tags))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!(
            "{} Stored {} {}",
            "✓".green().bold(),
            record.kind,
            record.id.cyan()
        );
        println!("  {} {}", "→".dimmed(), record.title);
        if !record.tags.is_empty() {
            println!("  {} tags: {}", "→".dimmed(), record.tags.join(", "));
        }
    }

    Ok(())
}
