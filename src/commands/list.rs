use anyhow::Result;
use colored::*;
use unicode_width::UnicodeWidthStr;

use memstore::{Record, RecordFilter, RecordKind, StorageManager};

const TITLE_WIDTH: usize = 40;

pub fn run(
    store: &StorageManager,
    kind: Option<&str>,
    tags: Vec<String>,
    limit: Option<usize>,
    include_archived: bool,
    json: bool,
) -> Result<()> {
    let filter = RecordFilter {
        kind: kind.map(str::parse::<RecordKind>).transpose()?,
        tags,
        limit: Some(limit.unwrap_or(20)),
        include_archived,
        ..RecordFilter::default()
    };
    let records = store.list_memories(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{}", "No records found.".yellow());
        return Ok(());
    }

    println!("{}", "Records".bold());
    println!("{}", "=".repeat(80));
    for record in &records {
        print_row(record);
    }
    println!("{}", "=".repeat(80));
    println!("{} records", records.len());

    Ok(())
}

fn print_row(record: &Record) {
    let title = fit_width(&record.title, TITLE_WIDTH);
    let marker = if record.archived {
        "archived".dimmed().to_string()
    } else {
        String::new()
    };
    println!(
        "{}  {:<12} {}  {} {}",
        record.created_at.format("%Y-%m-%d"),
        record.kind.to_string().cyan(),
        title,
        record.tags.join(", ").dimmed(),
        marker
    );
}

/// Pad or cut to a display width, counting wide (CJK) chars as two columns
fn fit_width(s: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.to_string().width();
        if used + w > width {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push_str(&" ".repeat(width - used));
    out
}
