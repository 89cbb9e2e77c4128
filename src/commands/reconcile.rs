use anyhow::Result;
use colored::Colorize;

use memstore::StorageManager;

pub fn run(store: &StorageManager, json: bool) -> Result<()> {
    let report = store.reconcile()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_clean() {
        println!("{} Content store and index agree", "✓".green().bold());
        return Ok(());
    }

    if !report.reindexed.is_empty() {
        println!(
            "{} Re-indexed {} documents",
            "✓".green().bold(),
            report.reindexed.len()
        );
        for id in &report.reindexed {
            println!("  {} {}", "→".dimmed(), id);
        }
    }
    if !report.missing_documents.is_empty() {
        println!(
            "{} {} index rows have no document",
            "!".yellow().bold(),
            report.missing_documents.len()
        );
        for id in &report.missing_documents {
            println!("  {} {}", "→".dimmed(), id);
        }
    }
    if !report.unreadable.is_empty() {
        println!(
            "{} {} documents could not be parsed",
            "✗".red(),
            report.unreadable.len()
        );
        for id in &report.unreadable {
            println!("  {} {}", "→".dimmed(), id);
        }
    }

    Ok(())
}
