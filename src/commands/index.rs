//! Index command - generate embeddings for unindexed records

use anyhow::Result;
use colored::Colorize;

use memstore::StorageManager;

pub fn run(store: &StorageManager, status_only: bool, json: bool) -> Result<()> {
    if status_only {
        return show_status(store, json);
    }

    if !json {
        println!("{} Building embeddings...", "→".dimmed());
    }

    let stats = store.backfill_embeddings()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "indexed": stats.indexed,
                "batches": stats.batches,
                "duration_ms": stats.duration_ms,
            })
        );
    } else {
        println!(
            "{} Indexed {} records in {:.2}s",
            "✓".green().bold(),
            stats.indexed.to_string().cyan(),
            stats.duration_ms as f64 / 1000.0
        );
        if stats.batches > 0 {
            println!("  {} {} batches", "→".dimmed(), stats.batches);
        }
    }

    Ok(())
}

fn show_status(store: &StorageManager, json: bool) -> Result<()> {
    let engine = store.engine().index_stats()?;
    let pending = store.engine().unindexed_records()?.len();
    let last_backfill = store.last_backfill()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "model": engine.model,
                "ready": engine.ready,
                "embedding_count": engine.embeddings,
                "pending": pending,
                "last_backfill": last_backfill.map(|t| t.to_rfc3339()),
            })
        );
    } else {
        println!("{}", "Index Status".bold());
        println!();
        println!(
            "  {} model {} ({} dimensions)",
            "→".dimmed(),
            engine.model.id.cyan(),
            engine.model.dimensions
        );
        println!(
            "  {} {} embeddings",
            "→".dimmed(),
            engine.embeddings.to_string().cyan()
        );
        if let Some(t) = last_backfill {
            println!(
                "  {} Last backfill: {}",
                "→".dimmed(),
                t.format("%Y-%m-%d %H:%M:%S")
            );
        }
        if pending > 0 {
            println!(
                "  {} {} records without embeddings (run {})",
                "!".yellow().bold(),
                pending,
                "memstore index".cyan()
            );
        }
    }

    Ok(())
}
