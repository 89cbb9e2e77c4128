use anyhow::Result;
use colored::*;

use memstore::StorageManager;

pub fn run(store: &StorageManager, json: bool) -> Result<()> {
    let stats = store.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let limit_mb = store.config().max_memory_size_mb;

    println!("{}", "Memory Store".bold());
    println!("{}", "=".repeat(40));
    println!("   {:<16} {}", "root", store.config().memory_dir.display());
    println!();

    println!("{}", "Records".cyan());
    println!("{}", "-".repeat(30));
    println!("   {:<16} {:>6}", "conversations", stats.conversations);
    println!("   {:<16} {:>6}", "knowledge", stats.knowledge);
    println!("   {:<16} {:>6}", "notes", stats.notes);
    println!("   {:<16} {:>6}", "total", stats.total_records());
    println!("   {:<16} {:>6}", "archived", stats.archived);
    println!("   {:<16} {:>6}", "sessions", stats.sessions);
    println!();

    println!("{}", "Index".cyan());
    println!("{}", "-".repeat(30));
    println!("   {:<16} {:>6}", "embeddings", stats.embeddings);
    println!("   {:<16} {}", "model", stats.embedding_model);
    println!();

    let size = format!("{:.2} MB / {} MB", stats.size_mb, limit_mb);
    if stats.total_bytes > store.config().max_memory_bytes() {
        println!("   {:<16} {}", "size", size.red());
        println!();
        println!("{}", "⚠️  Store exceeds its size limit".yellow());
    } else {
        println!("   {:<16} {}", "size", size);
    }

    Ok(())
}
