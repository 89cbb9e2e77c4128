use anyhow::Result;
use colored::Colorize;

use memstore::StorageManager;

pub fn run(store: &StorageManager, days: Option<u32>, json: bool) -> Result<()> {
    let days = days.unwrap_or(store.config().auto_archive_days);
    let archived = store.archive_old_memories(Some(days))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "archived": archived,
                "days": days,
            })
        );
    } else if archived == 0 {
        println!("{} Nothing older than {} days", "→".dimmed(), days);
    } else {
        println!(
            "{} Archived {} records older than {} days",
            "✓".green().bold(),
            archived.to_string().cyan(),
            days
        );
    }

    Ok(())
}
