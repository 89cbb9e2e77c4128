//! Search command - keyword or semantic ranking

use anyhow::Result;
use colored::Colorize;

use super::snippet;
use memstore::{RecordFilter, ScoredRecord, StorageManager};

pub fn run(store: &StorageManager, query: &str, semantic: bool, limit: Option<usize>, json: bool) -> Result<()> {
    let limit = limit.unwrap_or(5);
    let mode = if semantic { "semantic" } else { "keyword" };

    let (results, unpersisted) = if semantic {
        let found = store.semantic_search(query, &RecordFilter::default(), limit)?;
        (found.results, found.unpersisted)
    } else {
        (store.search_memories(query, limit)?, 0)
    };

    if json {
        let json_results: Vec<_> = results
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.record.id,
                    "kind": r.record.kind,
                    "title": r.record.title,
                    "tags": r.record.tags,
                    "score": r.score,
                    "mode": mode,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json_results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{} No results found for: {}", "→".dimmed(), query.cyan());
        return Ok(());
    }

    println!(
        "{} {} {} results for: {}",
        "→".dimmed(),
        results.len(),
        mode,
        query.cyan()
    );
    println!();

    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result, semantic);
    }
    if unpersisted > 0 {
        println!(
            "{} {} new embeddings could not be stored (see log)",
            "!".yellow().bold(),
            unpersisted
        );
    }

    Ok(())
}

fn print_result(rank: usize, result: &ScoredRecord, semantic: bool) {
    let score_str = format!("{:.2}", result.score);
    // keyword scores are unbounded, only similarities get a colour scale
    let score_colored = if !semantic {
        score_str.normal()
    } else if result.score > 0.8 {
        score_str.green()
    } else if result.score > 0.6 {
        score_str.yellow()
    } else {
        score_str.dimmed()
    };

    println!(
        "{}. [{}] {} ({})",
        rank.to_string().bold(),
        score_colored,
        result.record.title.cyan(),
        result.record.kind
    );
    println!("   {}", snippet(&result.record.content, 100).dimmed());
    println!("   {}", result.record.id.dimmed());
    println!();
}
