// System status display — shows DB stats and indexer health.

use anyhow::Result;
use std::sync::Arc;

use crate::db::Database;
use crate::output::terminal;

/// Display system status to the terminal.
pub async fn show(db: &Arc<dyn Database>, db_display_path: &str) -> Result<()> {
    let file_size = std::fs::metadata(db_display_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_display_path, file_size);

    let stats = db.db_stats().await?;
    println!(
        "Challenge sessions: {} total, {} pending",
        stats.sessions, stats.pending_sessions
    );
    println!("Local publications: {}", stats.local_publications);
    println!(
        "Indexed forums: {} total, {} enabled",
        stats.indexed_subplebbits, stats.enabled_subplebbits
    );
    println!(
        "Indexed comments: {} ({} mod queue items pending)",
        stats.indexed_comments, stats.pending_queue_items
    );

    let forums = db.list_subplebbits(false).await?;
    if !forums.is_empty() {
        println!();
        terminal::display_forums(&forums);
    }

    let failing = forums
        .iter()
        .filter(|f| f.indexing_enabled && f.consecutive_errors > 0)
        .count();
    if failing > 0 {
        println!("{failing} enabled forum(s) failed their last update");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
