//! Inspect command implementation.

use super::{format_size, open_store};
use serde::Serialize;
use std::path::Path;
use tillsync_core::StoreStats;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Log file size in bytes.
    pub log_bytes: u64,
    /// Entries in the queue.
    pub queue_len: usize,
    /// Entries awaiting dispatch.
    pub pending: usize,
    /// Entries acknowledged but not yet cleared.
    pub synced: usize,
    /// Cached reference collections.
    pub collections: Vec<CollectionStats>,
}

/// Statistics for a single cached collection.
#[derive(Debug, Serialize)]
pub struct CollectionStats {
    /// Collection name.
    pub name: String,
    /// Number of cached records.
    pub records: usize,
}

impl InspectResult {
    fn new(path: &Path, stats: StoreStats) -> Self {
        Self {
            path: path.display().to_string(),
            log_bytes: stats.log_bytes,
            queue_len: stats.queue_len,
            pending: stats.pending,
            synced: stats.synced,
            collections: stats
                .cache_collections
                .into_iter()
                .map(|(name, records)| CollectionStats { name, records })
                .collect(),
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    let result = InspectResult::new(path, store.stats()?);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("tillsync Store Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!("Log size: {}", format_size(result.log_bytes));
    println!();
    println!("Queue:");
    println!("  Entries: {}", result.queue_len);
    println!("  Pending: {}", result.pending);
    println!("  Synced:  {}", result.synced);

    if !result.collections.is_empty() {
        println!();
        println!("Cache:");
        for col in &result.collections {
            println!("  {:<16} {} records", col.name, col.records);
        }
    }
}
