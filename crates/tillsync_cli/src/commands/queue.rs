//! Queue dump command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use tillsync_codec::Record;
use tillsync_core::QueueEntry;

/// Queue entry representation for output.
#[derive(Debug, Serialize)]
pub struct EntryInfo {
    /// Entry id.
    pub id: String,
    /// Target table.
    pub table: String,
    /// Operation name.
    pub operation: String,
    /// Whether the remote store acknowledged the entry.
    pub synced: bool,
    /// Creation time in milliseconds since the epoch.
    pub created_at_ms: u64,
    /// Mutation payload.
    pub payload: Record,
}

impl From<QueueEntry> for EntryInfo {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            table: entry.table,
            operation: entry.operation.as_str().to_string(),
            synced: entry.synced,
            created_at_ms: entry.created_at_ms,
            payload: entry.payload,
        }
    }
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    pending_only: bool,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    let entries = if pending_only {
        store.unsynced_entries()
    } else {
        store.queue_entries()
    };
    let entries: Vec<EntryInfo> = entries
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(EntryInfo::from)
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries)?;
        }
    }

    Ok(())
}

fn print_text_output(entries: &[EntryInfo]) -> Result<(), Box<dyn std::error::Error>> {
    println!("Queue Entries ({} shown)", entries.len());
    println!("=====================");
    println!();

    for entry in entries {
        println!(
            "{} {:6} {:<16} {} {}",
            entry.id,
            entry.operation,
            entry.table,
            if entry.synced { "synced " } else { "pending" },
            serde_json::to_string(&entry.payload)?
        );
    }

    Ok(())
}
