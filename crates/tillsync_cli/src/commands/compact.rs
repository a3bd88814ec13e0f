//! Compact command implementation.

use super::{format_size, open_store};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path, false)?;
    let before = store.stats()?;

    println!("Compacting store at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();
    println!("Compaction Analysis:");
    println!("  Log size:        {}", format_size(before.log_bytes));
    println!("  Queue entries:   {}", before.queue_len);
    println!("  Synced (to clear): {}", before.synced);

    if dry_run {
        return Ok(());
    }

    let removed = store.remove_synced()?;
    let stats = store.compact()?;

    println!();
    println!("✓ Compaction complete");
    println!("  Entries cleared: {}", removed);
    println!("  Frames written:  {}", stats.frames_written);
    println!("  Size before:     {}", format_size(stats.bytes_before));
    println!("  Size after:      {}", format_size(stats.bytes_after));
    println!(
        "  Space saved:     {} ({:.1}%)",
        format_size(stats.reclaimed()),
        if stats.bytes_before > 0 {
            stats.reclaimed() as f64 / stats.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tillsync_codec::record;
    use tillsync_core::{MutationQueue, Operation};

    #[test]
    fn compact_clears_synced_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let queue = MutationQueue::new(Arc::new(open_store(&path, true).unwrap()));
            let done = queue
                .enqueue("orders", Operation::Insert, record! { "total" => 1 })
                .unwrap();
            queue
                .enqueue("orders", Operation::Insert, record! { "total" => 2 })
                .unwrap();
            queue.mark_synced(done).unwrap();
        }

        run(&path, true).unwrap();
        assert_eq!(open_store(&path, false).unwrap().queue_len(), 2);

        run(&path, false).unwrap();
        let store = open_store(&path, false).unwrap();
        assert_eq!(store.queue_len(), 1);
        assert_eq!(store.pending_count(), 1);
    }
}
