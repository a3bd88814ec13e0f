//! CLI command implementations.

pub mod compact;
pub mod enqueue;
pub mod inspect;
pub mod queue;
pub mod verify;

use std::path::Path;
use tillsync_core::{LocalStore, StoreConfig};
use tracing::debug;

/// Opens the store at `path`, taking its directory lock.
pub fn open_store(path: &Path, create: bool) -> Result<LocalStore, Box<dyn std::error::Error>> {
    debug!(path = %path.display(), create, "opening store");
    let config = StoreConfig::default().create_if_missing(create);
    Ok(LocalStore::open(path, config)?)
}

/// Renders a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
