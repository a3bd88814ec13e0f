//! # tillsync Core
//!
//! Local durable store for the tillsync offline-first engine.
//!
//! This crate provides:
//! - An append-only, checksummed log with crash-tail recovery and compaction
//! - [`MutationQueue`]: durable queue of mutation intents awaiting replay
//! - [`CacheStore`]: read-side mirror of remote reference data
//! - The shared data model ([`QueueEntry`], [`Operation`], [`CacheRecord`])
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tillsync_core::{LocalStore, MutationQueue, Operation};
//! use tillsync_codec::record;
//!
//! let store = Arc::new(LocalStore::open_in_memory().unwrap());
//! let queue = MutationQueue::new(Arc::clone(&store));
//!
//! let id = queue
//!     .enqueue("orders", Operation::Insert, record! { "entity_id" => "E1", "total" => 5000 })
//!     .unwrap();
//! assert_eq!(queue.pending_count(), 1);
//!
//! queue.mark_synced(id).unwrap();
//! queue.clear_synced().unwrap();
//! assert!(queue.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod dir;
mod error;
pub mod log;
mod queue;
mod store;
mod types;

pub use cache::CacheStore;
pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use queue::MutationQueue;
pub use store::{CompactionStats, LocalStore, StoreStats};
pub use types::{now_ms, CacheRecord, EntryId, Operation, QueueEntry};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
