//! # tillsync Sync Engine
//!
//! Offline-first write replay and reference-data refresh for tillsync.
//!
//! This crate provides:
//! - A coordinator that replays the durable mutation queue against a
//!   [`RemoteStore`], one entry at a time and in creation order
//! - Connectivity tracking fed by a host [`Reachability`] signal
//! - Published [`ConnectivityState`] for presentation layers
//! - Scoped, rate-limited cache refresh of reference collections
//! - Retry with exponential backoff after passes that left failures
//!
//! ## Architecture
//!
//! Every drain trigger (reconnection, manual sync, retry timer, optional
//! enqueue) is a message to one coordinator task. That task is the only
//! caller of the drain pass, so two passes never overlap and a trigger that
//! arrives mid-pass is folded into it.
//!
//! ## Key Invariants
//!
//! - An entry is removed only after the remote store acknowledged it
//! - A failing entry never stops the entries after it
//! - Entries are treated as safe to resend (at-least-once delivery)
//! - A failed refresh leaves the cache and the rate limit untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod driver;
mod engine;
mod error;
mod refresher;
mod remote;
mod report;
mod state;

pub use config::{RetryConfig, SyncConfig};
pub use connectivity::Reachability;
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use refresher::RefreshOutcome;
pub use remote::{CallKind, MemoryRemote, Query, RemoteCall, RemoteStore};
pub use report::{DrainReport, DrainTrigger, EntryOutcome};
pub use state::{ConnectivityState, SyncStats};
