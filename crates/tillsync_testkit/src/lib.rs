//! # tillsync Testkit
//!
//! Test utilities for tillsync.
//!
//! This crate provides:
//! - Store fixtures that can be reopened to simulate a process restart
//! - Sample payloads for the retail collections
//! - Property-based test generators using proptest
//! - A storage backend that crashes part-way through a write
//!
//! ## Usage
//!
//! ```rust
//! use tillsync_core::Operation;
//! use tillsync_testkit::prelude::*;
//!
//! let store = TestStore::memory();
//! store
//!     .queue()
//!     .enqueue("orders", Operation::Insert, sample_order("E1", 5000))
//!     .unwrap();
//!
//! let store = store.reopen();
//! assert_eq!(store.pending_count(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
