//! Core data model: queue entries, operations and cached records.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tillsync_codec::Record;
use uuid::Uuid;

/// Unique identifier of a queue entry.
///
/// Ids are UUIDv7 values, so they sort roughly by creation time, but replay
/// order is always the queue's append order, never id order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::invalid_argument(format!("invalid entry id `{s}`: {e}")))
    }
}

/// Kind of mutation carried by a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// Create a record from the payload.
    Insert,
    /// Apply the payload's non-key fields to the record named by its key.
    Update,
    /// Remove the record named by the payload's key.
    Delete,
}

impl Operation {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the payload must carry the primary key.
    #[must_use]
    pub const fn requires_key(self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(CoreError::UnknownOperation(s.to_string())),
        }
    }
}

/// A single mutation intent recorded locally before dispatch.
///
/// Entries are immutable apart from `synced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable identifier assigned at enqueue time.
    pub id: EntryId,
    /// Target collection in the remote store.
    pub table: String,
    /// Mutation kind.
    pub operation: Operation,
    /// Record to write. Carries the primary key for updates and deletes.
    pub payload: Record,
    /// Set once the remote store acknowledged the mutation.
    pub synced: bool,
    /// Wall-clock creation time in milliseconds since the Unix epoch.
    pub created_at_ms: u64,
}

impl QueueEntry {
    /// Creates a new unsynced entry stamped with the current time.
    #[must_use]
    pub fn new(table: impl Into<String>, operation: Operation, payload: Record) -> Self {
        Self {
            id: EntryId::generate(),
            table: table.into(),
            operation,
            payload,
            synced: false,
            created_at_ms: now_ms(),
        }
    }
}

/// Local mirror of one remote reference entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Collection the record belongs to.
    pub collection: String,
    /// Primary key rendered as text.
    pub key: String,
    /// Full record as last fetched, key field included.
    pub fields: Record,
    /// When the refresh that wrote this record completed.
    pub refreshed_at_ms: u64,
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_parse_is_case_insensitive() {
        assert_eq!("insert".parse::<Operation>().unwrap(), Operation::Insert);
        assert_eq!("Update".parse::<Operation>().unwrap(), Operation::Update);
        assert_eq!(" DELETE ".parse::<Operation>().unwrap(), Operation::Delete);
        assert!(matches!(
            "upsert".parse::<Operation>(),
            Err(CoreError::UnknownOperation(_))
        ));
    }

    #[test]
    fn operation_display() {
        assert_eq!(Operation::Insert.to_string(), "INSERT");
        assert!(!Operation::Insert.requires_key());
        assert!(Operation::Delete.requires_key());
    }

    #[test]
    fn entry_id_parse_roundtrip() {
        let id = EntryId::generate();
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<EntryId>().is_err());
    }

    #[test]
    fn new_entry_is_unsynced() {
        let entry = QueueEntry::new("orders", Operation::Insert, Record::new());
        assert!(!entry.synced);
        assert!(entry.created_at_ms > 0);
    }
}
