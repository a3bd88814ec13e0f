//! Enqueue command implementation.

use super::open_store;
use std::path::Path;
use std::sync::Arc;
use tillsync_codec::Record;
use tillsync_core::{MutationQueue, Operation};

/// Runs the enqueue command.
pub fn run(
    path: &Path,
    table: &str,
    operation: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let operation: Operation = operation.parse()?;
    let payload = parse_payload(payload)?;

    let queue = MutationQueue::new(Arc::new(open_store(path, true)?));
    let id = queue.enqueue(table, operation, payload)?;

    println!("Queued {} {} as {}", operation, table, id);
    println!("Pending entries: {}", queue.pending_count());
    Ok(())
}

/// Parses a JSON object into a record.
pub fn parse_payload(json: &str) -> Result<Record, Box<dyn std::error::Error>> {
    serde_json::from_str(json).map_err(|e| format!("payload must be a JSON object: {e}").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillsync_codec::Value;

    #[test]
    fn payload_from_json() {
        let record = parse_payload(r#"{"entity_id": "E1", "total": 5000, "paid": true}"#).unwrap();
        assert_eq!(record.get("entity_id"), Some(&Value::from("E1")));
        assert_eq!(record.get("total"), Some(&Value::from(5000)));
        assert_eq!(record.get("paid"), Some(&Value::Bool(true)));
    }

    #[test]
    fn payload_must_be_an_object() {
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("not json").is_err());
    }

    #[test]
    fn enqueue_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        run(&path, "stock", "update", r#"{"id": "S1", "quantity": 3}"#).unwrap();

        let store = open_store(&path, false).unwrap();
        assert_eq!(store.pending_count(), 1);
        assert!(run(&dir.path().join("other"), "stock", "upsert", "{}").is_err());
    }
}
