//! Property-based test generators using proptest.
//!
//! Provides strategies for payloads and queue operations that respect the
//! invariants the queue enforces (updates and deletes carry a key).

use proptest::prelude::*;
use std::collections::BTreeMap;
use tillsync_codec::{Record, Value};
use tillsync_core::Operation;

/// Strategy for scalar values. Floats are finite so equality holds after a
/// round trip.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9f64).prop_map(Value::Float),
        "[ -~]{0,24}".prop_map(Value::Text),
    ]
}

/// Strategy for values nested up to two levels deep.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m: BTreeMap<String, Value>| Value::Map(m)),
        ]
    })
}

/// Strategy for field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("orders".to_string()),
        Just("order_items".to_string()),
        Just("stock".to_string()),
        Just("products".to_string()),
        prop::string::string_regex("[a-z][a-z_]{0,15}").expect("Invalid regex"),
    ]
}

/// Strategy for records without a key field.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..6)
        .prop_map(Record::from)
}

/// Strategy for non-null key values.
pub fn key_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[A-Z][0-9]{1,4}".prop_map(Value::Text),
        (1i64..100_000).prop_map(Value::Integer),
    ]
}

/// Strategy for queue operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => Just(Operation::Insert),
        2 => Just(Operation::Update),
        1 => Just(Operation::Delete),
    ]
}

/// A mutation the queue accepts.
#[derive(Debug, Clone)]
pub struct QueuedMutation {
    /// Target table.
    pub table: String,
    /// Operation kind.
    pub operation: Operation,
    /// Payload; carries `key_field` for updates and deletes.
    pub payload: Record,
}

/// Strategy for mutations whose payload carries `key_field` whenever the
/// operation needs one.
pub fn mutation_strategy(key_field: &'static str) -> impl Strategy<Value = QueuedMutation> {
    (
        table_name_strategy(),
        operation_strategy(),
        record_strategy(),
        key_strategy(),
    )
        .prop_map(move |(table, operation, mut payload, key)| {
            payload.remove(key_field);
            if operation.requires_key() {
                payload.insert(key_field, key);
            }
            QueuedMutation {
                table,
                operation,
                payload,
            }
        })
}

/// One step of a queue model test.
#[derive(Debug, Clone)]
pub enum QueueAction {
    /// Enqueue a mutation.
    Enqueue(QueuedMutation),
    /// Mark the n-th pending entry synced (modulo the pending count).
    MarkSynced(usize),
    /// Remove every synced entry.
    ClearSynced,
    /// Reopen the store over its bytes.
    Reopen,
}

/// Strategy for queue actions.
pub fn queue_action_strategy() -> impl Strategy<Value = QueueAction> {
    prop_oneof![
        4 => mutation_strategy("id").prop_map(QueueAction::Enqueue),
        2 => any::<usize>().prop_map(QueueAction::MarkSynced),
        1 => Just(QueueAction::ClearSynced),
        1 => Just(QueueAction::Reopen),
    ]
}

/// Strategy for a sequence of queue actions.
pub fn queue_action_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<QueueAction>> {
    prop::collection::vec(queue_action_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn mutations_are_accepted(mutation in mutation_strategy("id")) {
            let store = TestStore::memory();
            let id = store
                .queue()
                .enqueue(mutation.table.clone(), mutation.operation, mutation.payload.clone())
                .unwrap();
            let entry = store.queue_entry(id).unwrap();
            prop_assert_eq!(entry.payload, mutation.payload);
        }

        #[test]
        fn queue_matches_model(actions in queue_action_sequence_strategy(1, 24)) {
            let mut store = TestStore::memory();
            // (payload, synced) in creation order
            let mut model: Vec<(Record, bool)> = Vec::new();

            for action in actions {
                match action {
                    QueueAction::Enqueue(m) => {
                        store.queue().enqueue(m.table, m.operation, m.payload.clone()).unwrap();
                        model.push((m.payload, false));
                    }
                    QueueAction::MarkSynced(n) => {
                        let pending = store.queue().pending();
                        if !pending.is_empty() {
                            let target = &pending[n % pending.len()];
                            store.queue().mark_synced(target.id).unwrap();
                            store.queue().mark_synced(target.id).unwrap();
                            let slot = model
                                .iter_mut()
                                .filter(|(_, synced)| !*synced)
                                .nth(n % pending.len())
                                .unwrap();
                            slot.1 = true;
                        }
                    }
                    QueueAction::ClearSynced => {
                        store.queue().clear_synced().unwrap();
                        model.retain(|(_, synced)| !*synced);
                    }
                    QueueAction::Reopen => store = store.reopen(),
                }

                let expected: Vec<_> = model.iter().filter(|(_, s)| !*s).map(|(p, _)| p.clone()).collect();
                let actual: Vec<_> = store.queue().pending().into_iter().map(|e| e.payload).collect();
                prop_assert_eq!(actual, expected);
                prop_assert_eq!(store.queue().len(), model.len());
            }
        }
    }
}
