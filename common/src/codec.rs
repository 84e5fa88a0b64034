//! The stdio contract between the runner and the payload binary.
//!
//! A map invocation reads a single `{"key": ..., "value": ...}` object on
//! stdin and writes `{"partitions": {"<p>": [pairs...]}}` on stdout. A
//! reduce invocation reads `[{"key": ..., "values": [...]}, ...]` and
//! writes an opaque output body. Values are arbitrary JSON; only keys are
//! required to be strings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single key-value pair as exchanged with the payload binary.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// One key together with every value emitted for it, as fed to a reducer.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReduceGroup {
    pub key: String,
    pub values: Vec<Value>,
}

/// The stdout of a map invocation: pair lists keyed by the decimal
/// partition index they belong to.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MapOutput {
    pub partitions: HashMap<String, Vec<KeyValue>>,
}

/// Group a flat pair list by key, in first-seen key order.
pub fn group_by_key(pairs: Vec<KeyValue>) -> Vec<ReduceGroup> {
    let mut order: Vec<ReduceGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for pair in pairs {
        match index.get(&pair.key) {
            Some(&at) => order[at].values.push(pair.value),
            None => {
                index.insert(pair.key.clone(), order.len());
                order.push(ReduceGroup {
                    key: pair.key,
                    values: vec![pair.value],
                });
            }
        }
    }

    order
}
