//! Self-describing structured binary encoding for `display()` payloads
//! (§4.1). Preserves objects, arrays, strings, numbers, booleans, null, and
//! nested maps. A circular reference in the source object graph collapses to
//! the `Circular` sentinel at the cyclical edge rather than looping forever
//! (spec.md Open Question, resolved in DESIGN.md: the sentinel renders as the
//! literal string `"[Circular]"` to a client).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const CIRCULAR_SENTINEL: &str = "[Circular]";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DisplayValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DisplayValue>),
    Map(BTreeMap<String, DisplayValue>),
    /// Emitted in place of a value that would otherwise re-enter a node
    /// already on the current encode path.
    Circular,
}

pub fn encode(value: &DisplayValue) -> Result<Vec<u8>, String> {
    bincode::serialize(value).map_err(|e| e.to_string())
}

pub fn decode(bytes: &[u8]) -> Result<DisplayValue, String> {
    bincode::deserialize(bytes).map_err(|e| e.to_string())
}

impl DisplayValue {
    /// Lossy conversion to `serde_json::Value` for the WebSocket Bridge's
    /// JSON wire (§4.6); the circular sentinel becomes the literal string
    /// `"[Circular]"` rather than a distinct JSON type, since JSON has none.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DisplayValue::Null => serde_json::Value::Null,
            DisplayValue::Bool(b) => serde_json::Value::Bool(*b),
            DisplayValue::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null),
            DisplayValue::String(s) => serde_json::Value::String(s.clone()),
            DisplayValue::Array(items) => serde_json::Value::Array(items.iter().map(DisplayValue::to_json).collect()),
            DisplayValue::Map(entries) => serde_json::Value::Object(entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            DisplayValue::Circular => serde_json::Value::String(CIRCULAR_SENTINEL.to_string()),
        }
    }

    /// The inverse of `to_json`, used wherever a client-supplied JSON value
    /// (an `invoke_handler` payload, a `NotebookEnv` variable) needs to cross
    /// into a `bincode`-framed message; `serde_json::Value` itself cannot
    /// cross that boundary since its `Deserialize` impl requires a
    /// self-describing format, which `bincode` is not.
    pub fn from_json(value: &serde_json::Value) -> DisplayValue {
        match value {
            serde_json::Value::Null => DisplayValue::Null,
            serde_json::Value::Bool(b) => DisplayValue::Bool(*b),
            serde_json::Value::Number(n) => DisplayValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => DisplayValue::String(s.clone()),
            serde_json::Value::Array(items) => DisplayValue::Array(items.iter().map(DisplayValue::from_json).collect()),
            serde_json::Value::Object(entries) => {
                DisplayValue::Map(entries.iter().map(|(k, v)| (k.clone(), DisplayValue::from_json(v))).collect())
            }
        }
    }
}

/// A possibly-cyclic object graph as the worker's evaluator would hand it
/// over before serialization: nodes referencing other nodes by id.
#[derive(Debug, Clone)]
pub enum GraphValue {
    Scalar(DisplayValue),
    Array(Vec<usize>),
    Map(BTreeMap<String, usize>),
}

#[derive(Debug, Clone, Default)]
pub struct ValueGraph {
    nodes: HashMap<usize, GraphValue>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: usize, value: GraphValue) {
        self.nodes.insert(id, value);
    }

    /// Flatten the graph rooted at `root` into a `DisplayValue`, replacing
    /// any node that reappears on the current path (a true cycle, not
    /// merely a shared DAG node) with `DisplayValue::Circular`.
    pub fn flatten(&self, root: usize) -> DisplayValue {
        let mut on_path = HashSet::new();
        self.flatten_inner(root, &mut on_path)
    }

    fn flatten_inner(&self, id: usize, on_path: &mut HashSet<usize>) -> DisplayValue {
        if on_path.contains(&id) {
            return DisplayValue::Circular;
        }
        let Some(node) = self.nodes.get(&id) else {
            return DisplayValue::Null;
        };
        on_path.insert(id);
        let result = match node {
            GraphValue::Scalar(v) => v.clone(),
            GraphValue::Array(items) => DisplayValue::Array(items.iter().map(|child| self.flatten_inner(*child, on_path)).collect()),
            GraphValue::Map(entries) => {
                DisplayValue::Map(entries.iter().map(|(k, child)| (k.clone(), self.flatten_inner(*child, on_path))).collect())
            }
        };
        on_path.remove(&id);
        result
    }
}
