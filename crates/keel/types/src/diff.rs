//! Structural diff of desired and current resource state
//!
//! Both sides are serialized and walked field by field, so any statically
//! typed, serializable resource model can be diffed without hand-written
//! comparison code. Changes are reported with their JSON path.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// One differing leaf (or array) between desired and current state
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Dotted path, e.g. `capacity.desired`
    pub path: String,
    pub desired: Option<Value>,
    pub current: Option<Value>,
}

impl FieldChange {
    /// First segment of the path
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }
}

/// Desired state paired with the observed state, if any
#[derive(Debug, Clone)]
pub struct ResourceDiff<T> {
    desired: T,
    current: Option<T>,
    changes: Vec<FieldChange>,
}

impl<T: Serialize> ResourceDiff<T> {
    pub fn new(desired: T, current: Option<T>) -> Self {
        let changes = match &current {
            Some(current) => {
                let mut changes = Vec::new();
                walk(
                    String::new(),
                    Some(&to_value(&desired)),
                    Some(&to_value(current)),
                    &mut changes,
                );
                changes
            }
            None => Vec::new(),
        };

        Self {
            desired,
            current,
            changes,
        }
    }

    pub fn desired(&self) -> &T {
        &self.desired
    }

    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// True when nothing exists yet or the two sides differ
    pub fn has_changes(&self) -> bool {
        self.current.is_none() || !self.changes.is_empty()
    }

    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    /// Top-level fields with changes; every field when nothing exists yet
    pub fn affected_root_properties(&self) -> BTreeSet<String> {
        if self.current.is_none() {
            return match to_value(&self.desired) {
                Value::Object(fields) => fields.keys().cloned().collect(),
                _ => BTreeSet::new(),
            };
        }
        self.changes
            .iter()
            .map(|change| change.root().to_string())
            .collect()
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn walk(path: String, desired: Option<&Value>, current: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (desired, current) {
        (Some(Value::Object(d)), Some(Value::Object(c))) => {
            let keys: BTreeSet<&String> = d.keys().chain(c.keys()).collect();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                walk(child, d.get(key), c.get(key), out);
            }
        }
        (d, c) if d == c => {}
        // A missing field and an explicit null are the same thing
        (Some(Value::Null), None) | (None, Some(Value::Null)) => {}
        (d, c) => out.push(FieldChange {
            path,
            desired: d.cloned(),
            current: c.cloned(),
        }),
    }
}
