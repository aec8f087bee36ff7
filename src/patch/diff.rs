//! Desired-driven structural diff
//!
//! Only keys present in the desired document are compared. Keys the remote
//! side reports but the caller never set are server-managed and ignored.

use serde::Serialize;
use serde_json::{Map, Value};

use super::path::FieldPath;
use super::planner::Violation;
use super::rules::{Cardinality, CollectionRule, FieldRuleTable};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Modified,
    /// Collection element present in desired only
    Added,
    /// Collection element present in observed only
    Removed,
}

/// One field that differs between desired and observed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub path: FieldPath,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub kind: ChangeKind,
}

/// Raw diff output: changes plus structural problems found while walking
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Diff {
    pub changes: Vec<FieldChange>,
    pub violations: Vec<Violation>,
}

// ============================================================================
// SBIO: Pure diff (no I/O)
// ============================================================================

/// Compare `desired` against `observed` under `rules`
pub fn diff(desired: &Value, observed: &Value, rules: &FieldRuleTable) -> Diff {
    let mut out = Diff::default();
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => {
            diff_fields(&FieldPath::root(), d, Some(o), rules, &mut out)
        }
        (Value::Object(d), Value::Null) => {
            diff_fields(&FieldPath::root(), d, None, rules, &mut out)
        }
        _ => {
            if desired != observed {
                out.changes.push(FieldChange {
                    path: FieldPath::root(),
                    old: Some(observed.clone()),
                    new: Some(desired.clone()),
                    kind: ChangeKind::Modified,
                });
            }
        }
    }
    out
}

/// Absent, null and the declared default are the same value
fn normalize<'a>(value: Option<&'a Value>, default: Option<&'a Value>) -> &'a Value {
    match value {
        None | Some(Value::Null) => default.unwrap_or(&NULL),
        Some(v) => v,
    }
}

fn diff_fields(
    path: &FieldPath,
    desired: &Map<String, Value>,
    observed: Option<&Map<String, Value>>,
    rules: &FieldRuleTable,
    out: &mut Diff,
) {
    for (name, desired_value) in desired {
        let observed_value = observed.and_then(|o| o.get(name));
        diff_value(&path.child(name), desired_value, observed_value, rules, out);
    }
}

fn diff_value(
    path: &FieldPath,
    desired: &Value,
    observed: Option<&Value>,
    rules: &FieldRuleTable,
    out: &mut Diff,
) {
    let schema = path.schema_path();
    let default = rules.default_for(&schema);
    let desired = normalize(Some(desired), default);
    let observed = normalize(observed, default);

    if let Some(rule) = rules.collection_for(&schema) {
        match desired {
            Value::Array(items) => {
                diff_collection(path, items, observed, rule, rules, out);
                return;
            }
            // Clearing a fixed collection removes every element
            Value::Null if rule.cardinality == Cardinality::Fixed => {
                diff_collection(path, &[], observed, rule, rules, out);
                return;
            }
            _ => {}
        }
    }

    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => diff_fields(path, d, Some(o), rules, out),
        (Value::Object(d), Value::Null) => diff_fields(path, d, None, rules, out),
        (d, o) if d == o => {}
        (d, o) => out.changes.push(FieldChange {
            path: path.clone(),
            old: Some(o.clone()),
            new: Some(d.clone()),
            kind: ChangeKind::Modified,
        }),
    }
}

/// Identity key of a collection element; strings and numbers qualify
pub(crate) fn element_key(element: &Value, key_field: &str) -> Option<String> {
    match element.get(key_field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn key_type(element: &Value, key_field: &str) -> Option<&'static str> {
    match element.get(key_field)? {
        Value::String(_) => Some("string"),
        Value::Number(_) => Some("number"),
        _ => None,
    }
}

/// Index elements by key, reporting missing and duplicate keys
fn index_elements<'a>(
    path: &FieldPath,
    items: &'a [Value],
    key_field: &str,
    side: &str,
    out: &mut Diff,
) -> Option<Vec<(String, &'a Value)>> {
    let mut indexed: Vec<(String, &Value)> = Vec::with_capacity(items.len());
    let mut valid = true;
    for (i, item) in items.iter().enumerate() {
        match element_key(item, key_field) {
            Some(key) if indexed.iter().any(|(k, _)| *k == key) => {
                out.violations.push(Violation::InvalidCollection {
                    field: path.to_string(),
                    reason: format!("duplicate key '{}' in {} list", key, side),
                });
                valid = false;
            }
            Some(key) => indexed.push((key, item)),
            None => {
                out.violations.push(Violation::InvalidCollection {
                    field: path.to_string(),
                    reason: format!("{} element #{} has no '{}' key", side, i, key_field),
                });
                valid = false;
            }
        }
    }
    valid.then_some(indexed)
}

fn diff_collection(
    path: &FieldPath,
    desired: &[Value],
    observed: &Value,
    rule: &CollectionRule,
    rules: &FieldRuleTable,
    out: &mut Diff,
) {
    let observed_items: &[Value] = match observed {
        Value::Array(items) => items,
        Value::Null => &[],
        other => {
            out.violations.push(Violation::InvalidCollection {
                field: path.to_string(),
                reason: format!("observed value is not a list: {}", other),
            });
            return;
        }
    };

    // 1 and "1" render the same key; refuse to match across types
    let mut key_types = desired
        .iter()
        .chain(observed_items)
        .filter_map(|item| key_type(item, &rule.key));
    if let Some(first) = key_types.next() {
        if let Some(other) = key_types.find(|t| *t != first) {
            out.violations.push(Violation::InvalidCollection {
                field: path.to_string(),
                reason: format!("'{}' keys mix {} and {} values", rule.key, first, other),
            });
            return;
        }
    }

    let desired_index = index_elements(path, desired, &rule.key, "desired", out);
    let observed_index = index_elements(path, observed_items, &rule.key, "observed", out);
    let (Some(desired_index), Some(observed_index)) = (desired_index, observed_index) else {
        return;
    };

    let added: Vec<&(String, &Value)> = desired_index
        .iter()
        .filter(|(k, _)| !observed_index.iter().any(|(ok, _)| ok == k))
        .collect();
    let removed: Vec<&(String, &Value)> = observed_index
        .iter()
        .filter(|(k, _)| !desired_index.iter().any(|(dk, _)| dk == k))
        .collect();

    if rule.cardinality == Cardinality::Fixed && !(added.is_empty() && removed.is_empty()) {
        out.violations.push(Violation::FixedCardinality {
            field: path.to_string(),
            added: added.iter().map(|(k, _)| k.clone()).collect(),
            removed: removed.iter().map(|(k, _)| k.clone()).collect(),
        });
    }

    for (key, desired_item) in &desired_index {
        let Some((_, observed_item)) = observed_index.iter().find(|(k, _)| k == key) else {
            continue;
        };
        let element_path = path.element(key);
        match (desired_item, observed_item) {
            (Value::Object(d), Value::Object(o)) => {
                diff_fields(&element_path, d, Some(o), rules, out)
            }
            (d, o) if d == o => {}
            (d, o) => out.changes.push(FieldChange {
                path: element_path,
                old: Some((*o).clone()),
                new: Some((*d).clone()),
                kind: ChangeKind::Modified,
            }),
        }
    }

    for (key, item) in added {
        out.changes.push(FieldChange {
            path: path.element(key),
            old: None,
            new: Some((*item).clone()),
            kind: ChangeKind::Added,
        });
    }
    for (key, item) in removed {
        out.changes.push(FieldChange {
            path: path.element(key),
            old: Some((*item).clone()),
            new: None,
            kind: ChangeKind::Removed,
        });
    }
}
