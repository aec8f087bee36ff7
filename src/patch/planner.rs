//! Patch planning
//!
//! Turns a desired/observed pair into a minimal update payload, or rejects it
//! with every rule violation found.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::diff::{diff, element_key, Diff, FieldChange};
use super::path::FieldPath;
use super::rules::{Cardinality, FieldRule, FieldRuleTable};

/// A single reason a patch cannot be applied
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    #[error("field '{field}' is immutable (current: {old}, desired: {new})")]
    ImmutableField { field: String, old: Value, new: Value },

    #[error("fields [{}] cannot change together (exclusive group '{group}')", .fields.join(", "))]
    ConflictingChange { group: String, fields: Vec<String> },

    #[error(
        "collection '{field}' has a fixed number of elements (added: [{}], removed: [{}])",
        .added.join(", "),
        .removed.join(", ")
    )]
    FixedCardinality {
        field: String,
        added: Vec<String>,
        removed: Vec<String>,
    },

    #[error("collection '{field}' is invalid: {reason}")]
    InvalidCollection { field: String, reason: String },
}

/// Every violation found while planning; never just the first
#[derive(Error, Debug, Clone, PartialEq)]
#[error("patch rejected with {} violation(s): {}", .violations.len(), join_violations(.violations))]
pub struct PlanError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Minimal update for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchPlan {
    /// Document to send: changed leaves only, except whole lists for
    /// variable collections
    pub payload: Value,
    pub changes: Vec<FieldChange>,
    /// Distinct top-level fields touched, in change order
    pub touched_fields: Vec<String>,
    /// Field paths for APIs that take an explicit update mask
    pub update_mask: Vec<String>,
    /// SHA-256 of the canonical payload
    pub fingerprint: String,
}

// ============================================================================
// SBIO: Pure planning (no I/O)
// ============================================================================

/// Plan the update that moves `observed` to `desired`
pub fn plan(
    desired: &Value,
    observed: &Value,
    rules: &FieldRuleTable,
) -> Result<PatchPlan, PlanError> {
    let Diff {
        changes,
        mut violations,
    } = diff(desired, observed, rules);

    violations.extend(immutable_violations(&changes, rules));
    violations.extend(exclusivity_violations(&changes, rules));

    if !violations.is_empty() {
        return Err(PlanError { violations });
    }

    Ok(PatchPlan::from_changes(desired, changes, rules))
}

fn immutable_violations(changes: &[FieldChange], rules: &FieldRuleTable) -> Vec<Violation> {
    changes
        .iter()
        .filter(|c| {
            matches!(
                rules.rule_for(&c.path.schema_path()),
                Some((_, FieldRule::Immutable))
            )
        })
        .map(|c| Violation::ImmutableField {
            field: c.path.to_string(),
            old: c.old.clone().unwrap_or(Value::Null),
            new: c.new.clone().unwrap_or(Value::Null),
        })
        .collect()
}

/// Groups with more than one distinct member field changing.
///
/// Several changes under the same member (e.g. two leaves of one object)
/// count once.
fn exclusivity_violations(changes: &[FieldChange], rules: &FieldRuleTable) -> Vec<Violation> {
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for change in changes {
        if let Some((member, FieldRule::MutuallyExclusive(group))) =
            rules.rule_for(&change.path.schema_path())
        {
            groups
                .entry(group.clone())
                .or_default()
                .insert(member.to_string());
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(group, members)| Violation::ConflictingChange {
            group,
            fields: members.into_iter().collect(),
        })
        .collect()
}

impl PatchPlan {
    fn from_changes(desired: &Value, changes: Vec<FieldChange>, rules: &FieldRuleTable) -> Self {
        let changed: Vec<&FieldPath> = changes.iter().map(|c| &c.path).collect();
        let payload = project(desired, &FieldPath::root(), &changed, rules)
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut touched_fields: Vec<String> = Vec::new();
        let mut update_mask: Vec<String> = Vec::new();
        for change in &changes {
            if let Some(top) = change.path.top_level() {
                if !touched_fields.iter().any(|f| f == top) {
                    touched_fields.push(top.to_string());
                }
            }
            let mask = change.path.mask_path();
            if !update_mask.contains(&mask) {
                update_mask.push(mask);
            }
        }

        let fingerprint = fingerprint(&payload);

        Self {
            payload,
            changes,
            touched_fields,
            update_mask,
            fingerprint,
        }
    }

    /// True when observed already matches desired
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// What observed would look like after the payload is applied.
    ///
    /// Objects merge, `null` removes a key, fixed collections merge elements
    /// by key and every other value replaces what was there.
    pub fn apply_to(&self, observed: &Value, rules: &FieldRuleTable) -> Value {
        let mut result = observed.clone();
        merge(&mut result, &self.payload, &FieldPath::root(), rules);
        result
    }
}

/// Hex SHA-256 of a value's canonical JSON form
pub fn fingerprint(value: &Value) -> String {
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The part of `desired` at `path` that has to be sent, if any
fn project(
    desired: &Value,
    path: &FieldPath,
    changed: &[&FieldPath],
    rules: &FieldRuleTable,
) -> Option<Value> {
    if changed.iter().any(|c| *c == path) {
        return Some(desired.clone());
    }
    if !changed.iter().any(|c| c.starts_with(path)) {
        return None;
    }

    match desired {
        Value::Object(fields) => {
            let mut out = Map::new();
            for (name, value) in fields {
                if let Some(projected) = project(value, &path.child(name), changed, rules) {
                    out.insert(name.clone(), projected);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        Value::Array(items) if !path.is_element() => {
            let rule = rules.collection_for(&path.schema_path())?;
            match rule.cardinality {
                Cardinality::Variable => Some(desired.clone()),
                Cardinality::Fixed => {
                    let mut elements = Vec::new();
                    for item in items {
                        let Some(key) = element_key(item, &rule.key) else {
                            continue;
                        };
                        if let Some(Value::Object(mut projected)) =
                            project(item, &path.element(&key), changed, rules)
                        {
                            if let Some(key_value) = item.get(&rule.key) {
                                projected.insert(rule.key.clone(), key_value.clone());
                            }
                            elements.push(Value::Object(projected));
                        }
                    }
                    (!elements.is_empty()).then_some(Value::Array(elements))
                }
            }
        }
        _ => None,
    }
}

fn merge(target: &mut Value, patch: &Value, path: &FieldPath, rules: &FieldRuleTable) {
    match patch {
        Value::Object(fields) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(existing) = target {
                for (name, value) in fields {
                    if value.is_null() {
                        existing.remove(name);
                    } else {
                        let slot = existing.entry(name.clone()).or_insert(Value::Null);
                        merge(slot, value, &path.child(name), rules);
                    }
                }
            }
        }
        Value::Array(items) if !path.is_element() => {
            let fixed = rules
                .collection_for(&path.schema_path())
                .filter(|r| r.cardinality == Cardinality::Fixed);
            match (fixed, target) {
                (Some(rule), Value::Array(existing)) => {
                    for item in items {
                        let Some(key) = element_key(item, &rule.key) else {
                            continue;
                        };
                        let slot = existing
                            .iter_mut()
                            .find(|e| element_key(e, &rule.key).as_deref() == Some(key.as_str()));
                        match slot {
                            Some(slot) => merge(slot, item, &path.element(&key), rules),
                            None => existing.push(item.clone()),
                        }
                    }
                }
                (_, target) => *target = patch.clone(),
            }
        }
        _ => *target = patch.clone(),
    }
}
