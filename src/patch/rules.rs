//! Field rule tables
//!
//! One table per resource kind, keyed by schema path (`a.b.c`, element keys
//! dropped). A rule on a composite field covers everything beneath it unless
//! a longer path overrides it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What may happen to a field after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    Mutable,
    Immutable,
    /// At most one member of the named group may change per patch
    MutuallyExclusive(String),
}

/// Whether a collection may grow or shrink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Variable,
    /// Elements may be modified in place only, never added or removed
    Fixed,
}

/// How to diff a list-valued field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRule {
    /// Element field holding the identity key (e.g. `cidr`)
    pub key: String,
    pub cardinality: Cardinality,
}

/// Read-only rule table for one resource kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRuleTable {
    rules: BTreeMap<String, FieldRule>,
    collections: BTreeMap<String, CollectionRule>,
    defaults: BTreeMap<String, Value>,
}

impl FieldRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, path: &str, rule: FieldRule) -> Self {
        self.rules.insert(path.to_string(), rule);
        self
    }

    pub fn immutable(self, path: &str) -> Self {
        self.rule(path, FieldRule::Immutable)
    }

    pub fn mutable(self, path: &str) -> Self {
        self.rule(path, FieldRule::Mutable)
    }

    /// Put every path in `paths` into the exclusivity group `group`
    pub fn exclusive(mut self, group: &str, paths: &[&str]) -> Self {
        for path in paths {
            self.rules.insert(
                path.to_string(),
                FieldRule::MutuallyExclusive(group.to_string()),
            );
        }
        self
    }

    pub fn collection(mut self, path: &str, key: &str, cardinality: Cardinality) -> Self {
        self.collections.insert(
            path.to_string(),
            CollectionRule {
                key: key.to_string(),
                cardinality,
            },
        );
        self
    }

    /// Value an absent or null field is considered to hold
    pub fn default_value(mut self, path: &str, value: Value) -> Self {
        self.defaults.insert(path.to_string(), value);
        self
    }

    /// Most specific rule covering `schema_path`, with the path it was declared on
    pub fn rule_for(&self, schema_path: &str) -> Option<(&str, &FieldRule)> {
        let mut candidate = schema_path;
        loop {
            if let Some((path, rule)) = self.rules.get_key_value(candidate) {
                return Some((path.as_str(), rule));
            }
            match candidate.rfind('.') {
                Some(idx) => candidate = &candidate[..idx],
                None => return None,
            }
        }
    }

    pub fn collection_for(&self, schema_path: &str) -> Option<&CollectionRule> {
        self.collections.get(schema_path)
    }

    pub fn default_for(&self, schema_path: &str) -> Option<&Value> {
        self.defaults.get(schema_path)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.rules.iter().map(|(p, r)| (p.as_str(), r))
    }

    pub fn collections(&self) -> impl Iterator<Item = (&str, &CollectionRule)> {
        self.collections.iter().map(|(p, r)| (p.as_str(), r))
    }

    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.defaults.iter().map(|(p, v)| (p.as_str(), v))
    }

    /// Exclusivity groups and their member paths
    pub fn exclusive_groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (path, rule) in &self.rules {
            if let FieldRule::MutuallyExclusive(group) = rule {
                groups.entry(group.as_str()).or_default().push(path.as_str());
            }
        }
        groups
    }
}
