//! Resource state tags and their classification
//!
//! The remote API reports an opaque status string per resource instance.
//! A polling session sorts every tag it sees into one of three buckets:
//! still converging, converged, or something nobody declared.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque state tag reported by the remote API (e.g. `CREATING`, `ACTIVE`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceState(String);

impl ResourceState {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceState {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for ResourceState {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// An ordered set of state tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSet(BTreeSet<ResourceState>);

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, state: &ResourceState) -> bool {
        self.0.contains(state)
    }

    pub fn insert(&mut self, state: impl Into<ResourceState>) -> bool {
        self.0.insert(state.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceState> {
        self.0.iter()
    }

    /// States present in both sets
    pub fn intersection(&self, other: &StateSet) -> Vec<ResourceState> {
        self.0.intersection(&other.0).cloned().collect()
    }
}

impl<T: Into<ResourceState>> FromIterator<T> for StateSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.0.iter().map(ResourceState::as_str).collect();
        write!(f, "[{}]", tags.join(", "))
    }
}

/// Where a reported state falls for one polling session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Still converging, poll again
    Pending,
    /// Stable and usable
    Target,
    /// Declared by neither set; polling must stop
    Unknown,
}

/// Raised when the pending and target sets of a session share a tag
#[derive(Error, Debug, Clone, PartialEq)]
#[error("States {overlap:?} appear in both the pending and target sets")]
pub struct OverlappingStates {
    pub overlap: Vec<ResourceState>,
}

/// Pending/target split for one polling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateClassifier {
    pending: StateSet,
    target: StateSet,
}

impl StateClassifier {
    /// Build a classifier, rejecting sets that are not disjoint
    pub fn new(pending: StateSet, target: StateSet) -> Result<Self, OverlappingStates> {
        let overlap = pending.intersection(&target);
        if !overlap.is_empty() {
            return Err(OverlappingStates { overlap });
        }
        Ok(Self { pending, target })
    }

    /// Extra states the caller accepts as "keep polling"
    pub fn tolerate(
        mut self,
        states: impl IntoIterator<Item = ResourceState>,
    ) -> Result<Self, OverlappingStates> {
        for state in states {
            self.pending.insert(state);
        }
        Self::new(self.pending, self.target)
    }

    pub fn classify(&self, state: &ResourceState) -> Classification {
        if self.target.contains(state) {
            Classification::Target
        } else if self.pending.contains(state) {
            Classification::Pending
        } else {
            Classification::Unknown
        }
    }

    pub fn pending(&self) -> &StateSet {
        &self.pending
    }

    pub fn target(&self) -> &StateSet {
        &self.target
    }
}
