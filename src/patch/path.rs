//! Field paths into a resource document

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    /// Named object field
    Field(String),
    /// Collection element, addressed by its identity key
    Key(String),
}

/// Location of a value inside a resource document.
///
/// Displayed as `node_groups[ng-1].instance_type`. The *schema path* drops
/// element keys (`node_groups.instance_type`) and is what rule tables are
/// keyed by.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted schema path (`a.b.c`); no element keys
    pub fn parse(dotted: &str) -> Self {
        Self(
            dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(|s| PathSegment::Field(s.to_string()))
                .collect(),
        )
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.to_string()));
        Self(segments)
    }

    pub fn element(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the last segment addresses a collection element
    pub fn is_element(&self) -> bool {
        matches!(self.0.last(), Some(PathSegment::Key(_)))
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Dotted path with element keys removed
    pub fn schema_path(&self) -> String {
        self.0
            .iter()
            .filter_map(|s| match s {
                PathSegment::Field(name) => Some(name.as_str()),
                PathSegment::Key(_) => None,
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Dotted path up to the first element key.
    ///
    /// Update masks cannot address individual list elements, so a change
    /// inside a collection masks the whole collection.
    pub fn mask_path(&self) -> String {
        self.0
            .iter()
            .map_while(|s| match s {
                PathSegment::Field(name) => Some(name.as_str()),
                PathSegment::Key(_) => None,
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn top_level(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Field(name)) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i == 0 => write!(f, "{}", name)?,
                PathSegment::Field(name) => write!(f, ".{}", name)?,
                PathSegment::Key(key) => write!(f, "[{}]", key)?,
            }
        }
        Ok(())
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_schema_path() {
        let path = FieldPath::root()
            .child("node_groups")
            .element("ng-1")
            .child("instance_type");
        assert_eq!(path.to_string(), "node_groups[ng-1].instance_type");
        assert_eq!(path.schema_path(), "node_groups.instance_type");
        assert_eq!(path.mask_path(), "node_groups");
        assert_eq!(path.top_level(), Some("node_groups"));
        assert!(!path.is_element());
        assert!(FieldPath::root().child("acl").element("a").is_element());
    }

    #[test]
    fn test_parse_and_prefix() {
        let parent = FieldPath::parse("settings.backup");
        let child = parent.child("enabled");
        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert_eq!(child.schema_path(), "settings.backup.enabled");
        assert!(FieldPath::parse("").is_root());
    }

    #[test]
    fn test_serializes_as_string() {
        let path = FieldPath::root().child("acl").element("10.0.0.0/8");
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            "\"acl[10.0.0.0/8]\""
        );
    }
}
