//! Addressable paths into semi-structured documents.
//!
//! A `FieldPath` is an ordered list of key or index segments parsed from a
//! JSON-pointer style string (`/spec/ports/0/port`). Values are mutated in
//! place on the `serde_json::Value` tree.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// Numeric segments are indices; everything else is a map key.
    fn parse(raw: &str) -> Self {
        let unescaped = raw.replace("~1", "/").replace("~0", "~");
        let numeric = !unescaped.is_empty() && unescaped.bytes().all(|b| b.is_ascii_digit());
        match unescaped.parse::<usize>() {
            Ok(index) if numeric => PathSegment::Index(index),
            _ => PathSegment::Key(unescaped),
        }
    }

    fn empty_container(&self) -> Value {
        match self {
            PathSegment::Index(_) => Value::Array(Vec::new()),
            PathSegment::Key(_) => Value::Object(Map::new()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key.replace('~', "~0").replace('/', "~1")),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Failure to resolve or write a path on one document
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("field {0} does not exist")]
    MissingField(String),

    #[error("field {path} is a {found}, expected {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("index {index} out of range at {path} (length {len})")]
    IndexOutOfRange { path: String, index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parses `/a/b/0/c`. The leading slash is optional; empty segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err("path has no segments".to_string());
        }
        let mut segments = Vec::new();
        for part in trimmed.split('/') {
            if part.is_empty() {
                return Err("path contains an empty segment".to_string());
            }
            segments.push(PathSegment::parse(part));
        }
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
                (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        if current.is_null() { None } else { Some(current) }
    }

    /// Replaces the value at an already existing path.
    ///
    /// Every segment including the last must resolve to a present,
    /// non-null value.
    pub fn set_existing(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        if self.get(root).is_none() {
            return Err(PathError::MissingField(self.to_string()));
        }
        self.set(root, value, false)
    }

    /// Sets a value, creating missing intermediate containers.
    ///
    /// A missing container takes the shape of the segment that addresses
    /// into it: an index produces a sequence, a key a mapping. An index equal
    /// to the sequence length appends.
    pub fn set_or_create(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        self.set(root, value, true)
    }

    fn set(&self, root: &mut Value, value: Value, create: bool) -> Result<(), PathError> {
        let Some((last, parents)) = self.segments.split_last() else {
            *root = value;
            return Ok(());
        };

        let mut current = root;
        for (depth, segment) in parents.iter().enumerate() {
            let next = &self.segments[depth + 1];
            current = self.step(current, segment, depth, create, Some(next))?;
        }
        let slot = self.step(current, last, parents.len(), create, None)?;
        *slot = value;
        Ok(())
    }

    /// Descends one segment, materialising the child when `create` is set.
    fn step<'a>(
        &self,
        current: &'a mut Value,
        segment: &PathSegment,
        depth: usize,
        create: bool,
        next: Option<&PathSegment>,
    ) -> Result<&'a mut Value, PathError> {
        if current.is_null() && create {
            *current = segment.empty_container();
        }
        let found = kind_name(current);
        let prefix = || self.prefix(depth + 1);
        let placeholder = || next.map_or(Value::Null, PathSegment::empty_container);

        match segment {
            PathSegment::Key(key) => {
                let Value::Object(map) = current else {
                    return Err(PathError::TypeMismatch {
                        path: self.prefix(depth),
                        expected: "mapping",
                        found,
                    });
                };
                if !map.contains_key(key) {
                    if !create {
                        return Err(PathError::MissingField(prefix()));
                    }
                    map.insert(key.clone(), placeholder());
                }
                let child = map
                    .get_mut(key)
                    .ok_or_else(|| PathError::MissingField(prefix()))?;
                if child.is_null() && create {
                    *child = placeholder();
                }
                Ok(child)
            }
            PathSegment::Index(index) => {
                let Value::Array(items) = current else {
                    return Err(PathError::TypeMismatch {
                        path: self.prefix(depth),
                        expected: "sequence",
                        found,
                    });
                };
                let len = items.len();
                if *index > len || (*index == len && !create) {
                    return Err(PathError::IndexOutOfRange {
                        path: self.prefix(depth),
                        index: *index,
                        len,
                    });
                }
                if *index == len {
                    items.push(placeholder());
                }
                let child = &mut items[*index];
                if child.is_null() && create {
                    *child = placeholder();
                }
                Ok(child)
            }
        }
    }

    fn prefix(&self, len: usize) -> String {
        let mut out = String::new();
        for segment in self.segments.iter().take(len) {
            out.push('/');
            out.push_str(&segment.to_string());
        }
        if out.is_empty() { "/".to_string() } else { out }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_segments() {
        let path = FieldPath::parse("/spec/ports/0/port").unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("spec".into()),
                PathSegment::Key("ports".into()),
                PathSegment::Index(0),
                PathSegment::Key("port".into()),
            ]
        );
        assert_eq!(path.to_string(), "/spec/ports/0/port");
    }

    #[test]
    fn test_parse_escaped_keys() {
        let path = FieldPath::parse("/metadata/annotations/example.com~1owner").unwrap();
        assert_eq!(
            path.segments()[2],
            PathSegment::Key("example.com/owner".into())
        );
        assert_eq!(path.to_string(), "/metadata/annotations/example.com~1owner");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("/").is_err());
        assert!(FieldPath::parse("/spec//replicas").is_err());
    }

    #[test]
    fn test_signed_number_is_key() {
        let path = FieldPath::parse("/data/-1").unwrap();
        assert_eq!(path.segments()[1], PathSegment::Key("-1".into()));
    }

    #[test]
    fn test_create_chooses_container_by_next_segment() {
        let mut doc = json!({"kind": "Service"});
        let path = FieldPath::parse("/spec/ports/0/port").unwrap();
        path.set_or_create(&mut doc, json!(8321)).unwrap();
        assert_eq!(doc, json!({"kind": "Service", "spec": {"ports": [{"port": 8321}]}}));
        assert!(doc["spec"]["ports"].is_array());
    }

    #[test]
    fn test_create_replaces_null_intermediate() {
        let mut doc = json!({"spec": {"resources": null}});
        let path = FieldPath::parse("/spec/resources/requests/storage").unwrap();
        path.set_or_create(&mut doc, json!("10Gi")).unwrap();
        assert_eq!(doc["spec"]["resources"]["requests"]["storage"], "10Gi");
    }

    #[test]
    fn test_create_keeps_existing_siblings() {
        let mut doc = json!({"subjects": [{"kind": "ServiceAccount", "name": "default"}]});
        let path = FieldPath::parse("/subjects/0/namespace").unwrap();
        path.set_or_create(&mut doc, json!("team-a")).unwrap();
        assert_eq!(
            doc,
            json!({"subjects": [{"kind": "ServiceAccount", "name": "default", "namespace": "team-a"}]})
        );
    }

    #[test]
    fn test_create_index_beyond_length_is_error() {
        let mut doc = json!({"spec": {"ports": []}});
        let path = FieldPath::parse("/spec/ports/2/port").unwrap();
        let err = path.set_or_create(&mut doc, json!(80)).unwrap_err();
        assert_eq!(
            err,
            PathError::IndexOutOfRange { path: "/spec/ports".into(), index: 2, len: 0 }
        );
    }

    #[test]
    fn test_set_existing_requires_full_path() {
        let mut doc = json!({"spec": {"replicas": 1}});
        FieldPath::parse("/spec/replicas")
            .unwrap()
            .set_existing(&mut doc, json!(3))
            .unwrap();
        assert_eq!(doc["spec"]["replicas"], 3);

        let err = FieldPath::parse("/spec/template/spec")
            .unwrap()
            .set_existing(&mut doc, json!({}))
            .unwrap_err();
        assert_eq!(err, PathError::MissingField("/spec/template/spec".into()));
    }

    #[test]
    fn test_type_mismatch_reports_parent() {
        let mut doc = json!({"spec": {"ports": "not-a-list"}});
        let err = FieldPath::parse("/spec/ports/0/port")
            .unwrap()
            .set_or_create(&mut doc, json!(80))
            .unwrap_err();
        assert_eq!(
            err,
            PathError::TypeMismatch { path: "/spec/ports".into(), expected: "sequence", found: "string" }
        );
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut doc = json!({});
        let path = FieldPath::parse("/spec/template/spec/containers/0/image").unwrap();
        path.set_or_create(&mut doc, json!("repo/server:1")).unwrap();
        let once = doc.clone();
        path.set_or_create(&mut doc, json!("repo/server:1")).unwrap();
        assert_eq!(doc, once);
    }
}
