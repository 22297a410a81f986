//! # YAML Substitution
//!
//! Sets a value at a dotted path (`deploy.image`,
//! `spec.containers.0.image`) inside a single YAML document. Comments of
//! the target file are not preserved.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum YamlPathError {
    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("value path is empty")]
    EmptyPath,
    #[error("value path {path:?} contains an empty segment")]
    EmptySegment { path: String },
    #[error("cannot descend into {segment:?} of {path:?}: parent is a scalar")]
    ScalarInPath { path: String, segment: String },
    #[error("segment {segment:?} of {path:?} is not a valid sequence index")]
    InvalidIndex { path: String, segment: String },
    #[error("index {index} of {path:?} is out of bounds (length {len})")]
    IndexOutOfBounds { path: String, index: usize, len: usize },
    #[error("file holds {documents} YAML documents, substitution needs exactly one")]
    MultipleDocuments { documents: usize },
}

fn index(path: &str, segment: &str, len: usize) -> Result<usize, YamlPathError> {
    let index: usize = segment.parse().map_err(|_| YamlPathError::InvalidIndex {
        path: path.to_string(),
        segment: segment.to_string(),
    })?;
    if index >= len {
        return Err(YamlPathError::IndexOutOfBounds {
            path: path.to_string(),
            index,
            len,
        });
    }
    Ok(index)
}

/// Interpret a configuration literal as a YAML scalar.
///
/// `3` becomes an integer and `true` a boolean; quote the literal (`'3'`)
/// to keep a string. Anything that is not a scalar stays the literal text.
pub fn literal(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        Ok(Value::Null) if matches!(text.trim(), "~" | "null" | "Null" | "NULL") => Value::Null,
        _ => Value::String(text.to_string()),
    }
}

/// Set `path` in `root` to `value`.
///
/// Missing mapping keys along the path are created; sequences are addressed by
/// index and never grown.
pub fn set_path(root: &mut Value, path: &str, value: Value) -> Result<(), YamlPathError> {
    if path.is_empty() {
        return Err(YamlPathError::EmptyPath);
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(YamlPathError::EmptySegment {
            path: path.to_string(),
        });
    }

    let mut current = root;
    for segment in &segments {
        if current.is_null() {
            *current = Value::Mapping(Mapping::new());
        }
        current = match current {
            Value::Mapping(map) => map
                .entry(Value::String(segment.to_string()))
                .or_insert(Value::Null),
            Value::Sequence(items) => {
                let i = index(path, segment, items.len())?;
                &mut items[i]
            }
            _ => {
                return Err(YamlPathError::ScalarInPath {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }
    *current = value;
    Ok(())
}

fn parse_document(content: &[u8]) -> Result<Value, YamlPathError> {
    if content.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    let mut documents = serde_yaml::Deserializer::from_slice(content)
        .map(Value::deserialize)
        .filter(|document| !matches!(document, Ok(Value::Null)))
        .collect::<Result<Vec<_>, _>>()?;
    match documents.len() {
        0 => Ok(Value::Null),
        1 => Ok(documents.remove(0)),
        documents => Err(YamlPathError::MultipleDocuments { documents }),
    }
}

/// Parse `content`, set `path` to `value` and serialize the document again
pub fn substitute(content: &[u8], path: &str, value: Value) -> Result<Vec<u8>, YamlPathError> {
    let mut document = parse_document(content)?;
    set_path(&mut document, path, value)?;
    Ok(serde_yaml::to_string(&document)?.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(doc: &'a Value, path: &str) -> &'a Value {
        path.split('.').fold(doc, |v, s| match s.parse::<usize>() {
            Ok(i) if v.is_sequence() => &v[i],
            _ => &v[s],
        })
    }

    #[test]
    fn test_replace_top_level_value() {
        let out = substitute(b"registry: placeholder\n", "registry", Value::from("docker.io")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "registry: docker.io\n");
    }

    #[test]
    fn test_creates_missing_mappings() {
        let out = substitute(b"name: app\n", "image.tag", Value::from("1.25")).unwrap();
        let doc: Value = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(get(&doc, "image.tag"), &Value::String("1.25".into()));
        assert_eq!(get(&doc, "name"), &Value::String("app".into()));
    }

    #[test]
    fn test_sequence_index() {
        let input = b"containers:\n- name: a\n  image: old\n- name: b\n  image: old\n";
        let out = substitute(input, "containers.1.image", Value::from("nginx:1.25")).unwrap();
        let doc: Value = serde_yaml::from_slice(&out).unwrap();
        assert_eq!(get(&doc, "containers.0.image"), &Value::String("old".into()));
        assert_eq!(get(&doc, "containers.1.image"), &Value::String("nginx:1.25".into()));

        assert!(matches!(
            substitute(input, "containers.5.image", Value::from("x")),
            Err(YamlPathError::IndexOutOfBounds { index: 5, len: 2, .. })
        ));
        assert!(matches!(
            substitute(input, "containers.first.image", Value::from("x")),
            Err(YamlPathError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_scalar_in_path_fails() {
        assert!(matches!(
            substitute(b"image: nginx\n", "image.tag", Value::from("1.25")),
            Err(YamlPathError::ScalarInPath { .. })
        ));
    }

    #[test]
    fn test_empty_document_and_bad_paths() {
        let out = substitute(b"", "a.b", Value::from("c")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a:\n  b: c\n");
        assert!(matches!(set_path(&mut Value::Null, "", Value::from("x")), Err(YamlPathError::EmptyPath)));
        assert!(matches!(
            set_path(&mut Value::Null, "a..b", Value::from("x")),
            Err(YamlPathError::EmptySegment { .. })
        ));
    }

    #[test]
    fn test_literal_scalars() {
        assert_eq!(literal("3"), Value::from(3u64));
        assert_eq!(literal("true"), Value::Bool(true));
        assert_eq!(literal("'3'"), Value::from("3"));
        assert_eq!(literal("docker.io"), Value::from("docker.io"));
        assert_eq!(literal("~"), Value::Null);
        assert_eq!(literal(""), Value::from(""));
        assert_eq!(literal("a: b"), Value::from("a: b"));

        let out = substitute(b"replicas: 1\n", "replicas", literal("3")).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "replicas: 3\n");
    }

    #[test]
    fn test_multiple_documents_are_rejected() {
        let input = b"a: 1\n---\nb: 2\n";
        let error = substitute(input, "a", Value::from("x")).unwrap_err();
        assert!(matches!(error, YamlPathError::MultipleDocuments { documents: 2 }));
        assert!(error.to_string().contains("2 YAML documents"));

        let out = substitute(b"---\na: 1\n---\n", "a", Value::from(2)).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a: 2\n");
    }
}
