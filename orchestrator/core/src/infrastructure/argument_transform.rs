// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sandboxed argument transforms for tool overrides.
//!
//! A transform is a map of JSON-pointer projections: each entry copies the
//! value found at a source pointer in the model's arguments to a destination
//! pointer in the arguments sent to the tool server. Nothing else is
//! expressible, so a misconfigured override can rename or reshape arguments
//! but never execute anything.

use std::collections::HashMap;

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("invalid JSON pointer '{0}'")]
    InvalidPointer(String),

    #[error("no value at '{0}'")]
    MissingSource(String),

    #[error("cannot write '{0}': parent is not an object")]
    NotAnObject(String),
}

pub trait ArgumentTransform: Send + Sync {
    fn apply(&self, args: &Value) -> Result<Value, TransformError>;
}

/// `destination pointer -> source pointer` projections, applied in
/// destination order so output is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPointerTransform {
    mappings: Vec<(String, String)>,
}

impl JsonPointerTransform {
    pub fn new(mappings: &HashMap<String, String>) -> Result<Self, TransformError> {
        let mut sorted: Vec<(String, String)> = mappings
            .iter()
            .map(|(dest, src)| (dest.clone(), src.clone()))
            .collect();
        sorted.sort();
        for (dest, src) in &sorted {
            validate_pointer(dest)?;
            validate_pointer(src)?;
            if dest.is_empty() {
                return Err(TransformError::InvalidPointer(dest.clone()));
            }
        }
        Ok(Self { mappings: sorted })
    }
}

fn validate_pointer(pointer: &str) -> Result<(), TransformError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(TransformError::InvalidPointer(pointer.to_string()))
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn insert_at(root: &mut Value, pointer: &str, value: Value) -> Result<(), TransformError> {
    let tokens: Vec<String> = pointer.split('/').skip(1).map(unescape).collect();
    let Some((last, parents)) = tokens.split_last() else {
        return Err(TransformError::InvalidPointer(pointer.to_string()));
    };

    let mut current = root;
    for token in parents {
        let object = current
            .as_object_mut()
            .ok_or_else(|| TransformError::NotAnObject(pointer.to_string()))?;
        current = object
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    current
        .as_object_mut()
        .ok_or_else(|| TransformError::NotAnObject(pointer.to_string()))?
        .insert(last.clone(), value);
    Ok(())
}

impl ArgumentTransform for JsonPointerTransform {
    fn apply(&self, args: &Value) -> Result<Value, TransformError> {
        let mut out = Value::Object(Map::new());
        for (dest, src) in &self.mappings {
            let value = args
                .pointer(src)
                .cloned()
                .ok_or_else(|| TransformError::MissingSource(src.clone()))?;
            insert_at(&mut out, dest, value)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projects_and_nests() {
        let transform = JsonPointerTransform::new(&HashMap::from([
            ("/query".to_string(), "/q".to_string()),
            ("/filter/customer".to_string(), "/customer/id".to_string()),
        ]))
        .unwrap();

        let out = transform
            .apply(&json!({ "q": "late order", "customer": { "id": 9 } }))
            .unwrap();
        assert_eq!(out, json!({ "query": "late order", "filter": { "customer": 9 } }));
    }

    #[test]
    fn test_missing_source_is_error() {
        let transform = JsonPointerTransform::new(&HashMap::from([("/a".to_string(), "/b".to_string())])).unwrap();
        assert_eq!(
            transform.apply(&json!({})),
            Err(TransformError::MissingSource("/b".to_string()))
        );
    }

    #[test]
    fn test_rejects_non_pointer_expressions() {
        let err = JsonPointerTransform::new(&HashMap::from([("/a".to_string(), "args.b".to_string())]));
        assert!(matches!(err, Err(TransformError::InvalidPointer(_))));
    }

    #[test]
    fn test_escaped_tokens() {
        let transform =
            JsonPointerTransform::new(&HashMap::from([("/a~1b".to_string(), "/x".to_string())])).unwrap();
        assert_eq!(transform.apply(&json!({ "x": 1 })).unwrap(), json!({ "a/b": 1 }));
    }
}
