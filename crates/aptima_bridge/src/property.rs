//! Dotted-path property store shared by messages and extensions.

use std::collections::BTreeMap;

use crate::error::{BridgeError, BridgeResult};
use crate::value::{FromValue, Value, ValueType};

/// String-keyed property map addressed with `a.b.c` paths
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyStore {
    root: BTreeMap<String, Value>,
}

fn segments(path: &str) -> BridgeResult<Vec<&str>> {
    if path.is_empty() {
        return Err(BridgeError::InvalidArgument("property path is empty".into()));
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(BridgeError::InvalidArgument(format!(
            "malformed property path: {path}"
        )));
    }
    Ok(parts)
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value at `path`, or `PropertyNotFound`.
    pub fn get(&self, path: &str) -> BridgeResult<&Value> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BridgeError::InvalidArgument("property path is empty".into()))?;

        let mut current = &self.root;
        for part in parents {
            current = match current.get(*part) {
                Some(Value::Object(fields)) => fields,
                _ => return Err(BridgeError::PropertyNotFound(path.to_string())),
            };
        }

        current
            .get(*last)
            .ok_or_else(|| BridgeError::PropertyNotFound(path.to_string()))
    }

    /// Typed read. Never substitutes a default.
    pub fn get_as<T: FromValue>(&self, path: &str) -> BridgeResult<T> {
        let value = self.get(path)?;
        T::from_value(value).ok_or_else(|| BridgeError::TypePropertyMismatch {
            path: path.to_string(),
            expected: T::EXPECTED.to_string(),
            found: value.value_type().to_string(),
        })
    }

    pub fn value_type(&self, path: &str) -> BridgeResult<ValueType> {
        self.get(path).map(Value::value_type)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_ok()
    }

    /// Store `value` at `path`, creating intermediate objects as needed.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BridgeError::InvalidArgument("property path is empty".into()))?;

        let mut current = &mut self.root;
        for part in parents {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(BTreeMap::new()));
            current = match slot {
                Value::Object(fields) => fields,
                other => {
                    return Err(BridgeError::TypePropertyMismatch {
                        path: path.to_string(),
                        expected: ValueType::Object.to_string(),
                        found: other.value_type().to_string(),
                    });
                }
            };
        }

        current.insert(last.to_string(), value.into());
        Ok(())
    }

    /// Remove the value at `path` and return it.
    pub fn remove(&mut self, path: &str) -> BridgeResult<Value> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BridgeError::InvalidArgument("property path is empty".into()))?;

        let mut current = &mut self.root;
        for part in parents {
            current = match current.get_mut(*part) {
                Some(Value::Object(fields)) => fields,
                _ => return Err(BridgeError::PropertyNotFound(path.to_string())),
            };
        }

        current
            .remove(*last)
            .ok_or_else(|| BridgeError::PropertyNotFound(path.to_string()))
    }

    /// Serialize the value at `path` (or everything when `path` is empty).
    pub fn to_json(&self, path: &str) -> BridgeResult<String> {
        let json = if path.is_empty() {
            Value::Object(self.root.clone()).to_json()
        } else {
            self.get(path)?.to_json()
        };
        Ok(serde_json::to_string(&json)?)
    }

    /// Parse `json` and store it at `path`.
    pub fn set_from_json(&mut self, path: &str, json: &str) -> BridgeResult<()> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        self.set(path, Value::from_json(&parsed))
    }

    /// Merge a JSON object into the root, replacing existing top-level keys.
    pub fn merge_json(&mut self, json: &str) -> BridgeResult<()> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        match Value::from_json(&parsed) {
            Value::Object(fields) => {
                self.root.extend(fields);
                Ok(())
            }
            other => Err(BridgeError::TypePropertyMismatch {
                path: String::new(),
                expected: ValueType::Object.to_string(),
                found: other.value_type().to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
