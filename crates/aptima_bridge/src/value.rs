//! Property values carried by messages and extensions.
//!
//! The value model mirrors what the native core can store: scalars, strings,
//! raw byte buffers, opaque handles and nested arrays/objects.

use std::collections::BTreeMap;

use crate::handle::Handle;

// ─────────────────────────────────────────────────────────────────────────────
// Value Type
// ─────────────────────────────────────────────────────────────────────────────

/// Kind tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Uint,
    Float,
    String,
    Buf,
    Ptr,
    Array,
    Object,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Uint => "uint",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::Buf => "buf",
            ValueType::Ptr => "ptr",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A property value
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Signed integer of any width up to 64 bits
    Int(i64),
    /// Unsigned integer of any width up to 64 bits
    Uint(u64),
    Float(f64),
    String(String),
    /// Raw bytes; not representable in JSON
    Buf(Vec<u8>),
    /// Opaque handle to a managed object
    Ptr(Handle),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Uint(_) => ValueType::Uint,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Buf(_) => ValueType::Buf,
            Value::Ptr(_) => ValueType::Ptr,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Convert to JSON.
    ///
    /// Lossy for two kinds: a `Buf` becomes an array of byte numbers (read back
    /// by [`Value::from_json`] as an `Array` of `Int`), and a `Ptr` becomes
    /// `null`, since a handle means nothing outside this process.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Ptr(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Buf(bytes) => {
                serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Build from JSON. Integers prefer the signed representation.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversions
// ─────────────────────────────────────────────────────────────────────────────

macro_rules! impl_from_int {
    ($variant:ident, $wide:ty, $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(<$wide>::from(v))
                }
            }
        )*
    };
}

impl_from_int!(Int, i64, i8, i16, i32, i64);
impl_from_int!(Uint, u64, u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Buf(v)
    }
}

impl From<Handle> for Value {
    fn from(v: Handle) -> Self {
        Value::Ptr(v)
    }
}

/// Typed extraction from a [`Value`]. Integer conversions are range checked.
pub trait FromValue: Sized {
    /// Kind name used in mismatch errors
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_from_value_int {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                const EXPECTED: &'static str = stringify!($t);

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::Int(i) => <$t>::try_from(*i).ok(),
                        Value::Uint(u) => <$t>::try_from(*u).ok(),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "f64";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    const EXPECTED: &'static str = "f32";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) if f.is_nan() || f.abs() <= f64::from(f32::MAX) => Some(*f as f32),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "buf";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Buf(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

impl FromValue for Handle {
    const EXPECTED: &'static str = "ptr";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Ptr(h) => Some(*h),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}
