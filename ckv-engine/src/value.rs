//! # Typed Values
//!
//! Purpose: Define the payload variants a key can hold and the type
//! adaptation applied to incoming string payloads.
//!
//! ## Design Principles
//! 1. **Adapt On Write**: `SET` payloads that parse as integers or floats
//!    are stored typed so arithmetic commands work without re-parsing.
//! 2. **Serde-Friendly**: Every variant serializes through `serde_json`
//!    for snapshots, the AOF preamble, and FSM state transfer.
//! 3. **Typed Failure**: Reading the wrong variant surfaces `WrongType`,
//!    never a panic or a silent coercion.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use ckv_common::{KvError, KvResult};

use crate::sorted_set::SortedSet;

/// Typed payload stored at a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Value {
    /// Plain string payload.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Ordered list of strings.
    List(Vec<String>),
    /// Unordered set of strings.
    Set(HashSet<String>),
    /// Field-to-string mapping.
    Hash(HashMap<String, String>),
    /// Unique members ordered by (score, member).
    SortedSet(SortedSet),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl Value {
    /// Stores a raw payload as the narrowest matching variant.
    ///
    /// Integers win over floats; non-finite floats stay strings so `inf`
    /// round-trips as the text a client sent.
    pub fn adapt(raw: &str) -> Value {
        if let Ok(int) = raw.parse::<i64>() {
            return Value::Int(int);
        }
        match raw.parse::<f64>() {
            Ok(float) if float.is_finite() => Value::Float(float),
            _ => Value::Str(raw.to_string()),
        }
    }

    /// Type name reported by `TYPE`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
            Value::SortedSet(_) => "zset",
        }
    }

    /// Renders scalar variants for `GET`-style replies.
    ///
    /// Collection variants have no single-string form and fail typed.
    pub fn as_scalar_string(&self) -> KvResult<String> {
        match self {
            Value::Str(text) => Ok(text.clone()),
            Value::Int(int) => Ok(int.to_string()),
            Value::Float(float) => Ok(float.to_string()),
            _ => Err(KvError::WrongType),
        }
    }

    /// Borrows the sorted set, failing typed on any other variant.
    pub fn as_sorted_set(&self) -> KvResult<&SortedSet> {
        match self {
            Value::SortedSet(set) => Ok(set),
            _ => Err(KvError::WrongType),
        }
    }

    /// Mutably borrows the sorted set, failing typed on any other variant.
    pub fn as_sorted_set_mut(&mut self) -> KvResult<&mut SortedSet> {
        match self {
            Value::SortedSet(set) => Ok(set),
            _ => Err(KvError::WrongType),
        }
    }

    /// Reads the integer variant, failing typed on any other variant.
    pub fn as_int(&self) -> KvResult<i64> {
        match self {
            Value::Int(int) => Ok(*int),
            _ => Err(KvError::WrongType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapt_prefers_integers() {
        assert_eq!(Value::adapt("42"), Value::Int(42));
        assert_eq!(Value::adapt("-7"), Value::Int(-7));
    }

    #[test]
    fn adapt_falls_back_to_float_then_string() {
        assert_eq!(Value::adapt("2.5"), Value::Float(2.5));
        assert_eq!(Value::adapt("bar"), Value::Str("bar".to_string()));
        // Non-finite parses stay strings so the original text survives.
        assert_eq!(Value::adapt("inf"), Value::Str("inf".to_string()));
    }

    #[test]
    fn type_names_match_wire_output() {
        assert_eq!(Value::adapt("bar").type_name(), "string");
        assert_eq!(Value::Int(1).type_name(), "integer");
        assert_eq!(Value::SortedSet(SortedSet::default()).type_name(), "zset");
    }

    #[test]
    fn scalar_rendering_rejects_collections() {
        assert_eq!(Value::Int(10).as_scalar_string().unwrap(), "10");
        let set = Value::SortedSet(SortedSet::default());
        assert_eq!(set.as_scalar_string(), Err(KvError::WrongType));
    }

    #[test]
    fn int_access_is_typed() {
        assert_eq!(Value::Int(3).as_int().unwrap(), 3);
        assert_eq!(
            Value::Str("3".to_string()).as_int(),
            Err(KvError::WrongType)
        );
    }
}
