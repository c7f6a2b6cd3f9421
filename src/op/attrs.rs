//! Op attribute values.
//!
//! Attributes are the compile-time-constant arguments of an op invocation,
//! as opposed to the dataflow inputs. They ride along in program bytes, so
//! they serialize.

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer scalar.
    I64(i64),
    /// Floating-point scalar.
    F64(f64),
    /// String value.
    Str(String),
    /// Shape (dimension sizes).
    Shape(Vec<usize>),
}

/// An ordered map of attribute name to value.
///
/// Serializes as the bare map, so program bytes carry
/// `{"value":1,"name":"x"}` rather than a wrapper object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpAttrs {
    entries: BTreeMap<String, AttrValue>,
}

impl OpAttrs {
    /// Creates an empty attribute map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    /// Sets an attribute in place.
    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.entries.insert(name.into(), value);
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.entries.get(name)
    }

    /// Reads an integer attribute, failing with a typed error when the
    /// attribute is missing or has the wrong type.
    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(AttrValue::I64(v)) => Ok(*v),
            Some(other) => Err(Error::new(
                ErrorKind::InvalidAttribute,
                format!("attribute {name} has type {other:?}, expected i64"),
            )),
            None => Err(Error::new(
                ErrorKind::InvalidAttribute,
                format!("missing attribute {name}"),
            )),
        }
    }

    /// Reads a string attribute.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(AttrValue::Str(v)) => Ok(v),
            Some(other) => Err(Error::new(
                ErrorKind::InvalidAttribute,
                format!("attribute {name} has type {other:?}, expected string"),
            )),
            None => Err(Error::new(
                ErrorKind::InvalidAttribute,
                format!("missing attribute {name}"),
            )),
        }
    }

    /// Returns true if no attributes are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
