//! Opaque training configuration.
//!
//! Values are a closed set of scalar types. Each consumer publishes the keys
//! it recognizes and validates at the point of use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ConfigValue {
    fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Bool,
            Self::Integer(_) => ValueType::Integer,
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::Text,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Text(v.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    Integer,
    Number,
    Text,
}

impl ValueType {
    fn accepts(&self, actual: ValueType) -> bool {
        // integers are valid wherever a float is expected
        *self == actual || (*self == ValueType::Number && actual == ValueType::Integer)
    }
}

/// One row of a recognized-keys table.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    pub key: &'static str,
    pub ty: ValueType,
}

impl KeySpec {
    pub const fn new(key: &'static str, ty: ValueType) -> Self {
        Self { key, ty }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpaqueConfig(BTreeMap<String, ConfigValue>);

impl OpaqueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            ConfigValue::Number(v) => Some(*v),
            ConfigValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            ConfigValue::Integer(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            ConfigValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// `self` overlaid with every key of `overrides`.
    pub fn merged(&self, overrides: &OpaqueConfig) -> OpaqueConfig {
        let mut out = self.clone();
        for (k, v) in &overrides.0 {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Reject keys outside `recognized` and values of the wrong type.
    pub fn validate(&self, recognized: &[KeySpec], context: &str) -> Result<()> {
        for (key, value) in &self.0 {
            let spec = recognized.iter().find(|s| s.key == key).ok_or_else(|| {
                LifecycleError::validation(format!("{context}: unrecognized config key '{key}'"))
            })?;
            if !spec.ty.accepts(value.value_type()) {
                return Err(LifecycleError::validation(format!(
                    "{context}: config key '{key}' expects {:?}, got {:?}",
                    spec.ty,
                    value.value_type()
                )));
            }
        }
        Ok(())
    }
}
