//! Call arguments and their binding to a parameter table.
//!
//! On the wire, arguments travel as one map: the reserved key `_args` holds
//! the positional list, every other key is a keyword argument.
//!
//! Binding walks the descriptor's parameters in order. Positionals fill the
//! leading slots, keywords fill slots by name, defaults fill what is left.
//! Any mismatch is an [`CatwireError::ArgumentBinding`] and the handler is
//! never entered.

use serde::de::DeserializeOwned;

use super::MethodDescriptor;
use crate::codec::{Map, Value};
use crate::error::{CatwireError, Result};

/// Reserved body key holding positional arguments.
pub const POSITIONAL_KEY: &str = "_args";

/// Unbound call arguments, as sent by a caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    /// Positional values, in order.
    pub positional: Vec<Value>,
    /// Keyword values.
    pub keyword: Map,
}

impl Args {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional value.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword value.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// True when there are no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    /// Split a decoded request body into positional and keyword arguments.
    ///
    /// `Null` (empty body) means no arguments. Anything other than a map is
    /// a decode error.
    pub fn from_body(body: Value) -> Result<Args> {
        let mut keyword = match body {
            Value::Null => return Ok(Args::new()),
            Value::Object(map) => map,
            other => {
                return Err(CatwireError::Decode(format!(
                    "Request body must be a map, got {}",
                    type_name(&other)
                )))
            }
        };

        let positional = match keyword.remove(POSITIONAL_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values,
            Some(other) => {
                return Err(CatwireError::Decode(format!(
                    "{} must be a list, got {}",
                    POSITIONAL_KEY,
                    type_name(&other)
                )))
            }
        };

        Ok(Args {
            positional,
            keyword,
        })
    }

    /// Inverse of [`Args::from_body`].
    pub fn into_body(self) -> Value {
        let mut map = self.keyword;
        if !self.positional.is_empty() {
            map.insert(POSITIONAL_KEY.to_string(), Value::Array(self.positional));
        }
        Value::Object(map)
    }

    /// Bind against a parameter table.
    pub fn bind(self, descriptor: &MethodDescriptor) -> Result<BoundArgs> {
        let params = &descriptor.params;

        if self.positional.len() > params.len() {
            return Err(CatwireError::ArgumentBinding(format!(
                "{} takes at most {} positional arguments, {} given",
                descriptor.name,
                params.len(),
                self.positional.len()
            )));
        }

        if let Some(unknown) = self.keyword.keys().find(|k| descriptor.param(k).is_none()) {
            return Err(CatwireError::ArgumentBinding(format!(
                "{} got an unexpected keyword argument '{}'",
                descriptor.name, unknown
            )));
        }

        let positional_count = self.positional.len();
        let mut keyword = self.keyword;
        let mut positional = self.positional.into_iter();
        let mut values = Vec::with_capacity(params.len());

        for (index, param) in params.iter().enumerate() {
            let from_keyword = keyword.remove(&param.name);

            let value = if index < positional_count {
                if from_keyword.is_some() {
                    return Err(CatwireError::ArgumentBinding(format!(
                        "{} got multiple values for argument '{}'",
                        descriptor.name, param.name
                    )));
                }
                positional.next()
            } else {
                from_keyword.or_else(|| param.default.clone())
            };

            match value {
                Some(value) => values.push((param.name.clone(), value)),
                None => {
                    return Err(CatwireError::ArgumentBinding(format!(
                        "{} missing required argument '{}'",
                        descriptor.name, param.name
                    )))
                }
            }
        }

        Ok(BoundArgs { values })
    }

    /// Check binding without keeping the result.
    pub fn check(&self, descriptor: &MethodDescriptor) -> Result<()> {
        self.clone().bind(descriptor).map(|_| ())
    }
}

/// Arguments matched to every declared parameter, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArgs {
    values: Vec<(String, Value)>,
}

impl BoundArgs {
    /// Raw value of a parameter.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Convert a parameter to `T`.
    ///
    /// Conversion failures are argument errors, reported to the caller as
    /// a client error.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.value(name).ok_or_else(|| {
            CatwireError::ArgumentBinding(format!("No parameter named '{}'", name))
        })?;

        T::deserialize(value).map_err(|e| {
            CatwireError::ArgumentBinding(format!("Argument '{}': {}", name, e))
        })
    }

    /// Iterate over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the method takes no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
