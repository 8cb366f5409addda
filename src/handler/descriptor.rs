//! Method descriptors: the registry's public view of each method.
//!
//! A descriptor is built once at registration from a [`Signature`] and never
//! changes afterwards. The same shape is served to clients by the `help`
//! built-in, so both sides agree on parameter names and defaults.

use serde::{Deserialize, Serialize};

use crate::codec::Value;

/// Who may call a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    /// Callable without a token.
    Public,
    /// Requires the worker's token.
    Private,
}

/// Whether a method produces one output or a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    /// One output, sent with `Content-Length`.
    Single,
    /// A sequence of outputs, sent chunked.
    Stream,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, also the keyword used by callers.
    pub name: String,
    /// Value used when the caller omits the parameter. `None` means required.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_default"
    )]
    pub default: Option<Value>,
}

/// A `default` key that is present, even as `null`, declares an optional
/// parameter.
fn present_default<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Param {
    /// True if callers must supply this parameter.
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// Name, access level, parameter table and kind of a registered method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Unique, case-sensitive method name.
    pub name: String,
    /// Access level, fixed at registration.
    pub access: Access,
    /// Parameters in positional order.
    pub params: Vec<Param>,
    /// Single or streaming.
    pub kind: MethodKind,
    /// Free-text help.
    #[serde(default)]
    pub doc: String,
}

impl MethodDescriptor {
    /// True for public methods.
    #[inline]
    pub fn is_public(&self) -> bool {
        self.access == Access::Public
    }

    /// True for streaming methods.
    #[inline]
    pub fn is_stream(&self) -> bool {
        self.kind == MethodKind::Stream
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// One-line usage, e.g. `purr [count=1] [purr="purr"]`.
    pub fn usage(&self) -> String {
        let mut usage = self.name.clone();
        for param in &self.params {
            match &param.default {
                None => usage.push_str(&format!(" <{}>", param.name)),
                Some(default) => usage.push_str(&format!(" [{}={}]", param.name, default)),
            }
        }
        usage
    }
}

/// Builder for a method's name, access level and parameters.
///
/// # Example
///
/// ```
/// use catwire::handler::Signature;
///
/// let sig = Signature::private("purr")
///     .optional("count", 1)
///     .optional("purr", "purr")
///     .doc("Purr `count` times");
/// ```
#[derive(Debug, Clone)]
pub struct Signature {
    name: String,
    access: Access,
    params: Vec<Param>,
    doc: String,
}

impl Signature {
    /// A method callable without a token.
    pub fn public(name: impl Into<String>) -> Self {
        Self::new(name, Access::Public)
    }

    /// A method that requires the token.
    pub fn private(name: impl Into<String>) -> Self {
        Self::new(name, Access::Private)
    }

    fn new(name: impl Into<String>, access: Access) -> Self {
        Self {
            name: name.into(),
            access,
            params: Vec::new(),
            doc: String::new(),
        }
    }

    /// Append a required parameter.
    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Append a parameter with a default value.
    pub fn optional(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Set the help text.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    /// The method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Freeze into a descriptor of the given kind.
    pub fn into_descriptor(self, kind: MethodKind) -> MethodDescriptor {
        MethodDescriptor {
            name: self.name,
            access: self.access,
            params: self.params,
            kind,
            doc: self.doc,
        }
    }
}
