//! Values crossing the call boundary into the foreign runtime.
//!
//! Host code never hands raw host values to a [`ForeignHandle`](crate::ForeignHandle);
//! everything is first turned into an [`Arg`]. Special treatment at the boundary
//! (pass a handle through untouched, build a byte string, spread keyword
//! arguments) is expressed by the variant itself rather than by tagging plain
//! values.

use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::{
    error::{BridgeResult, Error},
    handle::{Handle, Primitive},
};

/// A host value marshalled for a foreign call.
#[derive(Debug, Clone)]
pub enum Arg {
    None,
    Bool(bool),
    Int(i64),
    BigInt(BigInt),
    Float(f64),
    Str(String),
    /// Converted to a foreign list.
    List(Vec<Self>),
    /// Converted to a foreign dict (positional, not keyword arguments).
    Dict(IndexMap<String, Self>),
    /// A foreign handle passed through without conversion.
    Handle(Handle),
    /// Converted to a foreign byte string.
    Bytes(Vec<u8>),
    /// Spread as keyword arguments of the call it appears in.
    Kwargs(IndexMap<String, Self>),
    /// A host function exposed to the foreign side as a callable.
    Callback(HostCallback),
}

impl Arg {
    /// Returns the handle for `Arg::Handle`.
    #[must_use]
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Self::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    /// Splits an argument list into positional arguments and merged keyword arguments.
    ///
    /// Later `Kwargs` entries override earlier ones with the same key.
    #[must_use]
    pub fn split_kwargs(args: Vec<Self>) -> (Vec<Self>, IndexMap<String, Self>) {
        let mut positional = Vec::with_capacity(args.len());
        let mut kwargs = IndexMap::new();
        for arg in args {
            match arg {
                Self::Kwargs(map) => kwargs.extend(map),
                other => positional.push(other),
            }
        }
        (positional, kwargs)
    }
}

/// A host function the foreign runtime can call back into.
///
/// The foreign side passes raw handles; the closure is responsible for wrapping
/// them (see [`Proxy::dispatch`](crate::Proxy::dispatch)).
#[derive(Clone)]
pub struct HostCallback {
    name: String,
    func: Rc<dyn Fn(Vec<Handle>) -> BridgeResult<Arg>>,
}

impl HostCallback {
    pub fn new(name: impl Into<String>, func: impl Fn(Vec<Handle>) -> BridgeResult<Arg> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the host function with the raw foreign arguments.
    pub fn call(&self, args: Vec<Handle>) -> BridgeResult<Arg> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<host function {}>", self.name)
    }
}

/// Marks a foreign handle for direct pass-through.
#[must_use]
pub fn handle(handle: &Handle) -> Arg {
    Arg::Handle(Rc::clone(handle))
}

/// Marks string or byte input for byte-string construction on the foreign side.
#[must_use]
pub fn bytes(data: impl AsRef<[u8]>) -> Arg {
    Arg::Bytes(data.as_ref().to_vec())
}

/// Marks a mapping as keyword arguments.
///
/// Only JSON objects are accepted; any other value is a type error.
pub fn kwargs(value: serde_json::Value) -> BridgeResult<Arg> {
    match value {
        serde_json::Value::Object(map) => Ok(Arg::Kwargs(
            map.into_iter().map(|(key, value)| (key, Arg::from(value))).collect(),
        )),
        other => Err(Error::type_error(format!(
            "kwargs expects an object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Builds keyword arguments from already-marshalled pairs.
pub fn kwargs_from<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Arg
where
    K: Into<String>,
    V: Into<Arg>,
{
    Arg::Kwargs(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<serde_json::Value> for Arg {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::BigInt(BigInt::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => Self::Dict(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<Primitive> for Arg {
    fn from(value: Primitive) -> Self {
        match value {
            Primitive::Bool(b) => Self::Bool(b),
            Primitive::Int(i) => Self::Int(i),
            Primitive::BigInt(i) => Self::BigInt(i),
            Primitive::Float(f) => Self::Float(f),
            Primitive::Str(s) => Self::Str(s),
        }
    }
}

impl From<Handle> for Arg {
    fn from(handle: Handle) -> Self {
        Self::Handle(handle)
    }
}

impl From<&Handle> for Arg {
    fn from(handle: &Handle) -> Self {
        Self::Handle(Rc::clone(handle))
    }
}

impl From<bool> for Arg {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for Arg {
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or_else(|_| Self::BigInt(BigInt::from(i)), Self::Int)
    }
}

impl From<BigInt> for Arg {
    fn from(i: BigInt) -> Self {
        Self::BigInt(i)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<HostCallback> for Arg {
    fn from(callback: HostCallback) -> Self {
        Self::Callback(callback)
    }
}

impl<T: Into<Arg>> From<Option<T>> for Arg {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

impl<T: Into<Arg>> From<Vec<T>> for Arg {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}
