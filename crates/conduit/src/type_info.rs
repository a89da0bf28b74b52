use std::fmt;

use crate::{
    error::{BridgeResult, Error},
    handle::{ForeignHandle, Primitive},
};

/// Type name the runtime reports for its `None` singleton.
pub(crate) const NONE_TYPE_NAME: &str = "NoneType";

/// Type names whose values are unwrapped to host primitives instead of proxied.
pub(crate) const PRIMITIVE_TYPE_NAMES: [&str; 6] = ["int", "int64", "float", "float64", "bool", "str"];

/// The `(module, name)` identity of a foreign value's type.
///
/// Only ever used as a lookup key: the bridge does not reason about foreign
/// type hierarchies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TypeInfo {
    pub module: String,
    pub name: String,
}

impl TypeInfo {
    #[must_use]
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Reads the identity of `handle`'s type through `type_of` and two attribute reads.
    pub fn of(handle: &dyn ForeignHandle) -> BridgeResult<Self> {
        let type_obj = handle.type_of()?;
        let module = string_attr(&*type_obj, "__module__")?;
        let name = string_attr(&*type_obj, "__name__")?;
        Ok(Self { module, name })
    }

    #[must_use]
    pub fn is_none_type(&self) -> bool {
        self.name == NONE_TYPE_NAME
    }

    /// True for the type names that unwrap to host primitives.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        PRIMITIVE_TYPE_NAMES.contains(&self.name.as_str())
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

fn string_attr(type_obj: &dyn ForeignHandle, attr: &str) -> BridgeResult<String> {
    match type_obj.get_attr(attr)?.to_primitive()? {
        Primitive::Str(s) => Ok(s),
        other => Err(Error::type_error(format!("type attribute {attr} is not a string: {other:?}"))),
    }
}
