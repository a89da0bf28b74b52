//! Contracts every foreign runtime integration implements.
//!
//! The bridge never inspects foreign memory directly. Everything it knows about
//! a foreign value goes through the fixed primitive set of [`ForeignHandle`];
//! everything it needs from the runtime as a whole (builtins, the global
//! namespace, `exec`) goes through [`ForeignRuntime`].

use std::{any::Any, fmt, rc::Rc};

use num_bigint::BigInt;

use crate::{
    error::{BridgeResult, Error, ForeignException},
    marshal::{Arg, HostCallback},
};

/// Shared reference to a foreign value.
///
/// Cloning takes another host-side reference; the foreign object stays alive for
/// as long as any clone does, on top of whatever the runtime's own reference
/// model does.
pub type Handle = Rc<dyn ForeignHandle>;

/// Sentinel returned by foreign mutation primitives.
///
/// Mirrors the runtime's C-level convention: `-1` signals failure, anything
/// else success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Status(i32);

impl Status {
    /// The failure sentinel.
    pub const FAILURE: Self = Self(-1);
    /// The conventional success code.
    pub const OK: Self = Self(0);

    pub fn new(code: i32) -> Self {
        Self(code)
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self.0
    }

    /// Non-failure means success.
    #[must_use]
    pub fn is_ok(self) -> bool {
        self != Self::FAILURE
    }
}

impl From<bool> for Status {
    fn from(ok: bool) -> Self {
        if ok { Self::OK } else { Self::FAILURE }
    }
}

/// One step of the foreign iterator protocol.
#[derive(Debug, Clone)]
pub enum Step {
    Yield(Handle),
    Done,
}

/// Result of a handle's to-primitive conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Bool(bool),
    Int(i64),
    /// Integers that do not fit in 64 bits.
    BigInt(BigInt),
    Float(f64),
    Str(String),
}

/// The primitive operation set of one foreign value.
///
/// Implementations translate each call into the runtime's own API and report
/// runtime exceptions as [`Error::Foreign`]. Capability checks (`is_*`,
/// `has_attr`) never fail; a check that cannot be answered reports `false`.
pub trait ForeignHandle: fmt::Debug {
    /// Returns the value's type object.
    fn type_of(&self) -> BridgeResult<Handle>;

    /// Converts a primitive-producing value (bool, int, float, str) to host form.
    fn to_primitive(&self) -> BridgeResult<Primitive>;

    /// Invokes the value with a positional argument list. `Arg::Kwargs` entries
    /// become keyword arguments.
    fn invoke(&self, args: Vec<Arg>) -> BridgeResult<Handle>;

    /// The runtime's string conversion (`str(x)`).
    fn to_str(&self) -> BridgeResult<String>;

    fn is_callable(&self) -> bool;

    fn is_iterator(&self) -> bool;

    fn is_sequence(&self) -> bool;

    /// Advances an iterator by one step.
    fn next(&self) -> BridgeResult<Step>;

    fn hash(&self) -> BridgeResult<i64>;

    fn has_attr(&self, name: &str) -> bool;

    fn get_attr(&self, name: &str) -> BridgeResult<Handle>;

    fn set_attr(&self, name: &str, value: Arg) -> Status;

    fn get_item(&self, key: Arg) -> BridgeResult<Handle>;

    fn set_item(&self, key: Arg, value: Arg) -> Status;

    /// Lets a runtime recover its own concrete handle type from a [`Handle`],
    /// e.g. to unwrap `Arg::Handle` arguments. Foreign code never sees this.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// Runtime-wide services the bridge needs beyond single handles.
pub trait ForeignRuntime: fmt::Debug {
    /// Looks up a builtin by name, e.g. `slice` or `len`.
    fn builtin(&self, name: &str) -> BridgeResult<Handle>;

    /// The shared, process-wide global namespace (a mapping).
    fn globals(&self) -> Handle;

    /// Imports a module by dotted name.
    fn import(&self, module: &str) -> BridgeResult<Handle>;

    /// Executes source text with the given globals and locals mappings and
    /// returns the resulting value (the runtime's `None` when there is none).
    fn exec(&self, source: &str, globals: &Handle, locals: &Handle) -> BridgeResult<Handle>;

    /// Binds a host function to `receiver` the way the runtime binds methods:
    /// every call of the returned value passes the foreign receiver as the
    /// first argument.
    ///
    /// The binding must refer to the foreign object itself, not to the host
    /// handle, since hosts routinely drop their handles while the object lives on.
    fn bind_method(&self, function: HostCallback, receiver: &Handle) -> BridgeResult<Handle>;

    /// Produces a foreign exception triple for a host-side error so it can be
    /// passed to foreign code such as `__exit__`.
    ///
    /// Foreign errors are returned as-is.
    fn materialize(&self, error: &Error) -> BridgeResult<ForeignException>;
}
