#![doc = include_str!("../../../README.md")]
mod bridge;
mod delegator;
mod error;
mod eval;
mod handle;
mod iter;
pub mod launcher;
pub mod marshal;
pub mod memory;
mod object;
mod options;
mod proxy;
#[cfg(feature = "python")]
pub mod python;
mod scope;
mod type_info;

pub use crate::{
    bridge::Bridge,
    delegator::{Delegator, DelegatorFn, DelegatorKey, DelegatorRegistry},
    error::{BridgeResult, Error, ForeignException},
    eval::Source,
    handle::{ForeignHandle, ForeignRuntime, Handle, Primitive, Status, Step},
    iter::ProxyIter,
    marshal::{Arg, HostCallback},
    object::{BoundMethod, Member, Members, Method, MethodFn, Object},
    options::{BridgeOptions, DEFAULT_INTERPOLATION_PREFIX},
    proxy::{Capability, HostClass, Proxy},
    scope::{ScopeGuard, ScopeOutcome, with_scope, with_scope_async, with_scope_object},
    type_info::TypeInfo,
};
