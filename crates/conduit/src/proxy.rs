//! The dynamic dispatch layer.
//!
//! A [`Proxy`] wraps exactly one foreign handle and resolves every member access
//! against it at runtime. Resolution goes through an explicit interface
//! ([`Proxy::get`], [`Proxy::set`], [`Proxy::call`], [`Proxy::construct`])
//! rather than implicit interception.
//!
//! # Member resolution
//!
//! `get(name)` tries, in order:
//!
//! | Step | Source | Result |
//! |------|--------|--------|
//! | 1 | delegator member, then `$`-prefixed capability | bound method or value |
//! | 2 | `name` is a non-negative integer literal | foreign item-get by index |
//! | 3 | foreign `has_attr(name)` | foreign attribute-get |
//! | 4 | anything else | foreign item-get by name, absent on failure |
//!
//! `set(name, value)` mirrors steps 2-4 with item-set falling back to
//! attribute-set.

use std::{fmt, rc::Rc, str::FromStr};

use tracing::{debug, trace};

use crate::{
    bridge::Bridge,
    error::{BridgeResult, Error},
    handle::{Handle, Status},
    marshal::Arg,
    object::{BoundMethod, Member, Members, Method, Object},
    type_info::TypeInfo,
};

/// The closed set of capability methods every proxy carries.
///
/// Reachable through [`Proxy::get`] under `$<name>` (e.g. `$get_item`) so they
/// never collide with foreign attribute names, and directly as inherent
/// methods of [`Proxy`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::IntoStaticStr, strum::EnumIter, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum Capability {
    /// Returns the raw handle.
    Handle,
    /// Applies a host callable to raw handles after wrapping each one.
    Dispatch,
    /// Invokes the handle with a raw argument list, result unwrapped.
    Invoke,
    ToString,
    /// `(start, end, step)` item-get through a foreign `slice` object.
    Slice,
    Hash,
    HasAttr,
    GetAttr,
    GetItem,
    SetAttr,
    SetItem,
}

impl Capability {
    /// Prefix that selects a capability in [`Proxy::get`].
    pub const PREFIX: char = '$';

    /// Parses a `$`-prefixed member name.
    #[must_use]
    pub fn from_member_name(name: &str) -> Option<Self> {
        Self::from_str(name.strip_prefix(Self::PREFIX)?).ok()
    }

    /// The `$`-prefixed member name.
    #[must_use]
    pub fn member_name(self) -> String {
        format!("{}{}", Self::PREFIX, self.as_str())
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Host-side view of one foreign value.
///
/// Cloning is cheap and shares the underlying handle.
#[derive(Clone)]
pub struct Proxy {
    inner: Rc<ProxyInner>,
}

struct ProxyInner {
    bridge: Bridge,
    handle: Handle,
    type_info: TypeInfo,
    members: Members,
}

impl Proxy {
    pub(crate) fn new(bridge: Bridge, handle: Handle, type_info: TypeInfo, members: Members) -> Self {
        Self {
            inner: Rc::new(ProxyInner {
                bridge,
                handle,
                type_info,
                members,
            }),
        }
    }

    /// The wrapped foreign handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    #[must_use]
    pub fn type_info(&self) -> &TypeInfo {
        &self.inner.type_info
    }

    /// Members added by the delegator.
    #[must_use]
    pub fn members(&self) -> &Members {
        &self.inner.members
    }

    fn wrap(&self, handle: Handle) -> BridgeResult<Object> {
        self.inner.bridge.wrap(handle)
    }

    /// Resolves a member by name.
    ///
    /// `Ok(None)` means the member is absent: the final speculative item lookup
    /// failed. Errors from the earlier index and attribute steps propagate.
    pub fn get(&self, name: &str) -> BridgeResult<Option<Object>> {
        if let Some(member) = self.inner.members.get(name) {
            return Ok(Some(match member {
                Member::Value(value) => value.clone(),
                Member::Method(method) => Object::Method(BoundMethod::member(self.clone(), method.clone())),
            }));
        }
        if let Some(capability) = Capability::from_member_name(name) {
            return Ok(Some(Object::Method(BoundMethod::capability(self.clone(), capability))));
        }

        let handle = &self.inner.handle;
        if let Some(index) = parse_index(name) {
            trace!(name, "get by index");
            return self.wrap(handle.get_item(Arg::Int(index))?).map(Some);
        }
        if handle.has_attr(name) {
            trace!(name, "get by attribute");
            return self.wrap(handle.get_attr(name)?).map(Some);
        }
        match handle.get_item(Arg::Str(name.to_owned())) {
            Ok(value) => self.wrap(value).map(Some),
            Err(err) => {
                trace!(name, error = %err, "member absent");
                Ok(None)
            }
        }
    }

    /// Assigns a member by name and reports whether the foreign side accepted it.
    pub fn set(&self, name: &str, value: impl Into<Arg>) -> bool {
        let value = value.into();
        let handle = &self.inner.handle;
        let status = if let Some(index) = parse_index(name) {
            handle.set_item(Arg::Int(index), value)
        } else if handle.has_attr(name) {
            handle.set_attr(name, value)
        } else {
            let status = handle.set_item(Arg::Str(name.to_owned()), value.clone());
            if status.is_ok() {
                status
            } else {
                trace!(name, "item assignment failed, falling back to attribute");
                handle.set_attr(name, value)
            }
        };
        status.is_ok()
    }

    /// Calls the foreign value with the whole positional list in one invocation.
    pub fn call(&self, args: Vec<Arg>) -> BridgeResult<Object> {
        let result = self.inner.handle.invoke(args)?;
        self.wrap(result)
    }

    /// Calls a foreign method: attribute-get then invoke, result wrapped.
    pub fn call_method(&self, name: &str, args: Vec<Arg>) -> BridgeResult<Object> {
        let method = self.inner.handle.get_attr(name)?;
        self.wrap(method.invoke(args)?)
    }

    /// Builds a new foreign instance and installs `class`'s methods on it.
    ///
    /// The handle is invoked with no arguments, the instance's `__init__` is
    /// called explicitly with no arguments, then every method of `class` is
    /// bound to the instance by the runtime and attribute-set onto it.
    /// Constructor arguments are not forwarded.
    pub fn construct(&self, class: &HostClass) -> BridgeResult<Object> {
        let instance = self.wrap(self.inner.handle.invoke(Vec::new())?)?;
        let Object::Proxy(proxy) = &instance else {
            return Ok(instance);
        };
        proxy.call_method("__init__", Vec::new())?;
        let bridge = &self.inner.bridge;
        for method in class.methods() {
            let bound = bridge
                .runtime()
                .bind_method(method.to_receiver_callback(bridge), proxy.handle())?;
            if !proxy.set_attr(method.name(), Arg::Handle(bound)).is_ok() {
                return Err(Error::type_error(format!(
                    "cannot install method '{}' of {} on {}",
                    method.name(),
                    class.name(),
                    proxy.type_info()
                )));
            }
        }
        debug!(class = class.name(), methods = class.methods().len(), "constructed foreign instance");
        Ok(instance)
    }

    /// Wraps each raw handle and applies the host function `f` to the result.
    pub fn dispatch<R>(&self, f: impl FnOnce(Vec<Object>) -> BridgeResult<R>, args: Vec<Handle>) -> BridgeResult<R> {
        let args = self.inner.bridge.wrap_all(args)?;
        f(args)
    }

    /// Invokes the handle with a raw argument list; the result is not wrapped.
    pub fn invoke(&self, args: Vec<Arg>) -> BridgeResult<Handle> {
        self.inner.handle.invoke(args)
    }

    /// The foreign string conversion.
    pub fn to_str(&self) -> BridgeResult<String> {
        self.inner.handle.to_str()
    }

    /// `self[start:end:step]` through the foreign `slice` builtin.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>, step: Option<i64>) -> BridgeResult<Object> {
        let slice = self
            .inner
            .bridge
            .runtime()
            .builtin("slice")?
            .invoke(vec![start.into(), end.into(), step.into()])?;
        self.wrap(self.inner.handle.get_item(Arg::Handle(slice))?)
    }

    pub fn hash(&self) -> BridgeResult<i64> {
        self.inner.handle.hash()
    }

    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.inner.handle.has_attr(name)
    }

    pub fn get_attr(&self, name: &str) -> BridgeResult<Handle> {
        self.inner.handle.get_attr(name)
    }

    pub fn get_item(&self, key: impl Into<Arg>) -> BridgeResult<Handle> {
        self.inner.handle.get_item(key.into())
    }

    pub fn set_attr(&self, name: &str, value: impl Into<Arg>) -> Status {
        self.inner.handle.set_attr(name, value.into())
    }

    pub fn set_item(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> Status {
        self.inner.handle.set_item(key.into(), value.into())
    }

    /// Length through the foreign `len` builtin.
    pub fn len(&self) -> BridgeResult<usize> {
        self.inner.bridge.len_of(&self.inner.handle)
    }

    pub fn is_empty(&self) -> BridgeResult<bool> {
        self.len().map(|len| len == 0)
    }

    /// Runs a capability with host arguments, as reached through [`Proxy::get`].
    pub(crate) fn call_capability(&self, capability: Capability, args: Vec<Object>) -> BridgeResult<Object> {
        let mut args = CapabilityArgs::new(capability, args);
        match capability {
            Capability::Handle => Ok(Object::Handle(Rc::clone(&self.inner.handle))),
            Capability::Dispatch => {
                let callee = args.required()?;
                let wrapped = args
                    .rest()
                    .into_iter()
                    .map(|arg| match arg {
                        Object::Handle(handle) => self.wrap(handle),
                        other => Ok(other),
                    })
                    .collect::<BridgeResult<Vec<_>>>()?;
                callee.call(wrapped)
            }
            Capability::Invoke => {
                let raw = args.rest().into_iter().map(Arg::from).collect();
                self.invoke(raw).map(Object::Handle)
            }
            Capability::ToString => self.to_str().map(Object::String),
            Capability::Slice => {
                let start = args.optional_int()?;
                let end = args.optional_int()?;
                let step = args.optional_int()?;
                self.slice(start, end, step)
            }
            Capability::Hash => self.hash().map(Object::Int),
            Capability::HasAttr => Ok(Object::Bool(self.has_attr(&args.string()?))),
            Capability::GetAttr => self.get_attr(&args.string()?).map(Object::Handle),
            Capability::GetItem => self.get_item(args.required()?).map(Object::Handle),
            Capability::SetAttr => {
                let name = args.string()?;
                let value = args.required()?;
                Ok(Object::Int(i64::from(self.set_attr(&name, value).code())))
            }
            Capability::SetItem => {
                let key = args.required()?;
                let value = args.required()?;
                Ok(Object::Int(i64::from(self.set_item(key, value).code())))
            }
        }
    }
}

/// Displays through the foreign string conversion (the inspection hook).
impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_str() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{} object>", self.inner.type_info),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proxy({}: {self})", self.inner.type_info)
    }
}

/// Parses a non-negative integer literal member name.
fn parse_index(name: &str) -> Option<i64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Positional argument reader for capability calls.
struct CapabilityArgs {
    capability: Capability,
    args: std::vec::IntoIter<Object>,
}

impl CapabilityArgs {
    fn new(capability: Capability, args: Vec<Object>) -> Self {
        Self {
            capability,
            args: args.into_iter(),
        }
    }

    fn required(&mut self) -> BridgeResult<Object> {
        self.args
            .next()
            .ok_or_else(|| Error::type_error(format!("{} missing a required argument", self.capability.member_name())))
    }

    fn string(&mut self) -> BridgeResult<String> {
        match self.required()? {
            Object::String(s) => Ok(s),
            other => Err(Error::type_error(format!(
                "{} expects a str name, got {}",
                self.capability.member_name(),
                other.type_name()
            ))),
        }
    }

    fn optional_int(&mut self) -> BridgeResult<Option<i64>> {
        match self.args.next() {
            None | Some(Object::None) => Ok(None),
            Some(Object::Int(i)) => Ok(Some(i)),
            Some(other) => Err(Error::type_error(format!(
                "{} expects int or None, got {}",
                self.capability.member_name(),
                other.type_name()
            ))),
        }
    }

    fn rest(self) -> Vec<Object> {
        self.args.collect()
    }
}

/// A host-side class whose methods are installed on instances built by
/// [`Proxy::construct`], making them visible from the foreign side.
#[derive(Debug, Clone, Default)]
pub struct HostClass {
    name: String,
    methods: Vec<Method>,
}

impl HostClass {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Adds a method; its receiver is the constructed instance.
    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<String>,
        func: impl Fn(&Proxy, Vec<Object>) -> BridgeResult<Object> + 'static,
    ) -> Self {
        self.methods.push(Method::new(name, func));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }
}
