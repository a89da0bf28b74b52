use std::{
    fmt,
    rc::Rc,
};

use indexmap::IndexMap;
use num_bigint::{BigInt, Sign};

use crate::{
    error::{BridgeResult, Error},
    bridge::Bridge,
    handle::{Handle, Primitive},
    marshal::{Arg, HostCallback},
    proxy::{Capability, Proxy},
};

/// A foreign value as seen from the host.
///
/// Produced by [`Bridge::wrap`](crate::Bridge::wrap): primitive-producing foreign
/// values arrive as plain host values, the foreign `None` as [`Object::None`],
/// and everything else as a [`Proxy`].
///
/// `Handle` only appears as the result of the raw passthrough capabilities
/// (`$handle`, `$invoke`, `$get_attr`, `$get_item`), which deliberately skip
/// wrapping.
#[derive(Debug, Clone)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    /// Integers larger than i64.
    BigInt(BigInt),
    Float(f64),
    String(String),
    Proxy(Proxy),
    /// A delegator member or capability bound to its proxy.
    Method(BoundMethod),
    /// An unwrapped foreign handle.
    Handle(Handle),
}

impl Object {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Truth value following the foreign runtime's rules for primitives.
    ///
    /// Proxies, methods and raw handles are always truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(i) => i.sign() != Sign::NoSign,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Proxy(_) | Self::Method(_) | Self::Handle(_) => true,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Self::Proxy(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "str",
            Self::Proxy(_) => "proxy",
            Self::Method(_) => "method",
            Self::Handle(_) => "handle",
        }
    }

    /// True for bound methods and proxies whose handle reports itself callable.
    #[must_use]
    pub fn is_callable(&self) -> bool {
        match self {
            Self::Method(_) => true,
            Self::Proxy(proxy) => proxy.handle().is_callable(),
            Self::Handle(handle) => handle.is_callable(),
            _ => false,
        }
    }

    /// Calls a callable object with host arguments.
    pub fn call(&self, args: Vec<Self>) -> BridgeResult<Self> {
        match self {
            Self::Method(method) => method.call(args),
            Self::Proxy(proxy) => proxy.call(args.into_iter().map(Arg::from).collect()),
            other => Err(Error::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Proxy(proxy) => write!(f, "{proxy}"),
            Self::Method(method) => write!(f, "<bound method {}>", method.name()),
            Self::Handle(handle) => write!(f, "<handle {handle:?}>"),
        }
    }
}

/// Primitives compare by value, proxies and handles by foreign identity.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Proxy(a), Self::Proxy(b)) => same_handle(a.handle(), b.handle()),
            (Self::Handle(a), Self::Handle(b)) => same_handle(a, b),
            _ => false,
        }
    }
}

pub(crate) fn same_handle(a: &Handle, b: &Handle) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl From<Primitive> for Object {
    fn from(value: Primitive) -> Self {
        match value {
            Primitive::Bool(b) => Self::Bool(b),
            Primitive::Int(i) => Self::Int(i),
            Primitive::BigInt(i) => Self::BigInt(i),
            Primitive::Float(f) => Self::Float(f),
            Primitive::Str(s) => Self::String(s),
        }
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Object {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Object {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Object> for Arg {
    fn from(value: Object) -> Self {
        match value {
            Object::None => Self::None,
            Object::Bool(b) => Self::Bool(b),
            Object::Int(i) => Self::Int(i),
            Object::BigInt(i) => Self::BigInt(i),
            Object::Float(f) => Self::Float(f),
            Object::String(s) => Self::Str(s),
            Object::Proxy(proxy) => Self::Handle(Rc::clone(proxy.handle())),
            Object::Handle(handle) => Self::Handle(handle),
            Object::Method(method) => Self::Callback(method.to_callback()),
        }
    }
}

/// Signature of host-side methods: receiver proxy plus wrapped arguments.
pub type MethodFn = dyn Fn(&Proxy, Vec<Object>) -> BridgeResult<Object>;

/// A named host function that runs with a proxy as its receiver.
///
/// Used for delegator members and for methods a [`HostClass`](crate::HostClass)
/// installs on foreign instances.
#[derive(Clone)]
pub struct Method {
    name: String,
    func: Rc<MethodFn>,
}

impl Method {
    pub fn new(name: impl Into<String>, func: impl Fn(&Proxy, Vec<Object>) -> BridgeResult<Object> + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, receiver: &Proxy, args: Vec<Object>) -> BridgeResult<Object> {
        (self.func)(receiver, args)
    }

    /// Exposes the method to foreign code as a plain function whose first
    /// argument is the receiver, ready for [`ForeignRuntime::bind_method`].
    ///
    /// The bridge is held weakly: the callback usually ends up stored on a
    /// foreign object the bridge can reach.
    ///
    /// [`ForeignRuntime::bind_method`]: crate::ForeignRuntime::bind_method
    pub(crate) fn to_receiver_callback(&self, bridge: &Bridge) -> HostCallback {
        let method = self.clone();
        let bridge = bridge.downgrade();
        HostCallback::new(self.name.clone(), move |raw| {
            let bridge = bridge
                .upgrade()
                .ok_or_else(|| Error::type_error(format!("bridge of {} was dropped", method.name)))?;
            let mut raw = raw.into_iter();
            let receiver = raw
                .next()
                .ok_or_else(|| Error::type_error(format!("{}() missing its receiver", method.name)))?;
            let Object::Proxy(receiver) = bridge.wrap(receiver)? else {
                return Err(Error::type_error(format!("receiver of {} is not an object", method.name)));
            };
            let args = bridge.wrap_all(raw.collect())?;
            method.call(&receiver, args).map(Arg::from)
        })
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({})", self.name)
    }
}

/// One extra member a delegator adds to a proxy.
#[derive(Debug, Clone)]
pub enum Member {
    Value(Object),
    Method(Method),
}

/// Delegator-supplied members, in declaration order.
pub type Members = IndexMap<String, Member>;

/// A method resolved through [`Proxy::get`], bound to that proxy.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    receiver: Proxy,
    kind: MethodKind,
}

#[derive(Debug, Clone)]
enum MethodKind {
    Member(Method),
    Capability(Capability),
}

impl BoundMethod {
    pub(crate) fn member(receiver: Proxy, method: Method) -> Self {
        Self {
            receiver,
            kind: MethodKind::Member(method),
        }
    }

    pub(crate) fn capability(receiver: Proxy, capability: Capability) -> Self {
        Self {
            receiver,
            kind: MethodKind::Capability(capability),
        }
    }

    #[must_use]
    pub fn receiver(&self) -> &Proxy {
        &self.receiver
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            MethodKind::Member(method) => method.name(),
            MethodKind::Capability(capability) => capability.as_str(),
        }
    }

    /// Returns the capability this method dispatches to, if it is one.
    #[must_use]
    pub fn as_capability(&self) -> Option<Capability> {
        match &self.kind {
            MethodKind::Capability(capability) => Some(*capability),
            MethodKind::Member(_) => None,
        }
    }

    pub fn call(&self, args: Vec<Object>) -> BridgeResult<Object> {
        match &self.kind {
            MethodKind::Member(method) => method.call(&self.receiver, args),
            MethodKind::Capability(capability) => self.receiver.call_capability(*capability, args),
        }
    }

    /// Exposes this bound method to foreign code.
    pub(crate) fn to_callback(&self) -> HostCallback {
        let bound = self.clone();
        HostCallback::new(self.name().to_owned(), move |raw| {
            let args = bound.receiver.bridge().wrap_all(raw)?;
            bound.call(args).map(Arg::from)
        })
    }
}
