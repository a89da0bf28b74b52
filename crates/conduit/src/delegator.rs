//! Per-type convenience members for proxies.
//!
//! A delegator is a factory that, given a freshly wrapped handle, returns extra
//! members merged into its proxy before any dynamic lookup happens. Lookup is an
//! ordinary map access keyed by [`TypeInfo`]; the two literal keys `callee` and
//! `default` cover callables without a specific entry and everything else.

use std::{fmt, rc::Rc};

use ahash::AHashMap;

use crate::{
    bridge::Bridge,
    error::BridgeResult,
    handle::Handle,
    object::{Member, Members, Method, Object},
    type_info::TypeInfo,
};

/// Signature of a delegator factory.
pub type DelegatorFn = dyn Fn(&Handle, &Bridge) -> BridgeResult<Members>;

/// A registered factory of extra proxy members.
#[derive(Clone)]
pub struct Delegator(Rc<DelegatorFn>);

impl Delegator {
    pub fn new(factory: impl Fn(&Handle, &Bridge) -> BridgeResult<Members> + 'static) -> Self {
        Self(Rc::new(factory))
    }

    /// Runs the factory for one handle.
    pub fn build(&self, handle: &Handle, bridge: &Bridge) -> BridgeResult<Members> {
        (self.0)(handle, bridge)
    }
}

impl fmt::Debug for Delegator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Delegator(..)")
    }
}

/// Key of a delegator lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DelegatorKey {
    Type(TypeInfo),
    /// Any callable handle without a more specific delegator.
    Callee,
    /// Fallback for everything else.
    Default,
}

impl From<TypeInfo> for DelegatorKey {
    fn from(info: TypeInfo) -> Self {
        Self::Type(info)
    }
}

/// Registry of delegators.
///
/// Each [`Bridge`] loads its registry once, on first use, from its loader
/// (by default [`DelegatorRegistry::load`]).
#[derive(Debug, Clone, Default)]
pub struct DelegatorRegistry {
    by_type: AHashMap<TypeInfo, Delegator>,
    callee: Option<Delegator>,
    default: Option<Delegator>,
}

type Factory = fn(&Handle, &Bridge) -> BridgeResult<Members>;

/// Built-in type delegators.
const BUILTIN_DELEGATORS: &[(&str, &str, Factory)] = &[
    ("builtins", "list", sequence_members),
    ("builtins", "tuple", sequence_members),
    ("builtins", "dict", mapping_members),
];

impl DelegatorRegistry {
    /// An empty registry; every lookup misses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in table plus the `callee` and `default` entries.
    #[must_use]
    pub fn load() -> Self {
        let mut registry = Self::new();
        for (module, name, factory) in BUILTIN_DELEGATORS {
            registry.register(TypeInfo::new(*module, *name), Delegator::new(*factory));
        }
        registry.set_callee(Delegator::new(callee_members));
        registry.set_default(Delegator::new(|_, _| Ok(Members::new())));
        registry
    }

    /// Registers a delegator for a type identity, replacing any existing one.
    pub fn register(&mut self, info: TypeInfo, delegator: Delegator) -> &mut Self {
        self.by_type.insert(info, delegator);
        self
    }

    pub fn set_callee(&mut self, delegator: Delegator) -> &mut Self {
        self.callee = Some(delegator);
        self
    }

    pub fn set_default(&mut self, delegator: Delegator) -> &mut Self {
        self.default = Some(delegator);
        self
    }

    /// Looks up a delegator. `None` means the caller should fall back to `default`.
    #[must_use]
    pub fn get(&self, key: &DelegatorKey) -> Option<&Delegator> {
        match key {
            DelegatorKey::Type(info) => self.by_type.get(info),
            DelegatorKey::Callee => self.callee.as_ref(),
            DelegatorKey::Default => self.default.as_ref(),
        }
    }

    /// Number of type-keyed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

fn len_method() -> Method {
    Method::new("len", |proxy, _args| {
        let len = proxy.len()?;
        Ok(i64::try_from(len).map_or_else(|_| Object::BigInt(len.into()), Object::Int))
    })
}

fn sequence_members(_handle: &Handle, _bridge: &Bridge) -> BridgeResult<Members> {
    let mut members = Members::new();
    members.insert("len".to_owned(), Member::Method(len_method()));
    Ok(members)
}

fn mapping_members(_handle: &Handle, _bridge: &Bridge) -> BridgeResult<Members> {
    let mut members = Members::new();
    members.insert("len".to_owned(), Member::Method(len_method()));
    members.insert(
        "keys".to_owned(),
        Member::Method(Method::new("keys", |proxy, _args| proxy.call_method("keys", Vec::new()))),
    );
    Ok(members)
}

fn callee_members(handle: &Handle, bridge: &Bridge) -> BridgeResult<Members> {
    let mut members = Members::new();
    if handle.has_attr("__name__") {
        let name = bridge.wrap(handle.get_attr("__name__")?)?;
        members.insert("name".to_owned(), Member::Value(name));
    }
    Ok(members)
}
