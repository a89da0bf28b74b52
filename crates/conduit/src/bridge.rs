use std::{
    cell::OnceCell,
    fmt,
    rc::{Rc, Weak},
};

use tracing::trace;

use crate::{
    delegator::{DelegatorKey, DelegatorRegistry},
    error::{BridgeResult, Error},
    handle::{ForeignRuntime, Handle, Primitive},
    marshal::Arg,
    object::{Members, Object},
    options::BridgeOptions,
    proxy::Proxy,
    type_info::TypeInfo,
};

/// Entry point of the bridge: owns the runtime, options and delegator registry,
/// and turns foreign handles into host [`Object`]s.
///
/// Cheap to clone; every proxy keeps a clone so it can wrap the values it
/// returns.
#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

struct BridgeInner {
    runtime: Rc<dyn ForeignRuntime>,
    options: BridgeOptions,
    loader: Box<dyn Fn() -> DelegatorRegistry>,
    registry: OnceCell<DelegatorRegistry>,
}

impl Bridge {
    /// Creates a bridge with default options and the built-in delegators.
    pub fn new(runtime: impl ForeignRuntime + 'static) -> Self {
        Self::with_options(runtime, BridgeOptions::default())
    }

    pub fn with_options(runtime: impl ForeignRuntime + 'static, options: BridgeOptions) -> Self {
        Self::with_loader(Rc::new(runtime), options, DelegatorRegistry::load)
    }

    /// Creates a bridge whose delegator registry comes from `loader`.
    ///
    /// The loader runs once, the first time a handle is wrapped.
    pub fn with_loader(
        runtime: Rc<dyn ForeignRuntime>,
        options: BridgeOptions,
        loader: impl Fn() -> DelegatorRegistry + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                runtime,
                options,
                loader: Box::new(loader),
                registry: OnceCell::new(),
            }),
        }
    }

    #[must_use]
    pub fn runtime(&self) -> &dyn ForeignRuntime {
        &*self.inner.runtime
    }

    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// The delegator registry, loaded on first access.
    #[must_use]
    pub fn registry(&self) -> &DelegatorRegistry {
        self.inner.registry.get_or_init(|| (self.inner.loader)())
    }

    /// Converts a foreign handle into a host value.
    ///
    /// `NoneType` maps to [`Object::None`], primitive-producing types are
    /// unwrapped, and everything else becomes a fresh [`Proxy`] carrying the
    /// members of its delegator. Proxies are not cached per handle.
    pub fn wrap(&self, handle: Handle) -> BridgeResult<Object> {
        let info = TypeInfo::of(&*handle)?;
        if info.is_none_type() {
            return Ok(Object::None);
        }
        if info.is_primitive() {
            return Ok(handle.to_primitive()?.into());
        }

        let registry = self.registry();
        let callable = handle.is_callable();
        let delegator = callable
            .then(|| registry.get(&DelegatorKey::Callee))
            .flatten()
            .or_else(|| registry.get(&DelegatorKey::Type(info.clone())))
            .or_else(|| registry.get(&DelegatorKey::Default));
        let members = match delegator {
            Some(delegator) => delegator.build(&handle, self)?,
            None => Members::new(),
        };
        trace!(type_info = %info, callable, members = members.len(), "wrapping handle in proxy");
        Ok(Object::Proxy(Proxy::new(self.clone(), handle, info, members)))
    }

    /// Like [`wrap`](Self::wrap), with an absent handle passed through as `None`.
    pub fn wrap_optional(&self, handle: Option<Handle>) -> BridgeResult<Object> {
        handle.map_or(Ok(Object::None), |handle| self.wrap(handle))
    }

    /// Wraps every handle of an argument list.
    pub fn wrap_all(&self, handles: Vec<Handle>) -> BridgeResult<Vec<Object>> {
        handles.into_iter().map(|handle| self.wrap(handle)).collect()
    }

    /// Imports a foreign module and wraps it.
    pub fn import(&self, module: &str) -> BridgeResult<Object> {
        let handle = self.runtime().import(module)?;
        self.wrap(handle)
    }

    /// Looks up a foreign builtin and wraps it.
    pub fn builtin(&self, name: &str) -> BridgeResult<Object> {
        let handle = self.runtime().builtin(name)?;
        self.wrap(handle)
    }

    /// The shared global namespace, wrapped.
    pub fn globals(&self) -> BridgeResult<Object> {
        self.wrap(self.runtime().globals())
    }

    /// Length of a handle through the foreign `len` builtin.
    pub(crate) fn len_of(&self, handle: &Handle) -> BridgeResult<usize> {
        let len = self.runtime().builtin("len")?.invoke(vec![Arg::Handle(Rc::clone(handle))])?;
        match len.to_primitive()? {
            Primitive::Int(n) => {
                usize::try_from(n).map_err(|_| Error::type_error(format!("len() returned negative length {n}")))
            }
            other => Err(Error::type_error(format!("len() returned a non-integer: {other:?}"))),
        }
    }
}

/// A non-owning reference to a [`Bridge`], for host state stored inside
/// foreign objects.
#[derive(Clone)]
pub(crate) struct WeakBridge(Weak<BridgeInner>);

impl WeakBridge {
    pub(crate) fn upgrade(&self) -> Option<Bridge> {
        self.0.upgrade().map(|inner| Bridge { inner })
    }
}

impl Bridge {
    pub(crate) fn downgrade(&self) -> WeakBridge {
        WeakBridge(Rc::downgrade(&self.inner))
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("runtime", &self.inner.runtime)
            .field("options", &self.inner.options)
            .field("registry_loaded", &self.inner.registry.get().is_some())
            .finish()
    }
}
