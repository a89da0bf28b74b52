//! The foreign scoped-resource (context manager) protocol.
//!
//! [`with_scope`] runs a host callback between the context's `__enter__` and
//! `__exit__`. A [`ScopeGuard`] owns the exit step, so `__exit__` runs exactly
//! once on every path: normal completion, an error from `__enter__` or the
//! callback, and unwinding.
//!
//! Instead of re-raising implicitly, the result spells out what happened:
//!
//! | Callback | `__exit__` returns | Outcome |
//! |----------|--------------------|---------|
//! | `Ok(v)` | (ignored) | [`ScopeOutcome::Completed`] |
//! | `Err(e)` | truthy | [`ScopeOutcome::Handled`] |
//! | `Err(e)` | falsy | [`ScopeOutcome::Unhandled`] |

use std::future::Future;

use tracing::{debug, warn};

use crate::{
    error::{BridgeResult, Error, ForeignException},
    marshal::{self, Arg},
    object::Object,
    proxy::Proxy,
};

/// How a scoped callback finished.
#[derive(Debug)]
pub enum ScopeOutcome<T> {
    /// The callback returned normally.
    Completed(T),
    /// The callback failed and `__exit__` suppressed the error.
    Handled(Error),
    /// The callback failed and `__exit__` did not suppress the error.
    Unhandled(Error),
}

impl<T> ScopeOutcome<T> {
    /// Collapses the outcome: unhandled errors are returned unchanged, handled
    /// ones disappear.
    pub fn into_result(self) -> BridgeResult<Option<T>> {
        match self {
            Self::Completed(value) => Ok(Some(value)),
            Self::Handled(_) => Ok(None),
            Self::Unhandled(error) => Err(error),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    #[must_use]
    pub fn is_unhandled(&self) -> bool {
        matches!(self, Self::Unhandled(_))
    }
}

/// Owns the `__exit__` call of one scope.
///
/// Dropping a guard that was not finished calls `__exit__(None, None, None)`.
#[derive(Debug)]
pub struct ScopeGuard {
    ctx: Proxy,
    exited: bool,
}

impl ScopeGuard {
    /// Checks the context protocol and arms the guard.
    pub fn new(ctx: &Proxy) -> BridgeResult<Self> {
        if !ctx.has_attr("__enter__") || !ctx.has_attr("__exit__") {
            return Err(Error::type_error(format!(
                "'{}' object does not support the context manager protocol",
                ctx.type_info().name
            )));
        }
        Ok(Self {
            ctx: ctx.clone(),
            exited: false,
        })
    }

    /// Calls `__enter__` and returns the scoped value.
    pub fn enter(&self) -> BridgeResult<Object> {
        self.ctx.call_method("__enter__", Vec::new())
    }

    /// Calls `__exit__` for the given callback result and classifies it.
    pub fn finish<T>(mut self, result: BridgeResult<T>) -> BridgeResult<ScopeOutcome<T>> {
        match result {
            Ok(value) => {
                self.exit(none_triple())?;
                Ok(ScopeOutcome::Completed(value))
            }
            Err(error) => {
                let Some(exc) = self.materialize(&error) else {
                    // nothing foreign can stand for the error; exit still runs once
                    self.exit(none_triple())?;
                    return Ok(ScopeOutcome::Unhandled(error));
                };
                let triple = vec![
                    marshal::handle(exc.exc_type()),
                    marshal::handle(exc.value()),
                    exc.traceback().map_or(Arg::None, marshal::handle),
                ];
                let handled = self.exit(triple)?.is_truthy();
                debug!(handled, error = %error, "scope exited with error");
                Ok(if handled {
                    ScopeOutcome::Handled(error)
                } else {
                    ScopeOutcome::Unhandled(error)
                })
            }
        }
    }

    /// The foreign exception handed to `__exit__` for `error`.
    ///
    /// When the runtime cannot materialize `error` itself, a type error carrying
    /// its message is tried instead.
    fn materialize(&self, error: &Error) -> Option<ForeignException> {
        let runtime = self.ctx.bridge().runtime();
        match runtime.materialize(error) {
            Ok(exc) => Some(exc),
            Err(failure) => {
                warn!(error = %error, failure = %failure, "cannot materialize scope error, falling back to TypeError");
                runtime
                    .materialize(&Error::type_error(error.to_string()))
                    .inspect_err(|failure| warn!(failure = %failure, "cannot materialize fallback TypeError"))
                    .ok()
            }
        }
    }

    /// Calls `__exit__` unless it already ran.
    fn exit(&mut self, triple: Vec<Arg>) -> BridgeResult<Object> {
        debug_assert!(!self.exited, "__exit__ called twice");
        self.exited = true;
        self.ctx.call_method("__exit__", triple)
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.exited
            && let Err(error) = self.exit(none_triple())
        {
            warn!(error = %error, "__exit__ failed while dropping scope guard");
        }
    }
}

fn none_triple() -> Vec<Arg> {
    vec![Arg::None, Arg::None, Arg::None]
}

/// Runs `f` inside the context manager `ctx`.
///
/// `Err` is returned when `ctx` does not implement the protocol or when
/// `__exit__` itself fails; callback failures are reported through the outcome.
pub fn with_scope<T>(ctx: &Proxy, f: impl FnOnce(Object) -> BridgeResult<T>) -> BridgeResult<ScopeOutcome<T>> {
    let guard = ScopeGuard::new(ctx)?;
    let result = guard.enter().and_then(f);
    guard.finish(result)
}

/// Async form of [`with_scope`].
///
/// The only suspension points are those of the future `f` returns.
pub async fn with_scope_async<T, F, Fut>(ctx: &Proxy, f: F) -> BridgeResult<ScopeOutcome<T>>
where
    F: FnOnce(Object) -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let guard = ScopeGuard::new(ctx)?;
    let result = match guard.enter() {
        Ok(value) => f(value).await,
        Err(error) => Err(error),
    };
    guard.finish(result)
}

/// Runs a host-side callable object inside `ctx`.
///
/// A non-callable `callback` still triggers `__exit__(None, None, None)` before
/// the type error is returned.
pub fn with_scope_object(ctx: &Proxy, callback: &Object) -> BridgeResult<ScopeOutcome<Object>> {
    let mut guard = ScopeGuard::new(ctx)?;
    if !callback.is_callable() {
        guard.exit(none_triple())?;
        return Err(Error::type_error(format!(
            "scope callback must be callable, got {}",
            callback.type_name()
        )));
    }
    let result = guard.enter().and_then(|value| callback.call(vec![value]));
    guard.finish(result)
}
