use std::{iter::FusedIterator, rc::Rc};

use crate::{
    bridge::Bridge,
    error::{BridgeResult, Error},
    handle::{Handle, Step},
    marshal::Arg,
    object::Object,
    proxy::Proxy,
};

/// Host iteration over a proxy.
///
/// Handles that report the iterator capability are stepped with `next`;
/// handles that report the sequence capability are indexed with a cursor, and
/// the length is re-queried on every step so mutation during iteration is
/// observed. Every produced value is wrapped.
///
/// The iterator is fused: after completion or the first error it yields `None`.
#[derive(Debug)]
pub struct ProxyIter {
    bridge: Bridge,
    handle: Handle,
    state: IterState,
}

#[derive(Debug)]
enum IterState {
    Iterator,
    Sequence { cursor: usize },
    /// Iteration could not start; the error is yielded once.
    Failed(Error),
    Finished,
}

impl ProxyIter {
    fn new(proxy: &Proxy) -> Self {
        let handle = Rc::clone(proxy.handle());
        let state = if handle.is_iterator() {
            IterState::Iterator
        } else if handle.is_sequence() {
            IterState::Sequence { cursor: 0 }
        } else {
            IterState::Failed(Error::type_error(format!(
                "'{}' object is neither iterable nor a sequence",
                proxy.type_info().name
            )))
        };
        Self {
            bridge: proxy.bridge().clone(),
            handle,
            state,
        }
    }

    /// Current sequence cursor; `None` for foreign iterators or once finished.
    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        match self.state {
            IterState::Sequence { cursor } => Some(cursor),
            _ => None,
        }
    }

    fn fail(&mut self, error: Error) -> Option<BridgeResult<Object>> {
        self.state = IterState::Finished;
        Some(Err(error))
    }
}

impl Iterator for ProxyIter {
    type Item = BridgeResult<Object>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, IterState::Finished) {
            IterState::Finished => None,
            IterState::Failed(error) => Some(Err(error)),
            IterState::Iterator => match self.handle.next() {
                Ok(Step::Yield(value)) => match self.bridge.wrap(value) {
                    Ok(value) => {
                        self.state = IterState::Iterator;
                        Some(Ok(value))
                    }
                    Err(error) => self.fail(error),
                },
                Ok(Step::Done) => None,
                Err(error) => self.fail(error),
            },
            IterState::Sequence { cursor } => {
                let len = match self.bridge.len_of(&self.handle) {
                    Ok(len) => len,
                    Err(error) => return self.fail(error),
                };
                if cursor >= len {
                    return None;
                }
                match self
                    .handle
                    .get_item(Arg::from(cursor))
                    .and_then(|value| self.bridge.wrap(value))
                {
                    Ok(value) => {
                        self.state = IterState::Sequence { cursor: cursor + 1 };
                        Some(Ok(value))
                    }
                    Err(error) => self.fail(error),
                }
            }
        }
    }
}

impl FusedIterator for ProxyIter {}

impl Proxy {
    /// Starts host iteration.
    ///
    /// Fails with a type error when the handle is neither an iterator nor a
    /// sequence.
    pub fn iter(&self) -> BridgeResult<ProxyIter> {
        let mut iter = ProxyIter::new(self);
        match std::mem::replace(&mut iter.state, IterState::Finished) {
            IterState::Failed(error) => Err(error),
            state => {
                iter.state = state;
                Ok(iter)
            }
        }
    }
}

/// Iterating `&proxy` yields the type error as the single item when the
/// handle cannot be iterated.
impl IntoIterator for &Proxy {
    type Item = BridgeResult<Object>;
    type IntoIter = ProxyIter;

    fn into_iter(self) -> Self::IntoIter {
        ProxyIter::new(self)
    }
}
