use std::fmt;

use crate::handle::Handle;

/// Error type for every bridge operation.
///
/// Failures raised by the foreign runtime keep their foreign-side exception
/// handles so they can be handed back to the runtime (e.g. to a context
/// manager's `__exit__`). Host-side type-error conditions have no foreign
/// counterpart until the runtime materialises one.
#[derive(Debug, Clone)]
pub enum Error {
    /// The foreign runtime raised an exception.
    Foreign(ForeignException),
    /// A host-side type-error condition, e.g. iterating a handle that is
    /// neither an iterator nor a sequence.
    Type(String),
}

impl Error {
    /// Creates a host-side type error.
    #[must_use]
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    /// Returns the foreign exception if this error was raised by the runtime.
    #[must_use]
    pub fn foreign(&self) -> Option<&ForeignException> {
        match self {
            Self::Foreign(exc) => Some(exc),
            Self::Type(_) => None,
        }
    }

    /// Returns true for host-side type errors.
    #[must_use]
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::Type(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreign(exc) => write!(f, "{exc}"),
            Self::Type(msg) => write!(f, "TypeError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ForeignException> for Error {
    fn from(exc: ForeignException) -> Self {
        Self::Foreign(exc)
    }
}

/// An exception raised inside the foreign runtime.
///
/// Holds the `(type, value, traceback)` triple exactly as the runtime reported
/// it, plus a rendered message for host-side display.
#[derive(Debug, Clone)]
pub struct ForeignException {
    exc_type: Handle,
    value: Handle,
    traceback: Option<Handle>,
    message: String,
}

impl ForeignException {
    #[must_use]
    pub fn new(exc_type: Handle, value: Handle, traceback: Option<Handle>, message: impl Into<String>) -> Self {
        Self {
            exc_type,
            value,
            traceback,
            message: message.into(),
        }
    }

    /// The exception's type object.
    #[must_use]
    pub fn exc_type(&self) -> &Handle {
        &self.exc_type
    }

    /// The exception instance.
    #[must_use]
    pub fn value(&self) -> &Handle {
        &self.value
    }

    /// The traceback, if the runtime supplied one.
    #[must_use]
    pub fn traceback(&self) -> Option<&Handle> {
        self.traceback.as_ref()
    }

    /// Rendered `Type: message` text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ForeignException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result alias used across the crate.
pub type BridgeResult<T> = Result<T, Error>;
