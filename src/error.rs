use std::any::Any;
use std::error::Error as StdError;
use std::io;

use thiserror::Error;

/// Any error an executor may reject with.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Why a [`Context`](crate::Context) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// The failure side of every promise outcome.
#[derive(Debug, Error)]
pub enum Error {
    /// The context that was being waited on is done.
    #[error(transparent)]
    Context(#[from] ContextError),
    /// An executor rejected with its own error.
    #[error("{0}")]
    Rejected(BoxError),
    /// The executor returned without settling its promise.
    #[error("neither reject nor resolve has been called")]
    NotFulfilled,
    /// `resolve_any` was handed a value of the wrong type.
    #[error("type of data is {received}, illegal for {expected}")]
    TypeMismatch {
        received: &'static str,
        expected: &'static str,
    },
    /// The executor panicked with a payload that was not an error.
    #[error("unknown error")]
    Unknown,
    /// An earlier wait already took the outcome.
    #[error("promise outcome was already consumed")]
    Consumed,
    /// The operating system refused to start an executor thread.
    #[error("failed to spawn promise thread: {0}")]
    Spawn(#[from] io::Error),
}

impl Error {
    /// Wraps an executor's error, unwrapping it again if it already is one of ours.
    pub fn from_boxed(err: BoxError) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => *err,
            Err(err) => match err.downcast::<ContextError>() {
                Ok(err) => Error::Context(*err),
                Err(err) => Error::Rejected(err),
            },
        }
    }

    /// Converts a caught panic payload into a rejection.
    ///
    /// An [`Error`], a [`ContextError`] or a [`BoxError`] keeps its identity.
    /// A payload can only be matched against types named here, so any other
    /// error value (`panic_any(io::Error::other(..))`, say) collapses into
    /// [`Error::Unknown`] together with string messages. Box a foreign error
    /// as a [`BoxError`] before panicking with it to keep it.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Error>() {
            Ok(err) => return *err,
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<BoxError>() {
            Ok(err) => return Error::from_boxed(*err),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<ContextError>() {
            Ok(err) => return Error::Context(*err),
            Err(payload) => payload,
        };
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            log::warn!("executor panicked: {message}");
        } else if let Some(message) = payload.downcast_ref::<String>() {
            log::warn!("executor panicked: {message}");
        } else {
            log::warn!("executor panicked with an opaque payload");
        }
        Error::Unknown
    }

    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Error::Context(err) => Some(*err),
            _ => None,
        }
    }

    /// Borrows the rejection as a concrete error type, if it is one.
    pub fn rejected_as<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Error::Rejected(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}
