//! Cancellable promises, and groups of them that run in sequence over a
//! shared context.
//!
//! A [`Promise`] runs its executor on a thread of its own and settles exactly
//! once, to a value or an [`Error`]. The executor gets a [`PromiseContext`] to
//! watch for cancellation, a [`Resolver`] and a [`Rejecter`]. If it returns
//! without calling either, or panics, the promise is rejected for it.
//!
//! Waiting is bounded by a [`Context`] the caller picks, separate from the
//! one the executor runs under. Giving up on a wait does not stop the work.
//!
//! ```
//! use promise_ctx::{Context, ContextError, Promise, PromiseContext};
//! use std::time::Duration;
//!
//! let root = Context::background();
//! let promise = Promise::new(&root, |ctx, resolve, reject| {
//!     match ctx.context().sleep(Duration::from_millis(10)) {
//!         Ok(()) => resolve.resolve("done"),
//!         Err(err) => reject.reject(err),
//!     }
//! });
//!
//! let (impatient, _cancel) = Context::with_timeout(&root, Duration::from_millis(1));
//! let err = promise.wait(&impatient).unwrap_err();
//! assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
//!
//! assert_eq!(promise.wait(&root).unwrap(), "done");
//! ```
//!
//! A [`PromiseGroup`] runs its steps strictly one after another on one
//! shared context, so a [`DataContext`] payload written by one step is read
//! by the next without any locking. See the [`PromiseGroup`] docs.
pub mod context;
mod error;
mod execution;
pub mod group;
mod pair;
pub mod promise;
mod wakers;

pub use context::{CancelFn, Context, Done};
pub use error::{BoxError, ContextError, Error};
pub use execution::{DataContext, ExecutionContext, PromiseContext};
pub use group::PromiseGroup;
pub use promise::{Builder, Promise, Rejecter, Resolver};
