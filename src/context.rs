//! A tree of cancellable contexts.
//!
//! A [`Context`] is a cheap, cloneable handle: every clone observes the same
//! cancellation. Derived contexts are cancelled together with their parent,
//! never the other way round.
use crate::wakers::Wakers;
use crate::ContextError;
use std::{
    fmt,
    future::Future,
    mem,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    task::Poll,
    thread,
    time::{Duration, Instant},
};

#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

/// Cancels the [`Context`] it was created with.
///
/// Calling it more than once, or from several threads, is harmless.
#[derive(Clone)]
pub struct CancelFn {
    inner: Arc<Inner>,
}

/// Resolves once its context is done.
#[derive(Debug)]
pub struct Done {
    inner: Arc<Inner>,
    key: Option<usize>,
}

struct Inner {
    // Only cancellable parents are linked; a background root never cancels.
    parent: Option<Arc<Inner>>,
    cancellable: bool,
    deadline: Option<Instant>,
    state: Mutex<State>,
    timer: Condvar,
}

#[derive(Default)]
struct State {
    err: Option<ContextError>,
    wakers: Wakers,
    children: Vec<Weak<Inner>>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Marks this context done, then wakes waiters and cancels children.
    /// The first cause sticks.
    fn cancel(self: &Arc<Self>, err: ContextError, detach: bool) {
        let (wakers, children) = {
            let mut state = self.lock();
            if state.err.is_some() {
                return;
            }
            state.err = Some(err);
            (mem::take(&mut state.wakers), mem::take(&mut state.children))
        };
        self.timer.notify_all();
        wakers.wake_all();
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(err, false);
        }
        if detach {
            if let Some(parent) = &self.parent {
                parent
                    .lock()
                    .children
                    .retain(|child| !ptr_eq(child, self));
            }
        }
    }

    /// The current error, expiring the deadline lazily if the timer is late.
    fn check(self: &Arc<Self>) -> Option<ContextError> {
        if let Some(err) = self.lock().err {
            return Some(err);
        }
        if self.expired(Instant::now()) {
            self.cancel(ContextError::DeadlineExceeded, true);
            return self.lock().err;
        }
        None
    }
}

fn ptr_eq(weak: &Weak<Inner>, inner: &Arc<Inner>) -> bool {
    std::ptr::eq(weak.as_ptr(), Arc::as_ptr(inner))
}

impl Context {
    /// A root context: never cancelled, no deadline.
    pub fn background() -> Self {
        Context {
            inner: Arc::new(Inner {
                parent: None,
                cancellable: false,
                deadline: None,
                state: Mutex::new(State::default()),
                timer: Condvar::new(),
            }),
        }
    }

    /// Derives a child that is done when `cancel` is called or `parent` is done.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_ctx::{Context, ContextError};
    ///
    /// let root = Context::background();
    /// let (ctx, cancel) = Context::with_cancel(&root);
    /// assert!(!ctx.is_done());
    /// cancel.cancel();
    /// assert_eq!(ctx.err(), Some(ContextError::Canceled));
    /// assert!(!root.is_done());
    /// ```
    pub fn with_cancel(parent: &Context) -> (Context, CancelFn) {
        Self::derive(parent, parent.deadline())
    }

    /// Derives a child that is also done once `deadline` passes.
    pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelFn) {
        match parent.deadline() {
            // The parent expires first; its own cancellation covers the child.
            Some(inherited) if inherited <= deadline => Self::derive(parent, Some(inherited)),
            _ => {
                let (ctx, cancel) = Self::derive(parent, Some(deadline));
                if Instant::now() >= deadline {
                    ctx.inner.cancel(ContextError::DeadlineExceeded, true);
                } else if !ctx.is_done() {
                    spawn_timer(&ctx.inner, deadline);
                }
                (ctx, cancel)
            }
        }
    }

    /// Derives a child that is also done after `timeout`.
    pub fn with_timeout(parent: &Context, timeout: Duration) -> (Context, CancelFn) {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    fn derive(parent: &Context, deadline: Option<Instant>) -> (Context, CancelFn) {
        let inner = Arc::new(Inner {
            parent: parent.inner.cancellable.then(|| parent.inner.clone()),
            cancellable: true,
            deadline,
            state: Mutex::new(State::default()),
            timer: Condvar::new(),
        });
        if let Some(parent) = &inner.parent {
            let parent_err = {
                let mut state = parent.lock();
                if state.err.is_none() {
                    state.children.retain(|child| child.strong_count() > 0);
                    state.children.push(Arc::downgrade(&inner));
                }
                state.err
            };
            if let Some(err) = parent_err {
                inner.cancel(err, false);
            }
        }
        (
            Context {
                inner: inner.clone(),
            },
            CancelFn { inner },
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// `None` while the context is live, the cause once it is done.
    pub fn err(&self) -> Option<ContextError> {
        self.inner.check()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// A future that resolves with the cause once this context is done.
    pub fn done(&self) -> Done {
        Done {
            inner: self.inner.clone(),
            key: None,
        }
    }

    /// Blocks the calling thread until this context is done. Never returns for
    /// a background context.
    pub fn wait(&self) -> ContextError {
        futures::executor::block_on(self.done())
    }

    /// Sleeps for `duration`, waking early if the context is done first.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_ctx::{Context, ContextError};
    /// use std::time::Duration;
    ///
    /// let (ctx, _cancel) = Context::with_timeout(&Context::background(), Duration::from_millis(10));
    /// assert_eq!(ctx.sleep(Duration::from_secs(5)), Err(ContextError::DeadlineExceeded));
    /// ```
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let until = Instant::now() + duration;
        let mut state = self.inner.lock();
        loop {
            if let Some(err) = state.err {
                return Err(err);
            }
            let now = Instant::now();
            if self.inner.expired(now) {
                drop(state);
                self.inner.cancel(ContextError::DeadlineExceeded, true);
                return Err(self.err().unwrap_or(ContextError::DeadlineExceeded));
            }
            if now >= until {
                return Ok(());
            }
            let limit = self.inner.deadline.map_or(until, |deadline| deadline.min(until));
            state = self
                .inner
                .timer
                .wait_timeout(state, limit - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

fn spawn_timer(inner: &Arc<Inner>, deadline: Instant) {
    let inner = inner.clone();
    let spawned = thread::Builder::new()
        .name("context-deadline".into())
        .spawn(move || {
            let mut state = inner.lock();
            while state.err.is_none() {
                let now = Instant::now();
                if now >= deadline {
                    drop(state);
                    log::debug!("context deadline exceeded");
                    inner.cancel(ContextError::DeadlineExceeded, true);
                    return;
                }
                state = inner
                    .timer
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        });
    if let Err(err) = spawned {
        // Deadlines are still enforced lazily by `err`, `done` and `sleep`.
        log::warn!("failed to spawn context deadline timer: {err}");
    }
}

impl CancelFn {
    pub fn cancel(&self) {
        self.inner.cancel(ContextError::Canceled, true);
    }
}

impl Future for Done {
    type Output = ContextError;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        if !self.inner.cancellable {
            return Poll::Pending;
        }
        if let Some(err) = self.inner.check() {
            return Poll::Ready(err);
        }
        let this = self.get_mut();
        let mut state = this.inner.lock();
        match state.err {
            Some(err) => Poll::Ready(err),
            None => {
                state.wakers.register(&mut this.key, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inner.lock().wakers.remove(key);
        }
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline)
            .field("err", &self.lock().err)
            .finish()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl fmt::Debug for CancelFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFn").finish_non_exhaustive()
    }
}
