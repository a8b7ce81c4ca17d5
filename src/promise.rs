//! A single-resolution promise whose executor runs on its own thread.
use crate::pair::{pair, Consumer, Producer, Settle};
use crate::{BoxError, CancelFn, Context, Error, ExecutionContext, PromiseContext};
use futures::future::{self, Either};
use std::{
    any::{self, Any},
    fmt, io,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

/// A handle to work that will settle to a `T` or an [`Error`] exactly once.
///
/// The executor keeps running on its own thread no matter who waits, or for
/// how long. At most one wait receives the outcome; later ones get
/// [`Error::Consumed`].
pub struct Promise<T> {
    consumer: Consumer<T>,
}

/// Fulfills the promise it was handed with.
///
/// Steps of a [`PromiseGroup`](crate::PromiseGroup) other than the last get a
/// resolver whose value is thrown away, so any value fulfills them.
pub struct Resolver<T> {
    sink: Sink<T>,
}

enum Sink<T> {
    Keep(Producer<T>),
    Discard(Producer<()>),
}

/// Rejects the promise it was handed with.
#[derive(Clone)]
pub struct Rejecter {
    settle: Arc<dyn Settle>,
}

/// Thread configuration for promises and group steps.
///
/// # Examples
///
/// ```
/// use promise_ctx::{Builder, Context, ExecutionContext};
///
/// let root = Context::background();
/// let (ctx, cancel) = Context::with_cancel(&root);
/// let promise = Builder::default()
///     .name("answer")
///     .spawn(ExecutionContext::new(ctx, cancel), |_ctx, resolve, _reject| {
///         assert_eq!(std::thread::current().name(), Some("answer"));
///         resolve.resolve(42)
///     })
///     .unwrap();
/// assert_eq!(promise.wait(&root).unwrap(), 42);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Sets the name of the executor thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the stack size of the executor thread, in bytes.
    #[inline]
    pub fn stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            ..self
        }
    }

    /// Runs `executor` on `ctx` in a new thread.
    pub fn spawn<T, C, F>(self, ctx: C, executor: F) -> io::Result<Promise<T>>
    where
        T: Send + 'static,
        C: PromiseContext,
        F: FnOnce(&mut C, Resolver<T>, Rejecter) + Send + 'static,
    {
        let (producer, consumer) = pair();
        self.launch(ctx, Resolver::keeping(producer), executor)?;
        Ok(Promise { consumer })
    }

    pub(crate) fn thread(&self) -> thread::Builder {
        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder
    }

    fn launch<T, C, F>(&self, mut ctx: C, resolver: Resolver<T>, executor: F) -> io::Result<()>
    where
        T: Send + 'static,
        C: PromiseContext,
        F: FnOnce(&mut C, Resolver<T>, Rejecter) + Send + 'static,
    {
        self.thread()
            .spawn(move || run_executor(&mut ctx, resolver, executor))
            .map(drop)
    }

    /// Like [`Builder::spawn`], but a refused thread rejects the promise
    /// instead of failing the call.
    pub(crate) fn spawn_or_reject<T, C, F>(&self, ctx: C, executor: F) -> Promise<T>
    where
        T: Send + 'static,
        C: PromiseContext,
        F: FnOnce(&mut C, Resolver<T>, Rejecter) + Send + 'static,
    {
        let (producer, consumer) = pair();
        if let Err(err) = self.launch(ctx, Resolver::keeping(producer.clone()), executor) {
            log::warn!("failed to spawn promise thread: {err}");
            producer.settle(Err(Error::Spawn(err)));
        }
        Promise { consumer }
    }
}

/// Runs an executor to completion on the current thread and guarantees the
/// promise is settled afterwards, even if the executor panicked.
pub(crate) fn run_executor<T, C, F>(ctx: &mut C, resolver: Resolver<T>, executor: F)
where
    T: Send + 'static,
    F: FnOnce(&mut C, Resolver<T>, Rejecter),
{
    let name = thread::current().name().map(str::to_owned);
    log::trace!("executor {name:?} starting");
    let settle = resolver.settler();
    let rejecter = Rejecter {
        settle: settle.clone(),
    };
    match panic::catch_unwind(AssertUnwindSafe(|| executor(ctx, resolver, rejecter))) {
        Ok(()) => {
            if settle.reject(Error::NotFulfilled) {
                log::debug!("executor {name:?} returned without settling its promise");
            }
        }
        Err(payload) => {
            let err = Error::from_panic(payload);
            if settle.reject(err) {
                log::warn!("executor {name:?} panicked; promise rejected");
            }
        }
    }
    log::trace!("executor {name:?} exiting");
}

impl<T: Send + 'static> Promise<T> {
    /// Starts `executor` under a fresh child of `ctx` and returns at once.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_ctx::{Context, Promise};
    ///
    /// let ctx = Context::background();
    /// let promise = Promise::new(&ctx, |_ctx, resolve, _reject| {
    ///     resolve.resolve(String::from("result"))
    /// });
    /// assert_eq!(promise.wait(&ctx).unwrap(), "result");
    /// ```
    pub fn new<F>(ctx: &Context, executor: F) -> Self
    where
        F: FnOnce(&mut ExecutionContext, Resolver<T>, Rejecter) + Send + 'static,
    {
        Self::with_constructor(ctx, ExecutionContext::new, executor)
    }

    /// Like [`Promise::new`], with the executor's context built by `constructor`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_ctx::{Context, DataContext, Promise};
    ///
    /// let ctx = Context::background();
    /// let promise = Promise::with_constructor(
    ///     &ctx,
    ///     DataContext::<String>::new,
    ///     |ctx, resolve, _reject| {
    ///         ctx.data = "Hello".into();
    ///         resolve.resolve(ctx.data.len())
    ///     },
    /// );
    /// assert_eq!(promise.wait(&ctx).unwrap(), 5);
    /// ```
    pub fn with_constructor<C, K, F>(ctx: &Context, constructor: K, executor: F) -> Self
    where
        C: PromiseContext,
        K: FnOnce(Context, CancelFn) -> C,
        F: FnOnce(&mut C, Resolver<T>, Rejecter) + Send + 'static,
    {
        let (context, cancel) = Context::with_cancel(ctx);
        Self::from_context(constructor(context, cancel), executor)
    }

    /// Starts `executor` on a context the caller already owns.
    pub fn from_context<C, F>(ctx: C, executor: F) -> Self
    where
        C: PromiseContext,
        F: FnOnce(&mut C, Resolver<T>, Rejecter) + Send + 'static,
    {
        Builder::default().spawn_or_reject(ctx, executor)
    }
}

impl<T> Promise<T> {
    pub(crate) fn from_consumer(consumer: Consumer<T>) -> Self {
        Promise { consumer }
    }

    /// Blocks until the promise settles or `ctx` is done, whichever is first.
    ///
    /// `ctx` only bounds this wait. It does not stop the executor, so a wait
    /// that timed out may be retried.
    pub fn wait(&self, ctx: &Context) -> Result<T, Error> {
        futures::executor::block_on(self.settled(ctx))
    }

    /// The async form of [`Promise::wait`].
    pub async fn settled(&self, ctx: &Context) -> Result<T, Error> {
        match future::select(ctx.done(), self.consumer.take()).await {
            Either::Left((err, _)) => Err(err.into()),
            Either::Right((outcome, _)) => outcome,
        }
    }

    /// Whether the outcome is in, even if nobody has taken it yet.
    pub fn is_settled(&self) -> bool {
        self.consumer.is_settled()
    }
}

impl<T: Send + 'static> Resolver<T> {
    pub(crate) fn keeping(producer: Producer<T>) -> Self {
        Resolver {
            sink: Sink::Keep(producer),
        }
    }

    pub(crate) fn discarding(producer: Producer<()>) -> Self {
        Resolver {
            sink: Sink::Discard(producer),
        }
    }

    /// Fulfills the promise with `value`, unless it already settled.
    pub fn resolve(&self, value: T) {
        match &self.sink {
            Sink::Keep(producer) => producer.settle(Ok(value)),
            Sink::Discard(producer) => producer.settle(Ok(())),
        };
    }

    /// Resolves with `T`'s zero value.
    pub fn resolve_default(&self)
    where
        T: Default,
    {
        self.resolve(T::default())
    }

    /// Resolves with `value` if it is a `T`, otherwise rejects with
    /// [`Error::TypeMismatch`]. A discarding resolver takes any value.
    pub fn resolve_any<V: Any + Send>(&self, value: V) {
        let producer = match &self.sink {
            Sink::Keep(producer) => producer,
            Sink::Discard(producer) => {
                producer.settle(Ok(()));
                return;
            }
        };
        let boxed: Box<dyn Any + Send> = Box::new(value);
        let outcome = match boxed.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(Error::TypeMismatch {
                received: any::type_name::<V>(),
                expected: any::type_name::<T>(),
            }),
        };
        producer.settle(outcome);
    }

    pub fn is_settled(&self) -> bool {
        self.settler().is_settled()
    }

    pub(crate) fn settler(&self) -> Arc<dyn Settle> {
        match &self.sink {
            Sink::Keep(producer) => producer.settler(),
            Sink::Discard(producer) => producer.settler(),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        let sink = match &self.sink {
            Sink::Keep(producer) => Sink::Keep(producer.clone()),
            Sink::Discard(producer) => Sink::Discard(producer.clone()),
        };
        Resolver { sink }
    }
}

impl Rejecter {
    /// Rejects with `err`. Our own [`Error`]s pass through unchanged.
    pub fn reject<E: Into<BoxError>>(&self, err: E) {
        self.settle.reject(Error::from_boxed(err.into()));
    }

    pub(crate) fn reject_with(&self, err: Error) {
        self.settle.reject(err);
    }

    pub fn is_settled(&self) -> bool {
        self.settle.is_settled()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl fmt::Debug for Rejecter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter")
            .field("settled", &self.is_settled())
            .finish()
    }
}
