//! Sequential composition of promise executors over one shared context.
use crate::pair::{pair, Consumer, Settle};
use crate::promise::{run_executor, Builder};
use crate::{CancelFn, Context, Error, ExecutionContext, Promise, PromiseContext, Rejecter, Resolver};
use std::{fmt, thread};

type Step<R, C> = Box<dyn FnOnce(&mut C, Resolver<R>, Rejecter) + Send>;
type Constructor<C> = Box<dyn FnOnce(Context, CancelFn) -> C + Send>;

/// An ordered list of executors that run one after another on a single
/// shared `C`.
///
/// Only the last step's value becomes the group's value; earlier steps are
/// fulfilled by any value, which is discarded. The first step to fail
/// rejects the group, cancels the shared context and skips the rest.
///
/// # Examples
///
/// ```
/// use promise_ctx::{Context, DataContext, PromiseGroup};
///
/// let ctx = Context::background();
/// let group = PromiseGroup::<usize, DataContext<Vec<&str>>>::new(DataContext::new)
///     .add(|ctx, resolve, _reject| {
///         ctx.data.push("Step 1");
///         resolve.resolve_any("thrown away")
///     })
///     .add(|ctx, resolve, _reject| {
///         ctx.data.push("Step 2");
///         resolve.resolve(ctx.data.len())
///     });
/// assert_eq!(group.execute(&ctx).wait(&ctx).unwrap(), 2);
/// ```
pub struct PromiseGroup<R, C = ExecutionContext> {
    constructor: Constructor<C>,
    steps: Vec<Step<R, C>>,
    builder: Builder,
}

impl<R: Send + 'static> PromiseGroup<R, ExecutionContext> {
    /// A group whose steps share a plain [`ExecutionContext`].
    pub fn new_default() -> Self {
        Self::new(ExecutionContext::new)
    }
}

impl<R: Send + 'static, C: PromiseContext> PromiseGroup<R, C> {
    /// A group whose shared context is built by `constructor` on every
    /// [`execute`](PromiseGroup::execute).
    pub fn new<K>(constructor: K) -> Self
    where
        K: FnOnce(Context, CancelFn) -> C + Send + 'static,
    {
        PromiseGroup {
            constructor: Box::new(constructor),
            steps: Vec::new(),
            builder: Builder::default(),
        }
    }

    /// Appends a step, for chaining.
    pub fn add<F>(mut self, step: F) -> Self
    where
        F: FnOnce(&mut C, Resolver<R>, Rejecter) + Send + 'static,
    {
        self.push(step);
        self
    }

    pub fn push<F>(&mut self, step: F)
    where
        F: FnOnce(&mut C, Resolver<R>, Rejecter) + Send + 'static,
    {
        self.steps.push(Box::new(step));
    }

    /// Thread settings for the group's own thread and for every step.
    pub fn with_builder(self, builder: Builder) -> Self {
        PromiseGroup { builder, ..self }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Starts the steps under a fresh child of `ctx` and returns at once.
    ///
    /// A group without steps rejects with [`Error::NotFulfilled`].
    pub fn execute(self, ctx: &Context) -> Promise<R> {
        let PromiseGroup {
            constructor,
            steps,
            builder,
        } = self;
        let (context, cancel) = Context::with_cancel(ctx);
        let shared = constructor(context, cancel.clone());
        let step_builder = builder.clone();
        builder.spawn_or_reject(shared, move |shared: &mut C, resolve, reject| {
            let run = Run {
                builder: step_builder,
                cancel,
                reject,
                total: steps.len(),
            };
            run.steps(shared, steps, resolve)
        })
    }
}

/// What every step of one execution shares.
struct Run {
    builder: Builder,
    cancel: CancelFn,
    reject: Rejecter,
    total: usize,
}

impl Run {
    fn steps<R, C>(&self, shared: &mut C, steps: Vec<Step<R, C>>, resolve: Resolver<R>)
    where
        R: Send + 'static,
        C: PromiseContext,
    {
        for (index, step) in steps.into_iter().enumerate() {
            if let Some(err) = shared.context().err() {
                log::debug!("promise group stopped before step {index}: {err}");
                self.reject.reject_with(err.into());
                return;
            }
            if index + 1 == self.total {
                let (producer, consumer) = pair::<R>();
                let resolver = Resolver::keeping(producer);
                if let Some(value) = self.step(shared, index, step, resolver, consumer) {
                    resolve.resolve(value);
                }
            } else {
                // Only the last value counts; earlier steps may resolve anything.
                let (producer, consumer) = pair::<()>();
                if self
                    .step(shared, index, step, Resolver::discarding(producer), consumer)
                    .is_none()
                {
                    return;
                }
            }
        }
    }

    /// Runs one step as an inner promise on the shared context and waits for
    /// it. `None` means the group has been rejected.
    ///
    /// A failed wait rejects the group straight away; the step's thread is
    /// still joined before this returns, so the next step never overlaps it.
    fn step<R, V, C>(
        &self,
        shared: &mut C,
        index: usize,
        step: Step<R, C>,
        resolver: Resolver<R>,
        consumer: Consumer<V>,
    ) -> Option<V>
    where
        R: Send + 'static,
        V: Send + 'static,
        C: PromiseContext,
    {
        let context = shared.context().clone();
        let inner = Promise::from_consumer(consumer);
        let settle = resolver.settler();
        thread::scope(|scope| {
            let spawned = self
                .builder
                .thread()
                .spawn_scoped(scope, move || run_executor(shared, resolver, step));
            if let Err(err) = spawned {
                log::warn!("failed to spawn promise group step: {err}");
                settle.reject(Error::Spawn(err));
            }
            match inner.wait(&context) {
                Ok(value) => Some(value),
                Err(err) => {
                    self.fail(index, err);
                    None
                }
            }
        })
    }

    /// Cancels the shared context, then rejects the group with `err`.
    fn fail(&self, index: usize, err: Error) {
        log::debug!("promise group step {index} of {} failed: {err}", self.total);
        self.cancel.cancel();
        self.reject.reject_with(err);
    }
}

impl<R, C> fmt::Debug for PromiseGroup<R, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseGroup")
            .field("steps", &self.steps.len())
            .field("builder", &self.builder)
            .finish()
    }
}
