use crate::{CancelFn, Context};

/// What every executor gets to see of its surroundings: a context to watch
/// and a way to cancel it.
pub trait PromiseContext: Send + 'static {
    /// The context this executor runs under. Waiting on a promise uses a
    /// separate one.
    fn context(&self) -> &Context;
    /// Cancels [`context`](PromiseContext::context) and everything derived from it.
    fn cancel(&self);
}

/// The default [`PromiseContext`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    context: Context,
    cancel: CancelFn,
}

impl ExecutionContext {
    pub fn new(context: Context, cancel: CancelFn) -> Self {
        ExecutionContext { context, cancel }
    }
}

impl PromiseContext for ExecutionContext {
    fn context(&self) -> &Context {
        &self.context
    }

    fn cancel(&self) {
        self.cancel.cancel()
    }
}

/// An [`ExecutionContext`] carrying a payload, used to hand data from one
/// group step to the next.
///
/// # Examples
///
/// ```
/// use promise_ctx::{Context, DataContext, PromiseContext};
///
/// let (ctx, cancel) = Context::with_cancel(&Context::background());
/// let mut data_ctx = DataContext::<Option<u32>>::new(ctx, cancel);
/// assert_eq!(data_ctx.data, None);
/// data_ctx.data = Some(7);
/// data_ctx.cancel();
/// assert!(data_ctx.context().is_done());
/// ```
#[derive(Debug)]
pub struct DataContext<D> {
    execution: ExecutionContext,
    pub data: D,
}

impl<D: Default> DataContext<D> {
    pub fn new(context: Context, cancel: CancelFn) -> Self {
        DataContext {
            execution: ExecutionContext::new(context, cancel),
            data: D::default(),
        }
    }
}

impl<D: Send + 'static> PromiseContext for DataContext<D> {
    fn context(&self) -> &Context {
        self.execution.context()
    }

    fn cancel(&self) {
        self.execution.cancel()
    }
}
