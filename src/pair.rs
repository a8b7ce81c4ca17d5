use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::{future::Future, task::Poll};
use crate::wakers::Wakers;
use crate::Error;

/// The settling side of a one-shot cell. Cloning it is cheap; only the first
/// clone to settle wins.
#[derive(Debug)]
pub(crate) struct Producer<T> {
    promise: Arc<Inner<T>>,
}

/// The waiting side. Its [`Take`] futures hand the outcome out exactly once.
#[derive(Debug)]
pub(crate) struct Consumer<T> {
    promise: Arc<Inner<T>>,
}

#[derive(Debug)]
enum Slot<T> {
    Empty(Wakers),
    Full(Result<T, Error>),
    Taken,
}

#[derive(Debug)]
struct Inner<T> {
    settled: AtomicBool,
    slot: Mutex<Slot<T>>,
}

/// Type-erased rejection, so a `Rejecter` does not carry the value type.
pub(crate) trait Settle: Send + Sync {
    fn reject(&self, err: Error) -> bool;
    fn is_settled(&self) -> bool;
}

pub(crate) fn pair<T>() -> (Producer<T>, Consumer<T>) {
    let inner = Arc::new(Inner {
        settled: AtomicBool::new(false),
        slot: Mutex::new(Slot::Empty(Wakers::default())),
    });
    (Producer { promise: inner.clone() }, Consumer { promise: inner })
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the outcome if this call wins the completion flag. Never blocks
    /// on a waiter, so a promise nobody waits for still finishes.
    fn settle(&self, outcome: Result<T, Error>) -> bool {
        if self
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let wakers = match std::mem::replace(&mut *self.lock(), Slot::Full(outcome)) {
            Slot::Empty(wakers) => wakers,
            Slot::Full(_) | Slot::Taken => unreachable!("settled twice past the completion flag"),
        };
        wakers.wake_all();
        true
    }
}

impl<T: Send> Settle for Inner<T> {
    fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer { promise: self.promise.clone() }
    }
}

impl<T: Send + 'static> Producer<T> {
    pub(crate) fn settle(&self, outcome: Result<T, Error>) -> bool {
        self.promise.settle(outcome)
    }

    pub(crate) fn settler(&self) -> Arc<dyn Settle> {
        self.promise.clone()
    }
}

impl<T> Consumer<T> {
    pub(crate) fn take(&self) -> Take<'_, T> {
        Take { promise: &self.promise, key: None }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.promise.settled.load(Ordering::Acquire)
    }
}

/// Resolves with the outcome the first time, with [`Error::Consumed`] after.
#[derive(Debug)]
pub(crate) struct Take<'a, T> {
    promise: &'a Inner<T>,
    key: Option<usize>,
}

impl<T> Future for Take<'_, T> {
    type Output = Result<T, Error>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        let mut slot = this.promise.lock();
        if let Slot::Empty(wakers) = &mut *slot {
            wakers.register(&mut this.key, cx.waker());
            return Poll::Pending;
        }
        // Settling drained our waker along with the rest.
        this.key = None;
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Full(outcome) => Poll::Ready(outcome),
            Slot::Taken => Poll::Ready(Err(Error::Consumed)),
            Slot::Empty(_) => unreachable!(),
        }
    }
}

impl<T> Drop for Take<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Slot::Empty(wakers) = &mut *self.promise.lock() {
                wakers.remove(key);
            }
        }
    }
}
