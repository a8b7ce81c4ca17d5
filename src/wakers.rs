use std::task::Waker;

/// Wakers of pending futures, keyed so a future can take its entry back out
/// when it is dropped before being woken.
#[derive(Debug, Default)]
pub(crate) struct Wakers {
    next: usize,
    entries: Vec<(usize, Waker)>,
}

impl Wakers {
    /// Stores `waker` under `key`, handing out a fresh key on first use.
    pub(crate) fn register(&mut self, key: &mut Option<usize>, waker: &Waker) {
        if let Some(key) = *key {
            if let Some((_, stored)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
                if !stored.will_wake(waker) {
                    *stored = waker.clone();
                }
                return;
            }
        }
        let fresh = self.next;
        self.next = self.next.wrapping_add(1);
        self.entries.push((fresh, waker.clone()));
        *key = Some(fresh);
    }

    pub(crate) fn remove(&mut self, key: usize) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub(crate) fn wake_all(self) {
        for (_, waker) in self.entries {
            waker.wake();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
