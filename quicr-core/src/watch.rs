//! A small watchable-state primitive, grounded on the teacher's
//! `watch::Queue` (`moq-transport::watch`). Every cross-context wakeup in
//! this crate — a cache notifying its bound publisher contexts, a source
//! notifying its subscriber streams — goes through a [`State<T>`] rather
//! than a raw `Notify`, so a waiter can tell "the value changed" apart from
//! a spurious wakeup via the epoch counter.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

struct Shared<T> {
    value: Mutex<T>,
    epoch: AtomicU64,
    notify: Notify,
}

/// Shared, watchable state. Clone to fan out; every clone sees the same
/// underlying value and is woken by every mutation.
pub struct State<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Default> Default for State<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> State<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: Mutex::new(value),
                epoch: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Split into two handles sharing the same state (e.g. writer/reader).
    pub fn split(self) -> (Self, Self) {
        (self.clone(), self)
    }

    pub fn lock(&self) -> Ref<'_, T> {
        Ref {
            guard: self.shared.value.lock().unwrap(),
        }
    }

    pub fn lock_mut(&self) -> RefMut<'_, T> {
        RefMut {
            shared: &self.shared,
            guard: self.shared.value.lock().unwrap(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Block until the epoch advances past `seen_epoch`.
    pub async fn wait_for_change(&self, seen_epoch: u64) {
        loop {
            if self.epoch() != seen_epoch {
                return;
            }
            let notified = self.shared.notify.notified();
            if self.epoch() != seen_epoch {
                return;
            }
            notified.await;
        }
    }
}

pub struct Ref<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<'a, T> Deref for Ref<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct RefMut<'a, T> {
    shared: &'a Shared<T>,
    guard: MutexGuard<'a, T>,
}

impl<'a, T> Deref for RefMut<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<'a, T> DerefMut for RefMut<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<'a, T> Drop for RefMut<'a, T> {
    fn drop(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }
}

/// A FIFO queue with the same watch-and-wake discipline as [`State`],
/// grounded on the teacher's `watch::Queue`. Used for the extra-repeat
/// queue (C5) and for fan-out notification lists (C9).
pub struct Queue<T> {
    state: State<VecDeque<T>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self {
            state: State::new(VecDeque::new()),
        }
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Queue<T> {
    pub fn push(&mut self, item: T) {
        self.state.lock_mut().push_back(item);
    }

    pub async fn pop(&mut self) -> T {
        loop {
            let epoch = {
                let queue = self.state.lock();
                if !queue.is_empty() {
                    drop(queue);
                    return self.state.lock_mut().pop_front().expect("checked non-empty");
                }
                self.state.epoch()
            };
            self.state.wait_for_change(epoch).await;
        }
    }

    pub fn try_pop(&mut self) -> Option<T> {
        self.state.lock_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn split(self) -> (Self, Self) {
        let (a, b) = self.state.split();
        (Self { state: a }, Self { state: b })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_wakes_waiter_on_mutation() {
        let (writer, reader) = State::new(0u32).split();
        let wait = tokio::spawn(async move {
            let epoch = reader.epoch();
            reader.wait_for_change(epoch).await;
            *reader.lock()
        });

        tokio::task::yield_now().await;
        *writer.lock_mut() = 42;

        assert_eq!(wait.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn queue_pop_waits_for_push() {
        let (mut tx, mut rx) = Queue::<u32>::default().split();
        let popped = tokio::spawn(async move { rx.pop().await });
        tokio::task::yield_now().await;
        tx.push(7);
        assert_eq!(popped.await.unwrap(), 7);
    }

    #[test]
    fn try_pop_drains_without_blocking() {
        let mut q = Queue::<u32>::default();
        assert_eq!(q.try_pop(), None);
        q.push(1);
        q.push(2);
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }
}
