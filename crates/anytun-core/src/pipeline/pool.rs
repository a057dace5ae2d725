// SPDX-License-Identifier: MIT

//! Bounded object pools for plain/encrypted packets, built directly
//! on `crossbeam-channel` — a pool is simply a bounded channel
//! pre-filled with reusable objects; "acquiring" is a receive,
//! "releasing" is a send.

use crossbeam_channel::{bounded, Receiver, Sender};

pub struct Pool<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize, mut make: impl FnMut() -> T) -> Self {
        let (tx, rx) = bounded(capacity);
        for _ in 0..capacity {
            tx.send(make()).expect("pool channel sized to capacity");
        }
        Self { tx, rx }
    }

    /// Blocks until an object is available.
    pub fn acquire(&self) -> T {
        self.rx.recv().expect("pool never closes while the pipeline runs")
    }

    pub fn try_acquire(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn release(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

/// Scope guard wrapping a pool-owned object: returns it to the pool
/// on drop unless [`Guarded::take`] has already moved it out (the
/// path used when forwarding the object on to the next channel).
pub struct Guarded<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<'a, T> Guarded<'a, T> {
    pub fn new(pool: &'a Pool<T>, item: T) -> Self {
        Self { pool, item: Some(item) }
    }

    pub fn get(&self) -> &T {
        self.item.as_ref().expect("guard not yet taken")
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("guard not yet taken")
    }

    /// Disarm the guard and hand the object to the caller, typically
    /// to push it onto the next stage's channel.
    pub fn take(mut self) -> T {
        self.item.take().expect("guard not yet taken")
    }
}

impl<T> Drop for Guarded<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
