// Copyright 2020 Joyent, Inc.

//! Reuse pool for encoder instances.
//!
//! Encoders own growable buffers. Pooling them keeps those allocations alive
//! across requests. An instance is always [`Reset`] before it is handed out,
//! so nothing a previous caller left behind (buffer contents, error state)
//! is observable by the next one.
//!
//! A pool hands out as many instances as are asked for, building new ones
//! when it runs dry, but takes back only up to its capacity; instances
//! returned to a full pool are dropped.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use object_pool::Pool as ObjectPool;

/// Default number of instances a pool builds up front and keeps idle.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

pub trait Reset {
    /// Returns the instance to its freshly constructed state, keeping
    /// allocated capacity.
    fn reset(&mut self);
}

pub struct Pool<T: Reset + Default> {
    inner: Arc<ObjectPool<T>>,
    capacity: usize,
}

impl<T: Reset + Default> Pool<T> {
    /// Builds a pool holding `capacity` ready instances.
    pub fn new(capacity: usize) -> Pool<T> {
        Pool {
            inner: Arc::new(ObjectPool::new(capacity, T::default)),
            capacity,
        }
    }

    /// Takes an idle instance, or builds a new one when the pool is empty.
    pub fn acquire(&self) -> Pooled<T> {
        let mut item = match self.inner.try_pull() {
            Some(idle) => idle.detach().1,
            None => T::default(),
        };
        item.reset();
        Pooled {
            pool: Arc::clone(&self.inner),
            capacity: self.capacity,
            item,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle instances.
    pub fn idle(&self) -> usize {
        self.inner.len()
    }
}

impl<T: Reset + Default> Default for Pool<T> {
    fn default() -> Self {
        Pool::new(DEFAULT_POOL_CAPACITY)
    }
}

impl<T: Reset + Default> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Pool {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

/// An instance on loan from a [`Pool`]; it goes back when dropped, unless
/// the pool is full by then.
pub struct Pooled<T: Reset + Default> {
    pool: Arc<ObjectPool<T>>,
    capacity: usize,
    item: T,
}

impl<T: Reset + Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        // Concurrent returns can overshoot the capacity by a few.
        if self.pool.len() < self.capacity {
            self.pool.attach(mem::take(&mut self.item));
        }
    }
}

impl<T: Reset + Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T: Reset + Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}
