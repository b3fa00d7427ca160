#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// A pool of reusable byte buffers, each with the same fixed capacity.
///
/// Pulled buffers return their storage to the pool when dropped, so steady-state
/// traffic allocates nothing.
#[derive(Clone)]
pub struct BufferPool<B> {
    inner: Arc<lockfree_object_pool::MutexObjectPool<B>>,
}

impl<B> BufferPool<B>
where
    B: Buf,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(lockfree_object_pool::MutexObjectPool::new(
                move || B::with_capacity(capacity),
                |_| {},
            )),
        }
    }

    pub fn pull(&self) -> Buffer<B> {
        Buffer {
            inner: self.inner.pull_owned(),
            pool: self.inner.clone(),
        }
    }
}

impl<B> BufferPool<B>
where
    B: Buf + DerefMut<Target = [u8]>,
{
    /// Pulls a buffer holding a copy of `data`, sized to exactly `data.len()`.
    pub fn pull_initialised(&self, data: &[u8]) -> Buffer<B> {
        let mut buffer = self.pull();
        let len = data.len();

        buffer.resize_to(len);
        buffer.copy_from_slice(data);

        buffer
    }
}

pub struct Buffer<B> {
    inner: lockfree_object_pool::MutexOwnedReusable<B>,
    pool: Arc<lockfree_object_pool::MutexObjectPool<B>>,
}

impl<B> Clone for Buffer<B>
where
    B: Buf,
{
    fn clone(&self) -> Self {
        let mut copy = self.pool.pull_owned();

        Buf::clone(&*self.inner, &mut copy);

        Self {
            inner: copy,
            pool: self.pool.clone(),
        }
    }
}

impl<B> PartialEq for Buffer<B>
where
    B: Deref<Target = [u8]>,
{
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}

impl<B> Eq for Buffer<B> where B: Deref<Target = [u8]> {}

impl<B> AsRef<[u8]> for Buffer<B>
where
    B: Deref<Target = [u8]>,
{
    fn as_ref(&self) -> &[u8] {
        self.inner.deref().deref()
    }
}

impl<B> std::fmt::Debug for Buffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Buffer").finish()
    }
}

impl<B> Deref for Buffer<B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        self.inner.deref()
    }
}

impl<B> DerefMut for Buffer<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.deref_mut()
    }
}

pub trait Buf: Sized {
    fn with_capacity(capacity: usize) -> Self;
    fn clone(&self, dst: &mut Self);
    fn resize_to(&mut self, len: usize);
}

impl Buf for Vec<u8> {
    fn with_capacity(capacity: usize) -> Self {
        vec![0; capacity]
    }

    fn clone(&self, dst: &mut Self) {
        dst.resize(self.len(), 0);
        dst.copy_from_slice(self);
    }

    fn resize_to(&mut self, len: usize) {
        self.resize(len, 0);
    }
}
