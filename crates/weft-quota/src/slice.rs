//! Buffers whose lifetime is accounted against a [`ResourceUser`].

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use bytes::Bytes;

use crate::{error::QuotaError, user::ResourceUser};

/// Owns the memory. Dropping it credits the user.
struct Accounted {
    buf: Box<[u8]>,
    user: ResourceUser,
}

impl AsRef<[u8]> for Accounted {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for Accounted {
    fn drop(&mut self) {
        self.user.free(self.buf.len());
    }
}

/// A zeroed, writable buffer counted against a [`ResourceUser`].
///
/// [`QuotaSliceMut::freeze`] turns it into reference-counted [`Bytes`] that
/// can be cloned, sliced and split; the user is credited once the last of
/// them is dropped.
pub struct QuotaSliceMut {
    inner: Accounted,
}

impl QuotaSliceMut {
    pub(crate) fn new(user: ResourceUser, len: usize) -> Self {
        Self {
            inner: Accounted {
                buf: vec![0; len].into_boxed_slice(),
                user,
            },
        }
    }

    pub fn user(&self) -> &ResourceUser {
        &self.inner.user
    }

    pub fn freeze(self) -> Bytes {
        Bytes::from_owner(self.inner)
    }
}

impl Deref for QuotaSliceMut {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner.buf
    }
}

impl DerefMut for QuotaSliceMut {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.inner.buf
    }
}

impl fmt::Debug for QuotaSliceMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaSliceMut")
            .field("len", &self.inner.buf.len())
            .field("user", &self.inner.user.name())
            .finish()
    }
}

/// Allocates batches of equally-sized slices through one user.
#[derive(Debug, Clone)]
pub struct SliceAllocator {
    user: ResourceUser,
}

impl SliceAllocator {
    pub fn new(user: ResourceUser) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &ResourceUser {
        &self.user
    }

    /// Asks for `count` slices of `length` bytes at once. `on_done` gets
    /// them once the quota covers the whole batch. On error nothing was
    /// accounted.
    pub fn alloc_slices(
        &self,
        length: usize,
        count: usize,
        on_done: impl FnOnce(Result<Vec<QuotaSliceMut>, QuotaError>) + Send + 'static,
    ) {
        let total = length
            .checked_mul(count)
            .unwrap_or_else(|| panic!("{count} slices of {length} bytes overflow usize"));
        let user = self.user.clone();
        self.user.alloc(total, move |result| {
            on_done(result.map(|()| {
                (0..count)
                    .map(|_| QuotaSliceMut::new(user.clone(), length))
                    .collect()
            }))
        });
    }
}
