//! # Sync Payloads
//!
//! The byte buffer that carries one object's delta from the sim thread to
//! the core thread, plus a small cursor codec for plain-old-data fields.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use super::frame_alloc::FrameAlloc;
use crate::error::{SyncError, SyncResult};

/// One object's serialized delta.
///
/// Owned by whichever stage currently holds it (a pending batch, a retained
/// payload or the core-thread replay). When dropped, the payload is
/// returned to the frame allocator that produced it.
pub struct CoreSyncData {
    bytes: Box<[u8]>,
    origin: Option<Arc<FrameAlloc>>,
}

impl CoreSyncData {
    /// An empty payload that belongs to no allocator.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bytes: Box::default(),
            origin: None,
        }
    }

    pub(crate) fn from_frame(bytes: Box<[u8]>, origin: Arc<FrameAlloc>) -> Self {
        Self {
            bytes,
            origin: Some(origin),
        }
    }

    /// Returns the payload size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the payload holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the raw bytes mutably.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Returns the allocator this payload will be released to.
    #[must_use]
    pub fn allocator(&self) -> Option<&Arc<FrameAlloc>> {
        self.origin.as_ref()
    }

    /// Starts writing at the beginning of the payload.
    pub fn writer(&mut self) -> SyncWriter<'_> {
        SyncWriter {
            bytes: &mut self.bytes,
            pos: 0,
        }
    }

    /// Starts reading at the beginning of the payload.
    #[must_use]
    pub fn reader(&self) -> SyncReader<'_> {
        SyncReader {
            bytes: &self.bytes,
            pos: 0,
        }
    }
}

impl Default for CoreSyncData {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for CoreSyncData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreSyncData")
            .field("size", &self.bytes.len())
            .field("framed", &self.origin.is_some())
            .finish()
    }
}

impl Drop for CoreSyncData {
    fn drop(&mut self) {
        if let Some(origin) = self.origin.take() {
            origin.release();
        }
    }
}

/// Sequential writer over a payload.
pub struct SyncWriter<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl SyncWriter<'_> {
    /// Writes a plain-old-data value.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TruncatedSyncData`] if the value does not fit.
    pub fn write<T: Pod>(&mut self, value: &T) -> SyncResult<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Writes raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TruncatedSyncData`] if the bytes do not fit.
    pub fn write_bytes(&mut self, src: &[u8]) -> SyncResult<()> {
        let end = self.reserve(src.len())?;
        self.bytes[self.pos..end].copy_from_slice(src);
        self.pos = end;
        Ok(())
    }

    /// Returns the number of bytes written so far.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of bytes still available.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn reserve(&self, needed: usize) -> SyncResult<usize> {
        if needed > self.remaining() {
            return Err(SyncError::TruncatedSyncData {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(self.pos + needed)
    }
}

/// Sequential reader over a payload.
pub struct SyncReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SyncReader<'a> {
    /// Reads a plain-old-data value. The payload need not be aligned.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TruncatedSyncData`] past the end of the payload.
    pub fn read<T: Pod>(&mut self) -> SyncResult<T> {
        let bytes = self.read_bytes(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Reads `len` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TruncatedSyncData`] past the end of the payload.
    pub fn read_bytes(&mut self, len: usize) -> SyncResult<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(SyncError::TruncatedSyncData {
                needed: len,
                remaining,
            });
        }
        let bytes = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Returns the number of unread bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}
