//! Acquisition buffer factory.
//!
//! The driver asks the application for raw frame buffers instead of
//! allocating its own. Each allocation is tagged with a context id drawn
//! from a monotonic counter that starts above a reserved range, and every
//! buffer must come back to the factory that issued it exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::session::lock;
use crate::traits::{CameraError, Result};

/// Context ids 0..=1000 are reserved; the first issued id is 1001.
const CONTEXT_ID_BASE: u64 = 1000;

/// One raw acquisition buffer together with its allocation record.
///
/// Ownership moves to the driver for the buffer's working life and comes
/// back through [`BufferFactory::free`].
#[derive(Debug)]
pub struct AcquisitionBuffer {
    context_id: u64,
    bytes: Vec<u8>,
}

impl AcquisitionBuffer {
    /// Context id correlating this buffer with its allocation record.
    #[must_use]
    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Buffer contents.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable buffer contents, for the driver to fill.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Allocates and reclaims raw acquisition buffers on driver request.
///
/// Registered once per camera session and shared across that session's
/// entire lifetime. [`audit`](Self::audit) verifies at teardown that every
/// allocation was returned.
#[derive(Debug)]
pub struct BufferFactory {
    last_context: AtomicU64,
    live: Mutex<HashSet<u64>>,
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl Default for BufferFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferFactory {
    /// Create a factory with an empty allocation record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_context: AtomicU64::new(CONTEXT_ID_BASE),
            live: Mutex::new(HashSet::new()),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Allocate a zeroed buffer of `size` bytes.
    ///
    /// A failed allocation retains nothing: the context counter is only
    /// advanced after the memory reservation succeeds.
    pub fn allocate(&self, size: usize) -> Result<AcquisitionBuffer> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|err| CameraError::BufferAllocation {
                size,
                reason: err.to_string(),
            })?;
        bytes.resize(size, 0);

        let context_id = self.last_context.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.live).insert(context_id);
        self.allocated.fetch_add(1, Ordering::Relaxed);

        log::debug!("created buffer {context_id}, {size} bytes");
        Ok(AcquisitionBuffer { context_id, bytes })
    }

    /// Return a buffer to the factory, releasing its allocation record.
    ///
    /// Fails with [`CameraError::UnknownBufferContext`] when the buffer was
    /// issued by a different factory.
    pub fn free(&self, buffer: AcquisitionBuffer) -> Result<()> {
        let AcquisitionBuffer { context_id, bytes } = buffer;
        if !lock(&self.live).remove(&context_id) {
            return Err(CameraError::UnknownBufferContext {
                context: context_id,
            });
        }
        self.freed.fetch_add(1, Ordering::Relaxed);
        log::debug!("freed buffer {context_id}, {} bytes", bytes.len());
        drop(bytes);
        Ok(())
    }

    /// Number of buffers currently issued and not yet returned.
    #[must_use]
    pub fn live_count(&self) -> u64 {
        lock(&self.live).len() as u64
    }

    /// Total allocations over the factory's lifetime.
    #[must_use]
    pub fn allocated_count(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total frees over the factory's lifetime.
    #[must_use]
    pub fn freed_count(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// Verify that every allocation has been returned.
    pub fn audit(&self) -> Result<()> {
        let live = self.live_count();
        if live == 0 {
            Ok(())
        } else {
            Err(CameraError::BufferLeak { live })
        }
    }
}
