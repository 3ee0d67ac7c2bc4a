//! Buffer pool negotiation and the in-process allocator
//!
//! The downstream consumer owns the allocator. During connection the port
//! computes its requirements (every buffer must hold the largest access unit
//! the codec can produce, and the pool needs at least two buffers so one can
//! be in flight while the next is filled), asks the allocator for them, and
//! rejects the connection if what the allocator grants falls short.

use crate::error::{Error, Result};
use crate::media::MediaBuffer;
use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Allocator properties, as proposed by downstream or granted by the allocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorProperties {
    pub buffer_count: u32,
    pub buffer_size: u32,
    pub alignment: u32,
    pub prefix: u32,
}

/// What the port needs from the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    /// Largest access unit the codec can produce
    pub max_frame_size: u32,
    /// Minimum buffer count
    pub min_buffer_count: u32,
    /// Count requested when the proposal leaves it at zero
    pub default_buffer_count: u32,
}

impl Default for BufferRequirements {
    fn default() -> Self {
        Self {
            max_frame_size: 8192,
            min_buffer_count: 2,
            default_buffer_count: 30,
        }
    }
}

/// Allocator owned by the downstream consumer
pub trait Allocator: Send + Sync {
    /// Properties downstream proposes before negotiation
    fn proposal(&self) -> AllocatorProperties;

    /// Request properties; returns what was actually granted
    fn set_properties(&self, request: &AllocatorProperties) -> Result<AllocatorProperties>;

    /// Granted properties, None before negotiation
    fn properties(&self) -> Option<AllocatorProperties>;

    /// Borrow a free buffer, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` on timeout and `Err(Interrupted)` once decommitted.
    fn get_buffer(&self, timeout: Duration) -> Result<Option<MediaBuffer>>;

    /// Return a buffer to the pool
    fn release(&self, buffer: MediaBuffer);

    /// Release pooled memory and fail all current and future waits
    fn decommit(&self);

    /// Re-enable buffer hand-out after `decommit`
    fn commit(&self);
}

/// Negotiate pool properties with a downstream allocator
///
/// Fails with `AllocatorRejected` if the granted size or count is below the
/// requirements.
pub fn decide_buffer_size(
    allocator: &dyn Allocator,
    requirements: &BufferRequirements,
) -> Result<AllocatorProperties> {
    let proposal = allocator.proposal();

    let mut request = proposal;
    if request.buffer_count == 0 {
        request.buffer_count = requirements.default_buffer_count;
    }
    request.buffer_count = request.buffer_count.max(requirements.min_buffer_count);
    request.buffer_size = request.buffer_size.max(requirements.max_frame_size);

    debug!(
        "Requesting allocator properties: count={}, size={}, align={}, prefix={} (proposed count={}, size={})",
        request.buffer_count,
        request.buffer_size,
        request.alignment,
        request.prefix,
        proposal.buffer_count,
        proposal.buffer_size
    );

    let actual = allocator
        .set_properties(&request)
        .map_err(|e| Error::AllocatorRejected(e.to_string()))?;

    if actual.buffer_size < requirements.max_frame_size {
        warn!(
            "Allocator granted {} byte buffers, need {}",
            actual.buffer_size, requirements.max_frame_size
        );
        return Err(Error::AllocatorRejected(format!(
            "buffer size {} below maximum frame size {}",
            actual.buffer_size, requirements.max_frame_size
        )));
    }

    if actual.buffer_count < requirements.min_buffer_count {
        warn!(
            "Allocator granted {} buffers, need {}",
            actual.buffer_count, requirements.min_buffer_count
        );
        return Err(Error::AllocatorRejected(format!(
            "buffer count {} below minimum {}",
            actual.buffer_count, requirements.min_buffer_count
        )));
    }

    info!(
        "Buffer pool agreed: {} x {} bytes",
        actual.buffer_count, actual.buffer_size
    );
    Ok(actual)
}

#[derive(Debug)]
struct PoolState {
    properties: Option<AllocatorProperties>,
    free: Vec<MediaBuffer>,
    outstanding: u32,
    committed: bool,
}

/// Fixed-size in-process buffer pool
///
/// Grants requests up to its hard limits. Buffers are created lazily and
/// recycled through a free list; `get_buffer` blocks while all granted
/// buffers are out.
#[derive(Debug)]
pub struct MemoryAllocator {
    proposal: AllocatorProperties,
    max_buffer_size: u32,
    max_buffer_count: u32,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl MemoryAllocator {
    /// Allocator that can grant up to `max_buffer_count` buffers of
    /// `max_buffer_size` bytes and proposes exactly that
    pub fn new(max_buffer_count: u32, max_buffer_size: u32) -> Self {
        Self::with_proposal(
            AllocatorProperties {
                buffer_count: max_buffer_count,
                buffer_size: max_buffer_size,
                alignment: 1,
                prefix: 0,
            },
            max_buffer_count,
            max_buffer_size,
        )
    }

    pub fn with_proposal(
        proposal: AllocatorProperties,
        max_buffer_count: u32,
        max_buffer_size: u32,
    ) -> Self {
        Self {
            proposal,
            max_buffer_size,
            max_buffer_count,
            state: Mutex::new(PoolState {
                properties: None,
                free: Vec::new(),
                outstanding: 0,
                committed: true,
            }),
            available: Condvar::new(),
        }
    }

    /// Buffers currently lent out
    pub fn outstanding(&self) -> u32 {
        self.lock().outstanding
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Allocator for MemoryAllocator {
    fn proposal(&self) -> AllocatorProperties {
        self.proposal
    }

    fn set_properties(&self, request: &AllocatorProperties) -> Result<AllocatorProperties> {
        let mut state = self.lock();
        if state.outstanding > 0 {
            return Err(Error::AllocatorRejected(
                "cannot change properties while buffers are outstanding".to_string(),
            ));
        }
        let actual = AllocatorProperties {
            buffer_count: request.buffer_count.min(self.max_buffer_count),
            buffer_size: request.buffer_size.min(self.max_buffer_size),
            alignment: request.alignment.max(1),
            prefix: request.prefix,
        };
        state.properties = Some(actual);
        state.free.clear();
        Ok(actual)
    }

    fn properties(&self) -> Option<AllocatorProperties> {
        self.lock().properties
    }

    fn get_buffer(&self, timeout: Duration) -> Result<Option<MediaBuffer>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if !state.committed {
                return Err(Error::Interrupted);
            }
            let Some(properties) = state.properties else {
                return Err(Error::NotConnected);
            };
            if state.outstanding < properties.buffer_count {
                state.outstanding += 1;
                let buffer = state
                    .free
                    .pop()
                    .unwrap_or_else(|| MediaBuffer::with_capacity(properties.buffer_size as usize));
                return Ok(Some(buffer));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn release(&self, mut buffer: MediaBuffer) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let size_matches = state
            .properties
            .is_some_and(|p| p.buffer_size as usize == buffer.capacity());
        if state.committed && size_matches {
            buffer.reset();
            state.free.push(buffer);
        }
        self.available.notify_all();
    }

    fn decommit(&self) {
        let mut state = self.lock();
        state.committed = false;
        state.free.clear();
        self.available.notify_all();
    }

    fn commit(&self) {
        self.lock().committed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_count_proposal_uses_default() {
        let allocator = MemoryAllocator::with_proposal(
            AllocatorProperties {
                buffer_count: 0,
                buffer_size: 0,
                alignment: 1,
                prefix: 0,
            },
            64,
            65_536,
        );

        let agreed = decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();

        assert_eq!(agreed.buffer_count, 30);
        assert_eq!(agreed.buffer_size, 8192);
    }

    #[test]
    fn test_larger_proposal_kept() {
        let allocator = MemoryAllocator::new(4, 16_384);
        let agreed = decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();
        assert_eq!(agreed.buffer_count, 4);
        assert_eq!(agreed.buffer_size, 16_384);
    }

    #[test]
    fn test_single_buffer_proposal_raised_to_minimum() {
        let allocator = MemoryAllocator::new(1, 8192);
        // Hard limit is one buffer, so the raised request cannot be granted
        let result = decide_buffer_size(&allocator, &BufferRequirements::default());
        assert!(matches!(result, Err(Error::AllocatorRejected(_))));
    }

    #[test]
    fn test_small_buffers_rejected() {
        let allocator = MemoryAllocator::new(8, 4096);
        let result = decide_buffer_size(&allocator, &BufferRequirements::default());
        assert!(matches!(result, Err(Error::AllocatorRejected(_))));
    }

    #[test]
    fn test_alignment_and_prefix_preserved() {
        let allocator = MemoryAllocator::with_proposal(
            AllocatorProperties {
                buffer_count: 4,
                buffer_size: 8192,
                alignment: 16,
                prefix: 8,
            },
            8,
            8192,
        );
        let agreed = decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();
        assert_eq!(agreed.alignment, 16);
        assert_eq!(agreed.prefix, 8);
    }

    #[test]
    fn test_get_buffer_before_negotiation_fails() {
        let allocator = MemoryAllocator::new(2, 8192);
        assert!(matches!(
            allocator.get_buffer(Duration::from_millis(1)),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn test_pool_exhaustion_times_out() {
        let allocator = MemoryAllocator::new(2, 8192);
        decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();

        let a = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();
        let _b = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();
        assert!(allocator.get_buffer(Duration::from_millis(5)).unwrap().is_none());

        allocator.release(a);
        assert!(allocator.get_buffer(Duration::from_millis(1)).unwrap().is_some());
    }

    #[test]
    fn test_release_from_other_thread_unblocks_waiter() {
        let allocator = Arc::new(MemoryAllocator::new(2, 8192));
        decide_buffer_size(allocator.as_ref(), &BufferRequirements::default()).unwrap();
        let a = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();
        let _b = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();

        let releaser = {
            let allocator = Arc::clone(&allocator);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                allocator.release(a);
            })
        };

        let buffer = allocator.get_buffer(Duration::from_secs(5)).unwrap();
        assert!(buffer.is_some());
        releaser.join().unwrap();
    }

    #[test]
    fn test_decommit_interrupts_waiters() {
        let allocator = MemoryAllocator::new(2, 8192);
        decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();
        allocator.decommit();
        assert!(matches!(
            allocator.get_buffer(Duration::from_millis(1)),
            Err(Error::Interrupted)
        ));
        allocator.commit();
        assert!(allocator.get_buffer(Duration::from_millis(1)).unwrap().is_some());
    }

    #[test]
    fn test_recycled_buffers_are_reset() {
        let allocator = MemoryAllocator::new(2, 8192);
        decide_buffer_size(&allocator, &BufferRequirements::default()).unwrap();

        let mut buffer = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();
        buffer.set_payload(&[1, 2, 3]).unwrap();
        buffer.set_times(10, None);
        allocator.release(buffer);

        let recycled = allocator.get_buffer(Duration::from_millis(1)).unwrap().unwrap();
        assert!(recycled.is_empty());
        assert_eq!(recycled.start_time(), None);
        assert_eq!(allocator.outstanding(), 1);
    }
}
