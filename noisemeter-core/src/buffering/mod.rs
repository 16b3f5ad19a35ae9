//! Sample buffers and the fixed-depth pool they circulate through.
//!
//! A buffer is always owned by exactly one stage:
//!
//! ```text
//! BufferPool ──alloc──► capture ring (DMA) ──complete──► ready queue
//!      ▲                                                     │
//!      └──────────────── free ◄──── worker (filter + level) ◄┘
//! ```
//!
//! Ownership moves with the value, so no two stages can touch the same
//! samples. Both the pool and the ready queue are bounded `crossbeam-channel`
//! arrays: `try_send`/`try_recv` never block, which keeps the interrupt side
//! wait-free with respect to the worker thread. All buffer memory is
//! allocated once in [`BufferPool::new`].

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::error;

/// A fixed-length block of signed PCM samples captured from the microphone.
#[derive(Debug)]
pub struct SampleBuffer {
    /// Index of this buffer inside its pool (stable for its lifetime).
    id: usize,
    samples: Box<[i32]>,
}

impl SampleBuffer {
    pub fn new(id: usize, len: usize) -> Self {
        Self {
            id,
            samples: vec![0i32; len].into_boxed_slice(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [i32] {
        &mut self.samples
    }
}

/// Sending half of the ready queue, held by the completion handler.
pub type ReadySender = Sender<SampleBuffer>;

/// Receiving half of the ready queue, held by the worker thread.
pub type ReadyReceiver = Receiver<SampleBuffer>;

/// Create the bounded FIFO that carries filled buffers to the worker.
pub fn ready_queue(capacity: usize) -> (ReadySender, ReadyReceiver) {
    bounded(capacity)
}

/// Fixed arena of pre-allocated sample buffers with an O(1) free list.
///
/// Cloning the pool clones the handles, not the buffers.
#[derive(Clone)]
pub struct BufferPool {
    free_tx: Sender<SampleBuffer>,
    free_rx: Receiver<SampleBuffer>,
    depth: usize,
    buffer_size: usize,
}

impl BufferPool {
    /// Allocate `depth` buffers of `buffer_size` samples each.
    pub fn new(depth: usize, buffer_size: usize) -> Self {
        let (free_tx, free_rx) = bounded(depth);
        for id in 0..depth {
            // Cannot fail: the channel has exactly `depth` slots.
            let _ = free_tx.try_send(SampleBuffer::new(id, buffer_size));
        }
        Self {
            free_tx,
            free_rx,
            depth,
            buffer_size,
        }
    }

    /// Take a free buffer, or `None` if every buffer is in flight.
    pub fn alloc(&self) -> Option<SampleBuffer> {
        self.free_rx.try_recv().ok()
    }

    /// Return a buffer to the free list.
    pub fn free(&self, buffer: SampleBuffer) {
        debug_assert_eq!(buffer.len(), self.buffer_size);
        match self.free_tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(buffer)) | Err(TrySendError::Disconnected(buffer)) => {
                error!(
                    id = buffer.id(),
                    depth = self.depth,
                    "buffer returned to a full pool, dropping it"
                );
            }
        }
    }

    /// Number of buffers currently on the free list.
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}
