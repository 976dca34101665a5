//! # Boundary Queue
//!
//! Bounded FIFO of application payloads waiting for a foreign caller to pull
//! them. The producer never blocks: a full queue evicts its oldest frame.
//!
//! Entries are capped at `max_payload` bytes; larger payloads are refused at
//! push. A caller whose buffer is too small for the head frame even when
//! empty can never receive it, so that frame is skipped rather than left to
//! block every frame behind it.
//!
//! ## Drain Format
//!
//! ```text
//! [len(4, LE)] [payload(len)] [len(4, LE)] [payload(len)] ...
//! ```
//!
//! Only whole frames are written. A frame that does not fit in the space
//! left stays queued for the next drain.

use std::collections::VecDeque;

use bytes::Bytes;
use hub_telemetry::metrics;
use parking_lot::Mutex;
use tracing::warn;

/// Length prefix size of a drained entry.
pub const ENTRY_PREFIX_LEN: usize = 4;

/// Result of [`BoundaryQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended.
    Queued,
    /// Appended after evicting the oldest unread frame.
    Evicted,
    /// Larger than the entry cap; not queued.
    Oversized,
}

/// Bounded FIFO between inbound dispatch and an external consumer.
pub struct BoundaryQueue {
    frames: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    max_payload: usize,
}

impl BoundaryQueue {
    /// Queue holding at most `capacity` frames (minimum 1) of any size the
    /// drain format can describe.
    pub fn new(capacity: usize) -> Self {
        Self::with_max_payload(capacity, u32::MAX as usize)
    }

    /// Queue holding at most `capacity` frames of at most `max_payload`
    /// bytes each.
    pub fn with_max_payload(capacity: usize, max_payload: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            max_payload: max_payload.min(u32::MAX as usize),
        }
    }

    /// Append a payload, evicting the oldest one if the queue is full.
    pub fn push(&self, payload: Bytes) -> PushOutcome {
        if payload.len() > self.max_payload {
            metrics::QUEUE_OVERSIZED.inc();
            return PushOutcome::Oversized;
        }
        let mut frames = self.frames.lock();
        let outcome = if frames.len() >= self.capacity {
            frames.pop_front();
            metrics::QUEUE_EVICTIONS.inc();
            PushOutcome::Evicted
        } else {
            PushOutcome::Queued
        };
        frames.push_back(payload);
        metrics::QUEUE_DEPTH.set(frames.len() as f64);
        outcome
    }

    /// Move as many whole frames as fit into `buf`.
    ///
    /// Returns `None` when the queue is empty, otherwise the number of frames
    /// written. Frames larger than the whole of `buf` are dropped, so
    /// `Some(0)` means every frame looked at was dropped.
    pub fn drain_into(&self, buf: &mut [u8]) -> Option<usize> {
        let mut frames = self.frames.lock();
        if frames.is_empty() {
            return None;
        }

        let mut offset = 0;
        let mut count = 0;
        while let Some(head) = frames.front() {
            let needed = ENTRY_PREFIX_LEN + head.len();
            if needed > buf.len() {
                warn!(
                    len = head.len(),
                    buffer = buf.len(),
                    "Dropping queued frame larger than the drain buffer"
                );
                metrics::QUEUE_OVERSIZED.inc();
                frames.pop_front();
                continue;
            }
            if buf.len() - offset < needed {
                break;
            }
            buf[offset..offset + ENTRY_PREFIX_LEN].copy_from_slice(&(head.len() as u32).to_le_bytes());
            buf[offset + ENTRY_PREFIX_LEN..offset + needed].copy_from_slice(head);
            offset += needed;
            count += 1;
            frames.pop_front();
        }
        metrics::QUEUE_DEPTH.set(frames.len() as f64);
        Some(count)
    }

    /// Frames waiting.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload accepted by [`Self::push`].
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

/// Split a drained buffer back into payloads.
pub fn split_drained(buf: &[u8], count: usize) -> Vec<&[u8]> {
    let mut out = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        if buf.len() < offset + ENTRY_PREFIX_LEN {
            break;
        }
        let mut len = [0u8; ENTRY_PREFIX_LEN];
        len.copy_from_slice(&buf[offset..offset + ENTRY_PREFIX_LEN]);
        let len = u32::from_le_bytes(len) as usize;
        let start = offset + ENTRY_PREFIX_LEN;
        if buf.len() < start + len {
            break;
        }
        out.push(&buf[start..start + len]);
        offset = start + len;
    }
    out
}
