//! Fixed-capacity sample rings for the session pipeline.
//!
//! Uses `ringbuf::HeapRb<f32>`: storage is allocated once when a session
//! starts and `push_slice` / `pop_slice` / `skip` never allocate afterwards.

use ringbuf::HeapRb;

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// A heap-backed ring of mono samples.
pub type SampleRing = HeapRb<f32>;

/// Allocate a ring that holds exactly `capacity` samples (at least 1).
pub fn sample_ring(capacity: usize) -> SampleRing {
    HeapRb::<f32>::new(capacity.max(1))
}

/// Copy up to `out.len()` of the oldest samples into `out` without consuming
/// them. Returns how many samples were copied.
pub fn copy_front(ring: &SampleRing, out: &mut [f32]) -> usize {
    let (head, tail) = ring.as_slices();
    let n = out.len().min(head.len() + tail.len());
    let from_head = n.min(head.len());
    out[..from_head].copy_from_slice(&head[..from_head]);
    out[from_head..n].copy_from_slice(&tail[..n - from_head]);
    n
}

/// Drop every queued sample.
pub fn discard_all(ring: &mut SampleRing) -> usize {
    let n = ring.occupied_len();
    ring.skip(n)
}
