//! Bounded ring buffer (§3 "Ring buffer", §4.10 "Ring discipline").
//!
//! Modeled as a linear buffer that periodically compacts its consumed
//! prefix rather than a literal circular array — the receiver only ever
//! reads forward spans relative to the read head, so the two are
//! observationally identical from the caller's point of view, and a linear
//! `Vec` keeps indexing arithmetic simple.

use rustfft::num_complex::Complex32;

use crate::error::LoRaError;

pub struct Ring {
    data: Vec<Complex32>,
    /// Global sample index that `data[0]` corresponds to.
    origin: usize,
    /// Global read-head position, `origin <= head <= origin + data.len()`.
    head: usize,
    capacity: usize,
}

impl Ring {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            origin: 0,
            head: 0,
            capacity,
        }
    }

    /// Global write-tail position.
    pub fn tail(&self) -> usize {
        self.origin + self.data.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// Earliest global sample index still physically retained (history
    /// older than this has been dropped by [`Self::compact`]).
    pub fn floor(&self) -> usize {
        self.origin
    }

    /// Samples available to read ahead of the head.
    pub fn available(&self) -> usize {
        self.tail() - self.head
    }

    /// Append samples at the tail, refusing to grow past `capacity`
    /// (`C_raw`) once compacted. The caller decides whether to compact
    /// first via [`Self::compact`].
    pub fn push(&mut self, samples: &[Complex32]) -> Result<(), LoRaError> {
        if self.data.len() + samples.len() > self.capacity {
            return Err(LoRaError::InvalidConfig(
                "ring buffer capacity exceeded before the reader could catch up".to_string(),
            ));
        }
        self.data.extend_from_slice(samples);
        Ok(())
    }

    /// A read-only view of `len` samples starting `off` past the head.
    /// Returns `None` if the requested span runs past the tail.
    pub fn view(&self, off: usize, len: usize) -> Option<&[Complex32]> {
        self.view_global(self.head + off, len)
    }

    /// A read-only view of `len` samples starting at the absolute global
    /// index `start`. Returns `None` if the span isn't fully retained.
    pub fn view_global(&self, start: usize, len: usize) -> Option<&[Complex32]> {
        let end = start + len;
        if end > self.tail() || start < self.origin {
            return None;
        }
        Some(&self.data[start - self.origin..end - self.origin])
    }

    /// Move the read head forward by `n` samples (clamped to the tail). The
    /// head never regresses.
    pub fn advance(&mut self, n: usize) {
        self.head = (self.head + n).min(self.tail());
    }

    /// Drop any physical storage more than `keep_before_head` samples
    /// behind the head, preserving history for re-examination without
    /// growing `data` unboundedly.
    pub fn compact(&mut self, keep_before_head: usize) {
        let floor = self.head.saturating_sub(keep_before_head);
        if floor > self.origin {
            let drop = floor - self.origin;
            self.data.drain(0..drop);
            self.origin = floor;
        }
    }

    /// Discards all contents and returns to the initial empty state.
    pub fn reset(&mut self) {
        self.data.clear();
        self.origin = 0;
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Complex32> {
        (0..n).map(|i| Complex32::new(i as f32, 0.0)).collect()
    }

    #[test]
    fn head_never_regresses_and_available_tracks_tail() {
        let mut ring = Ring::new(1024);
        ring.push(&samples(100)).unwrap();
        assert_eq!(ring.available(), 100);
        ring.advance(40);
        assert_eq!(ring.head(), 40);
        assert_eq!(ring.available(), 60);
        ring.advance(1000);
        assert_eq!(ring.head(), 100);
    }

    #[test]
    fn view_respects_tail_bound() {
        let mut ring = Ring::new(1024);
        ring.push(&samples(10)).unwrap();
        assert!(ring.view(0, 10).is_some());
        assert!(ring.view(0, 11).is_none());
    }

    #[test]
    fn compact_preserves_history_margin() {
        let mut ring = Ring::new(1024);
        ring.push(&samples(500)).unwrap();
        ring.advance(400);
        ring.compact(100);
        assert_eq!(ring.view(0, 100).unwrap().len(), 100);
        assert_eq!(ring.head(), 400);
    }

    #[test]
    fn push_rejects_overflow_past_capacity() {
        let mut ring = Ring::new(10);
        assert!(ring.push(&samples(5)).is_ok());
        assert!(ring.push(&samples(6)).is_err());
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut ring = Ring::new(1024);
        ring.push(&samples(50)).unwrap();
        ring.advance(20);
        ring.reset();
        assert_eq!(ring.head(), 0);
        assert_eq!(ring.available(), 0);
    }
}
