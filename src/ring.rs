//! Dual-channel sample ring.
//!
//! # Design
//! Two parallel `int16` arrays (reference and measurement) of identical
//! capacity hold the most recent frames, indexed by a monotonically
//! increasing sample counter. The acquisition task is the only writer; the
//! session server and the lock-in controller read concurrently without any
//! lock on the bulk data. Correctness comes from `samples_written` acting as
//! the publication barrier: the producer stores it with release ordering
//! only after the samples of an extent are in place, and readers re-check it
//! after copying so that a span overwritten mid-copy is reported instead of
//! returned torn.
//!
//! Sample cells are `AtomicI16` accessed with relaxed ordering; on the
//! target these compile to plain halfword loads and stores, and they keep
//! the unsynchronised writer/reader overlap well-defined.
//!
//! The channels are kept as two parallel arrays rather than interleaved:
//! host read requests select one channel at a time and copy contiguous
//! spans, so the per-channel copy stays a single pass (two around a wrap),
//! matching the on-wire layout.

use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};

use thiserror::Error;

use crate::hardware::InputChannel;

/// A read was refused because the requested samples are not resident: either
/// not yet written, or already lapped by the writer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("samples {first}..{last} are outside the resident window (writer at {written})")]
pub struct StaleRead {
    pub first: u64,
    pub last: u64,
    pub written: u64,
}

pub struct Ring {
    reference: Box<[AtomicI16]>,
    measurement: Box<[AtomicI16]>,
    samples_written: AtomicU64,
    samples_per_frame: usize,
}

impl Ring {
    /// Allocate a ring holding `frames` frames of `samples_per_frame`
    /// samples per channel. This is the only allocation the ring ever does.
    pub fn new(frames: usize, samples_per_frame: usize) -> Self {
        assert!(frames > 0 && samples_per_frame > 0);
        let capacity = frames * samples_per_frame;
        let alloc = || (0..capacity).map(|_| AtomicI16::new(0)).collect();
        Ring {
            reference: alloc(),
            measurement: alloc(),
            samples_written: AtomicU64::new(0),
            samples_per_frame,
        }
    }

    pub fn capacity(&self) -> usize {
        self.reference.len()
    }

    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn frames_in_memory(&self) -> usize {
        self.capacity() / self.samples_per_frame
    }

    /// Total samples appended per channel since construction. Acquire-loads
    /// so that every sample below the returned count is visible.
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Acquire)
    }

    /// Samples that fit between the writer's tail and the wrap point.
    /// `append` accepts at most this many; the acquisition engine splits
    /// larger reads into two extents around the wrap.
    pub fn extent_to_wrap(&self) -> usize {
        let tail = (self.samples_written.load(Ordering::Relaxed) % self.capacity() as u64) as usize;
        self.capacity() - tail
    }

    /// Append one contiguous extent to both channels and publish it.
    ///
    /// Single-producer: only the acquisition task may call this. The extent
    /// must not cross the wrap point (`len <= extent_to_wrap()`); a source
    /// span that wraps is appended in two calls.
    pub fn append(&self, reference: &[i16], measurement: &[i16]) {
        assert_eq!(reference.len(), measurement.len());
        let written = self.samples_written.load(Ordering::Relaxed);
        let tail = (written % self.capacity() as u64) as usize;
        assert!(
            reference.len() <= self.capacity() - tail,
            "extent crosses the wrap point"
        );
        for (offset, (&r, &m)) in reference.iter().zip(measurement).enumerate() {
            self.reference[tail + offset].store(r, Ordering::Relaxed);
            self.measurement[tail + offset].store(m, Ordering::Relaxed);
        }
        self.samples_written
            .store(written + reference.len() as u64, Ordering::Release);
    }

    /// Copy `dst.len()` samples of `channel` starting at absolute sample
    /// index `first`, wrapping transparently. Fails when any part of the
    /// span is outside the resident window, including when the writer laps
    /// the span while the copy is in progress.
    pub fn read_span(
        &self,
        first: u64,
        channel: InputChannel,
        dst: &mut [i16],
    ) -> Result<(), StaleRead> {
        // Saturating: a span past the end of the counter range can never be
        // inside the window and fails the `last > written` check below.
        let last = first.saturating_add(dst.len() as u64);
        let capacity = self.capacity() as u64;
        let check = |written: u64| {
            if last > written || first < written.saturating_sub(capacity) {
                Err(StaleRead {
                    first,
                    last,
                    written,
                })
            } else {
                Ok(())
            }
        };
        check(self.samples_written())?;
        let source = match channel {
            InputChannel::Reference => &self.reference,
            InputChannel::Measurement => &self.measurement,
        };
        for (offset, slot) in dst.iter_mut().enumerate() {
            *slot = source[((first + offset as u64) % capacity) as usize].load(Ordering::Relaxed);
        }
        // The writer may have overtaken the span mid-copy; re-validate
        // before handing the data out.
        check(self.samples_written())
    }

    /// Copy `count` whole frames starting at `first_frame`.
    /// `dst.len()` must equal `count * samples_per_frame`.
    pub fn read_frames(
        &self,
        first_frame: i64,
        count: u64,
        channel: InputChannel,
        dst: &mut [i16],
    ) -> Result<(), StaleRead> {
        assert_eq!(dst.len() as u64, count * self.samples_per_frame as u64);
        if count == 0 {
            return Ok(());
        }
        if first_frame < 0 {
            return Err(StaleRead {
                first: 0,
                last: 0,
                written: self.samples_written(),
            });
        }
        let first = (first_frame as u64).saturating_mul(self.samples_per_frame as u64);
        self.read_span(first, channel, dst)
    }
}
