//! Dynamic ISO MULT retuning
//!
//! The device selects the data PID for high-speed ISO transfers from
//! the endpoint configuration alone, and picks wrong when a short or
//! zero-length packet opens a micro-frame. The workaround keeps the
//! endpoint's MULT field matched to the data actually sitting in the
//! egress FIFO: sample the FIFO occupancy, derive the multiplier, and
//! reprogram the endpoint inside a quiesce window so no traffic moves
//! while the field changes.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::transport::{TransferBuffer, Transport, TransportError};

/// Smallest multiplier the endpoint accepts.
pub const MULT_MIN: u8 = 1;
/// Largest multiplier the endpoint accepts.
pub const MULT_MAX: u8 = 3;

/// High-speed ISO packet length, in bytes.
const PACKET_LEN: u32 = 1024;

/// Quiesce time before a wrapped commit, tuned to micro-frame timing.
pub(crate) const SETTLE_BEFORE_COMMIT_US: u32 = 10;
/// Latch time after a wrapped commit, before reprogramming MULT.
pub(crate) const SETTLE_AFTER_COMMIT_US: u32 = 20;

/// The multiplier implied by `bytes` of ready data.
///
/// Unclamped: callers compare this raw value against
/// [`MultState::programmed`], and clamp into `1..=3` only when writing
/// hardware. A not-ready FIFO is represented by the caller as raw 0,
/// not by this function.
pub fn mult_for_bytes(bytes: u32) -> u8 {
    (bytes / PACKET_LEN + 1).min(u32::from(u8::MAX)) as u8
}

/// Multiplier state shared between the producer and the completion
/// notifier.
///
/// `programmed` caches the raw multiplier from the last producer
/// recompute; `bytes_ready` holds the latest occupancy sample from
/// either context. Both are relaxed atomics: a reader may observe a
/// value one sample stale, which costs a redundant retune at worst.
pub struct MultState {
    /// Raw multiplier cached at the last hardware write. May be 0 when
    /// the FIFO reported not-ready; the hardware itself always holds a
    /// clamped value.
    programmed: AtomicU8,
    /// Last observed egress FIFO occupancy, in bytes.
    bytes_ready: AtomicU32,
}

impl MultState {
    pub const fn new() -> Self {
        MultState {
            programmed: AtomicU8::new(MULT_MIN),
            bytes_ready: AtomicU32::new(0),
        }
    }

    /// Forget any stale samples from a previous streaming session.
    pub(crate) fn revalidate(&self) {
        self.programmed.store(MULT_MIN, Ordering::Relaxed);
        self.bytes_ready.store(0, Ordering::Relaxed);
    }

    /// The raw multiplier cached at the last recompute.
    pub fn programmed(&self) -> u8 {
        self.programmed.load(Ordering::Relaxed)
    }

    /// The last observed FIFO occupancy, in bytes.
    pub fn bytes_ready(&self) -> u32 {
        self.bytes_ready.load(Ordering::Relaxed)
    }

    /// Does the latest occupancy sample disagree with the programmed
    /// multiplier?
    ///
    /// This is the producer's read side of [`observe`](MultState::observe):
    /// a completion left enough data backed up in the FIFO that the
    /// endpoint needs reprogramming, even if the next chunk's own size
    /// would not call for it. A zero sample carries no demand; the
    /// quiesced recompute handles the not-ready FIFO on its own.
    pub fn retune_pending(&self) -> bool {
        let bytes = self.bytes_ready();
        bytes != 0 && mult_for_bytes(bytes) != self.programmed()
    }

    /// Record an occupancy sample without touching hardware.
    ///
    /// This is the completion notifier's path: it must not block, and it
    /// must not race the producer's configuration register writes, so it
    /// only refreshes the shared sample.
    pub fn observe(&self, occupancy: Option<u32>) {
        self.bytes_ready
            .store(occupancy.unwrap_or(0), Ordering::Relaxed);
    }

    /// Re-sample the FIFO and program the endpoint's multiplier.
    ///
    /// Producer-only. Caches the raw computed value (0 when the FIFO is
    /// not ready) for later comparisons, then writes the clamped value:
    /// an empty or not-ready FIFO still programs the minimum legal
    /// multiplier, never 0.
    pub fn recompute<T: Transport + ?Sized>(&self, transport: &mut T) {
        let raw = match transport.occupancy() {
            Some(bytes) => {
                self.bytes_ready.store(bytes, Ordering::Relaxed);
                mult_for_bytes(bytes)
            }
            None => {
                self.bytes_ready.store(0, Ordering::Relaxed);
                0
            }
        };
        self.programmed.store(raw, Ordering::Relaxed);
        transport.write_mult(raw.clamp(MULT_MIN, MULT_MAX));
    }

    /// Commit a buffer inside the quiesce/apply/resume sequence.
    ///
    /// The endpoint NAKs new traffic while any in-flight micro-frame
    /// drains, the buffer is committed, the hardware is given time to
    /// latch it, and only then is the multiplier reprogrammed and the
    /// endpoint resumed. The settle intervals are synchronous busy-waits;
    /// the endpoint must not see traffic mid-reconfiguration. The NAK is
    /// cleared even when the commit fails.
    pub(crate) fn commit_quiesced<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        buffer: TransferBuffer,
        len: usize,
    ) -> Result<(), TransportError> {
        transport.set_nak(true);
        transport.settle(SETTLE_BEFORE_COMMIT_US);
        let result = transport.commit(buffer, len);
        transport.settle(SETTLE_AFTER_COMMIT_US);
        self.recompute(transport);
        transport.set_nak(false);
        result
    }
}

impl Default for MultState {
    fn default() -> Self {
        Self::new()
    }
}
