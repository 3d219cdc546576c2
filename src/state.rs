//! Shared stream state
//!
//! One `StreamState` lives for the lifetime of the device, usually as a
//! `static`. It is the only state shared across the three contexts:
//! the producer loop polls `active`, the control context flips it
//! through the controller, and the hardware completion notifier updates
//! the multiplier sample through [`buffer_consumed`](StreamState::buffer_consumed).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::mult::MultState;
use crate::transport::{Speed, Transport};

/// Stream state shared between the producer, the completion notifier,
/// and the control context.
///
/// ```
/// use fx3_uvc_stream::StreamState;
///
/// static STREAM: StreamState = StreamState::new();
/// ```
pub struct StreamState {
    /// The only signal the streaming loop polls to keep producing.
    active: AtomicBool,
    /// Held across a start or stop transition to reject re-entry.
    configuring: AtomicBool,
    mult: MultState,
}

impl StreamState {
    pub const fn new() -> Self {
        StreamState {
            active: AtomicBool::new(false),
            configuring: AtomicBool::new(false),
            mult: MultState::new(),
        }
    }

    /// Is the stream enabled?
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Claim the transition guard. Returns `true` if it was already held.
    pub(crate) fn begin_transition(&self) -> bool {
        self.configuring.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn end_transition(&self) {
        self.configuring.store(false, Ordering::SeqCst);
    }

    /// The shared multiplier state.
    pub fn mult(&self) -> &MultState {
        &self.mult
    }

    /// Completion notifier entry point.
    ///
    /// Invoke once per buffer fully drained by hardware. Reentrant-safe
    /// and non-blocking: it only refreshes the occupancy sample so the
    /// producer's next retune decision is fresh. It never reprograms the
    /// endpoint; only the producer writes configuration registers.
    ///
    /// Only the high-speed tier exhibits the erratum, so other tiers
    /// skip the sample.
    pub fn buffer_consumed<T: Transport + ?Sized>(&self, transport: &T) {
        if transport.speed() == Speed::High {
            self.mult.observe(transport.occupancy());
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
