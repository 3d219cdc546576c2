//! Settle-interval busy waits
//!
//! The MULT quiesce sequence pauses for wall-clock intervals tuned to
//! micro-frame timing, and those pauses must elapse synchronously --
//! the endpoint cannot see traffic mid-reconfiguration, so yielding is
//! not an option. This helper implements [`Transport::settle`] for
//! Cortex-M based integrations; platforms with a hardware busy-wait
//! timer should prefer it.
//!
//! [`Transport::settle`]: crate::Transport::settle

/// Spin for at least `micros`, on a core running at `core_mhz`.
///
/// The wait is cycle-counted and assumes one loop iteration per cycle
/// or better, so it only ever over-waits. Not interruptible by design.
pub fn busy_wait_us(micros: u32, core_mhz: u32) {
    cortex_m::asm::delay(micros.saturating_mul(core_mhz));
}
