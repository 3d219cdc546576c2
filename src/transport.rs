//! The seam between the streaming engine and the vendor USB stack
//!
//! The engine never touches the DMA engine or the endpoint directly. It
//! sees a bounded pool of fixed-size transfer buffers with a blocking
//! acquire, plus the handful of endpoint controls the MULT workaround
//! needs. An integration wraps the vendor driver in a [`Transport`]
//! implementation; [`crate::ral::InEndpointRegisters`] supplies the
//! occupancy and MULT register bodies on real silicon.

use core::ptr::NonNull;

use usb_device::endpoint::EndpointAddress;

/// Negotiated USB speed tiers relevant to the streamer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Speed {
    /// USB 2.0 high speed.
    ///
    /// This is the tier that exhibits the data-toggle erratum, so the
    /// endpoint's MULT setting is retuned dynamically while streaming.
    #[default]
    High,
    /// USB 3.x super speed.
    ///
    /// The endpoint is configured once, at stream start, with a burst
    /// size that is already sufficient. No retuning happens.
    Super,
}

/// Transport failures, as the streaming engine distinguishes them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum TransportError {
    /// The buffer pool was torn down while the call was in progress.
    ///
    /// This is the expected way a blocked producer observes `stop()`.
    /// It is recovered locally and never treated as a failure.
    Shutdown,
    /// The endpoint rejected configuration or traffic.
    Endpoint,
    /// The DMA channel reported a failure.
    Channel,
}

/// A fixed-size buffer owned by whoever currently holds it.
///
/// The transport constructs these over its DMA memory and hands them to
/// the producer from [`Transport::acquire`]. Moving the buffer into
/// [`Transport::commit`] is the ownership transfer back to hardware;
/// the two sides never write it concurrently.
pub struct TransferBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
}

impl TransferBuffer {
    /// # Safety
    ///
    /// `ptr` must point to an allocation of at least `capacity` bytes
    /// that outlives the buffer, and nothing else may access that
    /// memory until the buffer is committed back to the transport.
    pub unsafe fn new(ptr: NonNull<u8>, capacity: usize) -> Self {
        TransferBuffer { ptr, capacity }
    }

    /// Total capacity, header area included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// View the whole buffer for filling.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: construction guarantees the allocation, and holding
        // the buffer guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

// Safety: the buffer represents exclusive ownership of its memory, and
// moves between the producer and the completion context by value.
unsafe impl Send for TransferBuffer {}

/// Isochronous endpoint configuration applied at stream start.
///
/// All values are fixed at build time; bandwidth negotiation with the
/// host is spoofed to a single setting by the class-request responder.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EndpointConfig {
    /// The IN endpoint carrying video.
    pub address: EndpointAddress,
    /// Maximum packet size, in bytes.
    pub max_packet_size: u16,
    /// Initial packets-per-microframe multiplier.
    pub mult: u8,
}

/// Everything the engine asks of the vendor USB / DMA stack.
///
/// `occupancy` and `speed` take `&self`: the completion notifier calls
/// them without holding the producer's mutable borrow.
pub trait Transport {
    /// Apply the endpoint configuration.
    ///
    /// Called once per stream start, before the buffer pool exists.
    fn configure(&mut self, config: &EndpointConfig) -> Result<(), TransportError>;

    /// Allocate the transfer buffer pool and prime the endpoint to
    /// begin draining committed buffers.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Tear down the buffer pool, discarding any in-flight buffer, and
    /// disable the endpoint.
    ///
    /// Must be idempotent, and must unblock a producer waiting in
    /// [`acquire`](Transport::acquire) with [`TransportError::Shutdown`].
    fn close(&mut self);

    /// Block until a transfer buffer is free, without bound.
    ///
    /// Every buffer handed out must be larger than
    /// [`HEADER_LEN`](crate::HEADER_LEN) bytes: the producer reserves
    /// the front of each buffer for the payload header and fills the
    /// remainder with frame data. Pools are sized at `open` time, so
    /// this is a construction-time obligation, not a per-call check.
    fn acquire(&mut self) -> Result<TransferBuffer, TransportError>;

    /// Hand `len` bytes of `buffer` to the hardware for draining.
    fn commit(&mut self, buffer: TransferBuffer, len: usize) -> Result<(), TransportError>;

    /// Make the endpoint NAK new traffic (`true`) or accept it (`false`).
    fn set_nak(&mut self, nak: bool);

    /// Bytes ready in the endpoint's egress FIFO, or `None` when the
    /// FIFO reports not-ready.
    fn occupancy(&self) -> Option<u32>;

    /// Program the endpoint's packets-per-microframe multiplier.
    ///
    /// Only ever called with values in `1..=3`, and only from the
    /// producer's quiesce sequence.
    fn write_mult(&mut self, mult: u8);

    /// The negotiated speed tier.
    fn speed(&self) -> Speed;

    /// Busy-wait for `micros`. Wall-clock quiescence, not fairness:
    /// the wait must elapse synchronously.
    fn settle(&self, micros: u32);

    /// Sleep for `millis`, yielding to other threads of control.
    fn sleep(&self, millis: u32);
}
