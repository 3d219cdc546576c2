//! In-memory UVC video streaming for FX3-class USB devices
//!
//! `fx3-uvc-stream` is the streaming engine of a USB Video Class device
//! that plays a fixed, cyclic playlist of pre-encoded frames out of
//! internal memory over an isochronous IN endpoint. The engine slices
//! each frame into fixed-size transfer buffers, stamps every buffer
//! with the 12-byte UVC payload header, and -- at high speed --
//! dynamically retunes the endpoint's ISO MULT setting to match the
//! data actually ready in the egress FIFO. The retune works around a
//! silicon erratum: the device selects the data PID from the endpoint
//! configuration alone, and picks wrong when a short or zero-length
//! packet opens a micro-frame.
//!
//! Enumeration, descriptor tables, and the UVC class-request responder
//! live in your USB stack; the engine only receives the resulting
//! enable / disable intent as [`StreamEvent`]s. The DMA engine and
//! endpoint controls sit behind your [`Transport`] implementation, with
//! [`ral::InEndpointRegisters`] supplying the occupancy and MULT
//! register bodies on real silicon.
//!
//! # Example
//!
//! ```
//! use fx3_uvc_stream::{
//!     Controller, Frame, FrameStore, StreamConfig, StreamState, Streamer,
//! };
//! use usb_device::endpoint::EndpointAddress;
//! use usb_device::UsbDirection;
//! # use fx3_uvc_stream::{EndpointConfig, Speed, TransferBuffer, Transport, TransportError};
//! # struct NoopTransport;
//! # impl Transport for NoopTransport {
//! #     fn configure(&mut self, _: &EndpointConfig) -> Result<(), TransportError> { Ok(()) }
//! #     fn open(&mut self) -> Result<(), TransportError> { Ok(()) }
//! #     fn close(&mut self) {}
//! #     fn acquire(&mut self) -> Result<TransferBuffer, TransportError> {
//! #         Err(TransportError::Shutdown)
//! #     }
//! #     fn commit(&mut self, _: TransferBuffer, _: usize) -> Result<(), TransportError> { Ok(()) }
//! #     fn set_nak(&mut self, _: bool) {}
//! #     fn occupancy(&self) -> Option<u32> { None }
//! #     fn write_mult(&mut self, _: u8) {}
//! #     fn speed(&self) -> Speed { Speed::High }
//! #     fn settle(&self, _: u32) {}
//! #     fn sleep(&self, _: u32) {}
//! # }
//!
//! static STREAM: StreamState = StreamState::new();
//! static VIDEO: [u8; 128] = [0x42; 128];
//! static FRAMES: [Frame; 2] = [
//!     Frame { offset: 0, length: 96 },
//!     Frame { offset: 96, length: 32 },
//! ];
//!
//! let config = StreamConfig {
//!     address: EndpointAddress::from_parts(3, UsbDirection::In),
//!     max_packet_size: 1024,
//!     super_speed_mult: 3,
//!     pacing_ms: 3,
//! };
//!
//! let store = FrameStore::new(&VIDEO, &FRAMES).unwrap();
//! let controller = Controller::new(&STREAM, &config);
//! let mut streamer = Streamer::new(store, &STREAM, &config);
//! let mut transport = NoopTransport;
//!
//! // The protocol context starts the stream...
//! controller.start(&mut transport).unwrap();
//! assert!(STREAM.is_active());
//!
//! // ...the producer thread runs `streamer.run(&mut transport)`, and
//! // the completion ISR calls `STREAM.buffer_consumed(&transport)`.
//!
//! controller.stop(&mut transport);
//! assert!(!STREAM.is_active());
//! ```

#![no_std]

#[macro_use]
mod log;

mod frame;
mod header;
mod mult;
mod state;
mod stream;
mod transport;

pub mod delay;
pub mod ral;

pub use frame::{Frame, FrameStore, FrameStoreError};
pub use header::{Header, HeaderFlags, HEADER_LEN};
pub use mult::{mult_for_bytes, MultState, MULT_MAX, MULT_MIN};
pub use state::StreamState;
pub use stream::{
    halt, Controller, StartError, StreamConfig, StreamEvent, Streamer, IDLE_POLL_MS,
};
pub use transport::{EndpointConfig, Speed, TransferBuffer, Transport, TransportError};

/// A type that owns the MULT workaround's register banks
///
/// An implementation of `Peripherals` is expected to own the USB 2.0
/// IN-endpoint configuration registers and the egress endpoint memory
/// status registers. See [`ral`] for the banks' layout and base
/// addresses.
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns both
/// register banks. The pointers returned by the methods are assumed to
/// be valid, and will be cast to register definitions.
///
/// # Example
///
/// ```
/// use fx3_uvc_stream::{ral, Peripherals};
///
/// struct UsbEgress;
///
/// unsafe impl Peripherals for UsbEgress {
///     fn ep_cfg(&self) -> *const () {
///         ral::DEV_EPI_CS_BASE as *const ()
///     }
///     fn epm(&self) -> *const () {
///         ral::EEPM_ENDPOINT_BASE as *const ()
///     }
/// }
///
/// let egress = UsbEgress;
/// assert_eq!(egress.ep_cfg(), 0xe003_1418 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the IN-endpoint configuration register
    /// bank (`DEV_EPI_CS`).
    fn ep_cfg(&self) -> *const ();
    /// Returns the address of the egress endpoint memory status
    /// register bank (`EEPM_ENDPOINT`).
    fn epm(&self) -> *const ();
}
