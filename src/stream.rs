//! Stream controller and the producer loop
//!
//! The controller reacts to enable / disable intent from the protocol
//! layer and owns the transport's lifecycle. The streamer is the
//! long-lived producer: it walks the playlist, slices frames into
//! transfer buffers behind a UVC payload header, and retunes the
//! endpoint's MULT setting before any commit that implies a different
//! multiplier than the one programmed, whether from the chunk's own
//! size or from the completion notifier's FIFO sample.

use core::convert::Infallible;

use usb_device::endpoint::EndpointAddress;

use crate::frame::{Cursor, FrameStore};
use crate::header::{Header, HEADER_LEN};
use crate::mult::{mult_for_bytes, MULT_MIN};
use crate::state::StreamState;
use crate::transport::{EndpointConfig, Speed, TransferBuffer, Transport, TransportError};

/// How long the producer sleeps between passes while the stream is
/// disabled, and between iterations of [`halt`].
pub const IDLE_POLL_MS: u32 = 100;

/// Build-time streaming parameters.
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// The isochronous IN endpoint carrying video.
    pub address: EndpointAddress,
    /// Negotiated maximum packet size, in bytes.
    pub max_packet_size: u16,
    /// Static burst multiplier used at super speed, where no dynamic
    /// retuning happens.
    pub super_speed_mult: u8,
    /// Sleep before each commit, pacing the frame rate.
    pub pacing_ms: u32,
}

/// Why a stream failed to start.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum StartError {
    /// `start()` re-entered while a start or stop transition was
    /// already in flight.
    AlreadyConfiguring,
    /// Endpoint configuration or pool allocation failed. The stream
    /// did not become active.
    Transport(TransportError),
}

impl From<TransportError> for StartError {
    fn from(error: TransportError) -> Self {
        StartError::Transport(error)
    }
}

/// Protocol-layer intent, mapped from class and standard control
/// events by the enumeration stack.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum StreamEvent {
    /// The streaming alternate setting was selected.
    Enable,
    /// The zero-bandwidth alternate setting was selected.
    Disable,
    /// Bus reset.
    Reset,
    /// Device disconnected.
    Disconnect,
}

/// Owns the stream lifecycle: `Idle ↔ Active`.
pub struct Controller<'a> {
    state: &'a StreamState,
    config: &'a StreamConfig,
}

impl<'a> Controller<'a> {
    pub fn new(state: &'a StreamState, config: &'a StreamConfig) -> Self {
        Controller { state, config }
    }

    /// Bring the stream up: configure the endpoint, allocate the
    /// transfer buffer pool, prime the transport, and mark the stream
    /// active.
    ///
    /// A no-op when the stream is already active. Fails with
    /// [`StartError::AlreadyConfiguring`] when re-entered during a
    /// start or stop transition.
    pub fn start<T: Transport>(&self, transport: &mut T) -> Result<(), StartError> {
        if self.state.is_active() {
            return Ok(());
        }
        if self.state.begin_transition() {
            return Err(StartError::AlreadyConfiguring);
        }
        let result = self.bring_up(transport);
        self.state.end_transition();
        result
    }

    fn bring_up<T: Transport>(&self, transport: &mut T) -> Result<(), StartError> {
        // Super speed streams with a burst that's already sufficient.
        // At high speed, start from the minimum: the streamer retunes
        // it to the actual FIFO occupancy once data flows.
        let mult = match transport.speed() {
            Speed::Super => self.config.super_speed_mult,
            Speed::High => MULT_MIN,
        };
        transport.configure(&EndpointConfig {
            address: self.config.address,
            max_packet_size: self.config.max_packet_size,
            mult,
        })?;
        transport.open()?;
        self.state.mult().revalidate();
        self.state.set_active(true);
        debug!("stream started");
        Ok(())
    }

    /// Tear the stream down: mark it inactive, release the buffer pool
    /// (discarding any in-flight buffer), and disable the endpoint.
    ///
    /// Idempotent, and safe to call while the producer is blocked in
    /// `acquire`: tearing down the pool unblocks it with
    /// [`TransportError::Shutdown`].
    pub fn stop<T: Transport>(&self, transport: &mut T) {
        self.state.set_active(false);
        let reentered = self.state.begin_transition();
        transport.close();
        debug!("stream stopped");
        if !reentered {
            self.state.end_transition();
        }
    }

    /// Fold a protocol event into the stream lifecycle.
    ///
    /// Selecting the streaming alternate setting restarts the stream
    /// from the top of the playlist, even if it was already active.
    pub fn handle_event<T: Transport>(
        &self,
        event: StreamEvent,
        transport: &mut T,
    ) -> Result<(), StartError> {
        match event {
            StreamEvent::Enable => {
                if self.state.is_active() {
                    self.stop(transport);
                }
                self.start(transport)
            }
            StreamEvent::Disable | StreamEvent::Reset | StreamEvent::Disconnect => {
                if self.state.is_active() {
                    self.stop(transport);
                }
                Ok(())
            }
        }
    }
}

/// The producer loop.
pub struct Streamer<'a> {
    store: FrameStore<'a>,
    header: Header,
    cursor: Cursor,
    state: &'a StreamState,
    config: &'a StreamConfig,
}

impl<'a> Streamer<'a> {
    pub fn new(store: FrameStore<'a>, state: &'a StreamState, config: &'a StreamConfig) -> Self {
        Streamer {
            store,
            header: Header::new(),
            cursor: Cursor::new(),
            state,
            config,
        }
    }

    /// Produce forever.
    ///
    /// Each pass streams the playlist for as long as the stream is
    /// active, then idles briefly before re-checking. Returns only on
    /// an unexpected transport failure, which the caller should treat
    /// as terminal — typically by logging and calling [`halt`]. The
    /// erratum workaround exists to prevent this class of failure, so
    /// an occurrence past that mitigation is worth stopping for.
    pub fn run<T: Transport>(&mut self, transport: &mut T) -> Result<Infallible, TransportError> {
        loop {
            self.stream_pass(transport)?;
            transport.sleep(IDLE_POLL_MS);
        }
    }

    /// One pass: restart at frame 0 with a fresh frame ID, and emit
    /// chunks until the stream is disabled.
    fn stream_pass<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        self.cursor.reset(&self.store);
        self.header.reset();

        while self.state.is_active() {
            if let Err(error) = self.produce_chunk(transport) {
                if error == TransportError::Shutdown || !self.state.is_active() {
                    // Pool torn down by a concurrent stop(). Back to idle.
                    break;
                }
                warn!("streamer error, halting");
                return Err(error);
            }
        }
        Ok(())
    }

    /// Fill, stamp, and commit one transfer buffer.
    fn produce_chunk<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        let mut buffer = transport.acquire()?;
        let capacity = buffer.capacity();
        debug_assert!(capacity > HEADER_LEN);
        let payload_area = capacity - HEADER_LEN;

        let remaining = self.cursor.remaining(&self.store);
        let (copy_len, commit_len, eof) = if remaining > payload_area {
            // Mid-frame chunk: fill the whole buffer.
            (payload_area, capacity, false)
        } else {
            // Final chunk of this frame.
            (remaining, remaining + HEADER_LEN, true)
        };

        let chunk = buffer.as_mut_slice();
        let payload = self.store.payload(&self.cursor, copy_len);
        chunk[HEADER_LEN..HEADER_LEN + copy_len].copy_from_slice(payload);
        self.header.stamp(chunk, eof);

        transport.sleep(self.config.pacing_ms);
        self.commit(transport, buffer, commit_len)?;

        if eof {
            self.cursor.next_frame(&self.store);
        } else {
            self.cursor.advance(copy_len);
        }
        Ok(())
    }

    /// Commit, retuning MULT first when this chunk's size or the
    /// notifier's latest FIFO sample implies a different multiplier
    /// than the one programmed.
    fn commit<T: Transport>(
        &mut self,
        transport: &mut T,
        buffer: TransferBuffer,
        len: usize,
    ) -> Result<(), TransportError> {
        if transport.speed() == Speed::High {
            let mult = self.state.mult();
            if mult_for_bytes(len as u32) != mult.programmed() || mult.retune_pending() {
                return mult.commit_quiesced(transport, buffer, len);
            }
        }
        transport.commit(buffer, len)
    }
}

/// Terminal error state.
///
/// A halted device communicates failure only through its complete
/// unresponsiveness; recovery requires external reset or reattach.
pub fn halt<T: Transport + ?Sized>(transport: &T) -> ! {
    loop {
        transport.sleep(IDLE_POLL_MS);
    }
}

#[cfg(test)]
mod test {
    use core::ptr::NonNull;

    use super::{Controller, StartError, StreamConfig, StreamEvent, Streamer};
    use crate::frame::{Frame, FrameStore};
    use crate::header::HEADER_LEN;
    use crate::state::StreamState;
    use crate::transport::{
        EndpointConfig, Speed, TransferBuffer, Transport, TransportError,
    };
    use usb_device::endpoint::EndpointAddress;
    use usb_device::UsbDirection;

    const MOCK_CAP: usize = 4096;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum Op {
        Nak(bool),
        Commit(usize),
        Mult(u8),
    }

    struct Mock<'a> {
        state: &'a StreamState,
        capacity: usize,
        speed: Speed,
        occupancy: Option<u32>,
        /// Stream goes inactive after this many commits.
        stop_after_commits: usize,
        shutdown_acquires: bool,
        fail_commit: Option<TransportError>,
        storage: [u8; MOCK_CAP],
        ops: [Op; 96],
        op_count: usize,
        /// Committed (length, bmHeaderInfo) pairs.
        commits: [(usize, u8); 48],
        commit_count: usize,
        payload_log: [u8; 512],
        payload_len: usize,
        log_payload: bool,
        configured: Option<EndpointConfig>,
        opens: u32,
        closes: u32,
    }

    impl<'a> Mock<'a> {
        fn new(state: &'a StreamState, capacity: usize, speed: Speed) -> Self {
            Mock {
                state,
                capacity,
                speed,
                occupancy: None,
                stop_after_commits: usize::MAX,
                shutdown_acquires: false,
                fail_commit: None,
                storage: [0; MOCK_CAP],
                ops: [Op::Nak(false); 96],
                op_count: 0,
                commits: [(0, 0); 48],
                commit_count: 0,
                payload_log: [0; 512],
                payload_len: 0,
                log_payload: false,
                configured: None,
                opens: 0,
                closes: 0,
            }
        }

        fn push(&mut self, op: Op) {
            self.ops[self.op_count] = op;
            self.op_count += 1;
        }

        fn ops(&self) -> &[Op] {
            &self.ops[..self.op_count]
        }

        fn commits(&self) -> &[(usize, u8)] {
            &self.commits[..self.commit_count]
        }
    }

    impl Transport for Mock<'_> {
        fn configure(&mut self, config: &EndpointConfig) -> Result<(), TransportError> {
            self.configured = Some(*config);
            Ok(())
        }
        fn open(&mut self) -> Result<(), TransportError> {
            self.opens += 1;
            Ok(())
        }
        fn close(&mut self) {
            self.closes += 1;
        }
        fn acquire(&mut self) -> Result<TransferBuffer, TransportError> {
            if self.shutdown_acquires {
                return Err(TransportError::Shutdown);
            }
            let ptr = NonNull::new(self.storage.as_mut_ptr()).unwrap();
            Ok(unsafe { TransferBuffer::new(ptr, self.capacity) })
        }
        fn commit(&mut self, _: TransferBuffer, len: usize) -> Result<(), TransportError> {
            if let Some(error) = self.fail_commit {
                return Err(error);
            }
            self.push(Op::Commit(len));
            self.commits[self.commit_count] = (len, self.storage[1]);
            self.commit_count += 1;
            if self.log_payload {
                let payload = &self.storage[HEADER_LEN..len];
                self.payload_log[self.payload_len..self.payload_len + payload.len()]
                    .copy_from_slice(payload);
                self.payload_len += payload.len();
            }
            if self.commit_count >= self.stop_after_commits {
                self.state.set_active(false);
            }
            Ok(())
        }
        fn set_nak(&mut self, nak: bool) {
            self.push(Op::Nak(nak));
        }
        fn occupancy(&self) -> Option<u32> {
            self.occupancy
        }
        fn write_mult(&mut self, mult: u8) {
            self.push(Op::Mult(mult));
        }
        fn speed(&self) -> Speed {
            self.speed
        }
        fn settle(&self, _: u32) {
            // Interior logging would need a Cell; settle order is
            // checked through the mutable entry points around it.
        }
        fn sleep(&self, _: u32) {}
    }

    fn config() -> StreamConfig {
        StreamConfig {
            address: EndpointAddress::from_parts(3, UsbDirection::In),
            max_packet_size: 1024,
            super_speed_mult: 3,
            pacing_ms: 3,
        }
    }

    #[test]
    fn chunking_matches_frame_layout() {
        // Payload area of 1000 bytes per chunk.
        let bytes = [0u8; 15200];
        let frames = [
            Frame {
                offset: 0,
                length: 5000,
            },
            Frame {
                offset: 5000,
                length: 200,
            },
            Frame {
                offset: 5200,
                length: 10000,
            },
        ];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 1012, Speed::Super);
        mock.stop_after_commits = 16;
        state.set_active(true);

        streamer.stream_pass(&mut mock).unwrap();

        let commits = mock.commits();
        assert_eq!(commits.len(), 16);

        // Frame 0: four mid-frame chunks and a final chunk, all 1012
        // bytes on the wire. EOF only on the last.
        for commit in &commits[..4] {
            assert_eq!(*commit, (1012, 0x8C));
        }
        assert_eq!(commits[4], (1012, 0x8E));

        // Frame 1 fits one chunk; frame ID toggled after frame 0.
        assert_eq!(commits[5], (212, 0x8F));

        // Frame 2: ten chunks, frame ID back to zero.
        for commit in &commits[6..15] {
            assert_eq!(*commit, (1012, 0x8C));
        }
        assert_eq!(commits[15], (1012, 0x8E));

        // Committed bytes per frame: payload plus one header per chunk.
        let frame0: usize = commits[..5].iter().map(|(len, _)| len).sum();
        let frame1: usize = commits[5].0;
        let frame2: usize = commits[6..].iter().map(|(len, _)| len).sum();
        assert_eq!(frame0, 5000 + 5 * HEADER_LEN);
        assert_eq!(frame1, 200 + HEADER_LEN);
        assert_eq!(frame2, 10000 + 10 * HEADER_LEN);

        // Super speed never quiesces or retunes.
        assert!(mock
            .ops()
            .iter()
            .all(|op| matches!(op, Op::Commit(_))));
    }

    #[test]
    fn playlist_wraps_without_dropping_bytes() {
        let mut bytes = [0u8; 15];
        for (index, byte) in bytes.iter_mut().enumerate() {
            *byte = index as u8;
        }
        let frames = [
            Frame {
                offset: 0,
                length: 10,
            },
            Frame {
                offset: 10,
                length: 5,
            },
        ];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        // Payload area of 8 bytes; two passes over the playlist.
        let mut mock = Mock::new(&state, 20, Speed::Super);
        mock.stop_after_commits = 6;
        mock.log_payload = true;
        state.set_active(true);

        streamer.stream_pass(&mut mock).unwrap();

        let lens: [usize; 6] = core::array::from_fn(|i| mock.commits()[i].0);
        assert_eq!(lens, [20, 14, 17, 20, 14, 17]);

        // The committed payload is the store's playlist, twice, with
        // nothing dropped or duplicated at the wrap boundary.
        let mut expected = [0u8; 30];
        expected[..15].copy_from_slice(&bytes);
        expected[15..].copy_from_slice(&bytes);
        assert_eq!(&mock.payload_log[..mock.payload_len], &expected[..]);
    }

    #[test]
    fn retunes_before_differing_commit_only() {
        // One frame, two chunks of 3064 wire bytes each.
        let bytes = [0u8; 6104];
        let frames = [Frame {
            offset: 0,
            length: 6104,
        }];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 3064, Speed::High);
        mock.occupancy = Some(2500);
        mock.stop_after_commits = 2;
        state.set_active(true);

        streamer.stream_pass(&mut mock).unwrap();

        // First commit implies MULT 3 against programmed 1: quiesce,
        // commit, recompute, resume. Second commit matches and goes
        // straight through.
        assert_eq!(
            mock.ops(),
            &[
                Op::Nak(true),
                Op::Commit(3064),
                Op::Mult(3),
                Op::Nak(false),
                Op::Commit(3064),
            ]
        );
        assert_eq!(state.mult().programmed(), 3);
    }

    #[test]
    fn quiesced_commit_failure_clears_nak() {
        let bytes = [0u8; 6104];
        let frames = [Frame {
            offset: 0,
            length: 6104,
        }];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 3064, Speed::High);
        mock.occupancy = Some(2500);
        mock.fail_commit = Some(TransportError::Channel);
        state.set_active(true);

        // The first commit retunes, so it runs inside the quiesce
        // window. Its failure is fatal, but the endpoint resumes on
        // the way out: the stream dies, the bus does not wedge.
        assert_eq!(
            streamer.stream_pass(&mut mock),
            Err(TransportError::Channel)
        );
        assert_eq!(mock.ops(), &[Op::Nak(true), Op::Mult(3), Op::Nak(false)]);
    }

    #[test]
    fn notifier_sample_forces_retune() {
        // Chunks small enough that their size alone implies MULT 1.
        let bytes = [0u8; 16];
        let frames = [Frame {
            offset: 0,
            length: 16,
        }];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 32, Speed::High);
        mock.occupancy = Some(2500);
        mock.stop_after_commits = 1;
        state.set_active(true);

        // A completion left three packets backed up in the FIFO.
        state.buffer_consumed(&mock);

        streamer.stream_pass(&mut mock).unwrap();

        assert_eq!(
            mock.ops(),
            &[Op::Nak(true), Op::Commit(28), Op::Mult(3), Op::Nak(false)]
        );
        assert_eq!(state.mult().programmed(), 3);
    }

    #[test]
    fn shutdown_while_blocked_is_clean() {
        let bytes = [0u8; 64];
        let frames = [Frame {
            offset: 0,
            length: 64,
        }];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 32, Speed::High);
        mock.shutdown_acquires = true;
        state.set_active(true);

        // A pool torn down by stop() ends the pass without error.
        assert_eq!(streamer.stream_pass(&mut mock), Ok(()));
    }

    #[test]
    fn unexpected_commit_failure_is_fatal() {
        let bytes = [0u8; 64];
        let frames = [Frame {
            offset: 0,
            length: 64,
        }];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        let mut mock = Mock::new(&state, 32, Speed::Super);
        mock.fail_commit = Some(TransportError::Channel);
        state.set_active(true);

        assert_eq!(
            streamer.stream_pass(&mut mock),
            Err(TransportError::Channel)
        );
    }

    #[test]
    fn restart_resets_cursor_and_frame_id() {
        let mut bytes = [0u8; 15];
        for (index, byte) in bytes.iter_mut().enumerate() {
            *byte = index as u8;
        }
        let frames = [
            Frame {
                offset: 0,
                length: 10,
            },
            Frame {
                offset: 10,
                length: 5,
            },
        ];
        let store = FrameStore::new(&bytes, &frames).unwrap();
        let state = StreamState::new();
        let cfg = config();
        let mut streamer = Streamer::new(store, &state, &cfg);

        // Stop mid-playlist: frame 0 done (frame ID now 1), frame 1 cut.
        let mut mock = Mock::new(&state, 20, Speed::Super);
        mock.stop_after_commits = 2;
        state.set_active(true);
        streamer.stream_pass(&mut mock).unwrap();

        // The next pass starts over at frame 0 with the default header.
        let mut mock = Mock::new(&state, 20, Speed::Super);
        mock.stop_after_commits = 1;
        mock.log_payload = true;
        state.set_active(true);
        streamer.stream_pass(&mut mock).unwrap();

        assert_eq!(mock.commits()[0], (20, 0x8C));
        assert_eq!(&mock.payload_log[..8], &bytes[..8]);
    }

    #[test]
    fn controller_start_configures_by_speed() {
        let state = StreamState::new();
        let cfg = config();
        let controller = Controller::new(&state, &cfg);

        let mut mock = Mock::new(&state, 32, Speed::Super);
        controller.start(&mut mock).unwrap();
        assert!(state.is_active());
        assert_eq!(mock.opens, 1);
        assert_eq!(mock.configured.unwrap().mult, 3);

        // Already active: a no-op, not a reconfiguration.
        controller.start(&mut mock).unwrap();
        assert_eq!(mock.opens, 1);

        controller.stop(&mut mock);
        assert!(!state.is_active());
        assert_eq!(mock.closes, 1);

        let mut mock = Mock::new(&state, 32, Speed::High);
        controller.start(&mut mock).unwrap();
        assert_eq!(mock.configured.unwrap().mult, 1);
    }

    #[test]
    fn reentrant_start_is_rejected() {
        let state = StreamState::new();
        let cfg = config();
        let controller = Controller::new(&state, &cfg);
        let mut mock = Mock::new(&state, 32, Speed::High);

        assert!(!state.begin_transition());
        assert_eq!(
            controller.start(&mut mock),
            Err(StartError::AlreadyConfiguring)
        );
        state.end_transition();
        assert!(controller.start(&mut mock).is_ok());
    }

    #[test]
    fn events_drive_the_lifecycle() {
        let state = StreamState::new();
        let cfg = config();
        let controller = Controller::new(&state, &cfg);
        let mut mock = Mock::new(&state, 32, Speed::High);

        controller
            .handle_event(StreamEvent::Enable, &mut mock)
            .unwrap();
        assert!(state.is_active());

        // Re-selecting the streaming interface restarts the stream.
        controller
            .handle_event(StreamEvent::Enable, &mut mock)
            .unwrap();
        assert_eq!(mock.closes, 1);
        assert_eq!(mock.opens, 2);
        assert!(state.is_active());

        controller
            .handle_event(StreamEvent::Disconnect, &mut mock)
            .unwrap();
        assert!(!state.is_active());
        assert_eq!(mock.closes, 2);

        // Disable while idle: nothing to tear down.
        controller
            .handle_event(StreamEvent::Disable, &mut mock)
            .unwrap();
        assert_eq!(mock.closes, 2);
    }
}
