//! UVC payload header construction
//!
//! Every chunk committed to the endpoint begins with the fixed 12-byte
//! UVC payload header. The header template carries one piece of mutable
//! state: the frame identifier bit, which toggles once per completed
//! frame so the host can detect frame boundaries.

use bitflags::bitflags;

/// Length of the UVC payload header, in bytes.
pub const HEADER_LEN: usize = 12;

bitflags! {
    /// Bits of the payload header's `bmHeaderInfo` field.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct HeaderFlags: u8 {
        /// Toggles on every frame boundary.
        const FRAME_ID = 1 << 0;
        /// Set on the final chunk of a frame.
        const END_OF_FRAME = 1 << 1;
        /// Presentation timestamp field is present.
        const PTS = 1 << 2;
        /// Source clock reference field is present.
        const SCR = 1 << 3;
        const RESERVED = 1 << 4;
        /// Chunk belongs to a still-image capture.
        const STILL_IMAGE = 1 << 5;
        /// Payload error indication.
        const ERROR = 1 << 6;
        const END_OF_HEADER = 1 << 7;
    }
}

/// `bmHeaderInfo` value stamped on every chunk before any frame completes.
const DEFAULT_FLAGS: HeaderFlags = HeaderFlags::END_OF_HEADER
    .union(HeaderFlags::SCR)
    .union(HeaderFlags::PTS);

/// The per-chunk header template.
///
/// The presentation timestamp and source clock reference fields are
/// advertised but zeroed; frames are pre-baked, so there's no clock to
/// reference.
pub struct Header {
    template: [u8; HEADER_LEN],
}

impl Header {
    pub const fn new() -> Self {
        let mut template = [0; HEADER_LEN];
        template[0] = HEADER_LEN as u8;
        template[1] = DEFAULT_FLAGS.bits();
        Header { template }
    }

    /// Restore the default `bmHeaderInfo`, clearing the frame ID bit.
    ///
    /// Called on every stream (re)start so the first frame always carries
    /// a known frame ID.
    pub fn reset(&mut self) {
        self.template[1] = DEFAULT_FLAGS.bits();
    }

    /// Copy the header into the front of `chunk`.
    ///
    /// When `eof` is set, the chunk's copy is marked end-of-frame, and the
    /// frame ID bit toggles in the template so every chunk of the *next*
    /// frame carries the flipped value. The end-of-frame bit never
    /// persists in the template.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is shorter than [`HEADER_LEN`].
    pub fn stamp(&mut self, chunk: &mut [u8], eof: bool) {
        chunk[..HEADER_LEN].copy_from_slice(&self.template);
        if eof {
            self.template[1] ^= HeaderFlags::FRAME_ID.bits();
            chunk[1] |= HeaderFlags::END_OF_FRAME.bits();
        }
    }

    /// The frame ID bit that the next stamp will carry.
    pub fn frame_id(&self) -> bool {
        self.template[1] & HeaderFlags::FRAME_ID.bits() != 0
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
