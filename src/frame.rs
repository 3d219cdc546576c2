//! Immutable frame store and the producer's stream cursor
//!
//! Frames are pre-baked byte ranges into one contiguous store, played
//! back as a cyclic playlist. The store is validated once at
//! construction; afterwards, all cursor arithmetic is infallible.

/// One video frame: a byte range into the frame store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Frame {
    /// Byte offset of the frame's first payload byte.
    pub offset: usize,
    /// Payload length in bytes.
    pub length: u32,
}

/// Frame store validation errors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum FrameStoreError {
    /// The playlist has no frames.
    Empty,
    /// A frame's byte range falls outside the store.
    OutOfBounds {
        /// Playlist index of the offending frame.
        frame: usize,
    },
}

/// An ordered, cyclic playlist of frames over an immutable byte store.
pub struct FrameStore<'a> {
    bytes: &'a [u8],
    frames: &'a [Frame],
}

impl<'a> FrameStore<'a> {
    /// Validates that every frame's range lies within `bytes`, and that
    /// the playlist is non-empty.
    pub fn new(bytes: &'a [u8], frames: &'a [Frame]) -> Result<Self, FrameStoreError> {
        if frames.is_empty() {
            return Err(FrameStoreError::Empty);
        }
        for (index, frame) in frames.iter().enumerate() {
            let end = frame
                .offset
                .checked_add(frame.length as usize)
                .ok_or(FrameStoreError::OutOfBounds { frame: index })?;
            if end > bytes.len() {
                return Err(FrameStoreError::OutOfBounds { frame: index });
            }
        }
        Ok(FrameStore { bytes, frames })
    }

    /// Number of frames in the playlist.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Payload length of the frame at `index`, in bytes.
    pub fn frame_len(&self, index: usize) -> usize {
        self.frames[index].length as usize
    }

    /// Store offset of the frame at `index`.
    pub fn frame_offset(&self, index: usize) -> usize {
        self.frames[index].offset
    }

    /// `len` payload bytes at the cursor's position.
    pub(crate) fn payload(&self, cursor: &Cursor, len: usize) -> &[u8] {
        &self.bytes[cursor.base + cursor.offset..][..len]
    }
}

/// The producer's position within the playlist.
///
/// Private to the streaming loop; monotonic within a frame, reset on
/// stream (re)start, wrapped modulo the playlist length at each frame
/// boundary.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Cursor {
    /// Playlist index of the current frame.
    pub(crate) frame: usize,
    /// Store offset of the current frame's first byte.
    pub(crate) base: usize,
    /// Bytes of the current frame already committed.
    pub(crate) offset: usize,
}

impl Cursor {
    pub(crate) const fn new() -> Self {
        Cursor {
            frame: 0,
            base: 0,
            offset: 0,
        }
    }

    /// Rewind to the start of the playlist.
    pub(crate) fn reset(&mut self, store: &FrameStore) {
        self.frame = 0;
        self.base = store.frame_offset(0);
        self.offset = 0;
    }

    /// Payload bytes of the current frame not yet committed.
    pub(crate) fn remaining(&self, store: &FrameStore) -> usize {
        store.frame_len(self.frame) - self.offset
    }

    /// Move past `copied` mid-frame bytes.
    pub(crate) fn advance(&mut self, copied: usize) {
        self.offset += copied;
    }

    /// Move to the next frame, wrapping at the end of the playlist.
    pub(crate) fn next_frame(&mut self, store: &FrameStore) {
        self.frame = (self.frame + 1) % store.frame_count();
        self.base = store.frame_offset(self.frame);
        self.offset = 0;
    }
}
