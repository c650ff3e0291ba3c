//! # Stream Framer
//!
//! Recovers discrete frames from the raw chunks returned by successive socket reads.
//!
//! ## Wire Format
//! ```text
//! [frameLength: u32 LE] [frameLength bytes of (possibly encrypted) envelope]
//! ```
//!
//! A read may end anywhere: inside a length prefix, inside a body, or between
//! frames. Bytes that do not yet form a complete frame are carried over and
//! re-parsed when the next chunk arrives.
//!
//! A length prefix below [`MIN_FRAME_SIZE`] or above the configured maximum makes
//! the framer stop consuming; the suspect bytes stay in the carry-over. There is no
//! resynchronisation, so callers should check [`StreamFramer::is_desynchronized`]
//! and drop the connection.
//!
//! One framer per connection; `resolve` must be fed reads in order.

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tokio_util::codec::Decoder;

/// Size of the little-endian length prefix in front of every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest frame payload the framer will ever surface.
pub const MIN_FRAME_SIZE: usize = 48;

/// Outcome of inspecting the head of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    /// Not enough bytes yet.
    Incomplete,
    /// The length prefix can never be valid.
    Invalid(usize),
    /// A whole frame of this payload size is available.
    Ready(usize),
}

#[inline]
fn inspect(buf: &[u8], max_frame_size: usize) -> Head {
    let Some(prefix) = buf.get(..LENGTH_PREFIX_SIZE) else {
        return Head::Incomplete;
    };
    let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if !(MIN_FRAME_SIZE..=max_frame_size).contains(&size) {
        return Head::Invalid(size);
    }
    if size > buf.len() - LENGTH_PREFIX_SIZE {
        return Head::Incomplete;
    }
    Head::Ready(size)
}

/// Split one complete frame payload off the front of `buf`, if there is one.
fn split_frame(buf: &mut BytesMut, max_frame_size: usize) -> Option<Bytes> {
    match inspect(buf, max_frame_size) {
        Head::Ready(size) => {
            buf.advance(LENGTH_PREFIX_SIZE);
            Some(buf.split_to(size).freeze())
        }
        Head::Incomplete | Head::Invalid(_) => None,
    }
}

/// Stateful per-connection frame reassembler.
#[derive(Debug)]
pub struct StreamFramer {
    carry: BytesMut,
    max_frame_size: usize,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    /// Framer accepting payloads up to [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Framer accepting payloads up to `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            carry: BytesMut::new(),
            max_frame_size: max_frame_size.max(MIN_FRAME_SIZE),
        }
    }

    /// Consume one read's worth of bytes and return every frame now complete, in order.
    pub fn resolve(&mut self, chunk: &[u8]) -> VecDeque<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut frames = VecDeque::new();
        while let Some(frame) = split_frame(&mut self.carry, self.max_frame_size) {
            frames.push_back(frame);
        }
        frames
    }

    /// Bytes retained for the next call.
    pub fn carry_over(&self) -> usize {
        self.carry.len()
    }

    /// The retained bytes start with a length prefix that can never become valid.
    pub fn is_desynchronized(&self) -> bool {
        matches!(inspect(&self.carry, self.max_frame_size), Head::Invalid(_))
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

/// Lets the same framing rules drive a `FramedRead`. Unlike [`StreamFramer::resolve`],
/// an invalid length prefix is reported as an error so the stream ends.
impl Decoder for StreamFramer {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        match inspect(src, self.max_frame_size) {
            Head::Invalid(size) if size < MIN_FRAME_SIZE => Err(ProtocolError::InvalidPacket(
                format!("frame length {size} below minimum"),
            )),
            Head::Invalid(size) => Err(ProtocolError::OversizedPacket(size)),
            Head::Incomplete => Ok(None),
            Head::Ready(_) => Ok(split_frame(src, self.max_frame_size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload_len: usize, fill: u8) -> Vec<u8> {
        let mut out = (payload_len as u32).to_le_bytes().to_vec();
        out.extend(std::iter::repeat(fill).take(payload_len));
        out
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut framer = StreamFramer::new();
        let mut wire = frame(48, 1);
        wire.extend(frame(60, 2));

        let frames = framer.resolve(&wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![1u8; 48]);
        assert_eq!(frames[1], vec![2u8; 60]);
        assert_eq!(framer.carry_over(), 0);
    }

    #[test]
    fn test_prefix_split_across_reads() {
        let mut framer = StreamFramer::new();
        let wire = frame(50, 7);

        assert!(framer.resolve(&wire[..2]).is_empty());
        assert_eq!(framer.carry_over(), 2);
        let frames = framer.resolve(&wire[2..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 50);
    }

    #[test]
    fn test_body_split_across_reads() {
        let mut framer = StreamFramer::new();
        let mut wire = frame(100, 3);
        wire.extend(frame(48, 4));

        assert!(framer.resolve(&wire[..70]).is_empty());
        let frames = framer.resolve(&wire[70..]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![4u8; 48]);
    }

    #[test]
    fn test_short_frame_never_surfaced() {
        let mut framer = StreamFramer::new();
        let wire = frame(47, 9);

        assert!(framer.resolve(&wire).is_empty());
        assert_eq!(framer.carry_over(), wire.len());
        assert!(framer.is_desynchronized());
    }

    #[test]
    fn test_oversized_prefix_stalls() {
        let mut framer = StreamFramer::with_max_frame_size(1024);
        let mut wire = frame(48, 1);
        wire.extend(frame(2048, 2));

        let frames = framer.resolve(&wire);
        assert_eq!(frames.len(), 1);
        assert!(framer.is_desynchronized());

        // stays stuck no matter what follows
        assert!(framer.resolve(&frame(48, 3)).is_empty());
    }

    #[test]
    fn test_incomplete_is_not_desynchronized() {
        let mut framer = StreamFramer::new();
        framer.resolve(&frame(200, 0)[..20]);
        assert!(!framer.is_desynchronized());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_decoder_reports_garbage() {
        let mut framer = StreamFramer::new();
        let mut buf = BytesMut::from(&frame(10, 0)[..]);
        assert!(matches!(
            framer.decode(&mut buf),
            Err(ProtocolError::InvalidPacket(_))
        ));

        let mut buf = BytesMut::from(&frame(64, 5)[..]);
        let decoded = framer.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.len(), 64);
        assert!(buf.is_empty());
    }
}
