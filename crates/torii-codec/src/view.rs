//! Shared read-only packet views.

use std::sync::Arc;

use crate::error::{self, PacketError};
use crate::packet::Packet;
use crate::surface::read_surface;
use crate::MAX_PACKET_SIZE;

/// A read-only, cursor-bearing window into a packet backing buffer.
///
/// Views share ownership of the 16 KiB backing with every sibling view, so
/// cloning and slicing are cheap and never copy payload bytes. A sub-view
/// produced by [`view`](ReadOnlyPacket::view) carries its own cursor,
/// independent of the parent, and keeps the backing alive for as long as it
/// exists. Mutation is impossible by type; a writable [`Packet`] demotes
/// into a view by move.
#[derive(Clone)]
pub struct ReadOnlyPacket {
    pub(crate) data: Arc<[u8; MAX_PACKET_SIZE]>,
    pub(crate) start: u32,
    pub(crate) len: u32,
    pub(crate) position: u32,
}

impl ReadOnlyPacket {
    read_surface!();

    /// Number of readable bytes in this view.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.len
    }

    /// Whether the view contains no readable bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if `position` is past the end
    /// of the view.
    #[track_caller]
    pub fn seek(&mut self, position: u32) -> Result<(), PacketError> {
        if position as usize > self.len as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to seek to position {position} of a {} byte view",
                    self.len
                ),
                self.readable(),
                self.position,
            ));
        }

        self.position = position;
        Ok(())
    }

    /// Advance the cursor by `count` bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if the cursor would pass the
    /// end of the view.
    #[track_caller]
    pub fn skip(&mut self, count: u32) -> Result<(), PacketError> {
        if self.position as usize + count as usize > self.len as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to skip {count} bytes at position {} of a {} byte view",
                    self.position, self.len
                ),
                self.readable(),
                self.position,
            ));
        }

        self.position += count;
        Ok(())
    }

    /// A sub-view of `[start, start + len)` with a fresh cursor.
    ///
    /// The sub-view shares the backing buffer; no bytes are copied.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if the range does not fit
    /// inside this view.
    #[track_caller]
    pub fn view(&self, start: u32, len: u32) -> Result<ReadOnlyPacket, PacketError> {
        if start as usize + len as usize > self.len as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to view [{start}, {}) of a {} byte view",
                    start + len,
                    self.len
                ),
                self.readable(),
                self.position,
            ));
        }

        Ok(Self {
            data: Arc::clone(&self.data),
            start: self.start + start,
            len,
            position: 0,
        })
    }

    /// The readable bytes of this view.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.start as usize..(self.start + self.len) as usize]
    }

    fn readable(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Packet> for ReadOnlyPacket {
    /// Demote a writable packet into a shared view, keeping the backing
    /// buffer and the cursor.
    fn from(packet: Packet) -> Self {
        let (data, size, position) = packet.into_parts();

        Self {
            data,
            start: 0,
            len: size,
            position: position.min(size),
        }
    }
}

impl std::fmt::Debug for ReadOnlyPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyPacket")
            .field("size", &self.len)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ReadOnlyPacket {
        let mut packet = Packet::new();
        packet.write_array(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        packet.rewind();
        packet.into()
    }

    #[test]
    fn demotion_keeps_size_and_cursor() {
        let mut packet = Packet::new();
        packet.write_u32_little(0xAABBCCDD).unwrap();
        packet.seek(2).unwrap();

        let view: ReadOnlyPacket = packet.into();
        assert_eq!(view.size(), 4);
        assert_eq!(view.tell(), 2);
    }

    #[test]
    fn sub_view_has_independent_cursor() {
        let mut parent = sample();
        let mut child = parent.view(2, 4).unwrap();

        assert_eq!(child.size(), 4);
        assert_eq!(child.read_u8().unwrap(), 3);

        parent.skip(5).unwrap();
        assert_eq!(child.tell(), 1);
        assert_eq!(parent.tell(), 5);
    }

    #[test]
    fn sub_view_out_of_range_fails() {
        let parent = sample();
        assert!(parent.view(6, 4).is_err());
    }

    #[test]
    fn clones_share_backing() {
        let parent = sample();
        let clone = parent.clone();
        assert_eq!(Arc::strong_count(&parent.data), 2);
        assert_eq!(clone.as_bytes(), parent.as_bytes());
    }

    #[test]
    fn reading_past_view_end_fails_without_advancing() {
        let mut view = sample().view(0, 2).unwrap();
        view.skip(1).unwrap();

        assert!(view.read_u32_little().is_err());
        assert_eq!(view.tell(), 1);
    }
}
