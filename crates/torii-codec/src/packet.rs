//! Writable packet buffers.

use std::sync::Arc;

use crate::encoding::{self, Encoding};
use crate::error::{self, PacketError};
use crate::surface::read_surface;
use crate::MAX_PACKET_SIZE;

macro_rules! int_writes {
    ($($t:ty => $host:ident, $big:ident, $little:ident;)*) => {
        $(
            #[doc = concat!("Write a host-endian `", stringify!($t), "` at the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`] if the value would
            /// extend past the packet capacity.
            #[track_caller]
            pub fn $host(&mut self, value: $t) -> Result<(), PacketError> {
                self.put(value.to_ne_bytes())
            }

            #[doc = concat!("Write a big-endian `", stringify!($t), "` at the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`] if the value would
            /// extend past the packet capacity.
            #[track_caller]
            pub fn $big(&mut self, value: $t) -> Result<(), PacketError> {
                self.put(value.to_be_bytes())
            }

            #[doc = concat!("Write a little-endian `", stringify!($t), "` at the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`] if the value would
            /// extend past the packet capacity.
            #[track_caller]
            pub fn $little(&mut self, value: $t) -> Result<(), PacketError> {
                self.put(value.to_le_bytes())
            }
        )*
    };
}

macro_rules! string_writes {
    ($($prefix:ty => $name:ident, $write_prefix:ident;)*) => {
        $(
            #[doc = concat!(
                "Write a string converted to `encoding`, prefixed with a `",
                stringify!($prefix),
                "` byte count in the matching endianness."
            )]
            ///
            /// The prefix counts the converted bytes, including the NUL
            /// terminator when `null_terminated` is set. Nothing is written
            /// on failure.
            ///
            /// # Errors
            ///
            /// Fails if the string cannot be converted or does not fit in
            /// the remaining capacity.
            #[track_caller]
            pub fn $name(
                &mut self,
                encoding: Encoding,
                string: &str,
                null_terminated: bool,
            ) -> Result<(), PacketError> {
                let bytes = encoding::to_encoding(encoding, string, null_terminated)?;
                self.reserve(std::mem::size_of::<$prefix>() + bytes.len())?;
                self.$write_prefix(bytes.len() as $prefix)?;
                self.write_array(&bytes)
            }
        )*
    };
}

/// A writable, exclusively-owned packet buffer.
///
/// A packet is a fixed 16 KiB byte arena with a cursor `position` and a
/// logical `size`. Writes past the current size grow it; writes before it
/// overwrite in place. Every operation is bounds checked against
/// [`MAX_PACKET_SIZE`] and fails without touching the buffer.
///
/// Converting into a [`ReadOnlyPacket`](crate::ReadOnlyPacket) relinquishes
/// the write cursor and shares the backing buffer by reference count.
pub struct Packet {
    data: Arc<[u8; MAX_PACKET_SIZE]>,
    size: u32,
    position: u32,
}

impl Packet {
    read_surface!();

    /// A new, empty packet with the full 16 KiB capacity allocated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new([0u8; MAX_PACKET_SIZE]),
            size: 0,
            position: 0,
        }
    }

    /// A packet holding a copy of `bytes`, with the cursor at the start.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if `bytes` exceeds the packet
    /// capacity.
    #[track_caller]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let mut packet = Self::new();
        packet.write_array(bytes)?;
        packet.rewind();
        Ok(packet)
    }

    /// Number of meaningful bytes in the packet.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the packet holds no meaningful bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Reset the cursor and discard all contents.
    pub fn clear(&mut self) {
        self.position = 0;
        self.size = 0;
    }

    /// Truncate the packet at the cursor, discarding everything after it.
    pub fn erase_right(&mut self) {
        self.size = self.position;
    }

    /// Move the cursor to `position`.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if `position` is past the
    /// packet capacity.
    #[track_caller]
    pub fn seek(&mut self, position: u32) -> Result<(), PacketError> {
        if position as usize > MAX_PACKET_SIZE {
            return Err(error::out_of_range(
                format!("attempted to seek to position {position} of the packet"),
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
    /// packet capacity.
    #[track_caller]
    pub fn skip(&mut self, count: u32) -> Result<(), PacketError> {
        if self.position as usize + count as usize > MAX_PACKET_SIZE {
            return Err(error::out_of_range(
                format!(
                    "attempted to skip {count} bytes at position {} of the packet",
                    self.position
                ),
                self.readable(),
                self.position,
            ));
        }

        self.position += count;
        Ok(())
    }

    int_writes! {
        u16 => write_u16, write_u16_big, write_u16_little;
        i16 => write_i16, write_i16_big, write_i16_little;
        u32 => write_u32, write_u32_big, write_u32_little;
        i32 => write_i32, write_i32_big, write_i32_little;
        u64 => write_u64, write_u64_big, write_u64_little;
        i64 => write_i64, write_i64_big, write_i64_little;
    }

    /// Write an unsigned byte at the cursor.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] at the packet capacity.
    #[track_caller]
    pub fn write_u8(&mut self, value: u8) -> Result<(), PacketError> {
        self.put([value])
    }

    /// Write a signed byte at the cursor.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] at the packet capacity.
    #[track_caller]
    pub fn write_i8(&mut self, value: i8) -> Result<(), PacketError> {
        self.put(value.to_ne_bytes())
    }

    /// Write a host-endian `f32` at the cursor.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if the value would extend
    /// past the packet capacity.
    #[track_caller]
    pub fn write_f32(&mut self, value: f32) -> Result<(), PacketError> {
        self.put(value.to_ne_bytes())
    }

    /// Write `count` zero bytes at the cursor.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if the zeros would extend
    /// past the packet capacity.
    #[track_caller]
    pub fn write_blank(&mut self, count: u32) -> Result<(), PacketError> {
        self.reserve(count as usize)?;

        let position = self.position as usize;
        self.storage()[position..position + count as usize].fill(0);
        self.advance(count);
        Ok(())
    }

    /// Write a copy of `bytes` at the cursor.
    ///
    /// Writing zero bytes is a no-op.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if the bytes would extend
    /// past the packet capacity.
    #[track_caller]
    pub fn write_array(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        self.reserve(bytes.len())?;

        let position = self.position as usize;
        self.storage()[position..position + bytes.len()].copy_from_slice(bytes);
        self.advance(bytes.len() as u32);
        Ok(())
    }

    /// Write a string converted to `encoding` with no length prefix,
    /// optionally NUL terminated.
    ///
    /// # Errors
    ///
    /// Fails if the string cannot be converted or does not fit in the
    /// remaining capacity.
    #[track_caller]
    pub fn write_string(
        &mut self,
        encoding: Encoding,
        string: &str,
        null_terminated: bool,
    ) -> Result<(), PacketError> {
        let bytes = encoding::to_encoding(encoding, string, null_terminated)?;
        self.write_array(&bytes)
    }

    string_writes! {
        u16 => write_string16, write_u16;
        u16 => write_string16_big, write_u16_big;
        u16 => write_string16_little, write_u16_little;
        u32 => write_string32, write_u32;
        u32 => write_string32_big, write_u32_big;
        u32 => write_string32_little, write_u32_little;
    }

    /// Move `count` bytes starting at the cursor into `other`.
    ///
    /// `other` is cleared first and rewound after; the moved bytes are
    /// removed from this packet and the cursor stays where it was.
    /// Splitting zero bytes clears `other` and does nothing else.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if fewer than `count` bytes
    /// remain after the cursor.
    #[track_caller]
    pub fn split(&mut self, other: &mut Packet, count: u32) -> Result<(), PacketError> {
        if count == 0 {
            other.clear();
            return Ok(());
        }

        let position = self.position as usize;
        let count = count as usize;

        if position + count > self.size as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to split {count} bytes from a packet with {} bytes left",
                    self.left()
                ),
                self.readable(),
                self.position,
            ));
        }

        other.clear();
        other.write_array(&self.data[position..position + count])?;
        other.rewind();

        let size = self.size as usize;
        self.storage().copy_within(position + count..size, position);
        self.size -= count as u32;
        Ok(())
    }

    /// Deflate `count` bytes starting at the cursor, replacing them and
    /// everything after with the compressed stream.
    ///
    /// Returns the compressed size, or 0 if compression failed or the
    /// result would not fit; the packet is unchanged in that case.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if fewer than `count` bytes
    /// remain after the cursor.
    #[track_caller]
    pub fn compress(&mut self, count: u32) -> Result<usize, PacketError> {
        if count == 0 {
            return Ok(0);
        }

        let position = self.position as usize;
        let count = count as usize;

        if position + count > self.size as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to compress {count} bytes from a packet with {} bytes left",
                    self.left()
                ),
                self.readable(),
                self.position,
            ));
        }

        let mut output = Vec::with_capacity(MAX_PACKET_SIZE - position);
        let mut deflate = flate2::Compress::new(flate2::Compression::default(), false);

        match deflate.compress_vec(
            &self.data[position..position + count],
            &mut output,
            flate2::FlushCompress::Finish,
        ) {
            Ok(flate2::Status::StreamEnd) => {}
            Ok(_) | Err(_) => return Ok(0),
        }

        let written = output.len();

        if position + written > MAX_PACKET_SIZE {
            return Ok(0);
        }

        self.storage()[position..position + written].copy_from_slice(&output);
        self.size = (position + written) as u32;
        Ok(written)
    }

    /// Inflate `count` bytes starting at the cursor, replacing them and
    /// everything after with the decompressed stream.
    ///
    /// Returns the decompressed size, or 0 if the stream is invalid or
    /// would exceed the remaining capacity; the packet is unchanged in
    /// that case.
    ///
    /// # Errors
    ///
    /// Fails with [`PacketError::OutOfRange`] if fewer than `count` bytes
    /// remain after the cursor.
    #[track_caller]
    pub fn decompress(&mut self, count: u32) -> Result<usize, PacketError> {
        if count == 0 {
            return Ok(0);
        }

        let position = self.position as usize;
        let count = count as usize;

        if position + count > self.size as usize {
            return Err(error::out_of_range(
                format!(
                    "attempted to decompress {count} bytes from a packet with {} bytes left",
                    self.left()
                ),
                self.readable(),
                self.position,
            ));
        }

        let mut output = Vec::with_capacity(MAX_PACKET_SIZE - position);
        let mut inflate = flate2::Decompress::new(false);

        match inflate.decompress_vec(
            &self.data[position..position + count],
            &mut output,
            flate2::FlushDecompress::Finish,
        ) {
            Ok(flate2::Status::StreamEnd) => {}
            Ok(_) | Err(_) => return Ok(0),
        }

        let written = output.len();

        if position + written > MAX_PACKET_SIZE {
            return Ok(0);
        }

        self.storage()[position..position + written].copy_from_slice(&output);
        self.size = (position + written) as u32;
        Ok(written)
    }

    /// The meaningful bytes of the packet.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    /// Mutable access to the meaningful bytes of the packet.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let size = self.size as usize;
        &mut self.storage()[..size]
    }

    pub(crate) fn into_parts(self) -> (Arc<[u8; MAX_PACKET_SIZE]>, u32, u32) {
        (self.data, self.size, self.position)
    }

    fn readable(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    fn storage(&mut self) -> &mut [u8; MAX_PACKET_SIZE] {
        // The Arc is never shared while the packet is writable, so this
        // resolves to the unique-owner fast path.
        Arc::make_mut(&mut self.data)
    }

    #[track_caller]
    fn reserve(&mut self, count: usize) -> Result<(), PacketError> {
        if self.position as usize + count > MAX_PACKET_SIZE {
            return Err(error::out_of_range(
                format!(
                    "attempted to write {count} bytes at position {} of the packet",
                    self.position
                ),
                self.readable(),
                self.position,
            ));
        }

        Ok(())
    }

    #[track_caller]
    fn put<const N: usize>(&mut self, bytes: [u8; N]) -> Result<(), PacketError> {
        self.reserve(N)?;

        let position = self.position as usize;
        self.storage()[position..position + N].copy_from_slice(&bytes);
        self.advance(N as u32);
        Ok(())
    }

    fn advance(&mut self, count: u32) {
        self.position += count;
        if self.position > self.size {
            self.size = self.position;
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Packet {
    /// Deep copy; the clone owns its own backing buffer.
    fn clone(&self) -> Self {
        Self {
            data: Arc::new(*self.data),
            size: self.size,
            position: self.position,
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("size", &self.size)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
