//! Shared read surface for [`Packet`](crate::Packet) and
//! [`ReadOnlyPacket`](crate::ReadOnlyPacket).
//!
//! Both buffer flavours expose the same bounds-checked read and peek
//! operations over their readable window; the macros below generate that
//! surface once so the two implementations cannot drift.

macro_rules! int_reads {
    ($($t:ty => $host:ident, $big:ident, $little:ident;)*) => {
        $(
            #[doc = concat!("Read a host-endian `", stringify!($t), "` and advance the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $host(&mut self) -> Result<$t, crate::error::PacketError> {
                self.take().map(<$t>::from_ne_bytes)
            }

            #[doc = concat!("Read a big-endian `", stringify!($t), "` and advance the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $big(&mut self) -> Result<$t, crate::error::PacketError> {
                self.take().map(<$t>::from_be_bytes)
            }

            #[doc = concat!("Read a little-endian `", stringify!($t), "` and advance the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $little(&mut self) -> Result<$t, crate::error::PacketError> {
                self.take().map(<$t>::from_le_bytes)
            }
        )*
    };
}

macro_rules! int_peeks {
    ($($t:ty => $host:ident, $big:ident, $little:ident;)*) => {
        $(
            #[doc = concat!("Read a host-endian `", stringify!($t), "` without advancing the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $host(&self) -> Result<$t, crate::error::PacketError> {
                self.peek().map(<$t>::from_ne_bytes)
            }

            #[doc = concat!("Read a big-endian `", stringify!($t), "` without advancing the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $big(&self) -> Result<$t, crate::error::PacketError> {
                self.peek().map(<$t>::from_be_bytes)
            }

            #[doc = concat!("Read a little-endian `", stringify!($t), "` without advancing the cursor.")]
            ///
            /// # Errors
            ///
            /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
            /// if the value would extend past the end of the readable data.
            #[track_caller]
            pub fn $little(&self) -> Result<$t, crate::error::PacketError> {
                self.peek().map(<$t>::from_le_bytes)
            }
        )*
    };
}

macro_rules! read_surface {
    () => {
        #[track_caller]
        fn take<const N: usize>(&mut self) -> Result<[u8; N], crate::error::PacketError> {
            let bytes = self.peek()?;
            self.position += N as u32;
            Ok(bytes)
        }

        #[track_caller]
        fn peek<const N: usize>(&self) -> Result<[u8; N], crate::error::PacketError> {
            let position = self.position as usize;
            let window = self.readable();

            if position + N > window.len() {
                return Err(crate::error::out_of_range(
                    format!(
                        "attempted to read {N} bytes at position {position} \
                         of a {} byte packet",
                        window.len()
                    ),
                    window,
                    self.position,
                ));
            }

            let mut bytes = [0u8; N];
            bytes.copy_from_slice(&window[position..position + N]);
            Ok(bytes)
        }

        /// Read an unsigned byte and advance the cursor.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// at the end of the readable data.
        #[track_caller]
        pub fn read_u8(&mut self) -> Result<u8, crate::error::PacketError> {
            self.take().map(u8::from_ne_bytes)
        }

        /// Read a signed byte and advance the cursor.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// at the end of the readable data.
        #[track_caller]
        pub fn read_i8(&mut self) -> Result<i8, crate::error::PacketError> {
            self.take().map(i8::from_ne_bytes)
        }

        /// Read an unsigned byte without advancing the cursor.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// at the end of the readable data.
        #[track_caller]
        pub fn peek_u8(&self) -> Result<u8, crate::error::PacketError> {
            self.peek().map(u8::from_ne_bytes)
        }

        crate::surface::int_reads! {
            u16 => read_u16, read_u16_big, read_u16_little;
            i16 => read_i16, read_i16_big, read_i16_little;
            u32 => read_u32, read_u32_big, read_u32_little;
            i32 => read_i32, read_i32_big, read_i32_little;
            u64 => read_u64, read_u64_big, read_u64_little;
            i64 => read_i64, read_i64_big, read_i64_little;
        }

        crate::surface::int_peeks! {
            u16 => peek_u16, peek_u16_big, peek_u16_little;
            u32 => peek_u32, peek_u32_big, peek_u32_little;
        }

        /// Read a host-endian `f32` and advance the cursor.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// if the value would extend past the end of the readable data.
        #[track_caller]
        pub fn read_f32(&mut self) -> Result<f32, crate::error::PacketError> {
            self.take().map(f32::from_ne_bytes)
        }

        /// Read `count` bytes into a new buffer and advance the cursor.
        ///
        /// Reading zero bytes is a no-op that returns an empty buffer.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// if fewer than `count` bytes remain.
        #[track_caller]
        pub fn read_array(&mut self, count: u32) -> Result<Vec<u8>, crate::error::PacketError> {
            let position = self.position as usize;
            let count = count as usize;
            let window = self.readable();

            if position + count > window.len() {
                return Err(crate::error::out_of_range(
                    format!(
                        "attempted to read {count} bytes at position {position} \
                         of a {} byte packet",
                        window.len()
                    ),
                    window,
                    self.position,
                ));
            }

            let bytes = window[position..position + count].to_vec();
            self.position += count as u32;
            Ok(bytes)
        }

        /// Read exactly `buffer.len()` bytes into `buffer` and advance the
        /// cursor.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// if fewer than `buffer.len()` bytes remain.
        #[track_caller]
        pub fn read_into(&mut self, buffer: &mut [u8]) -> Result<(), crate::error::PacketError> {
            let position = self.position as usize;
            let window = self.readable();

            if position + buffer.len() > window.len() {
                return Err(crate::error::out_of_range(
                    format!(
                        "attempted to read {} bytes at position {position} \
                         of a {} byte packet",
                        buffer.len(),
                        window.len()
                    ),
                    window,
                    self.position,
                ));
            }

            buffer.copy_from_slice(&window[position..position + buffer.len()]);
            self.position += buffer.len() as u32;
            Ok(())
        }

        /// Read a NUL-terminated string in `encoding` and advance the
        /// cursor past the terminator.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// if no terminator is found, or with a conversion error if the
        /// bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let position = self.position as usize;
            let window = self.readable();
            let remaining = window.get(position..).unwrap_or(&[]);

            let Some(terminator) = remaining.iter().position(|&b| b == 0) else {
                return Err(crate::error::out_of_range(
                    "unterminated string in packet".into(),
                    window,
                    self.position,
                ));
            };

            let string = crate::encoding::from_encoding(encoding, &remaining[..terminator])?;
            self.position += terminator as u32 + 1;
            Ok(string)
        }

        /// Read a string prefixed with a host-endian `u16` byte count.
        ///
        /// The prefix counts the raw converted bytes, including any NUL
        /// terminator, which is stripped from the result.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string16(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u16()?;
            self.read_string_bytes(encoding, u32::from(count))
        }

        /// Read a string prefixed with a big-endian `u16` byte count.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string16_big(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u16_big()?;
            self.read_string_bytes(encoding, u32::from(count))
        }

        /// Read a string prefixed with a little-endian `u16` byte count.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string16_little(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u16_little()?;
            self.read_string_bytes(encoding, u32::from(count))
        }

        /// Read a string prefixed with a host-endian `u32` byte count.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string32(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u32()?;
            self.read_string_bytes(encoding, count)
        }

        /// Read a string prefixed with a big-endian `u32` byte count.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string32_big(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u32_big()?;
            self.read_string_bytes(encoding, count)
        }

        /// Read a string prefixed with a little-endian `u32` byte count.
        ///
        /// # Errors
        ///
        /// Fails if the prefix or the payload runs out of bounds, or if
        /// the bytes are not valid in `encoding`.
        #[track_caller]
        pub fn read_string32_little(
            &mut self,
            encoding: crate::Encoding,
        ) -> Result<String, crate::error::PacketError> {
            let count = self.read_u32_little()?;
            self.read_string_bytes(encoding, count)
        }

        #[track_caller]
        fn read_string_bytes(
            &mut self,
            encoding: crate::Encoding,
            count: u32,
        ) -> Result<String, crate::error::PacketError> {
            let bytes = self.read_array(count)?;
            crate::encoding::from_encoding(encoding, &bytes).map_err(Into::into)
        }

        /// Current cursor position.
        #[must_use]
        pub fn tell(&self) -> u32 {
            self.position
        }

        /// Number of readable bytes left after the cursor.
        #[must_use]
        pub fn left(&self) -> u32 {
            (self.readable().len() as u32).saturating_sub(self.position)
        }

        /// Move the cursor back to the start of the packet.
        pub fn rewind(&mut self) {
            self.position = 0;
        }

        /// Move the cursor back by `count` bytes.
        ///
        /// # Errors
        ///
        /// Fails with [`PacketError::OutOfRange`](crate::PacketError::OutOfRange)
        /// if `count` exceeds the current position.
        #[track_caller]
        pub fn rewind_by(&mut self, count: u32) -> Result<(), crate::error::PacketError> {
            if count > self.position {
                return Err(crate::error::out_of_range(
                    format!(
                        "attempted to rewind {count} bytes from position {}",
                        self.position
                    ),
                    self.readable(),
                    self.position,
                ));
            }

            self.position -= count;
            Ok(())
        }

        /// Move the cursor to the end of the readable data.
        pub fn end(&mut self) {
            self.position = self.readable().len() as u32;
        }

        /// Render a canonical 16-byte-wide hex+ASCII dump with the cursor
        /// marked.
        #[must_use]
        pub fn hex_dump(&self) -> String {
            crate::dump::render(self.readable(), self.position)
        }
    };
}

pub(crate) use {int_peeks, int_reads, read_surface};
