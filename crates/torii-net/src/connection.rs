//! Per-connection state machine, handshake, and frame codec.
//!
//! A connection runs a fixed-layout anonymous Diffie-Hellman handshake as
//! soon as the socket opens, installs the first 8 bytes of the shared
//! secret as its Blowfish session key, and then exchanges encrypted frames
//! that multiplex one or more commands. All handshake fields are
//! big-endian; post-handshake frames use big-endian size prefixes and
//! little-endian in-frame command headers.
//!
//! ```text
//! client → server : u32 1, u32 8
//! server → client : u32 0, hex32("2"), hex32(prime), hex32(server_public)
//! client → server : hex32(client_public)
//! ```
//!
//! Each parser step requests exactly the bytes that step needs and
//! re-requests the remainder after a short read; a parser never advances
//! on incomplete data. Any deviation from the expected layout is fatal:
//! the socket closes and the status drops to [`Status::NotConnected`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use torii_codec::{Encoding, Packet, PacketError, ReadOnlyPacket, MAX_PACKET_SIZE};
use torii_crypto::{
    BlowfishKey, DiffieHellman, BLOWFISH_BLOCK_SIZE, DH_BASE_STRING, DH_KEY_HEX_SIZE,
};

use crate::error::NetError;
use crate::message::{Message, MessageQueue};

/// Which side of the protocol this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This side dialed out and speaks first.
    Client,
    /// This side was accepted and answers the handshake.
    Server,
}

/// Connection lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No socket, or the socket has failed.
    NotConnected,
    /// An outbound connect is in flight.
    Connecting,
    /// The socket is open; the handshake has not produced a key yet.
    Connected,
    /// The handshake is partway through.
    WaitingEncryption,
    /// The session key is installed; traffic is framed and encrypted.
    Encrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    ClientEncryptionStart,
    ServerEncryptionStart,
    ServerEncryptionFinish,
    Framed,
    Inactive,
}

/// Size of the client's opening message: two big-endian `u32`s.
const CLIENT_HELLO_SIZE: usize = 8;

/// Size of the server's handshake reply: a `u32` zero, then the base,
/// prime, and server public as length-prefixed hex fields.
const SERVER_HELLO_SIZE: usize = 4 * 4 + DH_BASE_STRING.len() + 2 * DH_KEY_HEX_SIZE;

/// Size of the client's closing message: the client public as one
/// length-prefixed hex field.
const CLIENT_PUBLIC_SIZE: usize = 4 + DH_KEY_HEX_SIZE;

/// Size of the two frame size prefixes.
const FRAME_SIZES: usize = 8;

/// Minimum bytes a command occupies inside a frame: the skipped u16 plus
/// the size and code fields.
const COMMAND_HEADER_SIZE: u32 = 6;

struct OutboundFrame {
    data: ReadOnlyPacket,
    encrypt: bool,
}

/// One client↔server connection.
///
/// A connection is always handled through an `Arc`; the reactor tasks and
/// every [`Message`] it produces share it. Per-connection state is only
/// touched from the connection's own tasks — the exceptions are the
/// outbound queue (guarded by its mutex) and the message queue (owned by
/// the consumer).
pub struct Connection {
    role: Role,
    status: Mutex<Status>,
    remote_address: Mutex<String>,
    dh: Mutex<Option<DiffieHellman>>,
    session_key: Mutex<Option<BlowfishKey>>,
    parser: Mutex<ParserState>,
    outgoing: Mutex<VecDeque<OutboundFrame>>,
    send_ready: Notify,
    closed: AtomicBool,
    message_queue: Mutex<Weak<MessageQueue<Message>>>,
    this: Weak<Connection>,
}

impl Connection {
    fn new(role: Role, status: Status, dh: Option<DiffieHellman>, this: Weak<Connection>) -> Self {
        Self {
            role,
            status: Mutex::new(status),
            remote_address: Mutex::new("0.0.0.0".into()),
            dh: Mutex::new(dh),
            session_key: Mutex::new(None),
            parser: Mutex::new(ParserState::Inactive),
            outgoing: Mutex::new(VecDeque::new()),
            send_ready: Notify::new(),
            closed: AtomicBool::new(false),
            message_queue: Mutex::new(Weak::new()),
            this,
        }
    }

    /// Dial `host:port` as a client.
    ///
    /// Returns immediately with the connection in [`Status::Connecting`];
    /// resolution, the connect, and the handshake proceed on the reactor.
    /// Must be called from within a tokio runtime.
    pub fn connect(host: &str, port: u16) -> Arc<Connection> {
        let connection = Arc::new_cyclic(|this| {
            Self::new(Role::Client, Status::Connecting, None, this.clone())
        });

        let task = Arc::clone(&connection);
        let host = host.to_owned();

        tokio::spawn(async move {
            match TcpStream::connect((host.as_str(), port)).await {
                Ok(stream) => task.socket_opened(stream),
                Err(error) => {
                    *task.status.lock() = Status::NotConnected;
                    tracing::error!("Failed to connect to {}:{}: {}", host, port, error);
                }
            }
        });

        connection
    }

    /// Wrap an accepted socket as a server-role connection.
    ///
    /// `dh` is the server's shared parameter template (prime and
    /// generator only).
    pub(crate) fn accept(
        stream: TcpStream,
        dh: DiffieHellman,
        message_queue: Weak<MessageQueue<Message>>,
    ) -> Arc<Connection> {
        let connection = Arc::new_cyclic(|this| {
            Self::new(Role::Server, Status::Connected, Some(dh), this.clone())
        });

        *connection.message_queue.lock() = message_queue;
        connection.socket_opened(stream);
        connection
    }

    /// Install the queue that receives this connection's inbound
    /// commands. The connection holds only a weak reference.
    pub fn set_message_queue(&self, queue: &Arc<MessageQueue<Message>>) {
        *self.message_queue.lock() = Arc::downgrade(queue);
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Which side of the protocol this connection plays.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The peer's address, or `"0.0.0.0"` before it is known.
    #[must_use]
    pub fn remote_address(&self) -> String {
        self.remote_address.lock().clone()
    }

    /// Queue a packet (or an existing read-only view) for transmission.
    ///
    /// Sends are serialized through the outbound FIFO: a packet submitted
    /// after another goes on the wire strictly after it. Once the
    /// connection is encrypted, the frame is encrypted when it reaches the
    /// head of the queue; the packet must then start with the 8 reserved
    /// size bytes.
    pub fn send(&self, packet: impl Into<ReadOnlyPacket>) {
        self.queue_frame(packet.into());
    }

    /// Send the same frame to every connection in `connections`.
    ///
    /// Recipients share the packet backing; nothing is copied per
    /// recipient beyond what each outgoing queue does itself.
    pub fn broadcast(connections: &[Arc<Connection>], packet: impl Into<ReadOnlyPacket>) {
        let packet = packet.into();

        for connection in connections {
            connection.send(packet.clone());
        }
    }

    /// Close the socket and drop to [`Status::NotConnected`].
    pub fn close(&self) {
        self.socket_error("");
    }

    fn queue_frame(&self, data: ReadOnlyPacket) {
        let encrypt = *self.status.lock() == Status::Encrypted;

        let was_empty = {
            let mut outgoing = self.outgoing.lock();
            let was_empty = outgoing.is_empty();
            outgoing.push_back(OutboundFrame { data, encrypt });
            was_empty
        };

        if was_empty {
            self.send_ready.notify_one();
        }
    }

    /// Record the socket failure, close the connection, and clear the
    /// parser. An empty message logs the disconnect without an error.
    fn socket_error(&self, message: &str) {
        if *self.status.lock() != Status::NotConnected {
            tracing::debug!("Client disconnect: {}", self.remote_address());
        }

        if !message.is_empty() {
            tracing::error!(
                "Socket error for client from {}: {}",
                self.remote_address(),
                message
            );
        }

        *self.status.lock() = Status::NotConnected;
        *self.parser.lock() = ParserState::Inactive;
        self.closed.store(true, Ordering::Release);
        self.send_ready.notify_one();
    }

    fn socket_opened(self: &Arc<Self>, stream: TcpStream) {
        if let Ok(peer) = stream.peer_addr() {
            *self.remote_address.lock() = peer.ip().to_string();
        }

        *self.status.lock() = Status::Connected;
        *self.parser.lock() = match self.role {
            Role::Client => ParserState::ClientEncryptionStart,
            Role::Server => ParserState::ServerEncryptionStart,
        };

        tracing::debug!("Client connection: {}", self.remote_address());

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(Arc::clone(self).read_loop(read_half));
        tokio::spawn(Arc::clone(self).write_loop(write_half));
    }

    /// Drive reads and the parser until the connection dies.
    ///
    /// Each iteration reads at most the bytes the current parser step
    /// still needs, appends them to the receive buffer, and re-enters the
    /// parser; the parser answers with the size of the next read request.
    async fn read_loop(self: Arc<Self>, mut read_half: OwnedReadHalf) {
        let mut recv = Packet::new();
        let mut scratch = vec![0u8; MAX_PACKET_SIZE];

        let mut wanted = match self.role {
            Role::Client => {
                let mut hello = Packet::new();

                if let Err(error) = build_client_hello(&mut hello) {
                    self.socket_error(&error.to_string());
                    return;
                }

                self.send(hello);
                SERVER_HELLO_SIZE
            }
            Role::Server => CLIENT_HELLO_SIZE,
        };

        while !self.closed.load(Ordering::Acquire) {
            if wanted == 0 || recv.size() as usize + wanted > MAX_PACKET_SIZE {
                self.socket_error("read request does not fit the receive buffer");
                break;
            }

            let read = match read_half.read(&mut scratch[..wanted]).await {
                Ok(0) => {
                    self.socket_error("");
                    break;
                }
                Ok(read) => read,
                Err(error) => {
                    self.socket_error(&error.to_string());
                    break;
                }
            };

            recv.end();

            if let Err(error) = recv.write_array(&scratch[..read]) {
                self.socket_error(&error.to_string());
                break;
            }

            recv.rewind();

            match self.dispatch(&mut recv) {
                Ok(next) => wanted = next,
                Err(error) => {
                    self.socket_error(&error.to_string());
                    break;
                }
            }
        }
    }

    /// Drain the outbound FIFO, encrypting each tagged frame as it
    /// reaches the head. An empty queue after a completed send does not
    /// schedule another; the task parks until the next enqueue.
    async fn write_loop(self: Arc<Self>, mut write_half: OwnedWriteHalf) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                let _ = write_half.shutdown().await;
                break;
            }

            let head = {
                let outgoing = self.outgoing.lock();
                outgoing
                    .front()
                    .map(|frame| (frame.data.clone(), frame.encrypt))
            };

            let Some((data, encrypt)) = head else {
                self.send_ready.notified().await;
                continue;
            };

            let written = if encrypt {
                match self.encrypt_outbound(&data) {
                    Ok(frame) => write_half.write_all(frame.as_bytes()).await,
                    Err(error) => {
                        self.socket_error(&error.to_string());
                        break;
                    }
                }
            } else {
                write_half.write_all(data.as_bytes()).await
            };

            if let Err(error) = written {
                self.socket_error(&error.to_string());
                break;
            }

            self.outgoing.lock().pop_front();
        }
    }

    fn encrypt_outbound(&self, data: &ReadOnlyPacket) -> Result<Packet, NetError> {
        let key = self
            .session_key
            .lock()
            .clone()
            .ok_or(NetError::InvalidState)?;

        let mut frame = Packet::from_bytes(data.as_bytes())?;
        key.encrypt_packet(&mut frame)?;
        Ok(frame)
    }

    /// Run the parser for the current state. Packet-layer failures
    /// surface here and are converted to a socket error by the caller, so
    /// a malformed peer can never unwind the reactor.
    fn dispatch(&self, recv: &mut Packet) -> Result<usize, NetError> {
        match *self.parser.lock() {
            ParserState::ClientEncryptionStart => self.parse_client_encryption_start(recv),
            ParserState::ServerEncryptionStart => self.parse_server_encryption_start(recv),
            ParserState::ServerEncryptionFinish => self.parse_server_encryption_finish(recv),
            ParserState::Framed => self.parse_frame(recv),
            ParserState::Inactive => Err(NetError::InvalidState),
        }
    }

    /// Client role: parse the server's base/prime/public reply, answer
    /// with the client public, and derive the session key.
    fn parse_client_encryption_start(&self, recv: &mut Packet) -> Result<usize, NetError> {
        if (recv.size() as usize) < SERVER_HELLO_SIZE {
            return Ok(SERVER_HELLO_SIZE - recv.size() as usize);
        }

        if recv.read_u32_big()? != 0 {
            return Err(NetError::Protocol("bad encryption reply header".into()));
        }

        if recv.peek_u32_big()? as usize != DH_BASE_STRING.len() {
            return Err(NetError::Protocol("bad encryption base length".into()));
        }

        let base = recv.read_string32_big(Encoding::Utf8)?;

        if base != DH_BASE_STRING {
            return Err(NetError::Protocol(format!(
                "unexpected encryption base {base:?}"
            )));
        }

        if recv.peek_u32_big()? as usize != DH_KEY_HEX_SIZE {
            return Err(NetError::Protocol("bad encryption prime length".into()));
        }

        let prime = recv.read_string32_big(Encoding::Utf8)?;

        if recv.peek_u32_big()? as usize != DH_KEY_HEX_SIZE {
            return Err(NetError::Protocol("bad server public length".into()));
        }

        let server_public = recv.read_string32_big(Encoding::Utf8)?;

        if recv.left() != 0 {
            return Err(NetError::Protocol(
                "trailing bytes after the encryption reply".into(),
            ));
        }

        *self.status.lock() = Status::WaitingEncryption;

        let mut dh = DiffieHellman::load_prime_hex(&prime)?;
        let client_public = dh.generate_public()?;
        let shared = dh.shared_secret(&server_public)?;
        *self.dh.lock() = Some(dh);

        let mut reply = Packet::new();
        reply.write_string32_big(Encoding::Utf8, &client_public, false)?;

        // The reply must leave in the clear; it is queued before the
        // session key flips the status to Encrypted.
        self.send(reply);

        self.install_session_key(&shared)?;
        recv.clear();
        self.connection_encrypted();
        Ok(FRAME_SIZES)
    }

    /// Server role: validate the client's opening message and answer with
    /// the base, prime, and server public.
    fn parse_server_encryption_start(&self, recv: &mut Packet) -> Result<usize, NetError> {
        if (recv.size() as usize) < CLIENT_HELLO_SIZE {
            return Ok(CLIENT_HELLO_SIZE - recv.size() as usize);
        }

        let first = recv.read_u32_big()?;
        let second = recv.read_u32_big()?;

        if recv.left() != 0 || first != 1 || second != 8 {
            return Err(NetError::Protocol(format!(
                "unexpected client hello ({first}, {second})"
            )));
        }

        *self.status.lock() = Status::WaitingEncryption;

        let mut dh = self.dh.lock().take().ok_or(NetError::InvalidState)?;
        let prime = dh.prime_hex()?;
        let server_public = dh.generate_public()?;
        *self.dh.lock() = Some(dh);

        let mut reply = Packet::new();
        reply.write_blank(4)?;
        reply.write_string32_big(Encoding::Utf8, DH_BASE_STRING, false)?;
        reply.write_string32_big(Encoding::Utf8, &prime, false)?;
        reply.write_string32_big(Encoding::Utf8, &server_public, false)?;
        self.send(reply);

        *self.parser.lock() = ParserState::ServerEncryptionFinish;
        recv.clear();
        Ok(CLIENT_PUBLIC_SIZE)
    }

    /// Server role: parse the client public and derive the session key.
    fn parse_server_encryption_finish(&self, recv: &mut Packet) -> Result<usize, NetError> {
        if (recv.size() as usize) < CLIENT_PUBLIC_SIZE {
            return Ok(CLIENT_PUBLIC_SIZE - recv.size() as usize);
        }

        if recv.peek_u32_big()? as usize != DH_KEY_HEX_SIZE {
            return Err(NetError::Protocol("bad client public length".into()));
        }

        let client_public = recv.read_string32_big(Encoding::Utf8)?;

        if recv.left() != 0 {
            return Err(NetError::Protocol(
                "trailing bytes after the client public".into(),
            ));
        }

        let shared = {
            let dh = self.dh.lock();
            dh.as_ref()
                .ok_or(NetError::InvalidState)?
                .shared_secret(&client_public)?
        };

        self.install_session_key(&shared)?;
        recv.clear();
        self.connection_encrypted();
        Ok(FRAME_SIZES)
    }

    /// Framed traffic: collect the two size prefixes, then the padded
    /// body, decrypt, and demultiplex the commands.
    fn parse_frame(&self, recv: &mut Packet) -> Result<usize, NetError> {
        if *self.status.lock() != Status::Encrypted {
            return Err(NetError::Protocol(
                "framed data before the connection is encrypted".into(),
            ));
        }

        if (recv.size() as usize) < FRAME_SIZES {
            return Ok(FRAME_SIZES - recv.size() as usize);
        }

        recv.rewind();
        let padded_size = recv.read_u32_big()? as usize;
        let real_size = recv.read_u32_big()? as usize;

        if padded_size % BLOWFISH_BLOCK_SIZE != 0
            || real_size > padded_size
            || FRAME_SIZES + padded_size > MAX_PACKET_SIZE
        {
            return Err(NetError::Protocol(format!(
                "bad frame sizes (padded {padded_size}, real {real_size})"
            )));
        }

        if (recv.size() as usize) < FRAME_SIZES + padded_size {
            return Ok(FRAME_SIZES + padded_size - recv.size() as usize);
        }

        let key = self
            .session_key
            .lock()
            .clone()
            .ok_or(NetError::InvalidState)?;
        key.decrypt_packet(recv)?;

        // Hand the frame to the messages as a shared view and start the
        // next frame in a fresh buffer.
        let frame: ReadOnlyPacket = std::mem::take(recv).into();
        self.demultiplex(frame, padded_size - real_size)?;

        Ok(FRAME_SIZES)
    }

    /// Walk the commands packed into a decrypted frame, enqueueing one
    /// [`Message`] per command in wire order, then verify the zero
    /// padding.
    fn demultiplex(&self, mut frame: ReadOnlyPacket, padding: usize) -> Result<(), NetError> {
        frame.seek(FRAME_SIZES as u32)?;

        let queue = self
            .message_queue
            .lock()
            .upgrade()
            .ok_or_else(|| NetError::Protocol("no message queue for the connection".into()))?;

        let connection = self.this.upgrade().ok_or(NetError::InvalidState)?;

        while frame.left() as usize > padding {
            if frame.left() < COMMAND_HEADER_SIZE {
                return Err(NetError::Protocol(
                    "not enough data for a command header".into(),
                ));
            }

            // The leading big-endian size is historical; only skipped.
            frame.skip(2)?;

            let command_start = frame.tell();
            let command_size = u32::from(frame.read_u16_little()?);
            let command_code = frame.read_u16_little()?;

            if command_size < 4 {
                return Err(NetError::Protocol(format!(
                    "command 0x{command_code:04X} is shorter than its own header"
                )));
            }

            if frame.left() < command_size - 4 {
                tracing::error!("Corrupt frame:\n{}", frame.hex_dump());
                return Err(NetError::Protocol(format!(
                    "command 0x{command_code:04X} extends past the frame"
                )));
            }

            let data = frame.view(command_start + 4, command_size - 4)?;
            queue.enqueue(Message::new(
                Arc::clone(&connection),
                command_code,
                data,
            ));

            frame.seek(command_start + command_size)?;
        }

        if frame.left() as usize != padding {
            return Err(NetError::Protocol(
                "command data overlaps the frame padding".into(),
            ));
        }

        for _ in 0..padding {
            if frame.read_u8()? != 0 {
                return Err(NetError::Protocol("frame padding is not zeroed".into()));
            }
        }

        Ok(())
    }

    fn install_session_key(&self, shared_secret: &[u8]) -> Result<(), NetError> {
        *self.session_key.lock() = Some(BlowfishKey::session(shared_secret)?);
        *self.status.lock() = Status::Encrypted;
        *self.parser.lock() = ParserState::Framed;
        Ok(())
    }

    fn connection_encrypted(&self) {
        tracing::debug!("Connection encrypted: {}", self.remote_address());
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("status", &self.status())
            .field("remote_address", &self.remote_address())
            .finish_non_exhaustive()
    }
}

fn build_client_hello(packet: &mut Packet) -> Result<(), PacketError> {
    packet.write_u32_big(1)?;
    packet.write_u32_big(8)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_message_sizes_match_the_wire_layout() {
        assert_eq!(CLIENT_HELLO_SIZE, 8);
        assert_eq!(SERVER_HELLO_SIZE, 529);
        assert_eq!(CLIENT_PUBLIC_SIZE, 260);
    }

    #[test]
    fn client_hello_bytes() {
        let mut hello = Packet::new();
        build_client_hello(&mut hello).unwrap();
        assert_eq!(hello.as_bytes(), &[0, 0, 0, 1, 0, 0, 0, 8]);
    }
}
