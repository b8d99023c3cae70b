//! The accept loop.
//!
//! A server binds one listen socket and wraps every accepted socket in a
//! server-role [`Connection`] carrying a clone of the shared
//! Diffie-Hellman parameter template. The template is generated on the
//! first accept if the operator did not pin a prime; the generated prime
//! is logged so it can be pinned for deterministic restarts.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpListener;

use torii_crypto::DiffieHellman;

use crate::connection::Connection;
use crate::error::NetError;
use crate::message::{Message, MessageQueue};

/// The listening side of the wire protocol.
pub struct Server {
    listen_address: String,
    port: u16,
    local_address: Mutex<Option<SocketAddr>>,
    dh: Mutex<Option<DiffieHellman>>,
    connections: Mutex<Vec<Arc<Connection>>>,
    message_queue: Mutex<Weak<MessageQueue<Message>>>,
}

impl Server {
    /// A server that will listen on `listen_address:port`. An empty
    /// address or `"any"` listens on all interfaces.
    #[must_use]
    pub fn new(listen_address: impl Into<String>, port: u16) -> Self {
        Self {
            listen_address: listen_address.into(),
            port,
            local_address: Mutex::new(None),
            dh: Mutex::new(None),
            connections: Mutex::new(Vec::new()),
            message_queue: Mutex::new(Weak::new()),
        }
    }

    /// Pin the Diffie-Hellman prime instead of generating one on the
    /// first accept, making restarts deterministic.
    ///
    /// # Errors
    ///
    /// Fails if the prime is not a valid 256-character hex value.
    pub fn seed_prime(&self, prime_hex: &str) -> Result<(), NetError> {
        *self.dh.lock() = Some(DiffieHellman::load_prime_hex(prime_hex)?);
        Ok(())
    }

    /// Install a pre-built parameter set as the shared template.
    pub fn set_diffie_hellman(&self, params: DiffieHellman) {
        *self.dh.lock() = Some(params);
    }

    /// Install the queue handed to every accepted connection.
    pub fn set_message_queue(&self, queue: &Arc<MessageQueue<Message>>) {
        *self.message_queue.lock() = Arc::downgrade(queue);
    }

    /// The bound address, once [`bind`](Self::bind) has run.
    #[must_use]
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.lock()
    }

    /// Connections accepted so far (including ones that have since
    /// dropped to `NotConnected`).
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    /// Forget a connection, typically after a supervisor observed it die.
    pub fn remove_connection(&self, connection: &Arc<Connection>) {
        self.connections
            .lock()
            .retain(|existing| !Arc::ptr_eq(existing, connection));
    }

    /// Bind and listen, returning the listener for [`run`](Self::run).
    ///
    /// Sets `SO_REUSEADDR` so a restarted server can rebind immediately.
    ///
    /// # Errors
    ///
    /// Fails if the listen address does not parse or any socket call
    /// fails.
    pub async fn bind(&self) -> Result<TcpListener, NetError> {
        let address = if self.listen_address.is_empty()
            || self.listen_address.eq_ignore_ascii_case("any")
        {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
        } else {
            let ip = self
                .listen_address
                .parse()
                .map_err(|_| NetError::ListenAddress(self.listen_address.clone()))?;
            SocketAddr::new(ip, self.port)
        };

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(address),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&address.into())?;
        socket.listen(128)?;
        socket.set_nonblocking(true)?;

        let listener = TcpListener::from_std(socket.into())?;
        let local = listener.local_addr()?;
        *self.local_address.lock() = Some(local);

        tracing::info!("Listening on {}", local);
        Ok(listener)
    }

    /// Bind, then accept until a fatal error.
    ///
    /// # Errors
    ///
    /// Fails if binding fails or the Diffie-Hellman setup fails; ordinary
    /// accept errors are logged and the accept is re-armed.
    pub async fn start(self: Arc<Self>) -> Result<(), NetError> {
        let listener = self.bind().await?;
        self.run(listener).await
    }

    /// Accept connections on `listener` until a fatal error.
    ///
    /// # Errors
    ///
    /// Fails only if the shared Diffie-Hellman setup fails; ordinary
    /// accept errors are logged and the accept is re-armed.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), NetError> {
        loop {
            match listener.accept().await {
                Err(error) => {
                    tracing::error!("Accept error: {}", error);
                }
                Ok((stream, peer)) => {
                    let dh = match self.shared_parameters().await {
                        Ok(dh) => dh,
                        Err(error) => {
                            tracing::error!(
                                "Failed to set up Diffie-Hellman parameters: {}",
                                error
                            );
                            return Err(error);
                        }
                    };

                    tracing::debug!("New connection from {}", peer);

                    let connection =
                        Connection::accept(stream, dh, self.message_queue.lock().clone());
                    self.connections.lock().push(connection);
                }
            }
        }
    }

    /// Clone the shared parameter template, generating it first if the
    /// operator did not pin one.
    async fn shared_parameters(&self) -> Result<DiffieHellman, NetError> {
        if self.dh.lock().is_none() {
            // Searching for a safe prime takes long enough that it cannot
            // run on the reactor.
            let generated = tokio::task::spawn_blocking(DiffieHellman::generate)
                .await
                .map_err(|error| {
                    NetError::Protocol(format!("parameter generation task failed: {error}"))
                })??;

            let prime = generated.prime_hex()?;
            let mut guard = self.dh.lock();

            if guard.is_none() {
                tracing::warn!(
                    "Generated a Diffie-Hellman prime; pin it in the server configuration: {}",
                    prime
                );
                *guard = Some(generated);
            }
        }

        self.dh
            .lock()
            .as_ref()
            .map(DiffieHellman::clone)
            .ok_or(NetError::InvalidState)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_address", &self.listen_address)
            .field("port", &self.port)
            .field("local_address", &self.local_address())
            .field("connections", &self.connections.lock().len())
            .finish_non_exhaustive()
    }
}
