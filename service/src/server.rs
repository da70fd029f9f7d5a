//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Telnet server implementation
//!
//! The TelnetServer owns the listening socket and the registry of live
//! connections. Accepted sockets pass the begin-connection gate, become a
//! [`TelnetConnection`], get registered and announced, and only then start
//! receiving.

use crate::handler::{
    BeginConnectionHandler, ConnectedHandler, DisconnectedHandler, Subscribers, admits,
};
use crate::types::ConnectionIdAllocator;
use crate::{Result, ServerConfig, ServerMetrics, TelnetConnection, TelnetError};
use metrics::counter;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Telnet server
///
/// Accepts connections on one port and tracks them until they close.
///
/// # Example
///
/// ```no_run
/// use wheeltelnet_service::{ServerConfig, TelnetServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = TelnetServer::new(ServerConfig::new(32111));
///
///     server.on_connected(|conn| {
///         conn.send("Welcome!\r\n");
///     });
///
///     server.start()?;
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///
///     Ok(())
/// }
/// ```
pub struct TelnetServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    /// Server configuration
    config: ServerConfig,
    /// Live connections, in accept order
    connections: Mutex<Vec<TelnetConnection>>,
    /// Connection ID source
    ids: ConnectionIdAllocator,
    /// Server metrics
    metrics: Arc<ServerMetrics>,
    /// Address actually bound while running
    local_addr: Mutex<Option<SocketAddr>>,
    /// Accept loop, present while running
    accept: Mutex<Option<AcceptTask>>,

    on_begin_connection: Subscribers<BeginConnectionHandler>,
    on_connected: Subscribers<ConnectedHandler>,
    on_disconnected: Subscribers<DisconnectedHandler>,
}

struct AcceptTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TelnetServer {
    /// Create a new server with the given configuration
    ///
    /// Nothing is bound until `start()` is called.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                connections: Mutex::new(Vec::new()),
                ids: ConnectionIdAllocator::new(),
                metrics: Arc::new(ServerMetrics::new()),
                local_addr: Mutex::new(None),
                accept: Mutex::new(None),
                on_begin_connection: Subscribers::new(),
                on_connected: Subscribers::new(),
                on_disconnected: Subscribers::new(),
            }),
        }
    }

    /// Subscribe a begin-connection gate
    ///
    /// Gates run in subscription order with the remote address of every
    /// accepted socket. The first gate returning `false` closes the socket
    /// before any connection exists; later gates are skipped.
    pub fn on_begin_connection<F>(&self, handler: F)
    where
        F: Fn(std::net::IpAddr) -> bool + Send + Sync + 'static,
    {
        self.inner.on_begin_connection.subscribe(Arc::new(handler));
    }

    /// Subscribe to newly registered connections
    ///
    /// Handlers attached to the connection from in here are guaranteed to
    /// see its first bytes; receiving starts only after every connected
    /// handler has returned.
    pub fn on_connected<F>(&self, handler: F)
    where
        F: Fn(&TelnetConnection) + Send + Sync + 'static,
    {
        self.inner.on_connected.subscribe(Arc::new(handler));
    }

    /// Subscribe to connections leaving the registry
    pub fn on_disconnected<F>(&self, handler: F)
    where
        F: Fn(&TelnetConnection) + Send + Sync + 'static,
    {
        self.inner.on_disconnected.subscribe(Arc::new(handler));
    }

    /// Bind the listening socket and start accepting
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`TelnetError::PortInUse`] when the port is occupied; any other bind
    /// failure is returned as the I/O error the system reported.
    #[instrument(skip(self), fields(port = self.inner.config.port))]
    pub fn start(&self) -> Result<()> {
        self.inner
            .config
            .validate()
            .map_err(TelnetError::InvalidConfig)?;

        let mut accept = self
            .inner
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if accept.is_some() {
            return Err(TelnetError::AlreadyRunning);
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;
        let listener = bind(&self.inner.config)?;
        let local_addr = listener.local_addr()?;
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local_addr);

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(
            self.inner
                .clone()
                .accept_loop(listener, cancel.clone()),
        );
        *accept = Some(AcceptTask { cancel, handle });

        tracing::info!("Telnet server listening on {}", local_addr);
        Ok(())
    }

    /// Disconnect every registered connection
    ///
    /// The registry is emptied first, so disconnect handlers never observe
    /// a connection that is being torn down by this call. The listening
    /// socket stays bound.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let connections = std::mem::take(&mut *self.inner.lock_connections());
        tracing::info!(count = connections.len(), "Disconnecting all clients");
        for connection in connections {
            connection.disconnect();
        }
    }

    /// Disconnect every registered connection whose socket is no longer
    /// connected
    ///
    /// Catches peers that went away while their connection sat idle with no
    /// I/O in flight. Returns how many connections were pruned.
    pub fn check_for_disconnected_clients(&self) -> usize {
        let stale: Vec<TelnetConnection> = self
            .inner
            .snapshot()
            .into_iter()
            .filter(|connection| !connection.is_connected())
            .collect();

        for connection in &stale {
            tracing::debug!(connection_id = %connection.id(), "Pruning stale connection");
            connection.disconnect();
        }
        if !stale.is_empty() {
            self.inner
                .lock_connections()
                .retain(|connection| !stale.contains(connection));
        }
        stale.len()
    }

    /// Get every live connection
    ///
    /// Stale connections are pruned first. The returned list is a copy and
    /// does not track later changes.
    pub fn all_active_clients(&self) -> Vec<TelnetConnection> {
        self.check_for_disconnected_clients();
        self.inner.snapshot()
    }

    /// Stop accepting, release the listening socket, and disconnect everyone
    ///
    /// Waits up to the configured shutdown timeout for the accept loop to
    /// finish.
    #[instrument(skip(self), fields(port = self.inner.config.port))]
    pub async fn shutdown(&self) -> Result<()> {
        let task = self
            .inner
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(TelnetError::ServerNotRunning)?;

        tracing::info!("Shutting down Telnet server");
        task.cancel.cancel();

        match tokio::time::timeout(self.inner.config.shutdown_timeout, task.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Accept loop failed: {}", e),
            Err(_) => tracing::warn!("Accept loop did not stop within the shutdown timeout"),
        }
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        self.stop();

        tracing::info!("Telnet server shutdown complete");
        Ok(())
    }

    /// Check if the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.inner
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Get the configured port
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Get the address actually bound, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .inner
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of registered connections
    pub fn connection_count(&self) -> usize {
        self.inner.lock_connections().len()
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.inner.metrics.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }
}

impl ServerInner {
    fn lock_connections(&self) -> std::sync::MutexGuard<'_, Vec<TelnetConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<TelnetConnection> {
        self.lock_connections().clone()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, _)) => self.admit(socket),
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    self.metrics.accept_error();
                    counter!("wheeltelnet.errors.accept").increment(1);

                    // Back off on errors to avoid tight loop
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.accept_error_backoff) => {}
                    }
                }
            }
        }

        tracing::info!("Accept loop terminated");
    }

    fn admit(self: &Arc<Self>, socket: TcpStream) {
        let peer_addr = match socket.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!("Dropping accepted socket without a remote address: {}", e);
                self.metrics.connection_rejected();
                return;
            }
        };

        if !admits(&self.on_begin_connection.snapshot(), peer_addr.ip()) {
            tracing::debug!(peer_addr = %peer_addr, "Connection refused by begin-connection gate");
            self.metrics.connection_rejected();
            counter!("wheeltelnet.connections.rejected").increment(1);
            return;
        }

        let id = self.ids.next_id();
        let connection =
            TelnetConnection::new(id, socket, peer_addr, self.config.receive_buffer_size);
        self.attach(&connection);
        tracing::info!(connection_id = %id, peer_addr = %peer_addr, "Connection established");

        for handler in self.on_connected.snapshot() {
            handler(&connection);
        }
        connection.listen_for_data();
    }

    /// Register a connection and route its disconnect back to the registry
    fn attach(self: &Arc<Self>, connection: &TelnetConnection) {
        let server = Arc::downgrade(self);
        let weak = connection.downgrade();
        connection.on_disconnected(move || {
            if let (Some(server), Some(connection)) =
                (server.upgrade(), TelnetConnection::upgrade(&weak))
            {
                server.detach(&connection);
            }
        });

        self.lock_connections().push(connection.clone());
        self.metrics.connection_opened();
    }

    fn detach(&self, connection: &TelnetConnection) {
        self.lock_connections().retain(|other| other != connection);
        self.metrics.connection_closed();

        for handler in self.on_disconnected.snapshot() {
            handler(connection);
        }
    }
}

/// Bind and listen with the configured backlog
///
/// Address reuse lets a restart bind over connections from the previous run
/// that are still closing. A port held by an active listener still fails
/// with `AddrInUse`.
fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.socket_addr();
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .map_err(|e| TelnetError::from_bind(config.port, e))?;
    socket
        .listen(config.backlog)
        .map_err(|e| TelnetError::from_bind(config.port, e))
}

impl std::fmt::Debug for TelnetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetServer")
            .field("port", &self.port())
            .field("local_addr", &self.local_addr())
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

impl Drop for TelnetServer {
    fn drop(&mut self) {
        let task = self
            .inner
            .accept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            tracing::warn!("TelnetServer dropped while still running");
            task.cancel.cancel();
        }
    }
}
