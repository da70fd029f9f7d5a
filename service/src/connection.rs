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

//! Telnet connection implementation
//!
//! A connection owns one accepted socket and runs two tasks against it: a
//! receive task that delivers raw chunks to subscribers, and a writer task
//! that drains queued sends in the order they were issued. Neither task is
//! visible to callers; everything is driven through [`TelnetConnection`].

use crate::handler::{ClosedHandler, DataReceivedHandler, ErrorHandler, Subscribers};
use crate::{ConnectionId, TelnetError};
use bytes::{Bytes, BytesMut};
use metrics::{counter, gauge};
use socket2::SockRef;
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A live client connection
///
/// Cloning is cheap and every clone refers to the same socket.
///
/// # Example
///
/// ```no_run
/// # use wheeltelnet_service::TelnetConnection;
/// # fn example(conn: &TelnetConnection) {
/// let echo = conn.clone();
/// conn.on_data_received(move |count, data| {
///     echo.send(data.slice(..count));
/// });
/// conn.send("Welcome!\r\n");
/// # }
/// ```
#[derive(Clone)]
pub struct TelnetConnection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    // Metadata
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,
    buffer_size: usize,

    // Core I/O. The socket slot is emptied on disconnect; the tasks drop
    // their own handles once they observe the cancellation.
    socket: Mutex<Option<Arc<TcpStream>>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
    listening: AtomicBool,

    // Disconnect happens once
    disconnect_lock: Mutex<()>,
    disconnected: AtomicBool,

    // Metrics (lock-free)
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Subscribers
    on_data_received: Subscribers<DataReceivedHandler>,
    on_error: Subscribers<ErrorHandler>,
    on_disconnected: Subscribers<ClosedHandler>,
}

impl TelnetConnection {
    /// Take ownership of an accepted socket
    ///
    /// The writer task starts immediately so sends issued from a connected
    /// handler go out even before the first read is armed. Must be called
    /// from within a Tokio runtime.
    pub(crate) fn new(
        id: ConnectionId,
        socket: TcpStream,
        peer_addr: SocketAddr,
        buffer_size: usize,
    ) -> Self {
        debug_assert!(buffer_size > 0, "receive buffer must hold at least one byte");

        let socket = Arc::new(socket);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                created_at: Instant::now(),
                buffer_size,
                socket: Mutex::new(Some(socket.clone())),
                outbound,
                cancel: CancellationToken::new(),
                listening: AtomicBool::new(false),
                disconnect_lock: Mutex::new(()),
                disconnected: AtomicBool::new(false),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                on_data_received: Subscribers::new(),
                on_error: Subscribers::new(),
                on_disconnected: Subscribers::new(),
            }),
        };

        counter!("wheeltelnet.connections.total").increment(1);
        gauge!("wheeltelnet.connections.active").increment(1.0);
        debug!(connection_id = %id, peer_addr = %peer_addr, buffer_size, "Connection created");

        tokio::spawn(connection.clone().write_loop(socket, outbound_rx));
        connection
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Get the remote IP address captured at accept time
    pub fn ip_address(&self) -> IpAddr {
        self.inner.peer_addr.ip()
    }

    /// Get the full remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Get when the connection was created
    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Get the size of each receive
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Get bytes written to the socket
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    /// Get bytes read from the socket
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Ask the socket whether it is still connected
    ///
    /// This is observed on every call rather than cached. A peer that reset
    /// the connection reports `false` here even before any read notices.
    pub fn is_connected(&self) -> bool {
        match self.socket() {
            Some(socket) => socket.peer_addr().is_ok(),
            None => false,
        }
    }

    /// Subscribe to received data
    ///
    /// Handlers run on the receive task, in subscription order, and must not
    /// block. Subscribe from within the server's connected handler to be sure
    /// of seeing the first bytes.
    pub fn on_data_received<F>(&self, handler: F)
    where
        F: Fn(usize, Bytes) + Send + Sync + 'static,
    {
        self.inner.on_data_received.subscribe(Arc::new(handler));
    }

    /// Subscribe to unexpected receive failures
    ///
    /// The connection is always disconnected right after the handlers return.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&TelnetError) + Send + Sync + 'static,
    {
        self.inner.on_error.subscribe(Arc::new(handler));
    }

    /// Subscribe to the disconnect of this connection
    ///
    /// Fires exactly once. Handlers subscribed after the disconnect never run.
    pub fn on_disconnected<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.on_disconnected.subscribe(Arc::new(handler));
    }

    /// Queue bytes for sending
    ///
    /// Returns immediately. Sends on one connection reach the wire in the
    /// order they were issued. A closed connection silently drops the data,
    /// and a failed write disconnects without raising an error notification.
    pub fn send(&self, data: impl Into<Bytes>) {
        let data = data.into();
        if data.is_empty() {
            return;
        }
        if !self.is_connected() {
            trace!(connection_id = %self.inner.id, "Dropping send on closed connection");
            return;
        }
        if self.inner.outbound.send(data).is_err() {
            trace!(connection_id = %self.inner.id, "Writer already stopped");
        }
    }

    /// Start the receive loop
    ///
    /// Does nothing if the socket is no longer connected or the loop is
    /// already running. If the socket was released in the meantime, or there
    /// is no runtime to run the loop on, the connection is disconnected.
    pub fn listen_for_data(&self) {
        if !self.is_connected() {
            return;
        }
        if self.inner.listening.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(socket) = self.socket() else {
            self.disconnect();
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.clone().receive_loop(socket));
            }
            Err(e) => {
                warn!(connection_id = %self.inner.id, error = %e, "No runtime to receive on");
                self.disconnect();
            }
        }
    }

    /// Close the connection
    ///
    /// The first caller shuts the socket down in both directions, raises
    /// the disconnected notification, and clears every subscription while
    /// holding the connection's lock. A caller racing the first one for the
    /// lock blocks until the close is finished and then returns. Once the
    /// close has started, every later call (including from a disconnected
    /// handler) returns immediately without waiting.
    pub fn disconnect(&self) {
        if self.inner.disconnected.load(Ordering::Acquire) {
            return;
        }
        let _guard = self
            .inner
            .disconnect_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }

        let released = self
            .inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(socket) = released {
            // The I/O tasks still hold the stream; the peer must see the close now
            if let Err(e) = SockRef::from(&*socket).shutdown(Shutdown::Both) {
                trace!(connection_id = %self.inner.id, error = %e, "Socket shutdown failed");
            }
        }
        self.inner.cancel.cancel();

        gauge!("wheeltelnet.connections.active").decrement(1.0);
        info!(
            connection_id = %self.inner.id,
            peer_addr = %self.inner.peer_addr,
            duration = ?self.inner.created_at.elapsed(),
            "Connection closed"
        );

        for handler in self.inner.on_disconnected.take() {
            handler();
        }
        self.inner.on_data_received.clear();
        self.inner.on_error.clear();
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ConnectionInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn socket(&self) -> Option<Arc<TcpStream>> {
        self.inner
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn receive_loop(self, socket: Arc<TcpStream>) {
        trace!(connection_id = %self.inner.id, "Receive loop started");
        loop {
            // Fresh buffer per receive; the previous one now belongs to subscribers
            let mut buffer = BytesMut::zeroed(self.inner.buffer_size);
            let received = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                received = read_some(&socket, &mut buffer) => received,
            };

            match received {
                Ok(0) => {
                    debug!(connection_id = %self.inner.id, "Peer closed the connection");
                    self.disconnect();
                    break;
                }
                Ok(count) => {
                    buffer.truncate(count);
                    let data = buffer.freeze();
                    self.inner
                        .bytes_received
                        .fetch_add(count as u64, Ordering::Relaxed);
                    counter!("wheeltelnet.bytes.received").increment(count as u64);
                    trace!(connection_id = %self.inner.id, bytes = count, "Data received");

                    for handler in self.inner.on_data_received.snapshot() {
                        handler(count, data.clone());
                    }

                    // Next read is polled later, giving other connections a turn
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    let error = TelnetError::from_io(e);
                    if error.is_resource_released() {
                        debug!(connection_id = %self.inner.id, "Socket released during receive");
                    } else {
                        warn!(connection_id = %self.inner.id, error = %error, "Receive failed");
                        counter!("wheeltelnet.errors.receive").increment(1);
                        for handler in self.inner.on_error.snapshot() {
                            handler(&error);
                        }
                    }
                    self.disconnect();
                    break;
                }
            }
        }
        trace!(connection_id = %self.inner.id, "Receive loop finished");
    }

    async fn write_loop(self, socket: Arc<TcpStream>, mut outbound: mpsc::UnboundedReceiver<Bytes>) {
        loop {
            let data = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                data = outbound.recv() => match data {
                    Some(data) => data,
                    None => break,
                },
            };

            let written = tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                written = write_all(&socket, &data) => written,
            };

            match written {
                Ok(()) => {
                    self.inner
                        .bytes_sent
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                    counter!("wheeltelnet.bytes.sent").increment(data.len() as u64);
                }
                Err(e) => {
                    debug!(connection_id = %self.inner.id, error = %e, "Send failed");
                    counter!("wheeltelnet.errors.send").increment(1);
                    self.disconnect();
                    break;
                }
            }
        }
        trace!(connection_id = %self.inner.id, "Writer finished");
    }
}

impl PartialEq for TelnetConnection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TelnetConnection {}

impl std::fmt::Debug for TelnetConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelnetConnection")
            .field("id", &format_args!("{}", self.inner.id))
            .field("peer_addr", &self.inner.peer_addr)
            .field("created_at", &self.inner.created_at)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Read whatever is available, waiting until something is
async fn read_some(socket: &TcpStream, buffer: &mut [u8]) -> io::Result<usize> {
    loop {
        socket.readable().await?;
        match socket.try_read(buffer) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            result => return result,
        }
    }
}

async fn write_all(socket: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        socket.writable().await?;
        match socket.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(written) => data = &data[written..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
