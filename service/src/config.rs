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

//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default size of the per-connection receive buffer
///
/// One byte on purpose. Every multi-byte Telnet sequence then arrives split
/// across notifications, which keeps protocol code above this layer honest
/// about fragmentation.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 4;

/// Server configuration
///
/// Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use wheeltelnet_service::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new(32111)
///     .with_backlog(16)
///     .with_receive_buffer_size(64)
///     .with_accept_error_backoff(Duration::from_millis(250));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to listen on (all interfaces by default)
    pub bind_address: IpAddr,

    /// TCP port to listen on
    pub port: u16,

    /// Listen backlog handed to the operating system
    pub backlog: u32,

    /// Size of the buffer each receive reads into
    pub receive_buffer_size: usize,

    /// Pause after an accept failure before accepting again
    pub accept_error_backoff: Duration,

    /// How long `shutdown()` waits for the accept loop to wind down
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 23,
            backlog: DEFAULT_BACKLOG,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            accept_error_backoff: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration listening on `port` on all interfaces
    ///
    /// All other settings will use their default values.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Set the local address to listen on
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set the listen backlog
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set the receive buffer size used by every accepted connection
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Set the back-off applied after an accept failure
    pub fn with_accept_error_backoff(mut self, backoff: Duration) -> Self {
        self.accept_error_backoff = backoff;
        self
    }

    /// Set the shutdown timeout duration
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The socket address the server binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Validate the configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.backlog == 0 {
            return Err("backlog must be greater than 0".to_string());
        }

        if self.receive_buffer_size == 0 {
            return Err("receive_buffer_size must be greater than 0".to_string());
        }

        if self.accept_error_backoff.is_zero() {
            return Err("accept_error_backoff must be greater than 0".to_string());
        }

        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
