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

//! Error types for the Telnet server

use std::io;
use thiserror::Error;

/// Result type for operations
pub type Result<T> = std::result::Result<T, TelnetError>;

/// Telnet server error types
#[derive(Debug, Error)]
pub enum TelnetError {
    /// The listening port is already bound by someone else
    #[error("Port {port} is already in use: {source}")]
    PortInUse {
        /// The port that could not be bound
        port: u16,
        /// The underlying bind failure
        #[source]
        source: io::Error,
    },

    /// The socket behind a connection has already been closed
    #[error("Connection resource already released")]
    ResourceReleased,

    /// I/O error from the underlying TCP socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Server configuration was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server has already been started
    #[error("Server already running")]
    AlreadyRunning,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,
}

/// Coarse classification used to decide how a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Binding failed because the port is occupied. The caller decides.
    PortInUse,
    /// The socket was already closed. Treated as ordinary shutdown noise.
    ResourceReleased,
    /// Anything else. Escalated to subscribers, then the connection closes.
    Unexpected,
}

impl TelnetError {
    /// Convert a bind or listen failure, singling out port contention
    ///
    /// Every other failure is passed through unmodified.
    pub fn from_bind(port: u16, error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::AddrInUse {
            TelnetError::PortInUse {
                port,
                source: error,
            }
        } else {
            TelnetError::Io(error)
        }
    }

    /// Convert an I/O failure seen on an established connection
    pub fn from_io(error: io::Error) -> Self {
        if error.kind() == io::ErrorKind::NotConnected {
            TelnetError::ResourceReleased
        } else {
            TelnetError::Io(error)
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TelnetError::PortInUse { .. } => ErrorKind::PortInUse,
            TelnetError::ResourceReleased => ErrorKind::ResourceReleased,
            _ => ErrorKind::Unexpected,
        }
    }

    /// Check if binding failed because the port was occupied
    pub fn is_port_in_use(&self) -> bool {
        self.kind() == ErrorKind::PortInUse
    }

    /// Check if the error only reflects an already closed socket
    pub fn is_resource_released(&self) -> bool {
        self.kind() == ErrorKind::ResourceReleased
    }
}
