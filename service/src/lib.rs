//
// Copyright 2017-2025 Hans W. Uhlig. All Rights Reserved.
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

//! Telnet connection-lifecycle engine
//!
//! A TCP server core for Telnet-style services. It accepts connections,
//! lets the application veto them by remote address, tracks every live
//! connection, hands raw received bytes to subscribers, and tears
//! connections down exactly once. Telnet option negotiation and terminal
//! handling are left to code layered on top; the command bytes are
//! published in [`consts`].
//!
//! # Architecture
//!
//! ```text
//! TelnetServer ── accept loop ── begin-connection gate
//!     │
//!     └── registry ── TelnetConnection ── receive task / writer task
//! ```
//!
//! # Example
//!
//! ```no_run
//! use wheeltelnet_service::{ServerConfig, TelnetServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = TelnetServer::new(ServerConfig::new(2323));
//!
//!     server.on_begin_connection(|ip| !ip.is_multicast());
//!     server.on_connected(|conn| {
//!         let echo = conn.clone();
//!         conn.on_data_received(move |count, data| {
//!             echo.send(data.slice(..count));
//!         });
//!     });
//!
//!     server.start()?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
pub mod consts;
mod error;
mod handler;
mod metrics;
mod server;
mod types;

pub use config::{DEFAULT_BACKLOG, DEFAULT_RECEIVE_BUFFER_SIZE, ServerConfig};
pub use connection::TelnetConnection;
pub use error::{ErrorKind, Result, TelnetError};
pub use handler::{
    BeginConnectionHandler, ClosedHandler, ConnectedHandler, DataReceivedHandler,
    DisconnectedHandler, ErrorHandler,
};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use server::TelnetServer;
pub use types::ConnectionId;
