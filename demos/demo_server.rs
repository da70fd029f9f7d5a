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

//! Demo Telnet Server
//!
//! This example demonstrates the connection lifecycle end to end:
//! - Accepts connections on port 32111, logging each one at the gate
//! - Greets every client and prints what it sends, showing bytes outside
//!   printable ASCII as decimal values
//! - Tells every client the server time at startup and every 20 seconds
//!
//! ## Usage
//!
//! Run the server:
//! ```bash
//! cargo run --example demo_server
//! ```
//!
//! Connect with a telnet client:
//! ```bash
//! telnet localhost 32111
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;
use wheeltelnet_service::{ServerConfig, TelnetServer};

const PORT: u16 = 32111;
const CLOCK_INTERVAL: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server = TelnetServer::new(ServerConfig::new(PORT));

    server.on_begin_connection(|ip| {
        println!("Connection request from {}", ip);
        true
    });

    server.on_connected(|conn| {
        println!("{} connected from {}", conn.id(), conn.ip_address());

        let id = conn.id();
        conn.on_data_received(move |count, data| {
            let text = printable(&data[..count]);
            if !text.is_empty() {
                println!("{}: {}", id, text);
            }
        });
        conn.on_error(move |error| {
            println!("{} failed: {}", id, error);
        });

        conn.send("Welcome!\r\n");
    });

    server.on_disconnected(|conn| {
        println!("{} disconnected", conn.id());
    });

    if let Err(e) = server.start() {
        if e.is_port_in_use() {
            eprintln!("Port {} is already in use; is another server running?", PORT);
            return Ok(());
        }
        return Err(e.into());
    }

    println!("Listening on port {}", PORT);
    println!("Press Ctrl+C to stop the server\n");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // First tick fires immediately, so clients hear the time right away
    let mut clock = tokio::time::interval(CLOCK_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = clock.tick() => {
                let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                let message = format!("Server time is: {}\r\n", now);
                for conn in server.all_active_clients() {
                    conn.send(message.clone());
                }
            }
        }
    }

    println!("\nShutting down server...");
    server.shutdown().await?;
    println!("Server stopped");

    Ok(())
}

/// Printable ASCII as-is, anything else as its decimal value
fn printable(data: &[u8]) -> String {
    data.iter()
        .map(|&b| match b {
            32..=126 => (b as char).to_string(),
            _ => b.to_string(),
        })
        .collect()
}
