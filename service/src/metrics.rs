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

//! Lock-free metrics for the Telnet server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free server metrics
///
/// All metrics are stored as atomics and can be accessed concurrently
/// without locks. Use the `snapshot()` method to get a view of all metrics
/// at a point in time.
#[derive(Debug)]
pub struct ServerMetrics {
    // Connection counts
    accepted_connections: AtomicU64,
    rejected_connections: AtomicU64,
    active_connections: AtomicU64,
    closed_connections: AtomicU64,

    // Errors
    accept_errors: AtomicU64,

    // Server start time
    started_at: Instant,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        Self {
            accepted_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            closed_connections: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record a connection that passed the gate and was registered
    pub fn connection_opened(&self) {
        self.accepted_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a registered connection being closed
    pub fn connection_closed(&self) {
        self.closed_connections.fetch_add(1, Ordering::Relaxed);
        // Never wraps below zero
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record a socket dropped before it became a connection
    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed accept
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the number of connections accepted since server start
    pub fn accepted_connections(&self) -> u64 {
        self.accepted_connections.load(Ordering::Relaxed)
    }

    /// Get the current number of active connections
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted_connections: self.accepted_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            closed_connections: self.closed_connections.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

/// A snapshot of server metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Connections admitted since server start
    pub accepted_connections: u64,
    /// Sockets closed by the begin-connection gate or for lacking an address
    pub rejected_connections: u64,
    /// Connections currently open
    pub active_connections: u64,
    /// Connections closed since server start
    pub closed_connections: u64,
    /// Failed accepts
    pub accept_errors: u64,
    /// Server uptime
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Connections admitted per second of uptime
    pub fn accept_rate(&self) -> f64 {
        if self.uptime.is_zero() {
            return 0.0;
        }
        self.accepted_connections as f64 / self.uptime.as_secs_f64()
    }
}
