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

//! Event handler types and subscriber lists
//!
//! Every event keeps an ordered list of callbacks. Callbacks run in the order
//! they were subscribed. Dispatch always works on a snapshot of the list, so a
//! callback may subscribe further handlers or trigger other events without
//! deadlocking on the list itself.

use crate::{TelnetConnection, TelnetError};
use bytes::Bytes;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

/// Veto hook run before a connection exists. Returning `false` drops the socket.
pub type BeginConnectionHandler = dyn Fn(IpAddr) -> bool + Send + Sync + 'static;

/// Called with a freshly registered connection, before its first read
pub type ConnectedHandler = dyn Fn(&TelnetConnection) + Send + Sync + 'static;

/// Called once a connection has been closed and deregistered
pub type DisconnectedHandler = dyn Fn(&TelnetConnection) + Send + Sync + 'static;

/// Called with `(byte_count, buffer)` for every completed receive
///
/// Each call gets its own buffer; it is never written to again.
pub type DataReceivedHandler = dyn Fn(usize, Bytes) + Send + Sync + 'static;

/// Called when a receive fails unexpectedly, right before the connection closes
pub type ErrorHandler = dyn Fn(&TelnetError) + Send + Sync + 'static;

/// Called exactly once when a connection closes
pub type ClosedHandler = dyn Fn() + Send + Sync + 'static;

/// Ordered list of callbacks for one kind of event
pub(crate) struct Subscribers<F: ?Sized> {
    handlers: RwLock<Vec<Arc<F>>>,
}

impl<F: ?Sized> Subscribers<F> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a handler to the end of the list
    pub(crate) fn subscribe(&self, handler: Arc<F>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Copy of the current handlers, in subscription order
    pub(crate) fn snapshot(&self) -> Vec<Arc<F>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return every handler
    pub(crate) fn take(&self) -> Vec<Arc<F>> {
        std::mem::take(&mut *self.handlers.write().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drop every handler
    pub(crate) fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<F: ?Sized> std::fmt::Debug for Subscribers<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("len", &self.len())
            .finish()
    }
}

/// Run the begin-connection gate
///
/// Handlers run in subscription order and the first `false` wins; later
/// handlers are not consulted. No handlers means the connection is admitted.
pub(crate) fn admits(handlers: &[Arc<BeginConnectionHandler>], ip: IpAddr) -> bool {
    handlers.iter().all(|handler| handler(ip))
}
