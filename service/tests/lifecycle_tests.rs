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

//! Connection lifecycle tests against a real loopback server

use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing_test::traced_test;
use wheeltelnet_service::{ConnectionId, ServerConfig, TelnetConnection, TelnetServer};

fn local_config() -> ServerConfig {
    ServerConfig::new(0).with_bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn start(server: &TelnetServer) -> SocketAddr {
    server.start().unwrap();
    server.local_addr().unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Record every chunk received on every connection
fn record_data(server: &TelnetServer) -> Arc<Mutex<Vec<(usize, Bytes)>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    server.on_connected(move |conn| {
        let sink = sink.clone();
        conn.on_data_received(move |count, data| {
            sink.lock().unwrap().push((count, data));
        });
    });
    received
}

/// Count connections closed, as seen by each connection's own handler
fn count_connection_closes(server: &TelnetServer) -> Arc<AtomicUsize> {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    server.on_connected(move |conn| {
        let counter = counter.clone();
        conn.on_disconnected(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    });
    closed
}

async fn expect_closed(client: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("peer was not closed")
        {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_single_byte_buffer_delivers_each_byte() {
    let server = TelnetServer::new(local_config());
    let received = record_data(&server);
    let addr = start(&server);

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"abc").await.unwrap();

    assert!(wait_for(|| received.lock().unwrap().len() == 3).await);
    let received = received.lock().unwrap();
    let bytes: Vec<u8> = received
        .iter()
        .map(|(count, data)| {
            assert_eq!(*count, 1);
            data[0]
        })
        .collect();
    assert_eq!(bytes, b"abc");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_on_occupied_port_reports_contention() {
    let occupant = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupant.local_addr().unwrap().port();

    let mut config = local_config();
    config.port = port;
    let server = TelnetServer::new(config);
    let err = server.start().unwrap_err();

    assert!(err.is_port_in_use(), "unexpected error: {:?}", err);
    assert!(!server.is_running());
}

#[tokio::test]
#[traced_test]
async fn test_silent_disconnect_fires_once_without_data() {
    let server = TelnetServer::new(local_config());
    let received = record_data(&server);
    let closed = count_connection_closes(&server);
    let server_closed = Arc::new(AtomicUsize::new(0));
    {
        let server_closed = server_closed.clone();
        server.on_disconnected(move |_| {
            server_closed.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = start(&server);

    let client = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| server.connection_count() == 1).await);
    drop(client);

    assert!(wait_for(|| server_closed.load(Ordering::SeqCst) == 1).await);
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(received.lock().unwrap().is_empty());
    assert!(server.all_active_clients().is_empty());

    server.shutdown().await.unwrap();
    assert_eq!(server_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_disconnects_every_client() {
    let server = TelnetServer::new(local_config());
    let closed = count_connection_closes(&server);
    let addr = start(&server);

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| server.connection_count() == 2).await);

    server.stop();

    assert_eq!(closed.load(Ordering::SeqCst), 2);
    assert!(server.all_active_clients().is_empty());
    expect_closed(&mut first).await;
    expect_closed(&mut second).await;

    // Still listening after stop
    assert!(server.is_running());
    let _third = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| server.connection_count() == 1).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_vetoed_connection_is_never_registered() {
    let server = TelnetServer::new(local_config());
    let connected = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        server.on_begin_connection(move |ip| {
            seen.lock().unwrap().push(ip);
            false
        });
        let connected = connected.clone();
        server.on_connected(move |_| {
            connected.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = start(&server);

    let mut client = TcpStream::connect(addr).await.unwrap();
    expect_closed(&mut client).await;

    assert_eq!(*seen.lock().unwrap(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    assert_eq!(server.connection_count(), 0);
    assert_eq!(server.metrics().snapshot().rejected_connections, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_first_rejection_skips_later_gates() {
    let server = TelnetServer::new(local_config());
    let later = Arc::new(AtomicUsize::new(0));
    server.on_begin_connection(|_| true);
    server.on_begin_connection(|_| false);
    {
        let later = later.clone();
        server.on_begin_connection(move |_| {
            later.fetch_add(1, Ordering::SeqCst);
            true
        });
    }
    let addr = start(&server);

    let mut client = TcpStream::connect(addr).await.unwrap();
    expect_closed(&mut client).await;

    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(server.connection_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disconnects_fire_once() {
    let server = TelnetServer::new(local_config());
    let closed = count_connection_closes(&server);
    let server_closed = Arc::new(AtomicUsize::new(0));
    {
        let server_closed = server_closed.clone();
        server.on_disconnected(move |_| {
            server_closed.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = start(&server);

    let client = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| server.connection_count() == 1).await);
    let conn = server.all_active_clients().remove(0);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let conn = conn.clone();
            tokio::spawn(async move { conn.disconnect() })
        })
        .collect();
    drop(client);
    server.stop();
    for task in tasks {
        task.await.unwrap();
    }

    assert!(wait_for(|| server_closed.load(Ordering::SeqCst) >= 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(server_closed.load(Ordering::SeqCst), 1);
    assert!(!conn.is_connected());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handlers_attached_on_connect_see_first_bytes() {
    let server = TelnetServer::new(local_config().with_receive_buffer_size(16));
    let per_connection: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    {
        let per_connection = per_connection.clone();
        server.on_connected(move |conn| {
            let id = conn.id();
            let per_connection = per_connection.clone();
            conn.on_data_received(move |count, data| {
                let mut all = per_connection.lock().unwrap();
                match all.iter_mut().find(|(other, _)| *other == id) {
                    Some((_, bytes)) => bytes.extend_from_slice(&data[..count]),
                    None => all.push((id, data[..count].to_vec())),
                }
            });
        });
    }
    let addr = start(&server);

    // Clients write before the server could possibly have accepted them
    let mut clients = Vec::new();
    for _ in 0..10 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        clients.push(client);
    }

    assert!(
        wait_for(|| {
            let all = per_connection.lock().unwrap();
            all.len() == 10 && all.iter().all(|(_, bytes)| bytes.len() == 5)
        })
        .await
    );
    for (_, bytes) in per_connection.lock().unwrap().iter() {
        assert_eq!(bytes, b"hello");
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_active_clients_is_a_snapshot() {
    let server = TelnetServer::new(local_config());
    let addr = start(&server);

    let _first = TcpStream::connect(addr).await.unwrap();
    let _second = TcpStream::connect(addr).await.unwrap();
    assert!(wait_for(|| server.connection_count() == 2).await);

    let snapshot = server.all_active_clients();
    server.stop();

    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.iter().all(|conn| !conn.is_connected()));
    assert!(server.all_active_clients().is_empty());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_from_connected_handler() {
    let server = TelnetServer::new(local_config());
    server.on_connected(|conn| conn.send("Welcome!\r\n"));
    let addr = start(&server);

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 10];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"Welcome!\r\n");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_echo_round_trip() {
    let server = TelnetServer::new(local_config().with_receive_buffer_size(8));
    server.on_connected(|conn| {
        let echo: TelnetConnection = conn.clone();
        conn.on_data_received(move |count, data| echo.send(data.slice(..count)));
    });
    let addr = start(&server);

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ping across the wire").await.unwrap();

    let mut buf = [0u8; 20];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping across the wire");

    let conn = server.all_active_clients().remove(0);
    assert!(wait_for(|| conn.bytes_sent() == 20 && conn.bytes_received() == 20).await);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connection_ids_increase() {
    let server = TelnetServer::new(local_config());
    let ids = Arc::new(Mutex::new(Vec::new()));
    {
        let ids = ids.clone();
        server.on_connected(move |conn| ids.lock().unwrap().push(conn.id()));
    }
    let addr = start(&server);

    for _ in 0..3 {
        let _client = TcpStream::connect(addr).await.unwrap();
        let expected = ids.lock().unwrap().len() + 1;
        assert!(wait_for(|| ids.lock().unwrap().len() == expected).await);
    }

    {
        let ids = ids.lock().unwrap();
        assert_eq!(ids[0], ConnectionId::new(1));
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    server.shutdown().await.unwrap();
}
