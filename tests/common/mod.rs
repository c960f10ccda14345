//! Test utilities shared by the integration tests

#![allow(dead_code)]

use socks5_relay::{ConnectionRegistry, Socks5Server};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Spawn a destination that echoes every byte back until the peer closes
pub async fn spawn_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// A proxy running in the background
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Bind the server on an ephemeral port and run it
pub async fn start_proxy(server: Socks5Server) -> RunningProxy {
    let mut server = server;
    let addr = server.bind().await.unwrap();
    let registry = server.registry();
    let handle = tokio::spawn(server.run());

    RunningProxy {
        addr,
        registry,
        handle,
    }
}

/// Build a CONNECT request for an IPv4 socket address
pub fn connect_request(addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("IPv4 address expected");
    };

    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&v4.ip().octets());
    request.extend_from_slice(&v4.port().to_be_bytes());
    request
}

/// Build a username/password sub-negotiation request
pub fn auth_request(username: &str, password: &str) -> Vec<u8> {
    let mut request = vec![0x01, username.len() as u8];
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    request
}

/// Read exactly `len` bytes from the stream
pub async fn read_n(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

/// Poll until the condition holds or about a second has passed
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    cond()
}
