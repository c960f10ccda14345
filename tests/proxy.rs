mod common;

use async_trait::async_trait;
use common::*;
use socks5_relay::{
    ClientConnection, Destination, ProxyDispatch, ReplyCode, Socks5Server, UserPass,
    codec::encode_reply,
};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn no_auth_connect_and_relay() {
    let echo = spawn_echo_server().await;
    let proxy = start_proxy(Socks5Server::new("127.0.0.1:0")).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x00]);

    let request = connect_request(echo);
    client.write_all(&request).await.unwrap();

    // Reply echoes the request with REP = succeeded
    let reply = read_n(&mut client, request.len()).await;
    assert_eq!(reply, encode_reply(&request, ReplyCode::Succeeded));

    client.write_all(b"ping").await.unwrap();
    assert_eq!(read_n(&mut client, 4).await, b"ping".to_vec());

    client.write_all(b"second message").await.unwrap();
    assert_eq!(read_n(&mut client, 14).await, b"second message".to_vec());

    assert_eq!(proxy.registry.len(), 1);

    drop(client);
    assert!(wait_for(|| proxy.registry.is_empty()).await);
}

#[tokio::test]
async fn bytes_sent_with_request_are_forwarded() {
    let echo = spawn_echo_server().await;
    let proxy = start_proxy(Socks5Server::new("127.0.0.1:0")).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    let request = connect_request(echo);

    // Everything in a single write
    let mut burst = vec![0x05, 0x01, 0x00];
    burst.extend_from_slice(&request);
    burst.extend_from_slice(b"early");
    client.write_all(&burst).await.unwrap();

    let expected = [
        vec![0x05, 0x00],
        encode_reply(&request, ReplyCode::Succeeded),
        b"early".to_vec(),
    ]
    .concat();
    assert_eq!(read_n(&mut client, expected.len()).await, expected);
}

#[tokio::test]
async fn auth_success_then_connect() {
    let echo = spawn_echo_server().await;
    let server =
        Socks5Server::new("127.0.0.1:0").with_auth(Some(UserPass::new("alice", "secret")));
    let proxy = start_proxy(server).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x02]);

    client
        .write_all(&auth_request("alice", "secret"))
        .await
        .unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x00]);

    let request = connect_request(echo);
    client.write_all(&request).await.unwrap();
    let reply = read_n(&mut client, request.len()).await;
    assert_eq!(reply[1], 0x00);

    client.write_all(b"hi").await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, b"hi".to_vec());
}

#[tokio::test]
async fn auth_failure_gets_one_reply_then_close() {
    let server =
        Socks5Server::new("127.0.0.1:0").with_auth(Some(UserPass::new("alice", "secret")));
    let proxy = start_proxy(server).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    assert_eq!(read_n(&mut client, 2).await, vec![0x05, 0x02]);

    client
        .write_all(&auth_request("alice", "guess"))
        .await
        .unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, vec![0x05, 0xFF]);
}

#[tokio::test]
async fn bad_version_closes_without_reply() {
    let proxy = start_proxy(Socks5Server::new("127.0.0.1:0")).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn zero_methods_closes_without_reply() {
    let proxy = start_proxy(Socks5Server::new("127.0.0.1:0")).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x00]).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn unreachable_destination_gets_failure_reply() {
    // Nobody listens on a port we just released
    let (listener, dead) = create_test_listener().await;
    drop(listener);

    let proxy = start_proxy(Socks5Server::new("127.0.0.1:0")).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    read_n(&mut client, 2).await;

    let request = connect_request(dead);
    client.write_all(&request).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, encode_reply(&request, ReplyCode::ConnectionRefused));
    assert!(wait_for(|| proxy.registry.is_empty()).await);
}

/// Records every dispatch and answers with a success reply, nothing more
#[derive(Debug, Default)]
struct RecordingDispatch {
    calls: Mutex<Vec<Destination>>,
}

#[async_trait]
impl ProxyDispatch for RecordingDispatch {
    async fn dispatch(
        &self,
        request: Vec<u8>,
        destination: Destination,
        mut client: ClientConnection,
    ) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(destination);
        client
            .stream_mut()
            .write_all(&encode_reply(&request, ReplyCode::Succeeded))
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn custom_dispatch_receives_domain_destination() {
    let recorder = Arc::new(RecordingDispatch::default());
    let server = Socks5Server::new("127.0.0.1:0").with_dispatch(recorder.clone());
    let proxy = start_proxy(server).await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    read_n(&mut client, 2).await;

    let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
    request.extend_from_slice(b"example.com");
    request.extend_from_slice(&[0x01, 0xBB]);
    client.write_all(&request).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, encode_reply(&request, ReplyCode::Succeeded));

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].address, "example.com");
    assert_eq!(calls[0].port, 443);
}

#[tokio::test]
async fn unsupported_requests_never_reach_dispatch() {
    let recorder = Arc::new(RecordingDispatch::default());
    let server = Socks5Server::new("127.0.0.1:0").with_dispatch(recorder.clone());
    let proxy = start_proxy(server).await;

    // BIND, UDP ASSOCIATE and an unknown address type
    let bind = vec![0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];
    let udp = vec![0x05, 0x03, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50];
    let atyp = vec![0x05, 0x01, 0x00, 0x05, 127, 0, 0, 1, 0x00, 0x50];

    for request in [bind, udp, atyp] {
        let mut client = TcpStream::connect(proxy.addr).await.unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        read_n(&mut client, 2).await;

        client.write_all(&request).await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected reply {rest:?}");
    }

    assert!(recorder.calls.lock().unwrap().is_empty());
    assert!(wait_for(|| proxy.registry.is_empty()).await);
}
