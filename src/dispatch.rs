//! What happens once a CONNECT request has been parsed.
//!
//! The handshake hands the raw request frame, the decoded destination and the
//! client connection to a [`ProxyDispatch`]. From then on the policy owns the
//! reply and all further traffic. [`BridgeDispatch`] is the default: connect
//! to the destination, echo a success reply and relay bytes both ways.

use crate::codec::{Destination, encode_reply};
use crate::protocol::ReplyCode;
use crate::registry::{ConnectionId, ConnectionRegistry, Registration};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, error, info};

/// Any byte stream a client can arrive on (TCP, in-memory duplex, ...)
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> ClientStream for T {}

/// ClientConnection is one client socket plus its handshake leftovers
#[derive(Debug)]
pub struct ClientConnection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    stream: Box<dyn ClientStream>,
    /// Bytes the client sent after the CONNECT request
    pending: Vec<u8>,
    registration: Option<Registration>,
}

impl ClientConnection {
    pub fn new(
        id: ConnectionId,
        peer_addr: Option<SocketAddr>,
        stream: Box<dyn ClientStream>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            stream,
            pending: Vec::new(),
            registration: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn stream_mut(&mut self) -> &mut Box<dyn ClientStream> {
        &mut self.stream
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// take_pending drains the bytes received after the request frame
    pub fn take_pending(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    pub(crate) fn set_pending(&mut self, bytes: Vec<u8>) {
        self.pending = bytes;
    }

    /// register joins the registry once; later calls are no-ops
    pub(crate) fn register(&mut self, registry: &Arc<ConnectionRegistry>) {
        if self.registration.is_none() {
            self.registration = Some(registry.register(self.id, self.peer_addr));
        }
    }
}

/// ProxyDispatch is the policy invoked with every successfully parsed request.
///
/// `request` is the exact CONNECT frame the client sent, suitable for
/// [`encode_reply`]. The policy must write a reply and drive the connection
/// to completion; dropping `client` closes it.
#[async_trait]
pub trait ProxyDispatch: Send + Sync + Debug {
    async fn dispatch(
        &self,
        request: Vec<u8>,
        destination: Destination,
        client: ClientConnection,
    ) -> Result<()>;
}

/// BridgeDispatch connects to the destination and relays bytes verbatim
#[derive(Debug, Default, Clone, Copy)]
pub struct BridgeDispatch;

#[async_trait]
impl ProxyDispatch for BridgeDispatch {
    async fn dispatch(
        &self,
        request: Vec<u8>,
        destination: Destination,
        mut client: ClientConnection,
    ) -> Result<()> {
        let outbound = match connect_destination(&destination).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(conn_id = %client.id(), dest = %destination, "connect failed: {e}");
                reject(&mut client, &request, ReplyCode::from_io_error(&e)).await;
                return Err(e).with_context(|| format!("failed to connect to {destination}"));
            }
        };

        debug!(conn_id = %client.id(), dest = %destination, "connected");

        // The reply must be flushed before any relayed byte
        let reply = encode_reply(&request, ReplyCode::Succeeded);
        client.stream_mut().write_all(&reply).await?;
        client.stream_mut().flush().await?;

        relay(client, outbound, &destination).await
    }
}

/// connect_destination opens the outbound TCP connection
pub async fn connect_destination(destination: &Destination) -> io::Result<TcpStream> {
    TcpStream::connect((destination.address.as_str(), destination.port)).await
}

/// reject writes an echoed failure reply and shuts the client down. The
/// client may already be gone, so write errors are only logged
pub async fn reject(client: &mut ClientConnection, request: &[u8], code: ReplyCode) {
    let conn_id = client.id();
    let reply = encode_reply(request, code);
    let stream = client.stream_mut();
    if let Err(e) = stream.write_all(&reply).await {
        debug!(%conn_id, "failure reply not delivered: {e}");
        return;
    }
    if let Err(e) = stream.shutdown().await {
        debug!(%conn_id, "shutdown after failure reply: {e}");
    }
}

/// relay forwards any pending client bytes and then copies both directions.
/// Whichever side closes or errors first ends the relay, and both sockets
/// are closed on return
pub async fn relay(
    mut client: ClientConnection,
    mut outbound: TcpStream,
    destination: &Destination,
) -> Result<()> {
    let pending = client.take_pending();
    if !pending.is_empty() {
        outbound.write_all(&pending).await?;
    }

    let conn_id = client.id();
    let (mut client_read, mut client_write) = io::split(client.stream_mut());
    let (mut server_read, mut server_write) = outbound.split();

    let client_to_server = async {
        let n = io::copy(&mut client_read, &mut server_write).await?;
        server_write.shutdown().await?;
        Ok::<u64, io::Error>(n)
    };

    let server_to_client = async {
        let n = io::copy(&mut server_read, &mut client_write).await?;
        client_write.shutdown().await?;
        Ok::<u64, io::Error>(n)
    };

    select! {
        sent = client_to_server => {
            let sent = sent.with_context(|| format!("relay to {destination} failed"))?;
            info!(
                %conn_id,
                dest = %destination,
                "client closed: {} bytes from client",
                sent + pending.len() as u64
            );
        }
        received = server_to_client => {
            let received = received.with_context(|| format!("relay from {destination} failed"))?;
            info!(
                %conn_id,
                dest = %destination,
                "destination closed: {} bytes from server",
                received
            );
        }
    }

    Ok(())
}
