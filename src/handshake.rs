//! Per-connection SOCKS5 handshake.
//!
//! [`Handshake`] is the state machine itself. It never touches a socket: it
//! is fed the bytes buffered so far and answers with what to write next.
//! [`negotiate`] drives it over a client stream, one frame at a time, and
//! returns the parsed CONNECT request for the dispatch policy.
//!
//! There is no idle timeout. A client that stops sending mid-handshake holds
//! its task until it disconnects.

use crate::auth::UserPass;
use crate::codec::{
    Destination, decode_auth_request, decode_destination_request, decode_greeting,
    encode_auth_reply, encode_method_selection,
};
use crate::dispatch::ClientConnection;
use crate::error::Socks5Error;
use crate::protocol::{AuthMethod, AuthStatus, MAX_FRAME_LEN};
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// HandshakeState is where a connection is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingGreeting,
    AwaitingAuth,
    AwaitingCommand,
    /// Request handed to the dispatch policy
    Dispatched,
    /// Rejected; the connection must be closed
    Closed,
}

/// Transition is the outcome of one complete frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Write the reply, then wait for the next frame
    Reply(Vec<u8>),
    /// Write the reply, then close the connection
    ReplyAndClose(Vec<u8>),
    /// The CONNECT request was parsed; `request` holds its exact bytes
    Dispatch {
        request: Vec<u8>,
        destination: Destination,
    },
}

/// Handshake is the state machine for a single client connection
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    credentials: Option<Arc<UserPass>>,
}

impl Handshake {
    /// new starts a handshake; credentials switch on username/password auth
    pub fn new(credentials: Option<Arc<UserPass>>) -> Self {
        Self {
            state: HandshakeState::AwaitingGreeting,
            credentials,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// advance consumes one frame from the front of `buf` and returns the
    /// transition along with how many bytes the frame took.
    ///
    /// [`Socks5Error::Incomplete`] leaves the state untouched; every other
    /// error moves the handshake to [`HandshakeState::Closed`].
    pub fn advance(&mut self, buf: &[u8]) -> Result<(Transition, usize), Socks5Error> {
        let result = self.step(buf);
        if let Err(e) = &result {
            if !e.is_incomplete() {
                self.state = HandshakeState::Closed;
            }
        }
        result
    }

    fn step(&mut self, buf: &[u8]) -> Result<(Transition, usize), Socks5Error> {
        match self.state {
            HandshakeState::AwaitingGreeting => {
                let (_greeting, used) = decode_greeting(buf)?;

                // The configured mode decides the method, not the client's offer
                let method = if self.credentials.is_some() {
                    self.state = HandshakeState::AwaitingAuth;
                    AuthMethod::UserPass
                } else {
                    self.state = HandshakeState::AwaitingCommand;
                    AuthMethod::NoAuth
                };

                Ok((Transition::Reply(encode_method_selection(method).to_vec()), used))
            }
            HandshakeState::AwaitingAuth => {
                let (request, used) = decode_auth_request(buf)?;

                let accepted = self
                    .credentials
                    .as_ref()
                    .is_some_and(|creds| creds.matches(&request));

                if accepted {
                    self.state = HandshakeState::AwaitingCommand;
                    Ok((
                        Transition::Reply(encode_auth_reply(AuthStatus::Success).to_vec()),
                        used,
                    ))
                } else {
                    self.state = HandshakeState::Closed;
                    Ok((
                        Transition::ReplyAndClose(encode_auth_reply(AuthStatus::Failure).to_vec()),
                        used,
                    ))
                }
            }
            HandshakeState::AwaitingCommand => {
                let (request, used) = decode_destination_request(buf)?;
                self.state = HandshakeState::Dispatched;

                Ok((
                    Transition::Dispatch {
                        request: buf[..used].to_vec(),
                        destination: request.destination,
                    },
                    used,
                ))
            }
            HandshakeState::Dispatched | HandshakeState::Closed => {
                Err(Socks5Error::HandshakeFinished)
            }
        }
    }
}

/// Negotiated is a connection ready for the dispatch policy
#[derive(Debug)]
pub struct Negotiated {
    pub request: Vec<u8>,
    pub destination: Destination,
    pub client: ClientConnection,
}

/// negotiate runs the handshake over `client` until a CONNECT request is
/// parsed or the connection has to be closed.
///
/// Frames split across reads are reassembled; bytes that arrive past the end
/// of a frame are kept for the next state, and anything after the CONNECT
/// request ends up in the connection's pending bytes. The connection joins
/// `registry` as soon as the first command-stage bytes arrive, before they
/// are validated. On error the caller drops `client`, which closes it
/// without a reply.
pub async fn negotiate(
    mut client: ClientConnection,
    credentials: Option<Arc<UserPass>>,
    registry: &Arc<ConnectionRegistry>,
) -> Result<Negotiated, Socks5Error> {
    let mut machine = Handshake::new(credentials);
    let mut buf: Vec<u8> = Vec::with_capacity(MAX_FRAME_LEN);
    let mut chunk = [0u8; MAX_FRAME_LEN];

    loop {
        if machine.state() == HandshakeState::AwaitingCommand && !buf.is_empty() {
            client.register(registry);
        }

        match machine.advance(&buf) {
            Ok((transition, used)) => {
                buf.drain(..used);

                match transition {
                    Transition::Reply(reply) => {
                        let stream = client.stream_mut();
                        stream.write_all(&reply).await?;
                        stream.flush().await?;
                        debug!(
                            conn_id = %client.id(),
                            state = ?machine.state(),
                            "handshake advanced"
                        );
                    }
                    Transition::ReplyAndClose(reply) => {
                        let conn_id = client.id();
                        warn!(%conn_id, peer = ?client.peer_addr(), "authentication failed");
                        let stream = client.stream_mut();
                        stream.write_all(&reply).await?;
                        if let Err(e) = stream.shutdown().await {
                            debug!(%conn_id, "shutdown after auth failure: {e}");
                        }
                        return Err(Socks5Error::AuthenticationFailed);
                    }
                    Transition::Dispatch {
                        request,
                        destination,
                    } => {
                        debug!(conn_id = %client.id(), dest = %destination, "CONNECT request");
                        client.set_pending(buf);
                        return Ok(Negotiated {
                            request,
                            destination,
                            client,
                        });
                    }
                }
            }
            Err(e) if e.is_incomplete() => {
                let n = client.stream_mut().read(&mut chunk).await?;
                if n == 0 {
                    return Err(Socks5Error::ConnectionClosed);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            Err(e) => {
                debug!(conn_id = %client.id(), state = ?machine.state(), "handshake rejected: {e}");
                return Err(e);
            }
        }
    }
}
