//! Error types for the SOCKS5 handshake
//!
//! Every failure maps onto one of three kinds: a protocol violation by the
//! client, a credential mismatch, or a transport error on a socket.

use std::io;
use thiserror::Error;

/// Broad classification of a [`Socks5Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unexpected bytes at some handshake stage
    ProtocolViolation,
    /// Username/password did not match the configured pair
    AuthenticationFailure,
    /// Read, write or connect failure on either socket
    Transport,
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum Socks5Error {
    /// The buffered bytes do not hold a whole message yet
    #[error("incomplete frame")]
    Incomplete,

    /// Unsupported SOCKS version
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Greeting advertised zero methods
    #[error("client offered no authentication methods")]
    NoMethods,

    /// Username/password sub-negotiation version was not 0x01
    #[error("unsupported sub-negotiation version: {0:#04x}")]
    UnsupportedSubnegotiation(u8),

    /// Command other than CONNECT
    #[error("command not supported: {0:#04x}")]
    CommandNotSupported(u8),

    /// RSV byte was not 0x00
    #[error("reserved byte must be zero, got {0:#04x}")]
    InvalidReserved(u8),

    /// Address type not supported
    #[error("address type not supported: {0:#04x}")]
    AddressTypeNotSupported(u8),

    /// Domain name of length zero
    #[error("empty domain name")]
    EmptyDomain,

    /// Domain name was not valid UTF-8
    #[error("invalid {field}: not UTF-8")]
    InvalidString { field: &'static str },

    /// A frame arrived after the handshake had already ended
    #[error("handshake already finished")]
    HandshakeFinished,

    /// Credentials did not match
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Peer closed the stream before a frame completed
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Socks5Error {
    /// kind classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Socks5Error::AuthenticationFailed => ErrorKind::AuthenticationFailure,
            Socks5Error::Io(_) | Socks5Error::ConnectionClosed => ErrorKind::Transport,
            _ => ErrorKind::ProtocolViolation,
        }
    }

    /// is_incomplete is true when more bytes are needed to decode
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Socks5Error::Incomplete)
    }
}
