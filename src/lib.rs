//! A small SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT to IPv4, IPv6 and domain-name destinations
//!     - No Authentication
//!     - Username/Password Authentication
//!     - Pluggable dispatch policy once a request has been parsed
//!     - Registry of live connections, owned by each server
//!     - Async using tokio, one task per client
//! - Not supported: BIND, UDP ASSOCIATE, GSSAPI
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! Replies to a CONNECT request echo the request bytes with only the REP
//! field changed, and the sub-negotiation reply carries version 0x05.
//!
//! # Example
//! ```no_run
//! use socks5_relay::{Socks5Server, UserPass};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Socks5Server::new("127.0.0.1:1080")
//!         .with_auth(Some(UserPass::new("alice", "secret")));
//!     server.run().await
//! }
//! ```

pub mod auth;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod registry;
pub mod server;

// Re-export main types at crate root for convenience
pub use auth::UserPass;
pub use codec::{Destination, DestinationRequest};
pub use dispatch::{BridgeDispatch, ClientConnection, ProxyDispatch};
pub use error::{ErrorKind, Socks5Error};
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use server::Socks5Server;
