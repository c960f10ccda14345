//! Encoding and decoding of every SOCKS5 message shape.
//!
//! All functions here are pure: decoders take the bytes buffered so far and
//! return the parsed message together with the number of bytes it occupied.
//! When the buffer ends before the message does they return
//! [`Socks5Error::Incomplete`]; any byte that can already be judged invalid is
//! rejected straight away, even if the rest of the message has not arrived.

use crate::error::Socks5Error;
use crate::protocol::{
    AddressType, AuthMethod, AuthStatus, Command, RSV, ReplyCode, SUBNEGOTIATION_VERSION, Version,
};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

type Result<T> = std::result::Result<T, Socks5Error>;

/// Greeting is the first client frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub version: u8,
    pub methods: Vec<u8>,
}

/// AuthRequest is the client half of the username/password sub-negotiation.
/// Credentials stay raw bytes; bytes that are not UTF-8 simply fail to match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub version: u8,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// Destination is the target a client asked to be connected to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address_type: AddressType,
    /// Dotted quad, raw domain name, or IPv6 literal
    pub address: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address_type {
            AddressType::IPv6 => write!(f, "[{}]:{}", self.address, self.port),
            _ => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// DestinationRequest is a fully decoded CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRequest {
    pub version: u8,
    pub command: Command,
    pub reserved: u8,
    pub destination: Destination,
}

/// Cursor walks a frame, failing with Incomplete when it runs off the end
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = *self.buf.get(self.pos).ok_or(Socks5Error::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let bytes = self.buf.get(self.pos..end).ok_or(Socks5Error::Incomplete)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u16_be(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self, len: usize, field: &'static str) -> Result<String> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Socks5Error::InvalidString { field })
    }
}

fn expect_socks5(cursor: &mut Cursor<'_>) -> Result<u8> {
    let version = cursor.u8()?;
    if version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::UnsupportedVersion(version));
    }
    Ok(version)
}

/// decode_greeting parses the client hello
pub fn decode_greeting(buf: &[u8]) -> Result<(Greeting, usize)> {
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+
    let mut cursor = Cursor::new(buf);
    let version = expect_socks5(&mut cursor)?;

    let n_methods = cursor.u8()?;
    if n_methods == 0 {
        return Err(Socks5Error::NoMethods);
    }

    let methods = cursor.take(n_methods as usize)?.to_vec();

    Ok((Greeting { version, methods }, cursor.pos))
}

/// encode_method_selection builds the server's method choice
pub fn encode_method_selection(method: AuthMethod) -> [u8; 2] {
    [Version::SOCKS5 as u8, method as u8]
}

/// decode_auth_request parses a username/password request.
/// Both length fields are checked against the buffer before use
pub fn decode_auth_request(buf: &[u8]) -> Result<(AuthRequest, usize)> {
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+
    let mut cursor = Cursor::new(buf);

    let version = cursor.u8()?;
    if version != SUBNEGOTIATION_VERSION {
        return Err(Socks5Error::UnsupportedSubnegotiation(version));
    }

    let username_len = cursor.u8()? as usize;
    let username = cursor.take(username_len)?.to_vec();
    let password_len = cursor.u8()? as usize;
    let password = cursor.take(password_len)?.to_vec();

    Ok((
        AuthRequest {
            version,
            username,
            password,
        },
        cursor.pos,
    ))
}

/// encode_auth_reply builds the sub-negotiation reply. The version byte is
/// 0x05, which is what existing clients of this server expect
pub fn encode_auth_reply(status: AuthStatus) -> [u8; 2] {
    [Version::SOCKS5 as u8, status as u8]
}

/// decode_destination_request parses a CONNECT request
pub fn decode_destination_request(buf: &[u8]) -> Result<(DestinationRequest, usize)> {
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut cursor = Cursor::new(buf);
    let version = expect_socks5(&mut cursor)?;

    let cmd = cursor.u8()?;
    let command = match Command::from_byte(cmd) {
        Some(Command::Connect) => Command::Connect,
        _ => return Err(Socks5Error::CommandNotSupported(cmd)),
    };

    let reserved = cursor.u8()?;
    if reserved != RSV {
        return Err(Socks5Error::InvalidReserved(reserved));
    }

    let atyp = cursor.u8()?;
    let address_type =
        AddressType::from_byte(atyp).ok_or(Socks5Error::AddressTypeNotSupported(atyp))?;

    let address = match address_type {
        AddressType::IPv4 => {
            let octets: [u8; 4] = cursor
                .take(4)?
                .try_into()
                .map_err(|_| Socks5Error::Incomplete)?;
            Ipv4Addr::from(octets).to_string()
        }
        AddressType::DomainName => {
            // First octet holds the number of octets to follow
            let len = cursor.u8()? as usize;
            if len == 0 {
                return Err(Socks5Error::EmptyDomain);
            }
            cursor.string(len, "domain")?
        }
        AddressType::IPv6 => {
            let octets: [u8; 16] = cursor
                .take(16)?
                .try_into()
                .map_err(|_| Socks5Error::Incomplete)?;
            Ipv6Addr::from(octets).to_string()
        }
    };

    let port = cursor.u16_be()?;

    Ok((
        DestinationRequest {
            version,
            command,
            reserved,
            destination: Destination {
                address_type,
                address,
                port,
            },
        },
        cursor.pos,
    ))
}

/// encode_reply echoes the original request with the REP byte replaced.
/// BND.ADDR and BND.PORT are therefore the requested destination, not the
/// address the server bound
pub fn encode_reply(original: &[u8], code: ReplyCode) -> Vec<u8> {
    let mut reply = original.to_vec();
    if let Some(rep) = reply.get_mut(1) {
        *rep = code as u8;
    }
    reply
}
