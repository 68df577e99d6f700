//! SOCKS5 negotiation, CONNECT only, no authentication.
//!
//! The exchange runs strictly in order, and any step can end it:
//! greeting header, auth methods, method reply, request header, address,
//! port, dial, connect reply. A failure closes the connection without
//! telling the client why. That includes dial failures, which get no
//! failure reply either.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use log::info;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::dial::Dialer;

pub const SOCKS_VERSION: u8 = 0x05;
pub const NO_AUTHENTICATION: u8 = 0x00;
pub const CONNECT_COMMAND: u8 = 0x01;
pub const IPV4_ADDRESS: u8 = 0x01;
pub const DOMAIN_NAME: u8 = 0x03;
pub const IPV6_ADDRESS: u8 = 0x04;

/// Sent on every successful CONNECT. The bound address is always reported
/// as 0.0.0.0:0.
pub const SUCCESS_REPLY: [u8; 10] = [
    SOCKS_VERSION,
    0x00, // succeeded
    0x00, // reserved
    IPV4_ADDRESS,
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

#[derive(Debug)]
pub enum SocksError {
    Io(io::Error),
    BadVersion(u8),
    NoAcceptableMethod,
    BadRequestVersion(u8),
    UnsupportedCommand(u8),
    Dial { target: String, error: io::Error },
}

impl fmt::Display for SocksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => error.fmt(f),
            Self::BadVersion(ver) => write!(f, "bad socks version: {}", ver),
            Self::NoAcceptableMethod => write!(f, "no supported methods found"),
            Self::BadRequestVersion(ver) => write!(f, "bad socks version in request: {}", ver),
            Self::UnsupportedCommand(cmd) => write!(f, "unsupported socks command: {}", cmd),
            Self::Dial { target, error } => write!(f, "dial {} failed: {}", target, error),
        }
    }
}

impl std::error::Error for SocksError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(error) | Self::Dial { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for SocksError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Where the client wants to go, as it was encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
    /// Unknown address type; nothing can be dialed.
    Unsupported(u8),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => ip.fmt(f),
            Self::Domain(name) => f.write_str(name),
            Self::Ipv6(ip) => ip.fmt(f),
            Self::Unsupported(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub destination: Destination,
    pub port: u16,
}

/// `host:port`, with IPv6 hosts in brackets.
impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Destination::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            other => write!(f, "{}:{}", other, self.port),
        }
    }
}

/// Run the whole negotiation on `client` and hand back the connected
/// outbound stream once the success reply has been written.
pub async fn negotiate<S>(client: &mut S, dialer: &Dialer) -> Result<TcpStream, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    handle_handshake(client).await?;
    let request = read_request(client).await?;

    info!("-> {} . {}", request.destination, request.port);

    let outbound = dialer
        .connect(&request)
        .await
        .map_err(|error| SocksError::Dial {
            target: request.to_string(),
            error,
        })?;

    // On error `outbound` is dropped here, closing it.
    client.write_all(&SUCCESS_REPLY).await?;
    Ok(outbound)
}

/// Read the greeting and answer with "no authentication".
pub async fn handle_handshake<S>(client: &mut S) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut buf = [0u8; 2];
    client.read_exact(&mut buf).await?;

    let version = buf[0];
    let nmethods = buf[1];

    if version != SOCKS_VERSION {
        return Err(SocksError::BadVersion(version));
    }

    let mut methods = vec![0u8; nmethods as usize];
    client.read_exact(&mut methods).await?;

    if !methods.contains(&NO_AUTHENTICATION) {
        return Err(SocksError::NoAcceptableMethod);
    }

    client.write_all(&[SOCKS_VERSION, NO_AUTHENTICATION]).await?;
    Ok(())
}

/// Read a CONNECT request. Name resolution is left to the dialer.
pub async fn read_request<R>(client: &mut R) -> Result<ConnectRequest, SocksError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await?;

    let version = buf[0];
    let command = buf[1];
    let _reserved = buf[2];
    let address_type = buf[3];

    if version != SOCKS_VERSION {
        return Err(SocksError::BadRequestVersion(version));
    }

    if command != CONNECT_COMMAND {
        return Err(SocksError::UnsupportedCommand(command));
    }

    let destination = match address_type {
        IPV4_ADDRESS => {
            let mut octets = [0u8; 4];
            client.read_exact(&mut octets).await?;
            Destination::Ipv4(Ipv4Addr::from(octets))
        }
        DOMAIN_NAME => {
            let len = client.read_u8().await?;
            let mut name = vec![0u8; len as usize];
            client.read_exact(&mut name).await?;
            Destination::Domain(String::from_utf8_lossy(&name).into_owned())
        }
        IPV6_ADDRESS => {
            let mut octets = [0u8; 16];
            client.read_exact(&mut octets).await?;
            Destination::Ipv6(Ipv6Addr::from(octets))
        }
        other => Destination::Unsupported(other),
    };

    let port = client.read_u16().await?;

    Ok(ConnectRequest { destination, port })
}
