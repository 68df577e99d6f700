//! Outbound TCP connections.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use doh_bridge::Resolve;
use log::debug;
use tokio::net::{TcpSocket, TcpStream};

use crate::socks5::{ConnectRequest, Destination};

/// Covers name resolution and every connection attempt together.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(16);

/// Connects to CONNECT targets from an optional fixed source IP, resolving
/// names through whatever resolver it was built with.
#[derive(Clone)]
pub struct Dialer {
    source: Option<IpAddr>,
    timeout: Duration,
    resolver: Arc<dyn Resolve>,
}

impl Dialer {
    pub fn new(source: Option<IpAddr>, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            source,
            timeout: DIAL_TIMEOUT,
            resolver,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn connect(&self, request: &ConnectRequest) -> io::Result<TcpStream> {
        match tokio::time::timeout(self.timeout, self.connect_inner(request)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dial {} timed out", request),
            )),
        }
    }

    async fn connect_inner(&self, request: &ConnectRequest) -> io::Result<TcpStream> {
        let ips = match &request.destination {
            Destination::Ipv4(ip) => vec![IpAddr::V4(*ip)],
            Destination::Ipv6(ip) => vec![IpAddr::V6(*ip)],
            Destination::Domain(name) => match name.parse::<IpAddr>() {
                Ok(ip) => vec![ip],
                Err(_) => self.resolver.resolve(name).await?,
            },
            Destination::Unsupported(atyp) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported address type {}", atyp),
                ));
            }
        };

        let candidates: Vec<SocketAddr> = ips
            .into_iter()
            .filter(|ip| match self.source {
                Some(source) => source.is_ipv4() == ip.is_ipv4(),
                None => true,
            })
            .map(|ip| SocketAddr::new(ip, request.port))
            .collect();

        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no usable address for {}", request),
        );

        for addr in candidates {
            match self.connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        if let Some(source) = self.source {
            socket.bind(SocketAddr::new(source, 0))?;
        }

        socket.connect(addr).await
    }
}
