//! UDP to DNS-over-HTTPS bridge.
//!
//! A local UDP socket that looks like an ordinary DNS server. Every datagram
//! it receives is POSTed to the DoH endpoint as-is and the HTTP response body
//! is sent back to whoever asked. Datagrams are handled independently; the
//! only shared state is the socket and the HTTP client's connection pool.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use log::{debug, info, warn};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::provider::{Provider, ProviderConfig};
use crate::resolve::BridgeResolver;

/// Largest datagram the bridge accepts.
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Media type for both directions of a DoH exchange.
pub const DNS_WIRE_FORMAT: &str = "application/dns-udpwireformat";

const BIND_ADDR: &str = "127.0.0.1:0";

pub struct ResolverBridge {
    socket: Arc<UdpSocket>,
    endpoint: Url,
    client: Client,
}

impl ResolverBridge {
    /// Bridge for a named provider, or `None` when DoH is disabled and the
    /// system resolver should be used unmodified.
    pub async fn from_provider(name: &str) -> Result<Option<Self>> {
        let provider: Provider = name.parse()?;
        Self::for_provider(provider).await
    }

    pub async fn for_provider(provider: Provider) -> Result<Option<Self>> {
        let Some(config) = provider.config()? else {
            info!("DoH disabled. Using system resolver for DNS");
            return Ok(None);
        };

        info!("using DoH provider {} ({})", provider, config.endpoint);
        Self::bind(config).await.map(Some)
    }

    /// Bind the local socket on an ephemeral loopback port.
    pub async fn bind(config: ProviderConfig) -> Result<Self> {
        let client = config.build_client()?;
        let socket = UdpSocket::bind(BIND_ADDR)
            .await
            .context("failed to bind DoH bridge socket")?;

        Ok(Self {
            socket: Arc::new(socket),
            endpoint: config.endpoint,
            client,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// A resolver that sends every query to this bridge.
    pub fn resolver(&self) -> io::Result<BridgeResolver> {
        Ok(BridgeResolver::new(self.local_addr()?))
    }

    /// Spawn the receive loop. It runs until the runtime shuts down.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, self.endpoint, self.client))
    }
}

async fn run(socket: Arc<UdpSocket>, endpoint: Url, client: Client) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("DoH bridge recv error: {}", e);
                continue;
            }
        };

        let query = Bytes::copy_from_slice(&buf[..len]);
        let socket = socket.clone();
        let endpoint = endpoint.clone();
        let client = client.clone();

        tokio::spawn(async move {
            if let Err(e) = forward_query(&socket, &client, endpoint, query, src).await {
                warn!("DoH query from {} dropped: {:#}", src, e);
            }
        });
    }
}

/// One round trip: POST the query, send the answer back to `src`.
async fn forward_query(
    socket: &UdpSocket,
    client: &Client,
    endpoint: Url,
    query: Bytes,
    src: SocketAddr,
) -> Result<()> {
    let query_len = query.len();
    let response = client
        .post(endpoint)
        .header(ACCEPT, DNS_WIRE_FORMAT)
        .header(CONTENT_TYPE, DNS_WIRE_FORMAT)
        .body(query)
        .send()
        .await
        .context("DoH request failed")?;

    let status = response.status();
    if !status.is_success() {
        return Err(anyhow!("DoH server answered {}", status));
    }

    let answer = response
        .bytes()
        .await
        .context("failed to read DoH response")?;

    socket
        .send_to(&answer, src)
        .await
        .context("failed to write DNS answer")?;

    debug!(
        "DoH round trip for {}: {} bytes out, {} bytes back",
        src,
        query_len,
        answer.len()
    );
    Ok(())
}
