//! Name resolution strategies handed to the outbound dialer.

use std::io;
use std::net::{IpAddr, SocketAddr};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};

/// Turns a host name into candidate addresses.
///
/// The dialer only ever sees this trait, so which resolver answers is decided
/// by whoever builds the dialer.
pub trait Resolve: Send + Sync {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>>;
}

/// The host's own resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        async move {
            let addrs = tokio::net::lookup_host((host, 0)).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        }
        .boxed()
    }
}

/// Sends every query to a fixed local UDP address, whatever name server the
/// system is configured with.
pub struct BridgeResolver {
    server: SocketAddr,
    resolver: TokioAsyncResolver,
}

impl BridgeResolver {
    pub fn new(server: SocketAddr) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(server, Protocol::Udp));

        let mut opts = ResolverOpts::default();
        // The bridge does no caching and neither should we.
        opts.cache_size = 0;
        // Both families, so a source-bound dialer can still pick its own.
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

        Self {
            server,
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

impl Resolve for BridgeResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        async move {
            let lookup = self
                .resolver
                .lookup_ip(host)
                .await
                .map_err(|e| io::Error::other(format!("lookup {} failed: {}", host, e)))?;
            Ok(lookup.iter().collect())
        }
        .boxed()
    }
}
