//! DoH provider table and the HTTP transport each provider needs.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Proxy, Url};

const CLOUDFLARE_URI: &str = "https://cloudflare-dns.com/dns-query";
const GOOGLE_URI: &str = "https://dns.google.com/experimental";
const CLOUDFLARE_TOR_URI: &str =
    "https://dns4torpnlfs2ifuz2s2yf3fc7rdmsbhm6rw75euj35pac6ap25zgqad.onion/dns-query";

/// Local Tor SOCKS port used by `cloudflare-tor`.
pub const TOR_ADDRESS: &str = "127.0.0.1:9050";
const TOR_USERNAME: &str = "doh5";
const TOR_PASSWORD: &str = "doh5";

const MAX_IDLE_CONNS_PER_HOST: usize = 32;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Cloudflare,
    Google,
    CloudflareTor,
    /// No bridge, names go through the system resolver.
    Disabled,
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cloudflare" => Ok(Self::Cloudflare),
            "google" => Ok(Self::Google),
            "cloudflare-tor" => Ok(Self::CloudflareTor),
            "" | "none" => Ok(Self::Disabled),
            other => Err(anyhow!("invalid DoH provider given: {:?}", other)),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cloudflare => "cloudflare",
            Self::Google => "google",
            Self::CloudflareTor => "cloudflare-tor",
            Self::Disabled => "none",
        };
        f.write_str(name)
    }
}

impl Provider {
    /// Endpoint and transport for this provider, `None` when DoH is disabled.
    pub fn config(self) -> Result<Option<ProviderConfig>> {
        let config = match self {
            Self::Cloudflare => ProviderConfig::direct(parse_uri(CLOUDFLARE_URI)?),
            Self::Google => ProviderConfig::direct(parse_uri(GOOGLE_URI)?),
            Self::CloudflareTor => {
                let proxy = TOR_ADDRESS
                    .parse()
                    .with_context(|| format!("bad Tor address {}", TOR_ADDRESS))?;
                ProviderConfig {
                    endpoint: parse_uri(CLOUDFLARE_TOR_URI)?,
                    transport: Transport::Socks5 {
                        proxy,
                        username: TOR_USERNAME.to_string(),
                        password: TOR_PASSWORD.to_string(),
                    },
                }
            }
            Self::Disabled => return Ok(None),
        };
        Ok(Some(config))
    }
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).with_context(|| format!("bad DoH endpoint {}", uri))
}

/// How HTTPS requests reach the DoH endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Direct,
    /// Every connection first goes through a SOCKS5 hop; the proxy resolves
    /// the endpoint's host name itself so onion addresses work.
    Socks5 {
        proxy: SocketAddr,
        username: String,
        password: String,
    },
}

/// Immutable once built, shared by every bridge round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub endpoint: Url,
    pub transport: Transport,
}

impl ProviderConfig {
    pub fn direct(endpoint: Url) -> Self {
        Self {
            endpoint,
            transport: Transport::Direct,
        }
    }

    /// Build the pooled HTTP client for this transport.
    pub fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
            .connect_timeout(CONNECT_TIMEOUT);

        builder = match &self.transport {
            Transport::Direct => builder.no_proxy(),
            Transport::Socks5 {
                proxy,
                username,
                password,
            } => {
                let url = format!("socks5h://{}:{}@{}", username, password, proxy);
                builder.proxy(Proxy::all(&url).context("bad SOCKS5 proxy for DoH transport")?)
            }
        };

        builder.build().context("failed to build DoH HTTP client")
    }
}
