use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use doh_bridge::Provider;

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Everything the proxy needs, built once before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: ListenAddr,
    /// Source IP for outgoing connections, `None` lets the OS choose.
    pub source: Option<IpAddr>,
    pub provider: Provider,
    /// Stop logging once the startup line has been written.
    pub quiet: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// `host:port`, resolved when the listener binds.
    Tcp(String),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Parse `[address:]port`. A bare port listens on 127.0.0.1.
pub fn parse_listen_addr(arg: &str) -> Result<ListenAddr> {
    let (host, port) = match arg.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => (DEFAULT_LISTEN_HOST, arg),
    };

    let port: u16 = port
        .parse()
        .with_context(|| format!("bad listen port in {:?}", arg))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { DEFAULT_LISTEN_HOST } else { host };

    let addr = if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    };
    Ok(ListenAddr::Tcp(addr))
}

/// Parse the outgoing source IP; an empty string means unset.
pub fn parse_source(arg: &str) -> Result<Option<IpAddr>> {
    if arg.is_empty() {
        return Ok(None);
    }
    let ip = arg
        .parse()
        .with_context(|| format!("bad source address {:?}", arg))?;
    Ok(Some(ip))
}
