use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use doh_bridge::Provider;
use env_logger::Env;

use doh5::config::{self, Config, ListenAddr};
use doh5::shutdown;

#[derive(Parser)]
#[command(name = "doh5")]
#[command(about = "SOCKS5 server that resolves names over DNS-over-HTTPS")]
struct Args {
    /// [address:]port to listen and serve on
    #[arg(short = 'D', default_value = "127.0.0.1:1080")]
    listen: String,

    /// Unix domain socket file to listen and serve on
    #[arg(short = 'U')]
    unix: Option<PathBuf>,

    /// Source IP to bind to for outgoing connections
    #[arg(short = 's', default_value = "")]
    source: String,

    /// Enable quiet mode
    #[arg(short = 'q')]
    quiet: bool,

    /// DoH service to use: cloudflare, google, cloudflare-tor, or none
    #[arg(short = 'r', default_value = "cloudflare")]
    resolver: String,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        let listen = match self.unix {
            Some(path) => ListenAddr::Unix(path),
            None => config::parse_listen_addr(&self.listen)?,
        };
        let provider: Provider = self.resolver.parse()?;

        Ok(Config {
            listen,
            source: config::parse_source(&self.source)?,
            provider,
            quiet: self.quiet,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let config = Args::parse().into_config()?;

    if let ListenAddr::Unix(path) = &config.listen {
        confirm_stale_socket(path)?;
    }

    doh5::run(config, shutdown::double_ctrl_c()).await
}

/// Offer to remove a leftover socket file before binding over it.
fn confirm_stale_socket(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    print!("warning: file {} exists. OK to remove? [y] ", path.display());
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim();

    if answer.is_empty() || answer.starts_with(['y', 'Y']) {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}
