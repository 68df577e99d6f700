//! SOCKS5 proxy whose outbound name lookups travel over DNS-over-HTTPS.

pub mod config;
pub mod dial;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod socks5;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use doh_bridge::{Resolve, ResolverBridge, SystemResolver};
use log::{info, LevelFilter};

pub use config::{Config, ListenAddr};
pub use dial::Dialer;
pub use server::{Listener, Server};

/// Start the DoH bridge (unless disabled) and serve SOCKS5 until `shutdown`
/// completes.
pub async fn run<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = Listener::bind(&config.listen).await?;
    let resolver = start_resolver(&config).await?;

    let source = match config.source {
        Some(ip) => ip.to_string(),
        None => "the default source address".to_string(),
    };
    info!(
        "SOCKS5 server listening on {} with outgoing connections via {}",
        listener, source
    );

    if config.quiet {
        info!("quiet mode enabled");
        log::set_max_level(LevelFilter::Off);
    }

    let dialer = Dialer::new(config.source, resolver);
    Server::new(listener, dialer).run(shutdown).await
}

/// The resolver every outbound dial will use.
pub async fn start_resolver(config: &Config) -> Result<Arc<dyn Resolve>> {
    match ResolverBridge::for_provider(config.provider).await? {
        Some(bridge) => {
            let resolver = bridge.resolver()?;
            bridge.start();
            Ok(Arc::new(resolver))
        }
        None => Ok(Arc::new(SystemResolver)),
    }
}
