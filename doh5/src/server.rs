//! Accept loop: one task per client connection.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::config::ListenAddr;
use crate::dial::Dialer;
use crate::relay::relay;
use crate::socks5;

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(unix::UnixSocket),
}

impl Listener {
    pub async fn bind(addr: &ListenAddr) -> Result<Self> {
        match addr {
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str())
                    .await
                    .with_context(|| format!("failed to listen on {}", addr))?;
                Ok(Self::Tcp(listener))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => Ok(Self::Unix(unix::UnixSocket::bind(path)?)),
            #[cfg(not(unix))]
            ListenAddr::Unix(path) => Err(anyhow::anyhow!(
                "unix sockets are not supported here: {}",
                path.display()
            )),
        }
    }

    /// Bound address of a TCP listener.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => addr.fmt(f),
                Err(_) => f.write_str("<unknown>"),
            },
            #[cfg(unix)]
            Self::Unix(socket) => write!(f, "unix:{}", socket.path().display()),
        }
    }
}

pub struct Server {
    listener: Listener,
    dialer: Arc<Dialer>,
}

impl Server {
    pub fn new(listener: Listener, dialer: Dialer) -> Self {
        Self {
            listener,
            dialer: Arc::new(dialer),
        }
    }

    /// Accept until `shutdown` completes or the listener fails for good.
    ///
    /// Connections already being served are not affected by shutdown.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("no longer accepting connections");
                    return Ok(());
                }
                res = self.accept_one() => match res {
                    Ok(()) => {}
                    Err(e) if is_transient(&e) => error!("accept error: {}", e),
                    Err(e) => return Err(e).context("accept failed"),
                }
            }
        }
    }

    async fn accept_one(&self) -> io::Result<()> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!("new connection from {}", peer);
                tokio::spawn(handle_connection(stream, self.dialer.clone()));
            }
            #[cfg(unix)]
            Listener::Unix(socket) => {
                let (stream, _) = socket.listener().accept().await?;
                tokio::spawn(handle_connection(stream, self.dialer.clone()));
            }
        }
        Ok(())
    }
}

/// Negotiate, then relay. Any failure just closes the client.
pub async fn handle_connection<S>(mut client: S, dialer: Arc<Dialer>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let outbound = match socks5::negotiate(&mut client, &dialer).await {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };

    relay(client, outbound).await;
}

/// Accept errors that say nothing about the listener itself.
fn is_transient(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        // ENFILE, EMFILE
        if matches!(e.raw_os_error(), Some(23) | Some(24)) {
            return true;
        }
    }

    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

#[cfg(unix)]
pub mod unix {
    use std::path::{Path, PathBuf};

    use anyhow::{Context, Result};
    use tokio::net::UnixListener;

    /// Unix listener that removes its socket file when dropped.
    pub struct UnixSocket {
        listener: UnixListener,
        path: PathBuf,
    }

    impl UnixSocket {
        pub fn bind(path: &Path) -> Result<Self> {
            let listener = UnixListener::bind(path)
                .with_context(|| format!("failed to listen on {}", path.display()))?;
            Ok(Self {
                listener,
                path: path.to_path_buf(),
            })
        }

        pub fn listener(&self) -> &UnixListener {
            &self.listener
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for UnixSocket {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
