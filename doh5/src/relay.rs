//! Byte shuttling between a negotiated client and its destination.

use log::debug;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

/// Copy both ways until either direction ends, then close both legs.
///
/// Client to destination runs in its own task; destination to client runs
/// here. Whichever finishes first takes the other one down with it.
pub async fn relay<C, D>(client: C, outbound: D)
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = io::split(client);
    let (mut outbound_read, mut outbound_write) = io::split(outbound);
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let upstream = tokio::spawn(async move {
        let res = io::copy(&mut client_read, &mut outbound_write).await;
        let _ = outbound_write.shutdown().await;
        debug!("client to destination finished: {:?}", res);
        let _ = done_tx.send(());
    });

    tokio::select! {
        res = io::copy(&mut outbound_read, &mut client_write) => {
            debug!("destination to client finished: {:?}", res);
            let _ = client_write.shutdown().await;
            upstream.abort();
        }
        _ = done_rx => {}
    }
}
