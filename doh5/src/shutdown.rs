use std::time::Duration;

use log::{error, warn};
use tokio::signal;

/// How long a second Ctrl-C counts as confirming the first.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(10);

/// Resolves on the second Ctrl-C if it arrives within `CONFIRM_WINDOW` of
/// the first. A lone Ctrl-C only logs a warning.
pub async fn double_ctrl_c() {
    loop {
        if let Err(e) = signal::ctrl_c().await {
            error!("unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        warn!("Caught interrupt. Send again within {}s to exit!", CONFIRM_WINDOW.as_secs());

        if tokio::time::timeout(CONFIRM_WINDOW, signal::ctrl_c()).await.is_ok() {
            warn!("Exiting after second interrupt");
            return;
        }
    }
}
