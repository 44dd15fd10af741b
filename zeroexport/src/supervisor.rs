use log::{error, warn};
use std::future::Future;
use std::time::Duration;

/// Keeps the control loop alive forever.
///
/// `start` builds a fresh loop for every incarnation. Whatever ends it, an
/// error or a panic, is logged and the loop is rebuilt from scratch after
/// `restart_delay`.
pub async fn supervise<F, Fut>(mut start: F, restart_delay: Duration)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    loop {
        match tokio::spawn(start()).await {
            Ok(Ok(())) => warn!("control loop returned, restarting"),
            Ok(Err(e)) => error!("control loop ran into an error: {e:#}"),
            Err(e) => error!("control loop aborted: {e}"),
        }
        warn!("plowing on, restarting in {:.1} s", restart_delay.as_secs_f64());
        tokio::time::sleep(restart_delay).await;
    }
}
