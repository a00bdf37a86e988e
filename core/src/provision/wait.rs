//! The two polling points of a provisioning run.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::error::{Error, Result};

/// Calls `probe` every `interval` until it reports success or `limit` has
/// elapsed. The probe always runs at least once.
pub async fn poll_until<F, Fut>(what: &str, limit: Duration, interval: Duration, mut probe: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = Instant::now();
    let mut attempt = 1u32;

    loop {
        if probe().await {
            debug!("{what} ready after {attempt} attempt(s)");
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed >= limit {
            return Err(Error::Timeout {
                what: what.to_string(),
                waited: limit,
            });
        }

        debug!("Waiting for {what} (attempt {attempt})");
        sleep(interval.min(limit - elapsed)).await;
        attempt += 1;
    }
}

/// Waits until `host:port` accepts TCP connections.
pub async fn await_port(host: &str, port: u16, limit: Duration, interval: Duration) -> Result<()> {
    let addr = format!("{host}:{port}");
    let connect_timeout = interval.max(Duration::from_millis(250));
    let what = format!("runtime API on {addr}");

    poll_until(&what, limit, interval, || {
        let addr = addr.clone();
        async move {
            matches!(timeout(connect_timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
        }
    })
    .await
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
