//! Ctrl+C / SIGTERM / SIGHUP handling.
//!
//! The first signal cancels the crawl token: the item in flight finishes or
//! is abandoned at its next cancellation point, and the run is recorded. A
//! second signal exits immediately with status 130.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[cfg(unix)]
struct Signals {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = self.terminate.recv() => {}
            _ = self.hangup.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Ctrl+C listener failed: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

/// Spawn the signal listener and return the token it cancels.
///
/// Fails only if the OS refuses to register a handler.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let mut signals = Signals::register()?;
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            signals.recv().await;
            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::info!("Shutdown requested, finishing the current item...");
                tracing::info!("Press Ctrl+C again to exit immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("Forced exit");
                std::process::exit(130);
            }
        }
    });

    Ok(token)
}
