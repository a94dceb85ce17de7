//! Bridges OS termination signals to application shutdown.
//!
//! SIGHUP, SIGINT, SIGTERM and SIGQUIT all trigger the same shutdown path as
//! [`AppContext::shutdown`], with the signal name as the reason. SIGKILL
//! cannot be intercepted.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::app::AppContext;

/// Spawn a task that shuts `app` down on the first termination signal.
///
/// The task ends on its own once the root lifetime is cancelled.
pub(crate) fn spawn_signal_bridge(app: Arc<AppContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = wait_for_signal() => {
                if let Some(name) = signal {
                    info!(signal = name, "Received signal");
                    app.shutdown(format!("system signal: {name}"));
                }
            }
            _ = app.token().cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::warn;

    let kinds = [
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::quit(), "SIGQUIT"),
    ];
    let mut streams = Vec::with_capacity(kinds.len());
    for (kind, name) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => warn!(signal = name, error = %e, "Failed to install signal handler"),
        }
    }
    if streams.is_empty() {
        return None;
    }

    let waits = streams.iter_mut().map(|(stream, name)| {
        let name: &'static str = *name;
        Box::pin(async move {
            stream.recv().await;
            name
        })
    });
    let (name, _, _) = futures::future::select_all(waits).await;
    Some(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<&'static str> {
    match tokio::signal::ctrl_c().await {
        Ok(()) => Some("SIGINT"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install ctrl-c handler");
            None
        }
    }
}
