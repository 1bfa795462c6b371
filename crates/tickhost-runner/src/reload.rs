use tokio::sync::watch;
use tracing::info;

/// Watch a reload counter that goes up every time SIGUSR2 arrives
///
/// Must be called from inside a tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal() -> watch::Receiver<u64> {
    let (reload_tx, reload_rx) = watch::channel(0);

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2 - triggering script reload");
            reload_tx.send_modify(|generation| *generation += 1);
            if reload_tx.is_closed() {
                info!(target: "scripting", "Reload receiver dropped, stopping SIGUSR2 handler");
                break;
            }
        }
    });

    reload_rx
}

/// Non-Unix platforms have no SIGUSR2; the counter never moves
#[cfg(not(unix))]
pub fn setup_reload_signal() -> watch::Receiver<u64> {
    let (reload_tx, reload_rx) = watch::channel(0);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    // keep the sender alive so changed() stays pending
    std::mem::forget(reload_tx);
    reload_rx
}
