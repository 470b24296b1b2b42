//! Shutdown signalling.
//!
//! The worker holds a [`ShutdownSignal`]; the binary wires it to SIGINT and
//! SIGTERM through [`listen_for_os_signals`]. Once triggered, the in-flight
//! validator is terminated and the remaining units are reported without
//! being run.

use tokio::sync::watch;

/// Receiving half, cloned into whatever needs to observe shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Sending half.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger/signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_trigger, signal) = channel();
        signal
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been triggered; pends forever if the
    /// trigger is dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Fire `trigger` on the first SIGINT or SIGTERM.
pub fn listen_for_os_signals(trigger: ShutdownTrigger) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_os_signal().await;
        tracing::warn!("shutdown signal received, terminating in-flight validator");
        trigger.trigger();
    })
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
