//! Shutdown signal sources.

use tokio::signal::unix::{Signal, SignalKind, signal};

/// The four signals that trigger a graceful shutdown.
pub(crate) struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
    user: Signal,
    hangup: Signal,
}

impl ShutdownSignals {
    pub(crate) fn new() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            user: signal(SignalKind::user_defined1())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for any shutdown signal.
    pub(crate) async fn recv(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
            _ = self.user.recv() => {}
            _ = self.hangup.recv() => {}
        }
    }
}
