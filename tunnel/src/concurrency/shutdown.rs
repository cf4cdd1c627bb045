//! Broadcast interrupt signal for poll loops.
//!
//! A single [`ShutdownTx`] can be subscribed to any number of times. Every [`ShutdownRx`]
//! subscribed before a signal observes it once; receivers created afterwards do not.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// Result of an operation that may be cut short by a shutdown signal.
#[derive(Debug, PartialEq, Eq)]
pub enum ShutdownResult<T, I> {
    /// The operation completed.
    Ok(T),
    /// Shutdown was signalled first; carries whatever was produced so far.
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    /// Returns `true` when the operation was interrupted by shutdown.
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

/// Sending side of the shutdown channel.
///
/// Wraps a payload-less watch sender, like the coordination signals shared by pipeline
/// workers. Every call to [`ShutdownTx::shutdown`] is a new signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Interrupts the current or next wait of every subscribed receiver.
    pub fn shutdown(&self) {
        self.0.send_replace(());
    }

    /// Creates a new receiver that observes signals sent from now on.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown channel.
///
/// A signal is consumed by the wait that observes it. Later waits on the same receiver run
/// normally until the next signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<()>);

impl ShutdownRx {
    /// Returns `true` if a signal was sent that this receiver has not consumed yet.
    pub fn is_shutdown(&self) -> bool {
        self.0.has_changed().unwrap_or(false)
    }

    /// Completes once a signal is pending and consumes it.
    ///
    /// Never completes if every [`ShutdownTx`] is dropped without signalling.
    pub async fn wait_for_shutdown(&mut self) {
        if self.0.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration` unless a signal is pending or arrives first.
    pub async fn sleep(&mut self, duration: Duration) -> ShutdownResult<(), ()> {
        tokio::select! {
            biased;

            _ = self.wait_for_shutdown() => ShutdownResult::Shutdown(()),
            _ = sleep(duration) => ShutdownResult::Ok(()),
        }
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), ShutdownRx(rx))
}
