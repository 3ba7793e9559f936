use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown request broadcast by the [`Controller`] to all services.
///
/// A service has to ensure that it doesn't take longer than `timeout` to finish. Ideally, open
/// work is completed in an orderly manner but no new requests are accepted anymore.
///
/// After the timeout the system shuts down regardless of what the services do.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// The timeout for this shutdown. `None` indicates an immediate forced shutdown.
    pub timeout: Option<Duration>,
}

/// Notifies a service about an upcoming shutdown.
///
/// Obtained from [`Controller::handle`]. The handle can be cloned freely and moved into tasks.
#[derive(Clone, Debug)]
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Returns the pending shutdown, if one was requested.
    pub fn get(&self) -> Option<Shutdown> {
        *self.0.borrow()
    }

    /// Wait for a shutdown.
    ///
    /// Resolves immediately if a shutdown was already requested, including one requested before
    /// this handle was created. This function is cancellation safe, so it can be polled inside
    /// `tokio::select!` loops.
    ///
    /// If the [`Controller`] is dropped without requesting a shutdown, the future never resolves.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }

    /// Wait for a shutdown that has to complete immediately.
    ///
    /// Graceful shutdowns are skipped. This resolves once a forced shutdown follows, for example
    /// after a second signal.
    pub async fn forced(&mut self) {
        loop {
            if self.notified().await.timeout.is_none() {
                return;
            }

            if self.0.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Controls the lifecycle of the server.
///
/// The controller broadcasts a [`Shutdown`] to every [`ShutdownHandle`] created from it. The
/// shutdown can be triggered programmatically with [`shutdown`](Self::shutdown), or from process
/// signals with [`listen_signals`](Self::listen_signals).
///
/// ### Example
///
/// ```
/// use std::time::Duration;
/// use tally_system::Controller;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new();
/// let mut shutdown = controller.handle();
///
/// let service = tokio::spawn(async move {
///     let message = shutdown.notified().await;
///     message.timeout
/// });
///
/// controller.shutdown(Some(Duration::from_secs(10)));
/// assert_eq!(service.await.unwrap(), Some(Duration::from_secs(10)));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Controller {
    tx: Arc<watch::Sender<Option<Shutdown>>>,
}

impl Controller {
    /// Creates a new controller without a pending shutdown.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns a [handle](ShutdownHandle) to receive the shutdown notification.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.tx.subscribe())
    }

    /// Requests a shutdown of all services.
    ///
    /// A later call replaces an earlier one, which allows to escalate a graceful shutdown into an
    /// immediate one.
    pub fn shutdown(&self, timeout: Option<Duration>) {
        self.tx.send_replace(Some(Shutdown { timeout }));
    }

    /// Returns `true` if a shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Maps process signals to shutdowns until the signal streams end.
    ///
    /// `SIGINT` and `SIGQUIT` request an immediate shutdown. `SIGTERM` requests a graceful
    /// shutdown with the given `timeout`. Signals keep being handled after the first one, so a
    /// second `SIGINT` forces a pending graceful shutdown.
    ///
    /// Fails if the signal handlers cannot be registered.
    #[cfg(unix)]
    pub async fn listen_signals(&self, timeout: Duration) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sig_int = signal(SignalKind::interrupt())?;
        let mut sig_quit = signal(SignalKind::quit())?;
        let mut sig_term = signal(SignalKind::terminate())?;

        loop {
            let timeout = tokio::select! {
                Some(()) = sig_int.recv() => {
                    tally_log::info!("SIGINT received, exiting");
                    None
                }
                Some(()) = sig_quit.recv() => {
                    tally_log::info!("SIGQUIT received, exiting");
                    None
                }
                Some(()) = sig_term.recv() => {
                    tally_log::info!("SIGTERM received, stopping in {}s", timeout.as_secs());
                    Some(timeout)
                }
                else => return Ok(()),
            };

            self.shutdown(timeout);
        }
    }

    /// Maps `Ctrl-C` to an immediate shutdown.
    #[cfg(not(unix))]
    pub async fn listen_signals(&self, _timeout: Duration) -> io::Result<()> {
        loop {
            tokio::signal::ctrl_c().await?;
            tally_log::info!("Ctrl-C received, exiting");
            self.shutdown(None);
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notified_after_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.handle();
        assert_eq!(handle.get(), None);

        controller.shutdown(None);
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
        // Polling again resolves immediately.
        assert_eq!(handle.notified().await, Shutdown { timeout: None });
    }

    #[tokio::test]
    async fn test_late_handle_sees_shutdown() {
        let controller = Controller::new();
        controller.shutdown(Some(Duration::from_secs(3)));
        assert!(controller.is_shutting_down());

        let mut handle = controller.handle();
        let shutdown = handle.notified().await;
        assert_eq!(shutdown.timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn test_all_handles_notified() {
        let controller = Controller::new();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let mut handle = controller.handle();
                tokio::spawn(async move { handle.notified().await })
            })
            .collect();

        controller.shutdown(Some(Duration::from_secs(1)));

        for task in tasks {
            let shutdown = task.await.unwrap();
            assert_eq!(shutdown.timeout, Some(Duration::from_secs(1)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_notified_pending_without_shutdown() {
        let controller = Controller::new();
        let mut handle = controller.handle();

        let result = tokio::time::timeout(Duration::from_secs(1), handle.notified()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_escalate_to_forced() {
        let controller = Controller::new();
        let mut handle = controller.handle();

        let forced = tokio::spawn(async move { handle.forced().await });

        controller.shutdown(Some(Duration::from_secs(10)));
        tokio::task::yield_now().await;
        assert!(!forced.is_finished());

        controller.shutdown(None);
        forced.await.unwrap();
    }
}
