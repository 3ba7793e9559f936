use std::time::Duration;

use tokio::task::JoinHandle;

/// A long-running component of the server.
///
/// Services are moved onto the runtime when they start and drive themselves to completion,
/// usually by looping until their [`ShutdownHandle`](crate::ShutdownHandle) is notified.
///
/// ### Example
///
/// ```
/// use tally_system::{Controller, Service, ShutdownHandle};
/// use tokio::task::JoinHandle;
///
/// struct Idle(ShutdownHandle);
///
/// impl Service for Idle {
///     fn spawn_handler(mut self) -> JoinHandle<()> {
///         tokio::spawn(async move {
///             self.0.notified().await;
///         })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let controller = Controller::new();
/// let handle = Idle(controller.handle()).start();
///
/// controller.shutdown(None);
/// handle.await.unwrap();
/// # }
/// ```
pub trait Service: Sized {
    /// Spawns the task that runs this service.
    ///
    /// Must be called from within a tokio runtime.
    fn spawn_handler(self) -> JoinHandle<()>;

    /// Returns a name identifying this service in logs.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Starts the service in the current runtime and returns the handle of its task.
    fn start(self) -> JoinHandle<()> {
        tally_log::debug!(service = Self::name(), "starting service");
        self.spawn_handler()
    }
}

/// A collection of started services that can be awaited together.
#[derive(Debug, Default)]
pub struct ServiceSet {
    services: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a service and adds it to the set.
    pub fn start<S: Service>(&mut self, service: S) {
        self.services.push((S::name(), service.start()));
    }

    /// Returns the number of services in the set.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services have been started.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Waits for all services to finish.
    ///
    /// A service that panics is logged and does not prevent waiting for the others.
    pub async fn join(self) {
        for (name, handle) in self.services {
            match handle.await {
                Ok(()) => tally_log::debug!(service = name, "service stopped"),
                Err(error) if error.is_panic() => {
                    tally_log::error!(service = name, "service panicked")
                }
                Err(_) => tally_log::debug!(service = name, "service cancelled"),
            }
        }
    }

    /// Waits for all services to finish, but at most `timeout`.
    ///
    /// Returns `false` and aborts the remaining services if the timeout elapsed.
    pub async fn join_timeout(self, timeout: Duration) -> bool {
        let aborts: Vec<_> = self
            .services
            .iter()
            .map(|(_, handle)| handle.abort_handle())
            .collect();

        if tokio::time::timeout(timeout, self.join()).await.is_ok() {
            return true;
        }

        tally_log::warn!("services did not stop within {}s", timeout.as_secs());
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::{Controller, ShutdownHandle};

    use super::*;

    struct WaitService(ShutdownHandle);

    impl Service for WaitService {
        fn spawn_handler(mut self) -> JoinHandle<()> {
            tokio::spawn(async move {
                self.0.notified().await;
            })
        }
    }

    struct StuckService;

    impl Service for StuckService {
        fn spawn_handler(self) -> JoinHandle<()> {
            tokio::spawn(futures::future::pending())
        }
    }

    #[test]
    fn test_service_name() {
        assert!(WaitService::name().ends_with("WaitService"));
    }

    #[tokio::test]
    async fn test_service_set_joins_after_shutdown() {
        tally_test::setup();

        let controller = Controller::new();
        let mut services = ServiceSet::new();
        services.start(WaitService(controller.handle()));
        services.start(WaitService(controller.handle()));
        assert_eq!(services.len(), 2);

        controller.shutdown(Some(Duration::from_secs(1)));
        assert!(services.join_timeout(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_set_timeout() {
        let mut services = ServiceSet::new();
        services.start(StuckService);

        assert!(!services.join_timeout(Duration::from_secs(1)).await);
    }
}
