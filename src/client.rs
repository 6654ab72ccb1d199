//! Client handle and per-operation handles

use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use crate::attribute::Peer;
use crate::config::GattConfig;
use crate::data::Data;
use crate::dispatcher::{
    Command, DisconnectOnTimeout, Dispatcher, Escalation, TimedOut, TimeoutHandler,
};
use crate::driver::GattDriver;
use crate::error::{Failure, GattError, GattStatus};
use crate::operation::{Completion, FromValue, OperationId, Outcome, Submit};

/// A value pushed by the peer, as seen by every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub handle: u16,
    pub value: Data,
    pub indication: bool,
}

/// Snapshot of the link as the dispatcher last saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub peer: Option<Peer>,
    pub connected: bool,
    pub adapter_enabled: bool,
    pub mtu: u16,
}

/// Submits operations to a dispatcher task that owns one driver.
///
/// Dropping every clone lets the dispatcher finish the jobs already queued,
/// disconnect and exit.
#[derive(Clone)]
pub struct GattClient {
    commands: mpsc::UnboundedSender<Command>,
    notifications: broadcast::Sender<Notification>,
    status: watch::Receiver<LinkStatus>,
    config: Arc<GattConfig>,
}

impl GattClient {
    /// Spawns the dispatcher for `driver`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(driver: impl GattDriver, config: GattConfig) -> Result<Self, GattError> {
        if config.disconnect_on_timeout {
            Self::spawn_with_handler(driver, config, DisconnectOnTimeout)
        } else {
            Self::spawn_with_handler(driver, config, |_: &TimedOut| Escalation::Ignore)
        }
    }

    /// Like [`spawn`](Self::spawn) with a custom timeout policy.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_with_handler(
        driver: impl GattDriver,
        config: GattConfig,
        handler: impl TimeoutHandler,
    ) -> Result<Self, GattError> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notifications, _) = broadcast::channel(config.notification_capacity);
        let (status_tx, status) = watch::channel(LinkStatus {
            peer: None,
            connected: false,
            adapter_enabled: true,
            mtu: config.initial_mtu,
        });

        let dispatcher = Dispatcher::new(
            Box::new(driver),
            config.clone(),
            Box::new(handler),
            command_rx,
            notifications.clone(),
            status_tx,
        );
        tokio::spawn(dispatcher.run());

        Ok(Self {
            commands,
            notifications,
            status,
            config: Arc::new(config),
        })
    }

    /// Queues an operation and returns a handle to its result.
    ///
    /// The operation is moved in, so it cannot be configured or submitted
    /// again afterwards:
    ///
    /// ```compile_fail
    /// use gattq::prelude::*;
    ///
    /// fn submit_twice(client: &GattClient) {
    ///     let disconnect = SimpleOperation::disconnect();
    ///     client.enqueue(disconnect);
    ///     client.enqueue(disconnect);
    /// }
    /// ```
    ///
    /// If the dispatcher has stopped, the handle resolves to
    /// [`GattError::Cancelled`].
    pub fn enqueue<S: Submit>(&self, operation: S) -> OperationHandle<S::Output> {
        let mut job = operation.into_job();
        job.apply_default_timeout(self.config.operation_timeout());
        job.core_mut().mark_enqueued();

        let handle = OperationHandle {
            id: job.id(),
            completion: job.core().completion(),
            timeout: job.timeout(),
            commands: self.commands.downgrade(),
            _output: PhantomData,
        };

        if self.commands.send(Command::Enqueue(job)).is_err() {
            log::warn!("Dispatcher stopped, operation {} dropped", handle.id);
        }
        handle
    }

    /// Queues an operation and awaits its result.
    pub async fn execute<S: Submit>(&self, operation: S) -> Result<S::Output, GattError> {
        self.enqueue(operation).await
    }

    /// Queues an operation and blocks the calling thread until it finishes.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an operation callback.
    pub fn wait<S: Submit>(&self, operation: S) -> Result<S::Output, GattError> {
        self.enqueue(operation).wait()
    }

    /// Cancels every queued job. Running operations are not interrupted,
    /// but a running queue stops after its current member.
    pub fn cancel_all(&self) -> Result<(), GattError> {
        self.commands
            .send(Command::CancelAll)
            .map_err(|_| GattError::Closed)
    }

    /// Receives every notification and indication from the peer.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn config(&self) -> &GattConfig {
        &self.config
    }
}

impl fmt::Debug for GattClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattClient")
            .field("status", &*self.status.borrow())
            .finish()
    }
}

/// The caller's view of a submitted operation.
///
/// Await it, or call [`wait`](Self::wait) from a thread that is not running
/// the dispatcher. Either way the operation's callbacks still run.
pub struct OperationHandle<T> {
    id: OperationId,
    completion: Arc<Completion>,
    timeout: Option<Duration>,
    commands: mpsc::WeakUnboundedSender<Command>,
    _output: PhantomData<fn() -> T>,
}

impl<T: FromValue> OperationHandle<T> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_settled()
    }

    /// Cancels the operation if it has not started. For a queue, the members
    /// not yet started are cancelled.
    pub fn cancel(&self) -> Result<(), GattError> {
        self.send(Command::Cancel(self.id))
    }

    fn send(&self, command: Command) -> Result<(), GattError> {
        let commands = self.commands.upgrade().ok_or(GattError::Closed)?;
        commands.send(command).map_err(|_| GattError::Closed)
    }

    /// Blocks until the operation finishes.
    ///
    /// The operation's timeout, if any, is counted from this call, so time
    /// spent queued behind other operations counts against it.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an operation callback.
    pub fn wait(self) -> Result<T, GattError> {
        let outcome = match self.completion.wait_blocking(self.timeout) {
            Some(outcome) => outcome,
            None => {
                if self
                    .completion
                    .try_settle(Err(Failure::Status(GattStatus::TIMEOUT)))
                {
                    log::warn!(
                        "Gave up waiting for operation {} after {:?}",
                        self.id,
                        self.timeout
                    );
                    if let Err(e) = self.send(Command::Abandon(self.id)) {
                        log::debug!("Failed to abandon operation {}: {}", self.id, e);
                    }
                }
                self.completion
                    .peek()
                    .unwrap_or(Err(Failure::Status(GattStatus::TIMEOUT)))
            }
        };
        narrow(outcome)
    }

    /// Resolves when the dispatcher settles the operation.
    pub async fn outcome(self) -> Result<T, GattError> {
        narrow(self.completion.wait().await)
    }
}

impl<T: FromValue> IntoFuture for OperationHandle<T> {
    type Output = Result<T, GattError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.outcome())
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("finished", &self.completion.is_settled())
            .finish()
    }
}

fn narrow<T: FromValue>(outcome: Outcome) -> Result<T, GattError> {
    let value = outcome.map_err(GattError::from)?;
    T::from_value(value).ok_or(GattError::UnexpectedValue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OpValue;

    #[test]
    fn test_narrow_success() {
        let data: Data = narrow(Ok(OpValue::Data(Data::from(vec![1, 2])))).unwrap();
        assert_eq!(data.as_bytes(), &[1, 2]);
        assert_eq!(narrow::<u16>(Ok(OpValue::Mtu(185))).unwrap(), 185);
        narrow::<()>(Ok(OpValue::None)).unwrap();
    }

    #[test]
    fn test_narrow_mismatch_is_unexpected_value() {
        assert_eq!(
            narrow::<u16>(Ok(OpValue::None)).unwrap_err(),
            GattError::UnexpectedValue
        );
    }

    #[test]
    fn test_narrow_failure() {
        assert_eq!(
            narrow::<()>(Err(Failure::Status(GattStatus::CANCELLED))).unwrap_err(),
            GattError::Cancelled
        );
        assert_eq!(narrow::<()>(Err(Failure::Invalid)).unwrap_err(), GattError::Invalid);
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let peripheral = crate::simulated::SimPeripheral::new();
        let config = GattConfig {
            initial_mtu: 5,
            ..GattConfig::default()
        };
        let err = GattClient::spawn(peripheral.driver(), config).unwrap_err();
        assert!(matches!(err, GattError::Config(_)));
    }
}
