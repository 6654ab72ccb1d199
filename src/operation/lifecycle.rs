//! Terminal outcomes and the completion gate shared with waiters

use std::cell::Cell;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::attribute::{ConnectionParameters, PhyPair};
use crate::data::Data;
use crate::error::Failure;

/// The closed set of results an operation can complete with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpValue {
    None,
    Data(Data),
    Mtu(u16),
    ConnectionParameters(ConnectionParameters),
    Phy(PhyPair),
    Rssi(i8),
}

/// Narrows an [`OpValue`] to the result type of a concrete operation.
pub trait FromValue: Sized + Send + 'static {
    fn from_value(value: OpValue) -> Option<Self>;
}

impl FromValue for OpValue {
    fn from_value(value: OpValue) -> Option<Self> {
        Some(value)
    }
}

impl FromValue for () {
    fn from_value(value: OpValue) -> Option<Self> {
        match value {
            OpValue::None => Some(()),
            _ => None,
        }
    }
}

macro_rules! narrow {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            fn from_value(value: OpValue) -> Option<Self> {
                match value {
                    OpValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

narrow!(Data, Data);
narrow!(u16, Mtu);
narrow!(ConnectionParameters, ConnectionParameters);
narrow!(PhyPair, Phy);
narrow!(i8, Rssi);

pub type Outcome = Result<OpValue, Failure>;

thread_local! {
    static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as delivering operation callbacks until dropped.
pub(crate) struct DeliveryScope {
    previous: bool,
}

impl DeliveryScope {
    pub(crate) fn enter() -> Self {
        let previous = DELIVERING.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        let previous = self.previous;
        DELIVERING.with(|flag| flag.set(previous));
    }
}

pub(crate) fn in_delivery_context() -> bool {
    DELIVERING.with(|flag| flag.get())
}

/// One-shot gate holding the first terminal outcome of an operation.
///
/// Shared between the dispatcher, which settles it, and any handle waiting on
/// it from another thread or task. Whichever side settles first wins.
#[derive(Debug, Default)]
pub struct Completion {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
    notify: Notify,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Outcome>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settles the gate unless already settled. Returns the winning outcome.
    pub fn settle(&self, outcome: Outcome) -> Outcome {
        let mut slot = self.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        *slot = Some(outcome.clone());
        drop(slot);

        self.ready.notify_all();
        self.notify.notify_waiters();
        outcome
    }

    /// Returns `true` if this call settled the gate.
    pub fn try_settle(&self, outcome: Outcome) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        drop(slot);

        self.ready.notify_all();
        self.notify.notify_waiters();
        true
    }

    pub fn peek(&self) -> Option<Outcome> {
        self.lock().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.lock().is_some()
    }

    /// Blocks the calling thread until settled or `timeout` elapses.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a callback delivered by the dispatcher:
    /// the dispatcher could never settle the gate it is blocked on.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Option<Outcome> {
        assert!(
            !in_delivery_context(),
            "blocking wait called from the operation callback context"
        );

        let slot = self.lock();
        let slot = match timeout {
            None => self
                .ready
                .wait_while(slot, |outcome| outcome.is_none())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.ready
                    .wait_timeout_while(slot, timeout, |outcome| outcome.is_none())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        slot.clone()
    }

    /// Waits asynchronously until settled.
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a settle in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.peek() {
                return outcome;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GattStatus;
    use std::sync::Arc;

    #[test]
    fn test_first_settle_wins() {
        let gate = Completion::new();
        let first = gate.settle(Ok(OpValue::Mtu(64)));
        let second = gate.settle(Err(Failure::Status(GattStatus::TIMEOUT)));

        assert_eq!(first, Ok(OpValue::Mtu(64)));
        assert_eq!(second, Ok(OpValue::Mtu(64)));
        assert!(!gate.try_settle(Err(Failure::Invalid)));
    }

    #[test]
    fn test_blocking_wait_sees_settle_from_other_thread() {
        let gate = Arc::new(Completion::new());
        let setter = Arc::clone(&gate);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.settle(Ok(OpValue::None));
        });

        assert_eq!(gate.wait_blocking(None), Some(Ok(OpValue::None)));
        thread.join().unwrap();
    }

    #[test]
    fn test_blocking_wait_times_out() {
        let gate = Completion::new();
        assert_eq!(gate.wait_blocking(Some(Duration::from_millis(10))), None);
    }

    #[test]
    fn test_blocking_wait_in_delivery_scope_panics() {
        let result = std::panic::catch_unwind(|| {
            let _scope = DeliveryScope::enter();
            let gate = Completion::new();
            gate.wait_blocking(Some(Duration::from_millis(1)))
        });
        assert!(result.is_err());
        assert!(!in_delivery_context());
    }

    #[tokio::test]
    async fn test_async_wait() {
        let gate = Arc::new(Completion::new());
        let setter = Arc::clone(&gate);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            setter.settle(Err(Failure::Status(GattStatus::CANCELLED)));
        });

        assert_eq!(
            gate.wait().await,
            Err(Failure::Status(GattStatus::CANCELLED))
        );
    }

    #[test]
    fn test_narrowing() {
        assert_eq!(u16::from_value(OpValue::Mtu(23)), Some(23));
        assert_eq!(u16::from_value(OpValue::Rssi(-40)), None);
        assert_eq!(<()>::from_value(OpValue::None), Some(()));
        assert_eq!(<()>::from_value(OpValue::Mtu(1)), None);
    }
}
