use crate::attribute::Peer;
use crate::data::Data;
use crate::error::{Failure, GattStatus};

use super::lifecycle::{FromValue, OpValue, Outcome};

pub(crate) type BeforeFn = Box<dyn FnMut(&Peer) + Send>;
pub(crate) type DoneFn = Box<dyn FnOnce(&Peer) + Send>;
pub(crate) type FailFn = Box<dyn FnOnce(&Peer, GattStatus) + Send>;
pub(crate) type InvalidFn = Box<dyn FnOnce() + Send>;
pub(crate) type ValueFn = Box<dyn FnOnce(&Peer, OpValue) + Send>;
pub(crate) type ProgressFn = Box<dyn FnMut(&Peer, &Data, usize) + Send>;

/// A callback slot. The internal variant always fires first and cannot be
/// replaced from the public builder API.
pub(crate) struct Slot<F> {
    pub(crate) internal: Option<F>,
    pub(crate) user: Option<F>,
}

impl<F> Default for Slot<F> {
    fn default() -> Self {
        Self {
            internal: None,
            user: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) before: Slot<BeforeFn>,
    pub(crate) done: Slot<DoneFn>,
    pub(crate) fail: Slot<FailFn>,
    pub(crate) invalid: Slot<InvalidFn>,
    pub(crate) value: Option<ValueFn>,
}

impl Hooks {
    pub(crate) fn fire_before(&mut self, peer: &Peer) {
        if let Some(f) = self.before.internal.as_mut() {
            f(peer);
        }
        if let Some(f) = self.before.user.as_mut() {
            f(peer);
        }
    }

    /// Fires the callbacks for `outcome`. Without a peer only the invalid
    /// slot can fire.
    pub(crate) fn fire_terminal(&mut self, peer: Option<&Peer>, outcome: &Outcome) {
        match (peer, outcome) {
            (Some(peer), Ok(value)) => {
                if let Some(f) = self.value.take() {
                    f(peer, value.clone());
                }
                if let Some(f) = self.done.internal.take() {
                    f(peer);
                }
                if let Some(f) = self.done.user.take() {
                    f(peer);
                }
            }
            (Some(peer), Err(Failure::Status(status))) => {
                if let Some(f) = self.fail.internal.take() {
                    f(peer, *status);
                }
                if let Some(f) = self.fail.user.take() {
                    f(peer, *status);
                }
            }
            _ => {
                if let Some(f) = self.invalid.internal.take() {
                    f();
                }
                if let Some(f) = self.invalid.user.take() {
                    f();
                }
            }
        }
        self.clear();
    }

    fn clear(&mut self) {
        *self = Hooks::default();
    }
}

/// Wraps a typed value callback so it can sit in the untyped value slot.
pub(crate) fn typed_value<T, F>(f: F) -> ValueFn
where
    T: FromValue,
    F: FnOnce(&Peer, T) + Send + 'static,
{
    Box::new(move |peer: &Peer, value: OpValue| {
        if let Some(value) = T::from_value(value) {
            f(peer, value);
        }
    })
}
