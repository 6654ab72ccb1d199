use std::time::Duration;

use crate::attribute::{Peer, PhyMask};

use super::{operation_builder, Body, Operation, OperationCore, OperationKind, TimeoutBuilder};

/// Which connection procedure the driver should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectPath {
    /// Fails quickly if the peer is not in range.
    Direct,
    /// Keeps trying in the background until the peer shows up.
    AutoConnect,
}

/// Retry budget and attempt bookkeeping of a connect operation.
#[derive(Debug, Clone)]
pub(crate) struct ConnectState {
    peer: Peer,
    retries: u32,
    retry_delay: Duration,
    attempt: u32,
    auto_connect: bool,
    phy: PhyMask,
}

impl ConnectState {
    pub(crate) fn new(peer: Peer) -> Self {
        Self {
            peer,
            retries: 0,
            retry_delay: Duration::ZERO,
            attempt: 0,
            auto_connect: false,
            phy: PhyMask::LE_1M,
        }
    }

    pub(crate) fn peer(&self) -> &Peer {
        &self.peer
    }

    pub(crate) fn phy(&self) -> PhyMask {
        self.phy
    }

    pub(crate) fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether budget remains. Does not consume anything.
    pub(crate) fn can_retry(&self) -> bool {
        self.retries > 0
    }

    /// Spends one retry. Returns `false` if the budget was already empty.
    pub(crate) fn consume_retry(&mut self) -> bool {
        match self.retries.checked_sub(1) {
            Some(remaining) => {
                self.retries = remaining;
                true
            }
            None => false,
        }
    }

    /// Counts an attempt and picks its path: the first attempt always goes
    /// direct, later ones use auto-connect when enabled.
    pub(crate) fn begin_attempt(&mut self) -> ConnectPath {
        let first = self.attempt == 0;
        self.attempt += 1;
        if first || !self.auto_connect {
            ConnectPath::Direct
        } else {
            ConnectPath::AutoConnect
        }
    }
}

/// Connects to a peer, optionally retrying on failure.
///
/// ```
/// use std::time::Duration;
/// use gattq::prelude::*;
///
/// let peer = Peer::new(BleAddress::Real([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]));
/// let connect = ConnectOperation::new(peer)
///     .retry(3, Duration::from_millis(100))
///     .use_auto_connect(true)
///     .timeout(Duration::from_secs(10));
/// ```
pub struct ConnectOperation {
    core: OperationCore,
    state: ConnectState,
}

impl ConnectOperation {
    pub fn new(peer: Peer) -> Self {
        Self {
            core: OperationCore::new(),
            state: ConnectState::new(peer),
        }
    }

    /// Retries up to `count` times after a failed attempt, waiting `delay`
    /// between attempts. A peer that never answered is not retried.
    pub fn retry(mut self, count: u32, delay: Duration) -> Self {
        self.state.retries = count;
        self.state.retry_delay = delay;
        self
    }

    /// Use the persistent auto-connect procedure for retries.
    pub fn use_auto_connect(mut self, enabled: bool) -> Self {
        self.state.auto_connect = enabled;
        self
    }

    pub fn use_preferred_phy(mut self, phy: PhyMask) -> Self {
        self.state.phy = phy;
        self
    }
}

impl From<ConnectOperation> for Operation {
    fn from(op: ConnectOperation) -> Self {
        Operation::with_core(
            op.core,
            OperationKind::Connect,
            None,
            Body::Connect(op.state),
        )
    }
}

operation_builder!(ConnectOperation, ());
impl TimeoutBuilder for ConnectOperation {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::BleAddress;
    use uuid::Uuid;

    fn with_budget(retries: u32, auto_connect: bool) -> ConnectState {
        let mut state = ConnectState::new(Peer::new(BleAddress::Simulated(Uuid::nil())));
        state.retries = retries;
        state.auto_connect = auto_connect;
        state
    }

    #[test]
    fn test_can_retry_does_not_consume() {
        let mut state = with_budget(2, false);
        assert!(state.can_retry());
        assert!(state.can_retry());

        assert!(state.consume_retry());
        assert!(state.consume_retry());
        assert!(!state.can_retry());
        assert!(!state.consume_retry());
    }

    #[test]
    fn test_first_attempt_is_direct() {
        let mut state = with_budget(0, true);
        assert_eq!(state.begin_attempt(), ConnectPath::Direct);
        assert_eq!(state.begin_attempt(), ConnectPath::AutoConnect);
        assert_eq!(state.attempts(), 2);

        let mut direct_only = with_budget(0, false);
        direct_only.begin_attempt();
        assert_eq!(direct_only.begin_attempt(), ConnectPath::Direct);
    }
}
