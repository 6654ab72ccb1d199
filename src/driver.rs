//! Hardware driver boundary
//!
//! The dispatcher hands the driver one [`GattCommand`] at a time. The driver
//! answers each command with exactly one terminal [`DriverEvent`] through the
//! [`EventSink`] it was attached to, and may push `ValueChanged` events at any
//! point in between.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::attribute::{
    ConnectionParameters, ConnectionPriority, Peer, PhyMask, PhyOption, PhyPair, WriteType,
};
use crate::error::GattStatus;
use crate::operation::{ConnectPath, OpValue, OperationKind};

/// A single request for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCommand {
    Connect {
        peer: Peer,
        path: ConnectPath,
        phy: PhyMask,
    },
    Disconnect,
    Write {
        handle: u16,
        value: Bytes,
        write_type: WriteType,
    },
    Read {
        handle: u16,
    },
    WriteDescriptor {
        handle: u16,
        value: Bytes,
    },
    ReadDescriptor {
        handle: u16,
    },
    BeginReliableWrite,
    ExecuteReliableWrite,
    AbortReliableWrite,
    SetNotifications {
        handle: u16,
        enable: bool,
    },
    SetIndications {
        handle: u16,
        enable: bool,
    },
    RequestMtu(u16),
    RequestConnectionPriority(ConnectionPriority),
    SetPreferredPhy {
        tx: PhyMask,
        rx: PhyMask,
        options: PhyOption,
    },
    ReadPhy,
    ReadRssi,
    RefreshCache,
}

impl GattCommand {
    /// The operation kind this command is issued for.
    pub fn kind(&self) -> OperationKind {
        match self {
            GattCommand::Connect { .. } => OperationKind::Connect,
            GattCommand::Disconnect => OperationKind::Disconnect,
            GattCommand::Write { .. } => OperationKind::Write,
            GattCommand::Read { .. } => OperationKind::Read,
            GattCommand::WriteDescriptor { .. } => OperationKind::WriteDescriptor,
            GattCommand::ReadDescriptor { .. } => OperationKind::ReadDescriptor,
            GattCommand::BeginReliableWrite => OperationKind::BeginReliableWrite,
            GattCommand::ExecuteReliableWrite => OperationKind::ExecuteReliableWrite,
            GattCommand::AbortReliableWrite => OperationKind::AbortReliableWrite,
            GattCommand::SetNotifications { enable: true, .. } => {
                OperationKind::EnableNotifications
            }
            GattCommand::SetNotifications { enable: false, .. } => {
                OperationKind::DisableNotifications
            }
            GattCommand::SetIndications { enable: true, .. } => OperationKind::EnableIndications,
            GattCommand::SetIndications { enable: false, .. } => {
                OperationKind::DisableIndications
            }
            GattCommand::RequestMtu(_) => OperationKind::RequestMtu,
            GattCommand::RequestConnectionPriority(_) => OperationKind::RequestConnectionPriority,
            GattCommand::SetPreferredPhy { .. } => OperationKind::SetPreferredPhy,
            GattCommand::ReadPhy => OperationKind::ReadPhy,
            GattCommand::ReadRssi => OperationKind::ReadRssi,
            GattCommand::RefreshCache => OperationKind::RefreshCache,
        }
    }
}

/// Payload carried by a successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    None,
    Value(Bytes),
    Mtu(u16),
    ConnectionParameters(ConnectionParameters),
    Phy(PhyPair),
    Rssi(i8),
}

impl From<Response> for OpValue {
    fn from(response: Response) -> Self {
        match response {
            Response::None => OpValue::None,
            Response::Value(bytes) => OpValue::Data(bytes.into()),
            Response::Mtu(mtu) => OpValue::Mtu(mtu),
            Response::ConnectionParameters(params) => OpValue::ConnectionParameters(params),
            Response::Phy(phy) => OpValue::Phy(phy),
            Response::Rssi(rssi) => OpValue::Rssi(rssi),
        }
    }
}

/// Everything a driver reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Terminal event for `Connect`.
    Connected,
    /// Terminal event for `Connect` when the attempt failed.
    ConnectionFailed { status: GattStatus },
    /// Terminal event for `Disconnect`, or an unsolicited link loss.
    Disconnected { status: GattStatus },
    /// Terminal event for every other command.
    OperationCompleted {
        status: GattStatus,
        response: Response,
    },
    /// Out-of-band notification or indication from the peer.
    ValueChanged {
        handle: u16,
        value: Bytes,
        indication: bool,
    },
    AdapterStateChanged { enabled: bool },
}

/// Where a driver delivers its events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<DriverEvent>,
}

impl EventSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `false` once the dispatcher has gone away.
    pub fn send(&self, event: DriverEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn completed(&self, status: GattStatus, response: Response) -> bool {
        self.send(DriverEvent::OperationCompleted { status, response })
    }

    pub fn succeeded(&self, response: Response) -> bool {
        self.completed(GattStatus::SUCCESS, response)
    }
}

/// A GATT transport that accepts one outstanding command at a time.
///
/// `issue` must not block. An `Err` means the command was never started and
/// no terminal event will follow for it.
pub trait GattDriver: Send + 'static {
    fn attach(&mut self, events: EventSink);

    fn issue(&mut self, command: GattCommand) -> Result<(), GattStatus>;
}

impl GattDriver for Box<dyn GattDriver> {
    fn attach(&mut self, events: EventSink) {
        (**self).attach(events)
    }

    fn issue(&mut self, command: GattCommand) -> Result<(), GattStatus> {
        (**self).issue(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_commands_map_to_distinct_kinds() {
        let kinds = [
            GattCommand::SetNotifications { handle: 1, enable: true }.kind(),
            GattCommand::SetNotifications { handle: 1, enable: false }.kind(),
            GattCommand::SetIndications { handle: 1, enable: true }.kind(),
            GattCommand::SetIndications { handle: 1, enable: false }.kind(),
        ];
        assert_eq!(
            kinds,
            [
                OperationKind::EnableNotifications,
                OperationKind::DisableNotifications,
                OperationKind::EnableIndications,
                OperationKind::DisableIndications,
            ]
        );
    }

    #[test]
    fn test_response_into_value() {
        assert_eq!(OpValue::from(Response::Mtu(185)), OpValue::Mtu(185));
        assert_eq!(
            OpValue::from(Response::Value(Bytes::from_static(&[1, 2]))),
            OpValue::Data(vec![1, 2].into())
        );
    }

    #[tokio::test]
    async fn test_sink_reports_closed_dispatcher() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.succeeded(Response::None));
        assert_eq!(
            rx.recv().await,
            Some(DriverEvent::OperationCompleted {
                status: GattStatus::SUCCESS,
                response: Response::None,
            })
        );
        drop(rx);
        assert!(!sink.send(DriverEvent::Connected));
    }
}
