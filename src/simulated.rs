//! In-process GATT peripheral
//!
//! A scripted stand-in for a real device. The [`SimDriver`] it hands out
//! answers commands the way a well-behaved stack would, while the
//! [`SimPeripheral`] side lets a test inject failures, stalls, link loss,
//! adapter toggles and unsolicited notifications.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::attribute::{BleAddress, ConnectionParameters, Peer, Phy, PhyPair, MAX_MTU};
use crate::driver::{DriverEvent, EventSink, GattCommand, GattDriver, Response};
use crate::error::GattStatus;
use crate::operation::OperationKind;

#[derive(Default)]
struct SimState {
    sink: Option<EventSink>,
    latency: Duration,
    connected: bool,
    adapter_disabled: bool,
    values: HashMap<u16, Bytes>,
    scripted_reads: HashMap<u16, VecDeque<Bytes>>,
    /// Writes to the key are echoed back as notifications on the value.
    echo: HashMap<u16, u16>,
    max_mtu: Option<u16>,
    connect_failures: VecDeque<GattStatus>,
    failures: HashMap<OperationKind, VecDeque<GattStatus>>,
    stalls: HashMap<OperationKind, usize>,
    /// Buffered writes of an open reliable write transaction.
    reliable: Option<Vec<(u16, Bytes)>>,
    notifying: HashSet<u16>,
    indicating: HashSet<u16>,
    log: Vec<GattCommand>,
    rssi: i8,
    phy: PhyPair,
}

impl SimState {
    fn deliver(&self, event: DriverEvent) {
        let Some(sink) = self.sink.clone() else {
            log::warn!("Simulated peripheral has no dispatcher attached");
            return;
        };
        if self.latency.is_zero() {
            sink.send(event);
            return;
        }
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            sink.send(event);
        });
    }

    fn take_failure(&mut self, kind: OperationKind) -> Option<GattStatus> {
        self.failures.get_mut(&kind)?.pop_front()
    }

    fn take_stall(&mut self, kind: OperationKind) -> bool {
        match self.stalls.get_mut(&kind) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }

    fn read(&mut self, handle: u16) -> Bytes {
        if let Some(value) = self
            .scripted_reads
            .get_mut(&handle)
            .and_then(VecDeque::pop_front)
        {
            return value;
        }
        self.values.get(&handle).cloned().unwrap_or_default()
    }

    fn write(&mut self, handle: u16, value: Bytes) {
        let echo = match self.reliable.as_mut() {
            Some(buffered) => {
                buffered.push((handle, value));
                None
            }
            None => {
                self.values.insert(handle, value.clone());
                self.echo.get(&handle).map(|&target| (target, value))
            }
        };

        self.deliver(DriverEvent::OperationCompleted {
            status: GattStatus::SUCCESS,
            response: Response::None,
        });
        if let Some((target, value)) = echo {
            self.deliver(DriverEvent::ValueChanged {
                handle: target,
                value,
                indication: self.indicating.contains(&target),
            });
        }
    }

    /// Applies a reliable write. Chunks written to the same handle are
    /// joined in order.
    fn commit(&mut self, buffered: Vec<(u16, Bytes)>) {
        let mut merged: Vec<(u16, BytesMut)> = Vec::new();
        for (handle, chunk) in buffered {
            match merged.iter_mut().find(|(h, _)| *h == handle) {
                Some((_, value)) => value.extend_from_slice(&chunk),
                None => merged.push((handle, BytesMut::from(&chunk[..]))),
            }
        }
        for (handle, value) in merged {
            self.values.insert(handle, value.freeze());
        }
    }

    fn respond(&mut self, command: GattCommand) -> Result<(), GattStatus> {
        let response = match command {
            GattCommand::Connect { .. } => {
                let event = match self.connect_failures.pop_front() {
                    Some(status) => DriverEvent::ConnectionFailed { status },
                    None => {
                        self.connected = true;
                        DriverEvent::Connected
                    }
                };
                self.deliver(event);
                return Ok(());
            }
            GattCommand::Disconnect => {
                self.connected = false;
                self.reliable = None;
                self.deliver(DriverEvent::Disconnected {
                    status: GattStatus::SUCCESS,
                });
                return Ok(());
            }
            GattCommand::Write { handle, value, .. }
            | GattCommand::WriteDescriptor { handle, value } => {
                self.write(handle, value);
                return Ok(());
            }
            GattCommand::Read { handle } | GattCommand::ReadDescriptor { handle } => {
                Response::Value(self.read(handle))
            }
            GattCommand::BeginReliableWrite => {
                self.reliable = Some(Vec::new());
                Response::None
            }
            GattCommand::ExecuteReliableWrite => {
                let buffered = self.reliable.take().unwrap_or_default();
                self.commit(buffered);
                Response::None
            }
            GattCommand::AbortReliableWrite => {
                self.reliable = None;
                Response::None
            }
            GattCommand::SetNotifications { handle, enable } => {
                toggle(&mut self.notifying, handle, enable);
                Response::None
            }
            GattCommand::SetIndications { handle, enable } => {
                toggle(&mut self.indicating, handle, enable);
                Response::None
            }
            GattCommand::RequestMtu(mtu) => {
                Response::Mtu(mtu.min(self.max_mtu.unwrap_or(MAX_MTU)))
            }
            GattCommand::RequestConnectionPriority(priority) => {
                Response::ConnectionParameters(ConnectionParameters::for_priority(priority))
            }
            GattCommand::SetPreferredPhy { tx, rx, .. } => {
                self.phy = PhyPair {
                    tx: Phy::preferred(tx),
                    rx: Phy::preferred(rx),
                };
                Response::Phy(self.phy)
            }
            GattCommand::ReadPhy => Response::Phy(self.phy),
            GattCommand::ReadRssi => Response::Rssi(self.rssi),
            GattCommand::RefreshCache => Response::None,
        };
        self.deliver(DriverEvent::OperationCompleted {
            status: GattStatus::SUCCESS,
            response,
        });
        Ok(())
    }
}

fn toggle(set: &mut HashSet<u16>, handle: u16, enable: bool) {
    if enable {
        set.insert(handle);
    } else {
        set.remove(&handle);
    }
}

/// A simulated peripheral and its control surface.
#[derive(Clone)]
pub struct SimPeripheral {
    peer: Peer,
    state: Arc<Mutex<SimState>>,
}

impl SimPeripheral {
    pub fn new() -> Self {
        Self {
            peer: Peer::new(BleAddress::Simulated(Uuid::new_v4())).with_name("sim-peripheral"),
            state: Arc::new(Mutex::new(SimState {
                rssi: -60,
                ..SimState::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn peer(&self) -> Peer {
        self.peer.clone()
    }

    /// A driver backed by this peripheral, for [`GattClient::spawn`](crate::GattClient::spawn).
    pub fn driver(&self) -> SimDriver {
        SimDriver {
            state: Arc::clone(&self.state),
        }
    }

    /// Delay applied to every event. Uses tokio time, so paused clocks
    /// advance instantly in tests.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn set_value(&self, handle: u16, value: impl Into<Bytes>) {
        self.lock().values.insert(handle, value.into());
    }

    pub fn value(&self, handle: u16) -> Option<Bytes> {
        self.lock().values.get(&handle).cloned()
    }

    /// Successive reads of `handle` return these packets before falling back
    /// to the stored value.
    pub fn script_reads<I, B>(&self, handle: u16, packets: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.lock()
            .scripted_reads
            .entry(handle)
            .or_default()
            .extend(packets.into_iter().map(Into::into));
    }

    /// Every write to `written` is pushed back as a value change on `notified`.
    pub fn echo_writes(&self, written: u16, notified: u16) {
        self.lock().echo.insert(written, notified);
    }

    pub fn set_max_mtu(&self, mtu: u16) {
        self.lock().max_mtu = Some(mtu);
    }

    pub fn set_rssi(&self, rssi: i8) {
        self.lock().rssi = rssi;
    }

    /// The next `count` connection attempts fail with `status`.
    pub fn fail_connects(&self, count: usize, status: GattStatus) {
        self.lock()
            .connect_failures
            .extend(std::iter::repeat(status).take(count));
    }

    /// The next command of `kind` completes with `status`.
    pub fn fail_next(&self, kind: OperationKind, status: GattStatus) {
        self.lock().failures.entry(kind).or_default().push_back(status);
    }

    /// The next command of `kind` is accepted but never answered.
    pub fn stall_next(&self, kind: OperationKind) {
        *self.lock().stalls.entry(kind).or_default() += 1;
    }

    /// Answers a stalled command.
    pub fn complete_pending(&self, status: GattStatus, response: Response) {
        self.emit(DriverEvent::OperationCompleted { status, response });
    }

    pub fn emit(&self, event: DriverEvent) {
        self.lock().deliver(event);
    }

    pub fn notify(&self, handle: u16, value: impl Into<Bytes>) {
        self.emit(DriverEvent::ValueChanged {
            handle,
            value: value.into(),
            indication: false,
        });
    }

    pub fn indicate(&self, handle: u16, value: impl Into<Bytes>) {
        self.emit(DriverEvent::ValueChanged {
            handle,
            value: value.into(),
            indication: true,
        });
    }

    /// Drops the link as if the peer went out of range.
    pub fn drop_link(&self, status: GattStatus) {
        let mut state = self.lock();
        state.connected = false;
        state.reliable = None;
        state.deliver(DriverEvent::Disconnected { status });
    }

    pub fn set_adapter_enabled(&self, enabled: bool) {
        let mut state = self.lock();
        state.adapter_disabled = !enabled;
        if !enabled {
            state.connected = false;
            state.reliable = None;
        }
        state.deliver(DriverEvent::AdapterStateChanged { enabled });
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_notifying(&self, handle: u16) -> bool {
        self.lock().notifying.contains(&handle)
    }

    pub fn is_indicating(&self, handle: u16) -> bool {
        self.lock().indicating.contains(&handle)
    }

    /// Every command issued so far, in order.
    pub fn commands(&self) -> Vec<GattCommand> {
        self.lock().log.clone()
    }

    pub fn command_kinds(&self) -> Vec<OperationKind> {
        self.lock().log.iter().map(GattCommand::kind).collect()
    }

    /// Payloads written to `handle`, one entry per chunk.
    pub fn writes(&self, handle: u16) -> Vec<Bytes> {
        self.lock()
            .log
            .iter()
            .filter_map(|command| match command {
                GattCommand::Write { handle: h, value, .. }
                | GattCommand::WriteDescriptor { handle: h, value }
                    if *h == handle =>
                {
                    Some(value.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|command| matches!(command, GattCommand::Connect { .. }))
            .count()
    }
}

impl Default for SimPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

/// The driver half of a [`SimPeripheral`].
pub struct SimDriver {
    state: Arc<Mutex<SimState>>,
}

impl GattDriver for SimDriver {
    fn attach(&mut self, events: EventSink) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sink = Some(events);
    }

    fn issue(&mut self, command: GattCommand) -> Result<(), GattStatus> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.log.push(command.clone());

        if state.adapter_disabled {
            return Err(GattStatus::BLUETOOTH_DISABLED);
        }

        let kind = command.kind();
        if state.take_stall(kind) {
            log::debug!("Simulated peripheral stalling {:?}", kind);
            return Ok(());
        }
        if !matches!(kind, OperationKind::Connect | OperationKind::Disconnect) {
            if let Some(status) = state.take_failure(kind) {
                state.deliver(DriverEvent::OperationCompleted {
                    status,
                    response: Response::None,
                });
                return Ok(());
            }
        }

        state.respond(command)
    }
}
