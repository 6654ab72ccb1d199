//! The task that owns the transport
//!
//! All driver events, timer expiries and client commands are funnelled into
//! one loop. Each step runs to completion before the next one is taken, so
//! operation state is only ever touched from here.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};

use crate::attribute::{Attribute, Peer};
use crate::client::{LinkStatus, Notification};
use crate::config::GattConfig;
use crate::data::Data;
use crate::driver::{DriverEvent, EventSink, GattCommand, GattDriver, Response};
use crate::error::{Failure, GattStatus};
use crate::operation::{
    Accepted, Body, DeliveryScope, OpValue, Operation, OperationId, OperationKind, Outcome,
};
use crate::queue::Job;

/// Requests from clients and handles.
pub(crate) enum Command {
    Enqueue(Job),
    Cancel(OperationId),
    /// A blocking waiter gave up on this operation.
    Abandon(OperationId),
    CancelAll,
}

#[derive(Debug, Clone, Copy)]
enum TimerEvent {
    Deadline(OperationId),
    Retry(OperationId),
}

/// Where a running operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Job,
    Member(OperationId),
    Trigger,
}

struct InFlight {
    op: Operation,
    origin: Origin,
    /// A failed connect attempt waiting for its retry delay.
    retry_pending: bool,
}

impl InFlight {
    fn new(op: Operation, origin: Origin) -> Self {
        Self {
            op,
            origin,
            retry_pending: false,
        }
    }

    fn id(&self) -> OperationId {
        self.op.id()
    }

    fn kind(&self) -> OperationKind {
        self.op.kind
    }
}

/// Details of an operation that ran out of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedOut {
    pub id: OperationId,
    pub kind: OperationKind,
    /// Whether the operation had a command outstanding on the transport.
    pub in_flight: bool,
}

/// What the dispatcher should do after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Tear the link down. Pending operations fail as disconnected.
    Disconnect,
    /// Keep the link. An operation that held the transport keeps blocking
    /// the queue until its late completion arrives.
    Ignore,
}

/// Decides how a timeout is escalated.
pub trait TimeoutHandler: Send + 'static {
    fn on_operation_timeout(&mut self, timed_out: &TimedOut) -> Escalation;
}

impl<F> TimeoutHandler for F
where
    F: FnMut(&TimedOut) -> Escalation + Send + 'static,
{
    fn on_operation_timeout(&mut self, timed_out: &TimedOut) -> Escalation {
        self(timed_out)
    }
}

/// Disconnects whenever the timed-out operation held the transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectOnTimeout;

impl TimeoutHandler for DisconnectOnTimeout {
    fn on_operation_timeout(&mut self, timed_out: &TimedOut) -> Escalation {
        if timed_out.in_flight {
            Escalation::Disconnect
        } else {
            Escalation::Ignore
        }
    }
}

struct LinkState {
    peer: Option<Peer>,
    connected: bool,
    adapter_enabled: bool,
    mtu: u16,
    /// A disconnect was forced and its event has not arrived yet.
    disconnecting: bool,
}

enum Step {
    Command(Command),
    CommandsClosed,
    Event(DriverEvent),
    DriverGone,
    Timer(TimerEvent),
}

/// What a successful completion leads to.
enum Next {
    Finish(Outcome),
    Reissue,
}

pub(crate) struct Dispatcher {
    driver: Box<dyn GattDriver>,
    config: GattConfig,
    handler: Box<dyn TimeoutHandler>,
    link: LinkState,
    jobs: VecDeque<Job>,
    current: Option<InFlight>,
    awaiting: Option<InFlight>,
    /// A timed-out operation whose completion the driver still owes.
    orphan: Option<OperationId>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<DriverEvent>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    notifications: broadcast::Sender<Notification>,
    status: watch::Sender<LinkStatus>,
    closing: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        mut driver: Box<dyn GattDriver>,
        config: GattConfig,
        handler: Box<dyn TimeoutHandler>,
        commands: mpsc::UnboundedReceiver<Command>,
        notifications: broadcast::Sender<Notification>,
        status: watch::Sender<LinkStatus>,
    ) -> Self {
        let (sink, events) = EventSink::channel();
        driver.attach(sink);
        let (timer_tx, timers) = mpsc::unbounded_channel();

        Self {
            driver,
            link: LinkState {
                peer: None,
                connected: false,
                adapter_enabled: true,
                mtu: config.initial_mtu,
                disconnecting: false,
            },
            config,
            handler,
            jobs: VecDeque::new(),
            current: None,
            awaiting: None,
            orphan: None,
            commands,
            events,
            timers,
            timer_tx,
            notifications,
            status,
            closing: false,
        }
    }

    pub(crate) async fn run(mut self) {
        log::debug!("GATT dispatcher started");
        loop {
            if self.closing && self.is_idle() {
                break;
            }

            let step = tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::DriverGone,
                },
                Some(timer) = self.timers.recv() => Step::Timer(timer),
                command = self.commands.recv(), if !self.closing => match command {
                    Some(command) => Step::Command(command),
                    None => Step::CommandsClosed,
                },
            };

            let _scope = DeliveryScope::enter();
            match step {
                Step::Command(command) => self.on_command(command),
                Step::CommandsClosed => {
                    log::debug!("All clients dropped, draining {} job(s)", self.jobs.len());
                    self.closing = true;
                }
                Step::Event(event) => self.on_event(event),
                Step::DriverGone => {
                    log::warn!("Driver dropped its event sink");
                    self.link.connected = false;
                    self.shutdown(Failure::Status(GattStatus::DEVICE_DISCONNECTED));
                    return;
                }
                Step::Timer(timer) => self.on_timer(timer),
            }
            self.pump();
        }

        let _scope = DeliveryScope::enter();
        self.shutdown(Failure::Status(GattStatus::CANCELLED));
    }

    fn is_idle(&self) -> bool {
        self.jobs.is_empty() && self.current.is_none() && self.awaiting.is_none()
    }

    fn is_busy(&self) -> bool {
        self.current.is_some()
            || self.awaiting.is_some()
            || self.orphan.is_some()
            || self.link.disconnecting
    }

    fn shutdown(&mut self, failure: Failure) {
        self.fail_all(failure);
        if self.link.connected {
            if let Err(status) = self.driver.issue(GattCommand::Disconnect) {
                log::warn!("Failed to disconnect on shutdown: {}", status);
            }
            self.link.connected = false;
        }
        self.publish();
        log::info!("GATT dispatcher stopped");
    }

    fn publish(&self) {
        self.status.send_replace(LinkStatus {
            peer: self.link.peer.clone(),
            connected: self.link.connected,
            adapter_enabled: self.link.adapter_enabled,
            mtu: self.link.mtu,
        });
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Starts queued work until something occupies the transport.
    fn pump(&mut self) {
        loop {
            self.poll_awaiting();
            if self.is_busy() || !self.start_next() {
                break;
            }
        }
    }

    fn start_next(&mut self) -> bool {
        let peer = self.link.peer.clone();
        let Some(front) = self.jobs.front_mut() else {
            return false;
        };

        if let Job::Single(_) = front {
            if let Some(Job::Single(op)) = self.jobs.pop_front() {
                self.start(op, Origin::Job);
            }
            return true;
        }

        if !front.core().is_started() {
            match &peer {
                Some(peer) => front.core_mut().notify_started(peer),
                // A queue may open with its own connect.
                None => front.core_mut().mark_started(),
            }
        }

        let job_id = front.id();
        match front.next_member() {
            Some(member) => self.start(member, Origin::Member(job_id)),
            None => {
                if let Some(job) = self.jobs.pop_front() {
                    log::debug!("Queue {} drained", job_id);
                    job.complete(self.link.peer.as_ref());
                }
            }
        }
        true
    }

    fn start(&mut self, mut op: Operation, origin: Origin) {
        if let Body::Connect(state) = &op.body {
            if !self.link.connected && self.link.peer.as_ref() != Some(state.peer()) {
                self.link.peer = Some(state.peer().clone());
                self.publish();
            }
        }

        let Some(peer) = self.link.peer.clone() else {
            log::warn!("Operation {} ({:?}) has no peer to run against", op.id(), op.kind);
            return self.finish(InFlight::new(op, origin), Err(Failure::Invalid));
        };
        if !op.validate_target() {
            log::warn!(
                "Operation {} ({:?}) has no usable target attribute",
                op.id(),
                op.kind
            );
            return self.finish(InFlight::new(op, origin), Err(Failure::Invalid));
        }

        op.core.notify_started(&peer);
        let mut flight = InFlight::new(op, origin);
        let kind = flight.kind();

        if !self.link.adapter_enabled {
            return self.finish(
                flight,
                Err(Failure::Status(GattStatus::BLUETOOTH_DISABLED)),
            );
        }
        if kind.requires_connection() && !self.link.connected {
            return self.finish(
                flight,
                Err(Failure::Status(GattStatus::DEVICE_DISCONNECTED)),
            );
        }

        log::debug!("Starting operation {} ({:?})", flight.id(), kind);
        match kind {
            OperationKind::Connect if self.link.connected => {
                self.finish(flight, Ok(OpValue::None));
            }
            OperationKind::Disconnect if !self.link.connected => {
                self.finish(flight, Ok(OpValue::None));
            }
            OperationKind::Sleep => {
                let delay = match flight.op.body {
                    Body::Sleep(delay) => delay,
                    _ => Duration::ZERO,
                };
                self.arm_deadline(&mut flight, Some(delay));
                self.current = Some(flight);
            }
            _ if kind.is_wait() => {
                let timeout = flight.op.core.timeout();
                self.arm_deadline(&mut flight, timeout);
                let trigger = match &mut flight.op.body {
                    Body::Wait(wait) => wait.take_trigger(),
                    _ => None,
                };
                self.awaiting = Some(flight);
                if let Some(trigger) = trigger {
                    self.start(trigger, Origin::Trigger);
                }
            }
            _ => {
                if let Body::Mtu(mtu) = &mut flight.op.body {
                    *mtu = (*mtu).min(self.config.max_mtu);
                }
                let timeout = flight.op.core.timeout();
                self.arm_deadline(&mut flight, timeout);
                self.issue(flight);
            }
        }
    }

    fn issue(&mut self, mut flight: InFlight) {
        let Some(command) = flight.op.next_command(self.link.mtu) else {
            log::warn!(
                "Operation {} ({:?}) produced nothing to send",
                flight.id(),
                flight.kind()
            );
            return self.finish(flight, Err(Failure::Status(GattStatus::REQUEST_FAILED)));
        };

        log::debug!("Issuing {:?} for operation {}", command.kind(), flight.id());
        match self.driver.issue(command) {
            Ok(()) => self.current = Some(flight),
            Err(status) if flight.kind() == OperationKind::Connect => {
                self.current = Some(flight);
                self.on_connect_failed(status);
            }
            Err(status) => {
                log::warn!("Driver rejected operation {}: {}", flight.id(), status);
                self.finish(flight, Err(Failure::Status(status)));
            }
        }
    }

    fn finish(&mut self, mut flight: InFlight, outcome: Outcome) {
        let peer = self.link.peer.clone();
        let id = flight.id();
        let Some(settled) = flight.op.core.settle(peer.as_ref(), outcome) else {
            return;
        };

        match &settled {
            Ok(_) => log::debug!("Operation {} ({:?}) completed", id, flight.kind()),
            Err(failure) => log::debug!(
                "Operation {} ({:?}) failed: {:?}",
                id,
                flight.kind(),
                failure
            ),
        }

        if let (Origin::Member(job_id), Err(failure)) = (flight.origin, settled) {
            if let Some(job) = self.jobs.iter_mut().find(|job| job.id() == job_id) {
                job.member_failed(peer.as_ref(), failure);
            }
        }
    }

    fn fail_all(&mut self, failure: Failure) {
        let peer = self.link.peer.clone();
        for job in std::mem::take(&mut self.jobs) {
            job.discard(peer.as_ref(), failure);
        }
        if let Some(flight) = self.current.take() {
            self.finish(flight, Err(failure));
        }
        if let Some(flight) = self.awaiting.take() {
            self.finish(flight, Err(failure));
        }
        self.orphan = None;
    }

    fn arm_deadline(&self, flight: &mut InFlight, timeout: Option<Duration>) {
        let Some(timeout) = timeout else {
            return;
        };
        let id = flight.id();
        let timers = self.timer_tx.clone();
        flight.op.core.timer.arm(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timers.send(TimerEvent::Deadline(id));
        }));
    }

    fn schedule_retry(&self, id: OperationId, delay: Duration) {
        let timers = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(TimerEvent::Retry(id));
        });
    }

    fn take_current_if(&mut self, kind: OperationKind) -> Option<InFlight> {
        match &self.current {
            Some(flight) if flight.kind() == kind && !flight.retry_pending => self.current.take(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(job) => {
                log::debug!("Enqueued operation {}", job.id());
                self.jobs.push_back(job);
            }
            Command::Cancel(id) => self.cancel(id),
            Command::Abandon(id) => self.abandon(id),
            Command::CancelAll => self.cancel_all(),
        }
    }

    fn cancel(&mut self, id: OperationId) {
        let peer = self.link.peer.clone();
        let Some(position) = self.jobs.iter().position(|job| job.id() == id) else {
            log::debug!("Operation {} is running or finished, not cancelled", id);
            return;
        };

        if self.jobs[position].core().is_started() {
            log::debug!("Cancelling remaining members of queue {}", id);
            self.jobs[position].cancel_members(peer.as_ref());
        } else if let Some(job) = self.jobs.remove(position) {
            log::debug!("Cancelled operation {}", id);
            job.discard(peer.as_ref(), Failure::Status(GattStatus::CANCELLED));
        }
    }

    fn cancel_all(&mut self) {
        let peer = self.link.peer.clone();
        let cancelled = Failure::Status(GattStatus::CANCELLED);
        log::debug!("Cancelling {} pending job(s)", self.jobs.len());
        for mut job in std::mem::take(&mut self.jobs) {
            if job.core().is_started() {
                job.cancel_members(peer.as_ref());
                self.jobs.push_back(job);
            } else {
                job.discard(peer.as_ref(), cancelled);
            }
        }
    }

    fn abandon(&mut self, id: OperationId) {
        let Some(position) = self.jobs.iter().position(|job| job.id() == id) else {
            return self.on_deadline(id, true);
        };
        let Some(job) = self.jobs.remove(position) else {
            return;
        };

        let kind = match &job {
            Job::Single(op) => Some(op.kind),
            Job::Queue(_) | Job::Reliable(_) => None,
        };
        log::warn!("Operation {} timed out before it started", id);
        job.discard(
            self.link.peer.as_ref(),
            Failure::Status(GattStatus::TIMEOUT),
        );
        if let Some(kind) = kind {
            self.escalate(TimedOut {
                id,
                kind,
                in_flight: false,
            });
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::Deadline(id) => self.on_deadline(id, false),
            TimerEvent::Retry(id) => self.on_retry(id),
        }
    }

    fn on_deadline(&mut self, id: OperationId, from_waiter: bool) {
        if self.current.as_ref().map(InFlight::id) == Some(id) {
            let Some(flight) = self.current.take() else {
                return;
            };
            if flight.kind() == OperationKind::Sleep && !from_waiter {
                return self.finish(flight, Ok(OpValue::None));
            }
            let held = !flight.retry_pending;
            self.time_out(flight, held);
        } else if self.awaiting.as_ref().map(InFlight::id) == Some(id) {
            if let Some(flight) = self.awaiting.take() {
                self.time_out(flight, false);
            }
        }
    }

    fn time_out(&mut self, flight: InFlight, in_flight: bool) {
        let timed_out = TimedOut {
            id: flight.id(),
            kind: flight.kind(),
            in_flight,
        };
        log::warn!("Operation {} ({:?}) timed out", timed_out.id, timed_out.kind);
        self.finish(flight, Err(Failure::Status(GattStatus::TIMEOUT)));
        self.escalate(timed_out);
    }

    fn escalate(&mut self, timed_out: TimedOut) {
        match self.handler.on_operation_timeout(&timed_out) {
            Escalation::Disconnect => self.force_disconnect(),
            Escalation::Ignore if timed_out.in_flight => {
                log::debug!(
                    "Holding the queue until operation {} completes",
                    timed_out.id
                );
                self.orphan = Some(timed_out.id);
            }
            Escalation::Ignore => {}
        }
    }

    fn force_disconnect(&mut self) {
        log::warn!("Forcing disconnect after timeout");
        self.orphan = None;
        match self.driver.issue(GattCommand::Disconnect) {
            Ok(()) => self.link.disconnecting = true,
            Err(status) => {
                log::warn!("Driver refused to disconnect: {}", status);
                if self.link.connected {
                    self.link.connected = false;
                    self.publish();
                    self.on_link_lost();
                }
            }
        }
    }

    fn on_retry(&mut self, id: OperationId) {
        let peer = self.link.peer.clone();
        let Some(flight) = self.current.as_mut() else {
            return;
        };
        if flight.id() != id || !flight.retry_pending {
            return;
        }
        flight.retry_pending = false;
        if let Some(peer) = &peer {
            flight.op.core.notify_started(peer);
        }
        if let Some(flight) = self.current.take() {
            self.issue(flight);
        }
    }

    // ------------------------------------------------------------------
    // Driver events
    // ------------------------------------------------------------------

    fn on_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected => self.on_connected(),
            DriverEvent::ConnectionFailed { status } => {
                if self.orphan.take().is_some() {
                    log::debug!("Discarding late connection failure: {}", status);
                    return;
                }
                self.on_connect_failed(status);
            }
            DriverEvent::Disconnected { status } => self.on_disconnected(status),
            DriverEvent::OperationCompleted { status, response } => {
                self.on_completed(status, response)
            }
            DriverEvent::ValueChanged {
                handle,
                value,
                indication,
            } => self.on_value_changed(handle, value, indication),
            DriverEvent::AdapterStateChanged { enabled } => self.on_adapter_state(enabled),
        }
    }

    fn on_connected(&mut self) {
        self.orphan = None;
        self.link.connected = true;
        self.link.mtu = self.config.initial_mtu;
        if let Some(peer) = &self.link.peer {
            log::info!("Connected to {}", peer);
        }
        self.publish();

        if let Some(flight) = self.take_current_if(OperationKind::Connect) {
            self.finish(flight, Ok(OpValue::None));
        }
    }

    fn on_connect_failed(&mut self, status: GattStatus) {
        let Some(mut flight) = self.take_current_if(OperationKind::Connect) else {
            log::debug!("Ignoring connection failure with no connect in flight: {}", status);
            return;
        };
        let Body::Connect(state) = &mut flight.op.body else {
            return self.finish(flight, Err(Failure::Status(status)));
        };

        let attempts = state.attempts();
        if status == GattStatus::UNREACHABLE {
            log::warn!("Peer unreachable after {} attempt(s)", attempts);
            return self.finish(flight, Err(Failure::Status(GattStatus::TIMEOUT)));
        }
        if status == GattStatus::BLUETOOTH_DISABLED || !state.can_retry() {
            log::warn!("Connection failed after {} attempt(s): {}", attempts, status);
            return self.finish(flight, Err(Failure::Status(status)));
        }

        state.consume_retry();
        let delay = state.retry_delay();
        log::info!(
            "Connection attempt {} failed ({}), retrying in {:?}",
            attempts,
            status,
            delay
        );
        flight.retry_pending = true;
        let id = flight.id();
        self.current = Some(flight);
        self.schedule_retry(id, delay);
    }

    fn on_disconnected(&mut self, status: GattStatus) {
        if self.orphan.take().is_some() {
            log::debug!("Timed-out operation dropped by disconnect");
        }
        let was_connected = self.link.connected;
        self.link.connected = false;
        self.link.disconnecting = false;

        match self.current.as_ref().map(InFlight::kind) {
            Some(OperationKind::Connect) if !was_connected => {
                self.publish();
                return self.on_connect_failed(status);
            }
            Some(OperationKind::Disconnect) => {
                if let Some(peer) = &self.link.peer {
                    log::info!("Disconnected from {}", peer);
                }
                self.publish();
                if let Some(flight) = self.current.take() {
                    self.finish(flight, Ok(OpValue::None));
                }
                if let Some(flight) = self.awaiting.take() {
                    self.finish(flight, Err(Failure::Status(GattStatus::DEVICE_DISCONNECTED)));
                }
                return;
            }
            _ => {}
        }

        self.publish();
        if was_connected {
            log::warn!("Link lost: {}", status);
            self.on_link_lost();
        }
    }

    /// Fails everything that needed the link. Pending connects survive.
    fn on_link_lost(&mut self) {
        let peer = self.link.peer.clone();
        let failure = Failure::Status(GattStatus::DEVICE_DISCONNECTED);

        let (keep, lost): (VecDeque<Job>, VecDeque<Job>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(Job::is_connect);
        self.jobs = keep;
        for job in lost {
            job.discard(peer.as_ref(), failure);
        }

        if let Some(flight) = self.current.take() {
            self.finish(flight, Err(failure));
        }
        if let Some(flight) = self.awaiting.take() {
            self.finish(flight, Err(failure));
        }
    }

    fn on_completed(&mut self, status: GattStatus, response: Response) {
        if let Some(id) = self.orphan.take() {
            log::debug!("Discarding late completion of operation {}: {}", id, status);
            return;
        }
        let Some(mut flight) = self.current.take() else {
            log::warn!("Completion ({}) with no operation in flight", status);
            return;
        };
        if flight.retry_pending || flight.kind() == OperationKind::Sleep {
            log::warn!("Unexpected completion ({}) during {:?}", status, flight.kind());
            self.current = Some(flight);
            return;
        }

        match flight.kind() {
            OperationKind::Connect if status.is_success() => {
                self.current = Some(flight);
                return self.on_connected();
            }
            OperationKind::Connect => {
                self.current = Some(flight);
                return self.on_connect_failed(status);
            }
            OperationKind::Disconnect => {
                self.current = Some(flight);
                return self.on_disconnected(status);
            }
            _ => {}
        }

        if !status.is_success() {
            return self.finish(flight, Err(Failure::Status(status)));
        }

        let peer = self.link.peer.clone();
        let next = match &mut flight.op.body {
            Body::Write(state) => {
                if let Some(peer) = &peer {
                    state.notify_sent(peer);
                }
                if state.is_complete() {
                    Next::Finish(Ok(OpValue::Data(Data::new(state.payload().clone()))))
                } else {
                    Next::Reissue
                }
            }
            Body::Read(reassembly) => {
                let value = match response {
                    Response::Value(value) => value,
                    _ => Bytes::new(),
                };
                let accepted = match &peer {
                    Some(peer) => reassembly.accept(peer, &value),
                    None => Accepted::Rejected,
                };
                match accepted {
                    Accepted::Complete(data) => Next::Finish(Ok(OpValue::Data(data))),
                    Accepted::Partial | Accepted::Rejected => Next::Reissue,
                }
            }
            _ => {
                if let Response::Mtu(mtu) = response {
                    log::info!("MTU changed to {}", mtu);
                    self.link.mtu = mtu;
                    self.publish();
                }
                Next::Finish(Ok(response.into()))
            }
        };

        match next {
            Next::Finish(outcome) => self.finish(flight, outcome),
            Next::Reissue => self.issue(flight),
        }
    }

    fn on_value_changed(&mut self, handle: u16, value: Bytes, indication: bool) {
        let _ = self.notifications.send(Notification {
            handle,
            value: Data::new(value.clone()),
            indication,
        });

        let Some(peer) = self.link.peer.clone() else {
            return;
        };
        let Some(flight) = self.awaiting.as_mut() else {
            return;
        };
        if flight.op.target().map(Attribute::handle) != Some(handle) {
            return;
        }
        let Body::Wait(wait) = &mut flight.op.body else {
            return;
        };

        if let Some(data) = wait.on_value(&peer, &value) {
            if let Some(flight) = self.awaiting.take() {
                self.finish(flight, Ok(OpValue::Data(data)));
            }
        }
    }

    fn on_adapter_state(&mut self, enabled: bool) {
        self.link.adapter_enabled = enabled;
        if enabled {
            log::info!("Bluetooth adapter enabled");
            self.publish();
            return;
        }

        log::warn!("Bluetooth adapter disabled");
        self.link.connected = false;
        self.link.disconnecting = false;
        self.publish();
        self.fail_all(Failure::Status(GattStatus::BLUETOOTH_DISABLED));
    }

    /// Resolves the awaiting wait from its trigger's progress.
    fn poll_awaiting(&mut self) {
        let Some(flight) = self.awaiting.as_mut() else {
            return;
        };
        let Body::Wait(wait) = &mut flight.op.body else {
            return;
        };

        if let Some(result) = wait.resolve() {
            if let Some(flight) = self.awaiting.take() {
                self.finish(flight, result.map(OpValue::Data));
            }
        }
    }
}
