/// Simulation run loop.
///
/// Pops queued deliveries in `(deliver_at, sequence)` order, advances the
/// clock, moves each message across its hop and hands it to a
/// user-supplied handler. Timeouts skip the hop and go straight to the
/// handler at the node that set them. The loop is synchronous and single-threaded;
/// handlers call back into the messaging facade through a
/// [`DeliveryContext`].

use std::net::IpAddr;
use std::rc::Rc;

use crate::config::SimConfig;
use crate::error::{SchedulingError, SimResult, ValidationError};
use crate::event::Sequence;
use crate::message::{Action, AuthToken, Message, Status};
use crate::messaging::{Messaging, MessagingProxy, SendOutcome};
use crate::network::{NodeId, Session, Topology};
use crate::time::VirtualTime;
use crate::trace::{DeliveryTrace, TraceEntry};

// ── Handler trait ─────────────────────────────────────────────────────

/// Node logic reacting to delivered messages.
///
/// The handler owns each message it is given: it may drop it, forward
/// it, or answer it through the context.
pub trait DeliveryHandler<T: Topology> {
    fn deliver(&mut self, ctx: &mut DeliveryContext<'_, T>, message: Message) -> SimResult<()>;
}

/// A handler backed by a closure — useful for tests and one-off scripts.
impl<T, F> DeliveryHandler<T> for F
where
    T: Topology,
    F: FnMut(&mut DeliveryContext<'_, T>, Message) -> SimResult<()>,
{
    fn deliver(&mut self, ctx: &mut DeliveryContext<'_, T>, message: Message) -> SimResult<()> {
        (self)(ctx, message)
    }
}

// ── Delivery Context ─────────────────────────────────────────────────

/// Mutable context passed to the handler on every delivery.
pub struct DeliveryContext<'a, T: Topology> {
    messaging: &'a mut Messaging<T>,
    now: VirtualTime,
    sequence: Sequence,
}

impl<'a, T: Topology> DeliveryContext<'a, T> {
    /// Current virtual time.
    #[inline]
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Sequence of the delivery being handled.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    pub fn topology(&self) -> &T {
        self.messaging.topology()
    }

    pub fn messaging(&mut self) -> &mut Messaging<T> {
        self.messaging
    }

    /// A facade handle sending as `service` on `node`.
    pub fn proxy(&mut self, node: impl Into<NodeId>, service: impl Into<String>) -> MessagingProxy<'_, T> {
        self.messaging.proxy(node, service)
    }

    pub fn create_request(
        &mut self,
        origin: impl Into<NodeId>,
        src_service: impl Into<String>,
        dst_ip: IpAddr,
        dst_service: impl Into<String>,
        action: Action,
    ) -> Message {
        self.messaging
            .create_request(origin, src_service, dst_ip, dst_service, action, None, None)
    }

    pub fn create_response(
        &mut self,
        request: &Message,
        status: Status,
        content: Option<String>,
        session: Option<Rc<Session>>,
        auth: Option<AuthToken>,
    ) -> Result<Message, ValidationError> {
        self.messaging.create_response(request, status, content, session, auth)
    }

    pub fn open_session(&self, request: &Message) -> SimResult<Rc<Session>> {
        self.messaging.open_session(request)
    }

    pub fn send_message(&mut self, message: Message, delay: i64) -> SimResult<SendOutcome> {
        self.messaging.send_message(message, delay)
    }

    pub fn forward(&mut self, message: Message, delay: i64) -> SimResult<SendOutcome> {
        self.messaging.forward(message, delay)
    }

    pub fn schedule_timeout(
        &mut self,
        node: impl Into<NodeId>,
        service: impl Into<String>,
        delay: i64,
        parameter: Option<String>,
    ) -> SimResult<SendOutcome> {
        self.messaging.schedule_timeout(node, service, delay, parameter)
    }

    /// Number of pending deliveries.
    pub fn pending_count(&self) -> usize {
        self.messaging.pending()
    }
}

// ── Simulation ────────────────────────────────────────────────────────

/// Lifecycle of a [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum SimState {
    /// Created, nothing delivered yet.
    Init,
    Running,
    /// Stopped on a pause request; the queue is intact.
    Paused,
    /// The queue ran dry.
    Finished,
    /// Stopped for good; queue cleared and clock rewound.
    Terminated,
}

impl std::fmt::Display for SimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SimState::Init => "init",
            SimState::Running => "running",
            SimState::Paused => "paused",
            SimState::Finished => "finished",
            SimState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Top-level simulation driver.
///
/// Owns the messaging facade (and through it the scheduler and the
/// topology). Call `run` to deliver until the queue drains or a pause is
/// requested, or `step` to deliver exactly one message.
#[derive(Debug)]
pub struct Simulation<T: Topology> {
    messaging: Messaging<T>,
    state: SimState,
    run_id: String,
    deliveries: u64,
    trace: DeliveryTrace,
}

impl<T: Topology> Simulation<T> {
    /// Create a simulation with a default configuration.
    pub fn new(topology: T) -> Self {
        Self::with_config(topology, SimConfig::new())
    }

    pub fn with_config(topology: T, config: SimConfig) -> Self {
        let messaging = Messaging::with_config(topology, &config);
        Simulation {
            messaging,
            state: SimState::Init,
            run_id: config.run_id,
            deliveries: 0,
            trace: DeliveryTrace::new(),
        }
    }

    /// The facade, e.g. for seeding initial messages.
    pub fn messaging(&mut self) -> &mut Messaging<T> {
        &mut self.messaging
    }

    pub fn topology(&self) -> &T {
        self.messaging.topology()
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn current_time(&self) -> VirtualTime {
        self.messaging.now()
    }

    /// Total messages delivered so far.
    pub fn deliveries(&self) -> u64 {
        self.deliveries
    }

    pub fn trace(&self) -> &DeliveryTrace {
        &self.trace
    }

    /// Returns `true` if there are no more deliveries to process.
    pub fn is_finished(&self) -> bool {
        self.messaging.scheduler().is_empty()
    }

    /// Deliver a single message: pop it, advance time, move it across
    /// its hop, dispatch.
    ///
    /// Returns the trace record of the delivery, or `None` if the queue
    /// is empty.
    pub fn step(&mut self, handler: &mut dyn DeliveryHandler<T>) -> SimResult<Option<TraceEntry>> {
        let entry = match self.messaging.scheduler_mut().pop_earliest() {
            Ok(entry) => entry,
            Err(SchedulingError::EmptyQueue) => {
                self.set_state(SimState::Finished);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if matches!(self.state, SimState::Init | SimState::Paused) {
            self.set_state(SimState::Running);
        }

        let deliver_at = entry.deliver_at;
        let sequence = entry.sequence;
        self.messaging.scheduler_mut().advance_to(deliver_at)?;

        let mut message = entry.into_message();
        if !matches!(message, Message::Timeout(_)) {
            message.arrive();
        }

        let record = TraceEntry::new(deliver_at, sequence, &message);
        tracing::trace!(delivery = %record, "delivering");
        self.trace.record(record.clone());
        self.deliveries += 1;

        if self.messaging.pauses_on_delivery(&message) {
            tracing::info!(message = %message.id(), node = %record.node, "pause requested on response");
            self.messaging.request_pause();
        }

        let mut ctx = DeliveryContext {
            messaging: &mut self.messaging,
            now: deliver_at,
            sequence,
        };
        handler.deliver(&mut ctx, message)?;

        Ok(Some(record))
    }

    /// Deliver until the queue is empty or a pause is requested.
    ///
    /// Pause requests raised before the call are discarded. Returns the
    /// number of messages delivered during this call.
    pub fn run(&mut self, handler: &mut dyn DeliveryHandler<T>) -> SimResult<u64> {
        self.run_bounded(u64::MAX, handler)
    }

    /// Like [`run`](Self::run), but stops after at most `max_steps`
    /// deliveries.
    pub fn run_for(&mut self, max_steps: u64, handler: &mut dyn DeliveryHandler<T>) -> SimResult<u64> {
        self.run_bounded(max_steps, handler)
    }

    fn run_bounded(&mut self, max_steps: u64, handler: &mut dyn DeliveryHandler<T>) -> SimResult<u64> {
        self.messaging.take_pause_request();
        self.set_state(SimState::Running);

        let start = self.deliveries;
        while self.deliveries - start < max_steps {
            match self.step(handler) {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(run_id = %self.run_id, error = %e, "delivery failed, pausing");
                    self.set_state(SimState::Paused);
                    return Err(e);
                }
            }
            if self.messaging.take_pause_request() {
                self.set_state(SimState::Paused);
                break;
            }
        }
        if self.state == SimState::Running && self.is_finished() {
            self.set_state(SimState::Finished);
        }
        Ok(self.deliveries - start)
    }

    /// Stop the run: drop every pending delivery and rewind the clock.
    pub fn terminate(&mut self) {
        let dropped = self.messaging.pending();
        self.messaging.scheduler_mut().reset(VirtualTime::ZERO);
        self.messaging.take_pause_request();
        tracing::info!(run_id = %self.run_id, dropped, "terminating");
        self.set_state(SimState::Terminated);
    }

    fn set_state(&mut self, state: SimState) {
        if self.state != state {
            tracing::info!(run_id = %self.run_id, from = %self.state, to = %state, time = %self.messaging.now(), "state change");
            self.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RoutingError, SimError};
    use crate::message::MessageKind;
    use crate::network::StaticTopology;

    type Ctx<'a> = DeliveryContext<'a, StaticTopology>;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// h1 (10.0.0.2) — r2 (10.0.0.1 | 10.0.1.1) — h3 (10.0.1.2)
    fn line() -> StaticTopology {
        let mut t = StaticTopology::new();
        t.add_host(1).unwrap();
        t.add_router(2).unwrap();
        t.add_host(3).unwrap();
        t.add_interface(1, 0, ip("10.0.0.2"), 24).unwrap();
        t.add_interface(2, 0, ip("10.0.0.1"), 24).unwrap();
        t.add_interface(2, 1, ip("10.0.1.1"), 24).unwrap();
        t.add_interface(3, 0, ip("10.0.1.2"), 24).unwrap();
        t.connect(1, 0, 2, 0).unwrap();
        t.connect(2, 1, 3, 0).unwrap();
        t
    }

    fn seed(sim: &mut Simulation<StaticTopology>, delay: i64) {
        let m = sim.messaging();
        let msg = m.create_request(1, "client", ip("10.0.1.2"), "api", Action::new("app:get"), None, None);
        m.send_message(msg, delay).unwrap();
    }

    /// Routers forward, host 3 answers requests, everything else is absorbed.
    fn network_logic(log: &mut Vec<(u64, u64, MessageKind)>) -> impl FnMut(&mut Ctx<'_>, Message) -> SimResult<()> + '_ {
        move |ctx: &mut Ctx<'_>, msg: Message| -> SimResult<()> {
            let here = msg.current().node;
            log.push((ctx.now().ticks(), here.raw(), msg.kind()));
            if here == NodeId::new(2) {
                ctx.forward(msg, 1)?;
            } else if here == NodeId::new(3) && msg.kind() == MessageKind::Request {
                let resp = ctx.create_response(&msg, Status::ok(), None, None, None)?;
                ctx.send_message(resp, 1)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_request_response_round_trip() {
        let mut sim = Simulation::new(line());
        seed(&mut sim, 1);

        let mut log = Vec::new();
        let delivered = sim.run(&mut network_logic(&mut log)).unwrap();

        assert_eq!(delivered, 4);
        assert_eq!(
            log,
            vec![
                (1, 2, MessageKind::Request),
                (2, 3, MessageKind::Request),
                (3, 2, MessageKind::Response),
                (4, 1, MessageKind::Response),
            ]
        );
        assert_eq!(sim.state(), SimState::Finished);
        assert_eq!(sim.current_time(), VirtualTime::new(4));
    }

    #[test]
    fn test_step_by_step() {
        let mut sim = Simulation::new(line());
        seed(&mut sim, 5);

        let mut noop = |_ctx: &mut Ctx<'_>, _msg: Message| -> SimResult<()> { Ok(()) };

        let first = sim.step(&mut noop).unwrap().unwrap();
        assert_eq!(first.time, VirtualTime::new(5));
        assert_eq!(first.node, NodeId::new(2));
        assert_eq!(sim.current_time(), VirtualTime::new(5));
        assert_eq!(sim.state(), SimState::Running);

        assert!(sim.step(&mut noop).unwrap().is_none());
        assert_eq!(sim.state(), SimState::Finished);
    }

    #[test]
    fn test_run_for_limits_steps() {
        let mut sim = Simulation::new(line());
        for _ in 0..20 {
            seed(&mut sim, 1);
        }
        let mut noop = |_ctx: &mut Ctx<'_>, _msg: Message| -> SimResult<()> { Ok(()) };

        assert_eq!(sim.run_for(5, &mut noop).unwrap(), 5);
        assert_eq!(sim.deliveries(), 5);
        assert!(!sim.is_finished());
        assert_eq!(sim.state(), SimState::Running);
    }

    #[test]
    fn test_pause_on_request_stops_with_queue_intact() {
        let mut sim = Simulation::new(line());
        sim.messaging().register_pause(3, "api");
        seed(&mut sim, 1);

        // Host 3 audits every api request over loopback.
        let mut audit = |ctx: &mut Ctx<'_>, msg: Message| -> SimResult<()> {
            let here = msg.current().node;
            if here == NodeId::new(2) {
                ctx.forward(msg, 1)?;
            } else if msg.dst_service() == "api" {
                let mut api = ctx.proxy(here, "api");
                let note = api.create_request(crate::network::LOOPBACK, "audit", Action::new("log:write"), None, None);
                api.send_message(note, 1)?;
            }
            Ok(())
        };

        assert_eq!(sim.run(&mut audit).unwrap(), 2);
        assert_eq!(sim.state(), SimState::Paused);
        assert_eq!(sim.messaging().pending(), 1);

        assert_eq!(sim.run(&mut audit).unwrap(), 1);
        assert_eq!(sim.state(), SimState::Finished);
        assert_eq!(sim.trace().entries().last().map(|e| e.service.as_str()), Some("audit"));
    }

    #[test]
    fn test_pause_on_response_delivery() {
        let config = SimConfig::new().pause_on_response(2, "client");
        let mut sim = Simulation::with_config(line(), config);
        seed(&mut sim, 1);

        let mut log = Vec::new();
        let delivered = sim.run(&mut network_logic(&mut log)).unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(sim.state(), SimState::Paused);
        assert_eq!(log.last(), Some(&(3, 2, MessageKind::Response)));
    }

    #[test]
    fn test_terminate_clears_queue_and_time() {
        let mut sim = Simulation::new(line());
        seed(&mut sim, 1);
        seed(&mut sim, 9);
        let mut noop = |_ctx: &mut Ctx<'_>, _msg: Message| -> SimResult<()> { Ok(()) };
        sim.step(&mut noop).unwrap();

        sim.terminate();
        assert_eq!(sim.state(), SimState::Terminated);
        assert!(sim.is_finished());
        assert_eq!(sim.current_time(), VirtualTime::ZERO);
        assert_eq!(sim.trace().len(), 1);
    }

    #[test]
    fn test_handler_error_pauses() {
        let mut sim = Simulation::new(line());
        seed(&mut sim, 1);
        let mut failing = |_ctx: &mut Ctx<'_>, msg: Message| -> SimResult<()> {
            Err(RoutingError::ReturnPathExhausted { message: msg.id() }.into())
        };
        assert!(matches!(sim.run(&mut failing), Err(SimError::Routing(_))));
        assert_eq!(sim.state(), SimState::Paused);
    }

    #[test]
    fn test_start_time_from_config() {
        let config = SimConfig::new().start_time(VirtualTime::new(100)).run_id("fixed");
        let mut sim = Simulation::with_config(line(), config);
        assert_eq!(sim.run_id(), "fixed");
        seed(&mut sim, 3);
        let mut noop = |_ctx: &mut Ctx<'_>, _msg: Message| -> SimResult<()> { Ok(()) };
        let record = sim.step(&mut noop).unwrap().unwrap();
        assert_eq!(record.time, VirtualTime::new(103));
    }

    #[test]
    fn test_deterministic_replay() {
        fn run_once() -> (u64, Vec<TraceEntry>) {
            let mut sim = Simulation::with_config(line(), SimConfig::new().run_id("replay"));
            for delay in [5, 5, 3, 10] {
                seed(&mut sim, delay);
            }
            let mut log = Vec::new();
            sim.run(&mut network_logic(&mut log)).unwrap();
            (sim.trace().digest(), sim.trace().entries().to_vec())
        }

        let (d1, t1) = run_once();
        let (d2, t2) = run_once();
        assert_eq!(t1, t2, "simulation is not deterministic");
        assert_eq!(d1, d2);
        assert_eq!(t1.len(), 16);
    }

    #[test]
    fn test_timeout_wakes_service_in_place() {
        let mut sim = Simulation::with_config(line(), SimConfig::new().start_time(VirtualTime::new(10)));
        sim.messaging().schedule_timeout(1, "client", 4, Some("tick".into())).unwrap();
        seed(&mut sim, 4);

        let mut woken = Vec::new();
        let mut handler = |ctx: &mut Ctx<'_>, msg: Message| -> SimResult<()> {
            let Some(timeout) = msg.as_timeout() else {
                return Ok(());
            };
            woken.push((ctx.now().ticks(), msg.current().node.raw(), timeout.parameter().map(str::to_string)));
            if timeout.parameter() == Some("tick") {
                ctx.schedule_timeout(msg.current().node, "client", 2, Some("tock".into()))?;
                assert_eq!(ctx.pending_count(), 2);
            }
            Ok(())
        };
        assert_eq!(sim.run(&mut handler).unwrap(), 3);

        assert_eq!(
            woken,
            vec![(14, 1, Some("tick".to_string())), (16, 1, Some("tock".to_string()))]
        );
        // Set first, so it pops before the request due at the same tick.
        let kinds: Vec<MessageKind> = sim.trace().entries().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MessageKind::Timeout, MessageKind::Request, MessageKind::Timeout]);
        assert!(sim.trace().entries().iter().all(|e| e.kind != MessageKind::Timeout || e.node == NodeId::new(1)));
    }

    #[test]
    fn test_empty_simulation() {
        let mut sim = Simulation::new(line());
        let mut noop = |_ctx: &mut Ctx<'_>, _msg: Message| -> SimResult<()> { Ok(()) };
        assert_eq!(sim.run(&mut noop).unwrap(), 0);
        assert!(sim.is_finished());
        assert_eq!(sim.state(), SimState::Finished);
    }
}
