//! Engine task and its public handle.
//!
//! The [`CommsBuilder`] configures and spawns the engine. The engine is a
//! single tokio task that owns every piece of mutable state:
//! 1. Receive commands (sends, listeners, port events) in program order
//! 2. Drive the heartbeat timers
//! 3. Apply the transmission policy and connection state side effects
//!
//! [`Comms`] is the cheap, cloneable handle. None of its operations block.
//!
//! # Example
//!
//! ```ignore
//! use portlink::{Comms, MemoryPort};
//!
//! #[tokio::main]
//! async fn main() -> portlink::Result<()> {
//!     let comms = Comms::builder("1.0.0")
//!         .on_state_change(|state, reason| println!("{state}: {reason}"))
//!         .start()?;
//!
//!     comms.add_listener("greet", |name: String, respond| {
//!         respond.send(&format!("hello {name}"))
//!     })?;
//!
//!     comms.request("ping", &1u32, |pong: u32, _respond| {
//!         println!("pong {pong}");
//!         Ok(())
//!     })?;
//!
//!     let _link = comms.attach(MemoryPort::new())?;
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::PayloadCodec;
use crate::command::{Command, CommandRx};
use crate::config::CommsConfig;
use crate::correlation::CorrelationTable;
use crate::envelope::{Control, Envelope, QueryId};
use crate::error::{CommsError, Result};
use crate::handler::{
    typed_reply, validate_channel, ChannelRegistry, Handler, HandlerResult, Outlet, Payload,
    ReplyHandler, Responder, TypedHandler,
};
use crate::heartbeat::{HeartbeatEvent, HeartbeatMonitor};
use crate::identity::Identities;
use crate::port::{Port, PortId, PortLink};
use crate::queue::{OutboundQueue, UnclaimedQueue};
use crate::state::{
    ConnectionState, StateMachine, StateObserver, REASON_HEARTBEAT_FAILURE, REASON_PORT_ATTACHED,
    REASON_PORT_CLOSED, REASON_SEND_FAILED,
};

/// Snapshot of the engine's buffers and tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Current connection state.
    pub state: ConnectionState,
    /// Messages waiting for a connection.
    pub outbound_queued: usize,
    /// Inbound messages waiting for a subscriber.
    pub unclaimed: usize,
    /// Queries still waiting for a reply.
    pub pending_replies: usize,
    /// Channels with at least one subscriber.
    pub channels: usize,
}

/// Builder for configuring and starting an engine.
pub struct CommsBuilder {
    version: String,
    identities: Option<Identities>,
    config: CommsConfig,
    observer: Option<StateObserver>,
}

impl CommsBuilder {
    /// Create a builder for the given local version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            identities: None,
            config: CommsConfig::default(),
            observer: None,
        }
    }

    /// Set the local and remote identities.
    pub fn identities(mut self, identities: Identities) -> Self {
        self.identities = Some(identities);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CommsConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the payload codec.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: PayloadCodec) -> Self {
        self.config.codec = codec;
        self
    }

    /// Set the heartbeat period.
    ///
    /// Default: 1000 ms
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set how long to wait for the peer's heartbeat.
    ///
    /// Default: 1500 ms
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the unclaimed queue bound.
    ///
    /// Default: 1000
    pub fn unclaimed_capacity(mut self, capacity: usize) -> Self {
        self.config.unclaimed_capacity = capacity;
        self
    }

    /// Evict reply callbacks that stay unanswered for `timeout`.
    ///
    /// Default: never
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.config.reply_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Observe every connection state transition.
    pub fn on_state_change<F>(mut self, observer: F) -> Self
    where
        F: Fn(ConnectionState, &str) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Validate the configuration and spawn the engine task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<Comms> {
        if self.version.is_empty() {
            tracing::error!("Unable to start engine: version must not be empty");
            return Err(CommsError::Config("version must not be empty".into()));
        }
        if let Err(e) = self.config.validate() {
            tracing::error!("Unable to start engine: {}", e);
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let state = StateMachine::new(self.observer);
        let state_rx = state.subscribe();
        let engine = Engine::new(self.version.clone(), &self.config, state, tx.downgrade());

        tokio::spawn(engine.run(rx));

        Ok(Comms {
            outlet: Outlet::new(tx, self.config.codec),
            state: state_rx,
            version: Arc::from(self.version),
            identities: self.identities.map(Arc::new),
            next_port: Arc::new(AtomicU64::new(1)),
        })
    }
}

/// Handle to a running engine.
///
/// Cloning is cheap; all clones drive the same engine. The engine stops on
/// [`shutdown`](Comms::shutdown) or once every handle, responder and port
/// link is gone.
#[derive(Clone)]
pub struct Comms {
    outlet: Outlet,
    state: watch::Receiver<ConnectionState>,
    version: Arc<str>,
    identities: Option<Arc<Identities>>,
    next_port: Arc<AtomicU64>,
}

impl Comms {
    /// Create a new builder.
    pub fn builder(version: impl Into<String>) -> CommsBuilder {
        CommsBuilder::new(version)
    }

    /// Subscribe to `channel` with a typed handler.
    ///
    /// Messages already buffered for `channel` are delivered to this handler
    /// right after registration.
    pub fn add_listener<T, F>(&self, channel: &str, handler: F) -> Result<()>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T, Responder) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(TypedHandler::new(handler)))
    }

    /// Subscribe to `channel` with a handler that receives the raw payload.
    pub fn add_raw_listener<F>(&self, channel: &str, handler: F) -> Result<()>
    where
        F: Fn(Payload, Responder) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(channel, Arc::new(handler))
    }

    fn register(&self, channel: &str, handler: Arc<dyn Handler>) -> Result<()> {
        validate_channel(channel)?;
        self.outlet.command(Command::AddListener {
            channel: channel.to_string(),
            handler,
        })
    }

    /// Send `data` on `channel` without expecting a reply.
    ///
    /// Queued while disconnected; transport failures are reported through
    /// the state observer, never here.
    pub fn send<T: Serialize + ?Sized>(&self, channel: &str, data: &T) -> Result<()> {
        let payload = self.outlet.codec().encode(data)?;
        self.outlet.submit(channel, payload, None, None)
    }

    /// Send pre-encoded bytes on `channel`.
    pub fn send_raw(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.outlet.submit(channel, payload, None, None)
    }

    /// Send `data` on `channel` and call `callback` with the peer's reply.
    pub fn request<T, R, F>(&self, channel: &str, data: &T, callback: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
        F: FnOnce(R, Responder) -> HandlerResult + Send + 'static,
    {
        let payload = self.outlet.codec().encode(data)?;
        self.outlet
            .submit(channel, payload, None, Some(typed_reply(callback)))
    }

    /// Send pre-encoded bytes and receive the raw reply payload.
    pub fn request_raw<F>(&self, channel: &str, payload: Bytes, callback: F) -> Result<()>
    where
        F: FnOnce(Payload, Responder) -> HandlerResult + Send + 'static,
    {
        self.outlet
            .submit(channel, payload, None, Some(Box::new(callback)))
    }

    /// Make `port` the active transport.
    ///
    /// Returns the link the transport uses to deliver inbound frames and
    /// report closure.
    pub fn attach<P: Port>(&self, port: P) -> Result<PortLink> {
        let id = PortId(self.next_port.fetch_add(1, Ordering::Relaxed));
        self.outlet.command(Command::Attach {
            id,
            port: Box::new(port),
        })?;
        Ok(PortLink::new(id, self.outlet.sender()))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Snapshot queue lengths and table sizes.
    pub async fn stats(&self) -> Result<EngineStats> {
        let (tx, rx) = oneshot::channel();
        self.outlet.command(Command::Stats(tx))?;
        rx.await.map_err(|_| CommsError::EngineStopped)
    }

    /// Stop the engine, cancelling both heartbeat timers.
    pub fn shutdown(&self) -> Result<()> {
        self.outlet.command(Command::Shutdown)
    }

    /// Local version string.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Configured identities, if any.
    pub fn identities(&self) -> Option<&Identities> {
        self.identities.as_deref()
    }

    /// Payload codec in use.
    pub fn codec(&self) -> PayloadCodec {
        self.outlet.codec()
    }
}

/// What woke the engine loop.
enum Wake {
    Command(Option<Command>),
    Heartbeat(HeartbeatEvent),
}

/// State owned by the engine task.
pub(crate) struct Engine {
    pub(crate) version: String,
    pub(crate) codec: PayloadCodec,
    pub(crate) reply_timeout: Option<Duration>,
    pub(crate) state: StateMachine,
    pub(crate) heartbeat: HeartbeatMonitor,
    pub(crate) registry: ChannelRegistry,
    pub(crate) correlation: CorrelationTable,
    pub(crate) unclaimed: UnclaimedQueue,
    pub(crate) outbound: OutboundQueue,
    pub(crate) port: Option<(PortId, Box<dyn Port>)>,
    /// Weak so the engine does not keep its own command channel open.
    pub(crate) self_tx: mpsc::WeakUnboundedSender<Command>,
}

impl Engine {
    pub(crate) fn new(
        version: String,
        config: &CommsConfig,
        state: StateMachine,
        self_tx: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            version,
            codec: config.codec,
            reply_timeout: config.reply_timeout(),
            state,
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval(), config.heartbeat_timeout()),
            registry: ChannelRegistry::new(),
            correlation: CorrelationTable::new(),
            unclaimed: UnclaimedQueue::new(config.unclaimed_capacity),
            outbound: OutboundQueue::new(),
            port: None,
            self_tx,
        }
    }

    /// Main loop - one command or timer event at a time.
    pub(crate) async fn run(mut self, mut commands: CommandRx) {
        loop {
            // Timers first: a busy command channel must not starve heartbeats.
            let wake = tokio::select! {
                biased;
                event = self.heartbeat.next() => Wake::Heartbeat(event),
                command = commands.recv() => Wake::Command(command),
            };

            match wake {
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => break,
                Wake::Command(Some(command)) => self.handle(command),
                Wake::Heartbeat(event) => self.on_heartbeat(event),
            }
        }

        self.heartbeat.cancel();
        self.port = None;
        tracing::debug!("Engine stopped");
    }

    pub(crate) fn handle(&mut self, command: Command) {
        match command {
            Command::AddListener { channel, handler } => self.add_listener(&channel, handler),
            Command::Send {
                channel,
                payload,
                response_to,
                callback,
            } => self.send(&channel, payload, response_to, callback),
            Command::Attach { id, port } => self.attach(id, port),
            Command::Inbound { id, frame } => self.dispatch(id, &frame),
            Command::Closed { id } => self.port_closed(id),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Shutdown => {}
        }
    }

    pub(crate) fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state.current(),
            outbound_queued: self.outbound.len(),
            unclaimed: self.unclaimed.len(),
            pending_replies: self.correlation.len(),
            channels: self.registry.channel_count(),
        }
    }

    /// Responder bound to `envelope`'s channel and query ID.
    pub(crate) fn responder(&self, envelope: &Envelope) -> Responder {
        let outlet = self
            .self_tx
            .upgrade()
            .map(|tx| Outlet::new(tx, self.codec));
        Responder::bound(envelope.channel.clone(), envelope.query_id, outlet)
    }

    /// Move the state machine; entering `connected` flushes the outbound queue.
    pub(crate) fn set_state(&mut self, next: ConnectionState, reason: &str) {
        self.heartbeat.cancel();
        if self.state.transition(next, reason) && next == ConnectionState::Connected {
            self.flush_outbound();
        }
    }

    fn attach(&mut self, id: PortId, port: Box<dyn Port>) {
        if let Some((previous, _)) = self.port.replace((id, port)) {
            tracing::debug!("{} replaced by {}", previous, id);
        }
        self.set_state(ConnectionState::Connected, REASON_PORT_ATTACHED);
    }

    fn port_closed(&mut self, id: PortId) {
        match &self.port {
            Some((active, _)) if *active == id => {
                self.port = None;
                self.set_state(ConnectionState::Disconnected, REASON_PORT_CLOSED);
            }
            _ => tracing::warn!("Ignoring close of inactive {}", id),
        }
    }

    fn on_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Tick => {
                self.evict_expired_replies();
                self.send_heartbeat();
                self.heartbeat.arm();
            }
            HeartbeatEvent::Expired => {
                self.set_state(ConnectionState::Disconnected, REASON_HEARTBEAT_FAILURE);
            }
        }
    }

    fn send_heartbeat(&mut self) {
        match self.codec.encode(&Control::heartbeat()) {
            Ok(payload) => {
                let envelope = Envelope::control(self.version.as_str(), payload);
                tracing::debug!("Sending heartbeat {}", envelope.query_id);
                // Internal traffic skips the queue and the connected check.
                self.transmit(&envelope);
            }
            Err(e) => tracing::error!("Unable to encode heartbeat: {}", e),
        }
    }

    fn evict_expired_replies(&mut self) {
        let Some(ttl) = self.reply_timeout else {
            return;
        };
        for query_id in self.correlation.evict_expired(ttl) {
            tracing::warn!("No reply to {} within {:?}, dropping callback", query_id, ttl);
        }
    }

    fn add_listener(&mut self, channel: &str, handler: Arc<dyn Handler>) {
        if self.registry.add(channel, handler.clone()).is_err() {
            return;
        }

        for envelope in self.unclaimed.claim(channel) {
            tracing::debug!("Late listener on {} claims {}", channel, envelope.query_id);
            let payload = Payload::new(envelope.payload_bytes(), self.codec);
            let respond = self.responder(&envelope);
            crate::dispatcher::invoke_guarded(
                || format!("Listener on channel {}", channel),
                || handler.call(payload, respond),
            );
        }
    }

    /// Transmission policy for application messages.
    fn send(
        &mut self,
        channel: &str,
        payload: Bytes,
        response_to: Option<QueryId>,
        callback: Option<Box<dyn ReplyHandler>>,
    ) {
        let mut envelope = Envelope::message(channel, self.version.as_str(), payload);
        if let Some(query_id) = response_to {
            envelope = envelope.in_reply_to(query_id);
        }
        if let Some(callback) = callback {
            self.correlation.register(envelope.query_id, callback);
        }

        if !self.state.is_connected() {
            tracing::info!(
                "Port not available, queueing message {} on {}",
                envelope.query_id,
                channel
            );
            self.outbound.push(envelope);
            return;
        }

        self.flush_outbound();

        if self.state.is_connected() {
            self.transmit(&envelope);
        } else {
            // A queued message failed mid-drain; keep program order.
            self.outbound.push(envelope);
        }
    }

    /// Send queued messages oldest first while the connection holds.
    fn flush_outbound(&mut self) {
        while self.state.is_connected() {
            let Some(envelope) = self.outbound.pop() else {
                break;
            };
            self.transmit(&envelope);
        }
    }

    /// Write one envelope to the active port.
    ///
    /// A failure drives the state to `disconnected`; the envelope is dropped.
    pub(crate) fn transmit(&mut self, envelope: &Envelope) -> bool {
        let Some((_, port)) = self.port.as_mut() else {
            tracing::debug!(
                "No port attached, dropping message {} on {}",
                envelope.query_id,
                envelope.channel
            );
            self.set_state(ConnectionState::Disconnected, REASON_SEND_FAILED);
            return false;
        };

        match envelope.encode().and_then(|frame| port.post(frame)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "Unable to send message {} on {}: {}",
                    envelope.query_id,
                    envelope.channel,
                    e
                );
                self.set_state(ConnectionState::Disconnected, REASON_SEND_FAILED);
                false
            }
        }
    }
}
