//! Inbound dispatch.
//!
//! Every frame delivered by a port goes through [`Engine::dispatch`]:
//!
//! ```text
//! frame ─► decode ─► version check ─► stamp receivedAt
//!            │
//!            ├─ internal      ─► control handling (heartbeat)
//!            ├─ known reply   ─► one-shot reply callback
//!            ├─ subscribed    ─► every subscriber, registration order
//!            └─ otherwise     ─► unclaimed queue
//! ```
//!
//! Handlers run inside [`invoke_guarded`]: an error or panic is logged and
//! dispatch carries on with the next handler.

use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::Utc;

use crate::engine::Engine;
use crate::envelope::{Control, Envelope};
use crate::error::{CommsError, Result};
use crate::handler::{HandlerResult, Payload};
use crate::port::PortId;
use crate::state::{ConnectionState, REASON_HEARTBEAT_RECEIVED};

/// Run a handler, containing its failure.
///
/// Returns `true` if the handler completed without error.
pub(crate) fn invoke_guarded<L, F>(label: L, f: F) -> bool
where
    L: FnOnce() -> String,
    F: FnOnce() -> HandlerResult,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::error!("{} failed: {}", label(), e);
            false
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("{} panicked: {}", label(), message);
            false
        }
    }
}

impl Engine {
    /// Route one inbound frame.
    pub(crate) fn dispatch(&mut self, from: PortId, frame: &[u8]) {
        let mut envelope = match self.accept(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Discarding inbound frame from {}: {}", from, e);
                return;
            }
        };

        envelope.received_at = Some(Utc::now());

        if envelope.internal {
            self.handle_control(&envelope);
            return;
        }

        if let Some(response_id) = envelope.response_id {
            if let Some(callback) = self.correlation.take(&response_id) {
                let payload = Payload::new(envelope.payload_bytes(), self.codec);
                let respond = self.responder(&envelope);
                invoke_guarded(
                    || format!("Reply callback for {}", response_id),
                    || callback.call(payload, respond),
                );
                return;
            }
        }

        if let Some(subscribers) = self.registry.subscribers(&envelope.channel) {
            let payload = Payload::new(envelope.payload_bytes(), self.codec);
            let respond = self.responder(&envelope);
            for (index, subscriber) in subscribers.iter().enumerate() {
                invoke_guarded(
                    || format!("Listener #{} on channel {}", index, envelope.channel),
                    || subscriber.call(payload.clone(), respond.clone()),
                );
            }
            return;
        }

        tracing::debug!(
            "No listener on {}, buffering {}",
            envelope.channel,
            envelope.query_id
        );
        let evicted = self.unclaimed.push(envelope);
        if evicted > 0 {
            tracing::warn!(
                "Unclaimed queue full ({}), dropped {} oldest message(s)",
                self.unclaimed.capacity(),
                evicted
            );
        }
    }

    /// Decode a frame and check it was produced by a peer on our version.
    fn accept(&self, frame: &[u8]) -> Result<Envelope> {
        let envelope = Envelope::decode(frame)
            .map_err(|e| CommsError::Protocol(format!("malformed envelope: {}", e)))?;

        if envelope.version != self.version {
            return Err(CommsError::VersionMismatch {
                expected: self.version.clone(),
                actual: envelope.version,
            });
        }
        Ok(envelope)
    }

    fn handle_control(&mut self, envelope: &Envelope) {
        let control: Control = match self.codec.decode(&envelope.payload) {
            Ok(control) => control,
            Err(e) => {
                let e = CommsError::Protocol(format!("bad control message: {}", e));
                tracing::error!("Discarding internal message {}: {}", envelope.query_id, e);
                return;
            }
        };

        if control.heartbeat {
            tracing::debug!("Heartbeat received {}", envelope.query_id);
            self.set_state(ConnectionState::Connected, REASON_HEARTBEAT_RECEIVED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PayloadCodec;
    use crate::command::{Command, CommandRx};
    use crate::config::CommsConfig;
    use crate::handler::Responder;
    use crate::port::MemoryPort;
    use crate::state::StateMachine;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    fn engine() -> (Engine, mpsc::UnboundedSender<Command>, CommandRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = CommsConfig {
            codec: PayloadCodec::Json,
            unclaimed_capacity: 3,
            ..CommsConfig::default()
        };
        let engine = Engine::new("1.0".into(), &config, StateMachine::new(None), tx.downgrade());
        (engine, tx, rx)
    }

    fn frame(channel: &str, version: &str, text: &str) -> Bytes {
        let payload = PayloadCodec::Json.encode(text).unwrap();
        Envelope::message(channel, version, payload).encode().unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(Payload, Responder) -> HandlerResult + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let handler = move |payload: Payload, _: Responder| -> HandlerResult {
            captured.lock().unwrap().push(payload.decode::<String>()?);
            Ok(())
        };
        (seen, handler)
    }

    #[test]
    fn test_invoke_guarded_contains_panic() {
        assert!(!invoke_guarded(|| "boom".into(), || panic!("kaboom")));
        assert!(!invoke_guarded(
            || "err".into(),
            || Err(CommsError::handler("nope"))
        ));
        assert!(invoke_guarded(|| "ok".into(), || Ok(())));
    }

    #[tokio::test]
    async fn test_version_mismatch_discarded() {
        let (mut engine, _tx, _rx) = engine();
        let (seen, handler) = recorder();
        engine.registry.add("ping", Arc::new(handler)).unwrap();

        engine.dispatch(PortId(1), &frame("ping", "2.0", "hello"));

        assert!(seen.lock().unwrap().is_empty());
        assert!(engine.unclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_accept_reports_version_mismatch() {
        let (engine, _tx, _rx) = engine();
        let result = engine.accept(&frame("ping", "2.0", "hello"));
        assert!(matches!(
            result,
            Err(CommsError::VersionMismatch { expected, actual }) if expected == "1.0" && actual == "2.0"
        ));
        assert!(matches!(engine.accept(b"junk"), Err(CommsError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_malformed_frame_discarded() {
        let (mut engine, _tx, _rx) = engine();
        engine.dispatch(PortId(1), b"\x01\x02\x03");
        assert!(engine.unclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_called_in_order_despite_failure() {
        let (mut engine, _tx, _rx) = engine();
        let order = Arc::new(Mutex::new(Vec::new()));

        for index in 0..3 {
            let order = order.clone();
            engine
                .registry
                .add(
                    "ping",
                    Arc::new(move |_: Payload, _: Responder| -> HandlerResult {
                        order.lock().unwrap().push(index);
                        if index == 1 {
                            panic!("second subscriber fails");
                        }
                        Ok(())
                    }),
                )
                .unwrap();
        }

        engine.dispatch(PortId(1), &frame("ping", "1.0", "hello"));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unsubscribed_message_is_buffered_with_receipt_time() {
        let (mut engine, _tx, _rx) = engine();

        engine.dispatch(PortId(1), &frame("later", "1.0", "hello"));

        let buffered: Vec<_> = engine.unclaimed.iter().collect();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].channel, "later");
        assert!(buffered[0].received_at.is_some());
    }

    #[tokio::test]
    async fn test_unclaimed_bound_drops_oldest() {
        let (mut engine, _tx, _rx) = engine();
        for text in ["a", "b", "c", "d", "e"] {
            engine.dispatch(PortId(1), &frame("later", "1.0", text));
        }

        let (seen, handler) = recorder();
        engine.handle(Command::AddListener {
            channel: "later".into(),
            handler: Arc::new(handler),
        });

        assert_eq!(*seen.lock().unwrap(), vec!["c", "d", "e"]);
        assert!(engine.unclaimed.is_empty());
    }

    #[tokio::test]
    async fn test_reply_consumed_once_even_on_error() {
        let (mut engine, _tx, _rx) = engine();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let query = Envelope::message("ping", "1.0", Bytes::new());
        engine.correlation.register(
            query.query_id,
            Box::new(move |_: Payload, _: Responder| -> HandlerResult {
                *counter.lock().unwrap() += 1;
                Err(CommsError::handler("callback failed"))
            }),
        );

        let reply = Envelope::message("ping", "1.0", PayloadCodec::Json.encode("pong").unwrap())
            .in_reply_to(query.query_id)
            .encode()
            .unwrap();
        engine.dispatch(PortId(1), &reply);
        engine.dispatch(PortId(1), &reply);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(engine.correlation.is_empty());
        // The duplicate had no callback and no listener.
        assert_eq!(engine.unclaimed.len(), 1);
    }

    #[tokio::test]
    async fn test_reply_bypasses_listeners() {
        let (mut engine, _tx, _rx) = engine();
        let (seen, handler) = recorder();
        engine.registry.add("ping", Arc::new(handler)).unwrap();

        let query = Envelope::message("ping", "1.0", Bytes::new());
        engine.correlation.register(
            query.query_id,
            Box::new(|_: Payload, _: Responder| -> HandlerResult { Ok(()) }),
        );
        let reply = Envelope::message("ping", "1.0", PayloadCodec::Json.encode("pong").unwrap())
            .in_reply_to(query.query_id)
            .encode()
            .unwrap();
        engine.dispatch(PortId(1), &reply);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_responder_routes_back_through_engine() {
        let (mut engine, _tx, mut rx) = engine();
        engine
            .registry
            .add(
                "ping",
                Arc::new(|_: Payload, respond: Responder| -> HandlerResult { respond.send("pong") }),
            )
            .unwrap();

        let inbound = Envelope::message("ping", "1.0", PayloadCodec::Json.encode("hi").unwrap());
        engine.dispatch(PortId(1), &inbound.encode().unwrap());

        match rx.try_recv().unwrap() {
            Command::Send {
                channel,
                response_to,
                ..
            } => {
                assert_eq!(channel, "ping");
                assert_eq!(response_to, Some(inbound.query_id));
            }
            _ => panic!("expected send command"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_reconnects_and_cancels_deadline() {
        let (mut engine, _tx, _rx) = engine();
        let port = MemoryPort::new();
        engine.port = Some((PortId(1), Box::new(port)));
        engine.heartbeat.arm();

        let heartbeat = Envelope::control("1.0", PayloadCodec::Json.encode(&Control::heartbeat()).unwrap());
        engine.dispatch(PortId(1), &heartbeat.encode().unwrap());

        assert!(engine.state.is_connected());
        assert!(!engine.heartbeat.is_armed());
    }

    #[tokio::test]
    async fn test_heartbeat_from_other_version_ignored() {
        let (mut engine, _tx, _rx) = engine();
        let heartbeat = Envelope::control("0.9", PayloadCodec::Json.encode(&Control::heartbeat()).unwrap());
        engine.dispatch(PortId(1), &heartbeat.encode().unwrap());
        assert!(!engine.state.is_connected());
    }
}
