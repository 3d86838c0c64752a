//! Payload and responder handed to handlers.
//!
//! Every subscriber and reply callback is called with a [`Payload`] and a
//! [`Responder`]. The responder is bound to the channel and query ID of the
//! message being handled, so a handler can reply without knowing anything
//! about envelopes:
//!
//! - `send` - reply once, fire-and-forget
//! - `request` - reply and expect a further reply back
//! - `send_raw` / `request_raw` - same, with pre-encoded payload bytes
//!
//! # Example
//!
//! ```ignore
//! fn echo(text: String, respond: Responder) -> HandlerResult {
//!     respond.send(&text)
//! }
//! ```

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::registry::{validate_channel, HandlerResult, ReplyHandler};
use crate::codec::PayloadCodec;
use crate::command::{Command, CommandTx};
use crate::envelope::QueryId;
use crate::error::{CommsError, Result};

/// Encoded payload of a received message.
///
/// The bytes stay opaque until a handler asks for a concrete type.
#[derive(Debug, Clone)]
pub struct Payload {
    bytes: Bytes,
    codec: PayloadCodec,
}

impl Payload {
    /// Wrap encoded bytes.
    pub fn new(bytes: Bytes, codec: PayloadCodec) -> Self {
        Self { bytes, codec }
    }

    /// Decode into `T` with the engine's codec.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        self.codec.decode(&self.bytes)
    }

    /// Get the raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Into raw bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Codec the bytes were encoded with.
    #[inline]
    pub fn codec(&self) -> PayloadCodec {
        self.codec
    }
}

/// Sending half shared by [`crate::Comms`] and [`Responder`].
#[derive(Clone)]
pub(crate) struct Outlet {
    tx: CommandTx,
    codec: PayloadCodec,
}

impl Outlet {
    pub(crate) fn new(tx: CommandTx, codec: PayloadCodec) -> Self {
        Self { tx, codec }
    }

    pub(crate) fn codec(&self) -> PayloadCodec {
        self.codec
    }

    pub(crate) fn sender(&self) -> CommandTx {
        self.tx.clone()
    }

    pub(crate) fn command(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| CommsError::EngineStopped)
    }

    /// Queue an outbound application message.
    pub(crate) fn submit(
        &self,
        channel: &str,
        payload: Bytes,
        response_to: Option<QueryId>,
        callback: Option<Box<dyn ReplyHandler>>,
    ) -> Result<()> {
        validate_channel(channel)?;
        self.command(Command::Send {
            channel: channel.to_string(),
            payload,
            response_to,
            callback,
        })
    }
}

/// Wrap a typed reply callback so it receives a decoded value.
pub(crate) fn typed_reply<R, F>(callback: F) -> Box<dyn ReplyHandler>
where
    R: DeserializeOwned + 'static,
    F: FnOnce(R, Responder) -> HandlerResult + Send + 'static,
{
    Box::new(move |payload: Payload, respond: Responder| -> HandlerResult {
        let value: R = payload.decode()?;
        callback(value, respond)
    })
}

/// The `respond` function bound to one received message.
///
/// `Responder` is `Clone` and may be kept after the handler returns; replies
/// sent later are still correlated with the original query.
#[derive(Clone)]
pub struct Responder {
    /// Channel of the message being answered.
    channel: String,
    /// Query ID of the message being answered.
    query_id: QueryId,
    /// Route back into the engine (None when detached).
    outlet: Option<Outlet>,
}

impl Responder {
    /// Create a responder that is not connected to an engine.
    ///
    /// Replies are accepted and dropped. Useful when unit-testing handlers.
    pub fn detached(channel: impl Into<String>, query_id: QueryId) -> Self {
        Self {
            channel: channel.into(),
            query_id,
            outlet: None,
        }
    }

    pub(crate) fn bound(channel: impl Into<String>, query_id: QueryId, outlet: Option<Outlet>) -> Self {
        Self {
            channel: channel.into(),
            query_id,
            outlet,
        }
    }

    /// Get the channel this responder replies on.
    #[inline]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Get the query ID this responder replies to.
    #[inline]
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Reply with the given data.
    pub fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let Some(outlet) = &self.outlet else {
            return Ok(());
        };
        let payload = outlet.codec().encode(data)?;
        outlet.submit(&self.channel, payload, Some(self.query_id), None)
    }

    /// Reply with pre-encoded bytes.
    pub fn send_raw(&self, payload: Bytes) -> Result<()> {
        match &self.outlet {
            Some(outlet) => outlet.submit(&self.channel, payload, Some(self.query_id), None),
            None => Ok(()),
        }
    }

    /// Reply and register a callback for the peer's answer to this reply.
    pub fn request<T, R, F>(&self, data: &T, callback: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned + 'static,
        F: FnOnce(R, Responder) -> HandlerResult + Send + 'static,
    {
        let Some(outlet) = &self.outlet else {
            return Ok(());
        };
        let payload = outlet.codec().encode(data)?;
        outlet.submit(
            &self.channel,
            payload,
            Some(self.query_id),
            Some(typed_reply(callback)),
        )
    }

    /// Reply with pre-encoded bytes and a raw callback.
    pub fn request_raw<F>(&self, payload: Bytes, callback: F) -> Result<()>
    where
        F: FnOnce(Payload, Responder) -> HandlerResult + Send + 'static,
    {
        match &self.outlet {
            Some(outlet) => outlet.submit(
                &self.channel,
                payload,
                Some(self.query_id),
                Some(Box::new(callback)),
            ),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("channel", &self.channel)
            .field("query_id", &self.query_id)
            .field("bound", &self.outlet.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[test]
    fn test_payload_decode() {
        let codec = PayloadCodec::MsgPack;
        let payload = Payload::new(codec.encode(&"hello").unwrap(), codec);
        let text: String = payload.decode().unwrap();
        assert_eq!(text, "hello");
        assert_eq!(payload.codec(), PayloadCodec::MsgPack);
    }

    #[test]
    fn test_payload_decode_wrong_type() {
        let codec = PayloadCodec::Json;
        let payload = Payload::new(codec.encode(&"hello").unwrap(), codec);
        assert!(payload.decode::<u32>().is_err());
    }

    #[test]
    fn test_detached_responder_accepts_replies() {
        let respond = Responder::detached("ping", Uuid::new_v4());
        assert!(respond.send(&"pong").is_ok());
        assert!(respond.send_raw(Bytes::from_static(b"raw")).is_ok());
        assert!(respond.request(&1, |_: u32, _| Ok(())).is_ok());
    }

    #[test]
    fn test_bound_responder_replies_on_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let query_id = Uuid::new_v4();
        let outlet = Outlet::new(tx, PayloadCodec::Json);
        let respond = Responder::bound("ping", query_id, Some(outlet));

        respond.send(&"pong").unwrap();

        match rx.try_recv().unwrap() {
            Command::Send {
                channel,
                payload,
                response_to,
                callback,
            } => {
                assert_eq!(channel, "ping");
                assert_eq!(&payload[..], br#""pong""#);
                assert_eq!(response_to, Some(query_id));
                assert!(callback.is_none());
            }
            _ => panic!("expected send command"),
        }
    }

    #[test]
    fn test_responder_request_carries_callback() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outlet = Outlet::new(tx, PayloadCodec::Json);
        let respond = Responder::bound("ping", Uuid::new_v4(), Some(outlet));

        respond.request(&1, |_: u32, _| Ok(())).unwrap();

        match rx.try_recv().unwrap() {
            Command::Send { callback, .. } => assert!(callback.is_some()),
            _ => panic!("expected send command"),
        }
    }

    #[test]
    fn test_outlet_reports_stopped_engine() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let outlet = Outlet::new(tx, PayloadCodec::Json);
        let result = outlet.submit("ping", Bytes::new(), None, None);
        assert!(matches!(result, Err(CommsError::EngineStopped)));
    }

    #[test]
    fn test_outlet_rejects_empty_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outlet = Outlet::new(tx, PayloadCodec::Json);
        let result = outlet.submit("", Bytes::new(), None, None);
        assert!(matches!(result, Err(CommsError::InvalidChannel)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_typed_reply_decode_failure_is_handler_error() {
        let reply = typed_reply(|_: u32, _| Ok(()));
        let payload = Payload::new(Bytes::from_static(b"\"text\""), PayloadCodec::Json);
        let result = reply.call(payload, Responder::detached("x", Uuid::new_v4()));
        assert!(result.is_err());
    }
}
