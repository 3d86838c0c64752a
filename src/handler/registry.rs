//! Channel registry for dispatching application messages by channel name.
//!
//! Each channel maps to an ordered list of subscribers. Subscribers are
//! invoked in registration order; entries live for the lifetime of the
//! engine.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use portlink::handler::{ChannelRegistry, Responder, TypedHandler};
//!
//! let mut registry = ChannelRegistry::new();
//! registry
//!     .add("echo", Arc::new(TypedHandler::new(|text: String, respond: Responder| {
//!         respond.send(&text)
//!     })))
//!     .unwrap();
//!
//! assert_eq!(registry.subscriber_count("echo"), 1);
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{Payload, Responder};
use crate::error::{CommsError, Result};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Trait for channel subscribers.
pub trait Handler: Send + Sync + 'static {
    /// Handle a message with its encoded payload.
    fn call(&self, payload: Payload, respond: Responder) -> HandlerResult;
}

impl<F> Handler for F
where
    F: Fn(Payload, Responder) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, payload: Payload, respond: Responder) -> HandlerResult {
        self(payload, respond)
    }
}

/// One-shot callback for the reply to a query.
pub trait ReplyHandler: Send + 'static {
    /// Consume the callback with the reply.
    fn call(self: Box<Self>, payload: Payload, respond: Responder) -> HandlerResult;
}

impl<F> ReplyHandler for F
where
    F: FnOnce(Payload, Responder) -> HandlerResult + Send + 'static,
{
    fn call(self: Box<Self>, payload: Payload, respond: Responder) -> HandlerResult {
        (*self)(payload, respond)
    }
}

/// Wrapper that decodes the payload before calling the handler.
pub struct TypedHandler<F, T>
where
    F: Fn(T, Responder) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> T>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(T, Responder) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(T, Responder) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, payload: Payload, respond: Responder) -> HandlerResult {
        let parsed: T = payload.decode()?;
        (self.handler)(parsed, respond)
    }
}

/// Reject empty channel names.
pub(crate) fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty() {
        tracing::error!("Channel name must not be empty, operation aborted");
        return Err(CommsError::InvalidChannel);
    }
    Ok(())
}

/// Registry mapping channel names to subscribers.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Vec<Arc<dyn Handler>>>,
}

impl ChannelRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber to a channel.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChannel` for an empty name; nothing is registered.
    pub fn add(&mut self, channel: &str, handler: Arc<dyn Handler>) -> Result<()> {
        validate_channel(channel)?;
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Get the subscribers of a channel, in registration order.
    pub fn subscribers(&self, channel: &str) -> Option<&[Arc<dyn Handler>]> {
        self.channels
            .get(channel)
            .filter(|list| !list.is_empty())
            .map(|list| list.as_slice())
    }

    /// Number of subscribers on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |list| list.len())
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
