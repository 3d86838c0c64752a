//! Handler module - channel subscribers, reply callbacks and the respond API.
//!
//! Provides:
//! - [`ChannelRegistry`] - maps channel names to ordered subscriber lists
//! - [`Responder`] - the bound `respond` function handed to every handler
//! - [`Payload`] - opaque payload bytes plus the codec needed to decode them
//!
//! # Example
//!
//! ```ignore
//! comms.add_listener("echo", |text: String, respond| {
//!     respond.send(&text)
//! })?;
//!
//! comms.request("sum", &[1, 2, 3], |total: i64, _respond| {
//!     tracing::info!("sum = {}", total);
//!     Ok(())
//! })?;
//! ```

mod context;
mod registry;

pub use context::{Payload, Responder};
pub use registry::{ChannelRegistry, Handler, HandlerResult, ReplyHandler, TypedHandler};

pub(crate) use context::{typed_reply, Outlet};
pub(crate) use registry::validate_channel;
