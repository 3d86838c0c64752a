//! # portlink
//!
//! Two-party channel messaging over an unreliable port.
//!
//! Two peers exchange [`Envelope`]s through an opaque [`port::Port`]. On top
//! of that the engine provides:
//!
//! - **Channels**: publish/subscribe by channel name, several subscribers per
//!   channel, called in registration order
//! - **Queries**: a one-shot reply callback per sent message, correlated by
//!   query ID
//! - **Liveness**: periodic heartbeats and a `connected` / `disconnected`
//!   state with reasons
//! - **Buffering**: outbound messages wait for a connection, inbound messages
//!   wait (bounded) for a late subscriber
//!
//! ## Architecture
//!
//! All state lives in one engine task. [`Comms`] handles, [`Responder`]s and
//! [`port::PortLink`]s talk to it over a single command channel, so every
//! operation is applied in the order it was issued and handlers never run
//! concurrently.
//!
//! ## Example
//!
//! ```ignore
//! use portlink::{Comms, StreamPort};
//!
//! #[tokio::main]
//! async fn main() -> portlink::Result<()> {
//!     let comms = Comms::builder("1.0.0").start()?;
//!
//!     comms.add_listener("echo", |text: String, respond| respond.send(&text))?;
//!
//!     let stream = tokio::net::UnixStream::connect("/tmp/peer.sock").await?;
//!     let (port, reader) = StreamPort::new(stream);
//!     let link = comms.attach(port)?;
//!     reader.run(link).await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod identity;
pub mod port;
pub mod queue;
pub mod state;

mod command;
mod dispatcher;
mod engine;

pub use codec::PayloadCodec;
pub use config::CommsConfig;
pub use engine::{Comms, CommsBuilder, EngineStats};
pub use envelope::{Envelope, QueryId};
pub use error::{CommsError, Result};
pub use handler::{HandlerResult, Payload, Responder};
pub use identity::Identities;
pub use port::{MemoryPort, Port, PortLink, StreamPort};
pub use state::ConnectionState;
