//! Port module - the opaque transport between the two peers.
//!
//! A [`Port`] only has to accept encoded envelopes and report whether the
//! write succeeded. Inbound traffic and closure flow the other way through
//! the [`PortLink`] returned by [`crate::Comms::attach`].
//!
//! Provided adapters:
//! - [`MemoryPort`] - in-process port, records frames, can forward to a peer
//! - [`StreamPort`] - any `AsyncRead + AsyncWrite` byte stream, length-prefixed
//!
//! # Example
//!
//! ```ignore
//! let (port, reader) = StreamPort::new(unix_stream);
//! let link = comms.attach(port)?;
//! reader.spawn(link);
//! ```

mod framing;
mod memory;
mod stream;

pub use framing::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE};
pub use memory::MemoryPort;
pub use stream::{StreamPort, StreamReader};

use std::fmt;

use bytes::Bytes;

use crate::command::{Command, CommandTx};
use crate::error::{CommsError, Result};

/// Outbound half of a transport.
pub trait Port: Send + 'static {
    /// Write one encoded envelope.
    ///
    /// Must not block. An `Err` drives the engine to `disconnected`.
    fn post(&mut self, frame: Bytes) -> Result<()>;
}

/// Identifies one attached port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub(crate) u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Inbound half of a transport, bound to the engine.
///
/// Transports call [`deliver`](PortLink::deliver) for every received frame
/// and [`close`](PortLink::close) once the underlying connection is gone.
#[derive(Clone)]
pub struct PortLink {
    id: PortId,
    tx: CommandTx,
}

impl PortLink {
    pub(crate) fn new(id: PortId, tx: CommandTx) -> Self {
        Self { id, tx }
    }

    /// The port this link belongs to.
    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Hand one received frame to the dispatcher.
    pub fn deliver(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(Command::Inbound { id: self.id, frame })
            .map_err(|_| CommsError::EngineStopped)
    }

    /// Report that the port has closed.
    pub fn close(&self) -> Result<()> {
        self.tx
            .send(Command::Closed { id: self.id })
            .map_err(|_| CommsError::EngineStopped)
    }
}

impl fmt::Debug for PortLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortLink").field("id", &self.id).finish()
    }
}
