//! In-process port.
//!
//! Records every posted frame and can forward it to a peer engine's
//! [`PortLink`], which is enough to wire two engines together in one process.
//! A failing mode makes `post` reject writes.
//!
//! # Example
//!
//! ```ignore
//! let a_port = MemoryPort::new();
//! let b_port = MemoryPort::new();
//! let a_link = a.attach(a_port.clone());
//! let b_link = b.attach(b_port.clone());
//! a_port.connect_peer(b_link);
//! b_port.connect_peer(a_link);
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use super::{Port, PortLink};
use crate::envelope::Envelope;
use crate::error::{CommsError, Result};

#[derive(Default)]
struct Inner {
    sent: Vec<Bytes>,
    failing: bool,
    peer: Option<PortLink>,
}

/// Shared in-memory port. Clones observe the same frames.
#[derive(Clone, Default)]
pub struct MemoryPort {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryPort {
    /// Create an empty port.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-push.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forward every successful write to `peer`.
    pub fn connect_peer(&self, peer: PortLink) {
        self.lock().peer = Some(peer);
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Frames written so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.lock().sent.clone()
    }

    /// Frames written so far, decoded.
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.sent()
            .iter()
            .filter_map(|frame| Envelope::decode(frame).ok())
            .collect()
    }

    /// Decoded application (non-internal) envelopes written so far.
    pub fn messages(&self) -> Vec<Envelope> {
        self.envelopes()
            .into_iter()
            .filter(|envelope| !envelope.internal)
            .collect()
    }

    /// Forget recorded frames.
    pub fn clear(&self) {
        self.lock().sent.clear();
    }
}

impl Port for MemoryPort {
    fn post(&mut self, frame: Bytes) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing {
            return Err(CommsError::ConnectionClosed);
        }
        inner.sent.push(frame.clone());
        if let Some(peer) = &inner.peer {
            peer.deliver(frame)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::port::PortId;
    use tokio::sync::mpsc;

    #[test]
    fn test_records_frames() {
        let port = MemoryPort::new();
        let mut writer = port.clone();

        writer.post(Bytes::from_static(b"a")).unwrap();
        writer.post(Bytes::from_static(b"b")).unwrap();

        assert_eq!(port.sent().len(), 2);
        port.clear();
        assert!(port.sent().is_empty());
    }

    #[test]
    fn test_failing_mode() {
        let mut port = MemoryPort::new();
        port.set_failing(true);

        let result = port.post(Bytes::from_static(b"a"));
        assert!(matches!(result, Err(CommsError::ConnectionClosed)));
        assert!(port.sent().is_empty());
    }

    #[test]
    fn test_forwards_to_peer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut port = MemoryPort::new();
        port.connect_peer(PortLink::new(PortId(7), tx));

        port.post(Bytes::from_static(b"hello")).unwrap();

        match rx.try_recv().unwrap() {
            Command::Inbound { id, frame } => {
                assert_eq!(id, PortId(7));
                assert_eq!(&frame[..], b"hello");
            }
            _ => panic!("expected inbound command"),
        }
    }
}
