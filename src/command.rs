//! Commands consumed by the engine task.
//!
//! Every public operation becomes one [`Command`] on an unbounded channel,
//! so callers never block and the engine sees operations in program order.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::engine::EngineStats;
use crate::envelope::QueryId;
use crate::handler::{Handler, ReplyHandler};
use crate::port::{Port, PortId};

pub(crate) enum Command {
    AddListener {
        channel: String,
        handler: Arc<dyn Handler>,
    },
    Send {
        channel: String,
        payload: Bytes,
        response_to: Option<QueryId>,
        callback: Option<Box<dyn ReplyHandler>>,
    },
    Attach {
        id: PortId,
        port: Box<dyn Port>,
    },
    Inbound {
        id: PortId,
        frame: Bytes,
    },
    Closed {
        id: PortId,
    },
    Stats(oneshot::Sender<EngineStats>),
    Shutdown,
}

pub(crate) type CommandTx = mpsc::UnboundedSender<Command>;
pub(crate) type CommandRx = mpsc::UnboundedReceiver<Command>;
