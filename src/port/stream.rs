//! Port over any byte stream (Unix socket, TCP, `tokio::io::duplex`).
//!
//! ```text
//! post() ─► mpsc::UnboundedSender<Bytes> ─► writer task ─► stream
//! stream ─► reader task ─► FrameBuffer ─► PortLink::deliver()
//! ```
//!
//! `post` only enqueues, so it never blocks the engine. Frames over the
//! port's size limit are refused with `FrameTooLarge`. Once the writer task
//! has failed or the stream is gone, `post` reports `ConnectionClosed`. The
//! reader task calls [`PortLink::close`] on EOF, read error or framing error.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::framing::{encode_frame, FrameBuffer, DEFAULT_MAX_FRAME_SIZE};
use super::{Port, PortLink};
use crate::error::{CommsError, Result};

/// Maximum frames to write before flushing.
const MAX_BATCH_SIZE: usize = 64;

/// Outbound half of a stream-backed port.
pub struct StreamPort {
    tx: mpsc::UnboundedSender<Bytes>,
    max_frame_size: usize,
    _writer_task: JoinHandle<Result<()>>,
}

impl StreamPort {
    /// Split `stream` into a port and a reader.
    ///
    /// Must be called inside a tokio runtime (spawns the writer task).
    pub fn new<S>(stream: S) -> (Self, StreamReader<ReadHalf<S>>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer)
    }

    /// Build from separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W) -> (Self, StreamReader<R>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(writer_loop(rx, writer));
        let port = Self {
            tx,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            _writer_task: writer_task,
        };
        let reader = StreamReader {
            reader,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        };
        (port, reader)
    }

    /// Override the maximum frame size accepted by `post`.
    ///
    /// Should match the peer reader's limit.
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Port for StreamPort {
    fn post(&mut self, frame: Bytes) -> Result<()> {
        if frame.len() > self.max_frame_size {
            return Err(CommsError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }
        self.tx
            .send(encode_frame(&frame)?)
            .map_err(|_| CommsError::ConnectionClosed)
    }
}

/// Inbound half of a stream-backed port.
pub struct StreamReader<R> {
    reader: R,
    max_frame_size: usize,
}

impl<R> StreamReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Override the maximum accepted frame size.
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Run the read loop on a new task.
    pub fn spawn(self, link: PortLink) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(link))
    }

    /// Read frames until the stream ends, then close the link.
    pub async fn run(mut self, link: PortLink) -> Result<()> {
        let result = self.read_loop(&link).await;
        if let Err(e) = &result {
            tracing::error!("Read loop error on {}: {}", link.id(), e);
        }
        // The engine may already be gone; nothing left to notify then.
        let _ = link.close();
        result
    }

    async fn read_loop(&mut self, link: &PortLink) -> Result<()> {
        let mut frames = FrameBuffer::with_max_frame_size(self.max_frame_size);
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match self.reader.read(&mut buf).await? {
                0 => return Ok(()),
                n => n,
            };

            for frame in frames.push(&buf[..n])? {
                if link.deliver(frame).is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// Receives frames and writes them to the stream, flushing per batch.
async fn writer_loop<W>(mut rx: mpsc::UnboundedReceiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        for frame in &batch {
            if let Err(e) = writer.write_all(frame).await {
                tracing::error!("Stream write failed: {}", e);
                return Err(e.into());
            }
        }
        writer.flush().await?;
    }

    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::port::PortId;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_post_is_length_prefixed() {
        let (ours, mut theirs) = duplex(4096);
        let (mut port, _reader) = StreamPort::new(ours);

        port.post(Bytes::from_static(b"hello")).unwrap();

        let mut buf = [0u8; 9];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_post_rejects_oversize_frame() {
        let (ours, mut theirs) = duplex(4096);
        let (port, _reader) = StreamPort::new(ours);
        let mut port = port.max_frame_size(4);

        let result = port.post(Bytes::from_static(b"too long"));
        assert!(matches!(
            result,
            Err(CommsError::FrameTooLarge { size: 8, max: 4 })
        ));

        // Frames within the limit still go through, and nothing else was written.
        port.post(Bytes::from_static(b"ok")).unwrap();
        let mut buf = [0u8; 6];
        theirs.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0, 0, 0, 2, b'o', b'k']);
    }

    #[tokio::test]
    async fn test_reader_delivers_then_closes() {
        let (ours, mut theirs) = duplex(4096);
        let (_port, reader) = StreamPort::new(ours);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = reader.spawn(PortLink::new(PortId(1), tx));

        theirs.write_all(&encode_frame(b"one").unwrap()).await.unwrap();
        theirs.write_all(&encode_frame(b"two").unwrap()).await.unwrap();
        drop(theirs);

        task.await.unwrap().unwrap();

        let mut delivered = Vec::new();
        let mut closed = false;
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Inbound { frame, .. } => delivered.push(frame),
                Command::Closed { id } => {
                    assert_eq!(id, PortId(1));
                    closed = true;
                }
                _ => panic!("unexpected command"),
            }
        }
        assert_eq!(delivered, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert!(closed);
    }

    #[tokio::test]
    async fn test_oversize_frame_closes_link() {
        let (ours, mut theirs) = duplex(4096);
        let (_port, reader) = StreamPort::new(ours);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = reader.max_frame_size(2).spawn(PortLink::new(PortId(2), tx));

        theirs.write_all(&encode_frame(b"oversize").unwrap()).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(CommsError::FrameTooLarge { .. })));
        assert!(matches!(rx.try_recv(), Ok(Command::Closed { .. })));
    }

    #[tokio::test]
    async fn test_post_fails_after_peer_gone() {
        let (ours, theirs) = duplex(64);
        let (mut port, _reader) = StreamPort::new(ours);
        drop(theirs);

        // The writer task notices the broken pipe on its first write.
        let _ = port.post(Bytes::from_static(b"first"));
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if port.post(Bytes::from_static(b"late")).is_err() {
                return;
            }
        }
        panic!("post kept succeeding after the stream closed");
    }
}
