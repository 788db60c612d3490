//! WebTransport server implementation
//!
//! One viewer per WebTransport session, speaking length-prefixed JSON on the
//! first bidirectional stream. Reads go straight into the shared session;
//! writes go through a bounded per-viewer queue drained by a writer task, so
//! the tick path never waits on a slow viewer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use wtransport::endpoint::IncomingSession;
use wtransport::{Endpoint, VarInt};

use crate::config::ServerConfig;
use crate::net::connection::{ClientSink, SinkError};
use crate::net::framing::{read_message, write_message, FramingError};
use crate::net::sync::FrameOutcome;
use crate::net::tls::TlsConfig;
use crate::net::world_session::SharedSession;

/// Messages buffered per viewer before sends report `Full`
const OUTBOUND_QUEUE: usize = 256;

enum Outbound {
    Frame(Arc<[u8]>),
    Close,
}

/// Close requested by the hub, applied by the writer once the queue drains
type PendingClose = Arc<Mutex<Option<(u32, String)>>>;

/// [`ClientSink`] backed by a bounded channel to the viewer's writer task
pub struct ChannelSink {
    tx: mpsc::Sender<Outbound>,
    open: AtomicBool,
    pending_close: PendingClose,
}

impl ChannelSink {
    fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            open: AtomicBool::new(true),
            pending_close: Arc::default(),
        }
    }

    fn pending_close(&self) -> PendingClose {
        self.pending_close.clone()
    }
}

impl ClientSink for ChannelSink {
    fn send(&self, payload: Arc<[u8]>) -> Result<(), SinkError> {
        if !self.is_open() {
            return Err(SinkError::Closed);
        }
        match self.tx.try_send(Outbound::Frame(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => {
                self.open.store(false, Ordering::Release);
                Err(SinkError::Closed)
            }
        }
    }

    fn close(&self, code: u32, reason: &str) {
        if self.open.swap(false, Ordering::AcqRel) {
            *self.pending_close.lock() = Some((code, reason.to_string()));
            // Wakes the writer early; with a full queue it finds the close when the queue ends
            let _ = self.tx.try_send(Outbound::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

/// Drain the viewer queue onto the stream until the queue ends or a close
/// is requested, then apply any requested close. Frames queued before the
/// close are written first.
async fn write_outbound<W, C>(mut stream: W, mut rx: mpsc::Receiver<Outbound>, pending_close: PendingClose, on_close: C)
where
    W: AsyncWrite + Unpin,
    C: FnOnce(u32, &str),
{
    while let Some(Outbound::Frame(bytes)) = rx.recv().await {
        if let Err(e) = write_message(&mut stream, &bytes).await {
            debug!("Stream write error: {}", e);
            break;
        }
    }

    let requested = pending_close.lock().take();
    if let Some((code, reason)) = requested {
        on_close(code, &reason);
    }
}

/// WebTransport server
pub struct WebTransportServer {
    config: ServerConfig,
    tls_config: TlsConfig,
    session: SharedSession,
}

impl WebTransportServer {
    pub fn new(config: ServerConfig, tls_config: TlsConfig, session: SharedSession) -> Self {
        Self {
            config,
            tls_config,
            session,
        }
    }

    /// Get the certificate hash for client configuration
    pub fn cert_hash(&self) -> &str {
        &self.tls_config.cert_hash
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Accept viewers until the endpoint fails
    pub async fn run(self) -> anyhow::Result<()> {
        let bind_addr = self.bind_addr();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_address(bind_addr)
            .with_identity(self.tls_config.identity)
            .build();

        let server = Endpoint::server(server_config)?;

        info!("WebTransport server listening on {}", bind_addr);
        info!("Certificate hash: {}", self.tls_config.cert_hash);

        loop {
            let incoming = server.accept().await;
            let session = self.session.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(incoming, session).await {
                    warn!("Connection error: {}", e);
                }
            });
        }
    }
}

/// Handle a single WebTransport session
async fn handle_connection(incoming: IncomingSession, session: SharedSession) -> anyhow::Result<()> {
    let request = incoming.await?;
    debug!(
        "New session from: {:?}, path: {}",
        request.authority(),
        request.path()
    );

    let connection = Arc::new(request.accept().await?);
    let (send, mut recv) = connection.accept_bi().await?;

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let sink = Arc::new(ChannelSink::new(tx));
    let id = session.lock().connect(sink.clone());
    debug!(connection = id, "Viewer stream accepted");

    let writer = {
        let connection = connection.clone();
        tokio::spawn(write_outbound(send, rx, sink.pending_close(), move |code, reason| {
            connection.close(VarInt::from_u32(code), reason.as_bytes());
        }))
    };

    loop {
        let frame = match read_message(&mut recv).await {
            Ok(frame) => frame,
            Err(FramingError::ConnectionClosed) => break,
            Err(FramingError::MessageTooLarge(len, max)) => {
                warn!(connection = id, len, max, "Rejected oversized message");
                break;
            }
            Err(e) => {
                debug!(connection = id, "Stream read error: {}", e);
                break;
            }
        };

        let outcome = session.lock().handle_frame(id, &frame);
        if matches!(
            outcome,
            FrameOutcome::Rejected | FrameOutcome::SinkClosed | FrameOutcome::UnknownConnection
        ) {
            break;
        }
    }

    session.lock().disconnect(id);
    // Last sender gone: the writer drains what is queued and exits
    drop(sink);
    let _ = writer.await;

    debug!(connection = id, "Connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_reports_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        assert_eq!(sink.send(Arc::from(&b"a"[..])), Ok(()));
        assert_eq!(sink.send(Arc::from(&b"b"[..])), Err(SinkError::Full));
        assert!(sink.is_open());
    }

    #[test]
    fn test_sink_closed_when_writer_gone() {
        let (tx, rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        drop(rx);
        assert!(!sink.is_open());
        assert_eq!(sink.send(Arc::from(&b"a"[..])), Err(SinkError::Closed));
    }

    #[test]
    fn test_close_is_requested_once() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        sink.close(4001, "protocol mismatch");
        sink.close(4002, "again");

        assert!(!sink.is_open());
        assert_eq!(sink.send(Arc::from(&b"a"[..])), Err(SinkError::Closed));
        assert_eq!(
            sink.pending_close().lock().clone(),
            Some((4001, "protocol mismatch".to_string()))
        );
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
    }

    fn capture_close() -> (Arc<Mutex<Option<(u32, String)>>>, impl FnOnce(u32, &str)) {
        let closed: Arc<Mutex<Option<(u32, String)>>> = Arc::default();
        let slot = closed.clone();
        (closed, move |code: u32, reason: &str| {
            *slot.lock() = Some((code, reason.to_string()));
        })
    }

    #[tokio::test]
    async fn test_writer_frames_then_closes() {
        let (tx, rx) = mpsc::channel(8);
        let sink = ChannelSink::new(tx);
        sink.send(Arc::from(&b"ack"[..])).unwrap();
        sink.close(4001, "protocol mismatch");

        let (closed, on_close) = capture_close();
        let mut out = Vec::new();
        write_outbound(&mut out, rx, sink.pending_close(), on_close).await;

        let mut expected = 3u32.to_le_bytes().to_vec();
        expected.extend_from_slice(b"ack");
        assert_eq!(out, expected);
        assert_eq!(closed.lock().clone(), Some((4001, "protocol mismatch".to_string())));
    }

    #[tokio::test]
    async fn test_close_survives_full_queue() {
        let (tx, rx) = mpsc::channel(2);
        let sink = ChannelSink::new(tx);
        sink.send(Arc::from(&b"one"[..])).unwrap();
        sink.send(Arc::from(&b"two"[..])).unwrap();
        assert_eq!(sink.send(Arc::from(&b"three"[..])), Err(SinkError::Full));

        // No room for the close marker; it must still be applied after draining
        sink.close(4001, "protocol mismatch");
        let pending = sink.pending_close();
        drop(sink);

        let (closed, on_close) = capture_close();
        let mut out = Vec::new();
        write_outbound(&mut out, rx, pending, on_close).await;

        assert_eq!(out.len(), 2 * 4 + 3 + 3);
        assert_eq!(closed.lock().clone(), Some((4001, "protocol mismatch".to_string())));
    }

    #[tokio::test]
    async fn test_writer_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let sink = ChannelSink::new(tx);
        sink.send(Arc::from(&b"x"[..])).unwrap();
        let pending = sink.pending_close();
        drop(sink);

        let mut out = Vec::new();
        write_outbound(&mut out, rx, pending, |_, _| panic!("no close requested")).await;
        assert_eq!(out.len(), 5);
    }
}
