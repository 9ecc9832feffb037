//! One WebSocket transport, driven by its own task.
//!
//! A connection never reconnects on its own. Whoever owns the
//! [`ConnectionHandle`] decides when to replace it, and the replacement waits
//! for the previous task to finish before dialing, so an owner never has two
//! live sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::utils::preview;

/// How long to wait for the server to acknowledge our close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Internal message type for the write channel
enum WriteMessage {
    Data(String),
    Close,
}

/// Receives transport events. Implementations must not block.
pub(crate) trait ConnectionListener: Send + Sync + 'static {
    fn on_open(&self);
    fn on_frame(&self, text: &str);
    fn on_closed(&self);
}

/// Owner's side of a running connection task.
pub(crate) struct ConnectionHandle {
    write_tx: mpsc::UnboundedSender<WriteMessage>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Queue a text frame. Returns false once the task has gone away.
    pub(crate) fn send(&self, frame: String) -> bool {
        self.write_tx.send(WriteMessage::Data(frame)).is_ok()
    }

    /// Ask the task to close the socket and hand back its join handle so the
    /// next connection can wait on it.
    pub(crate) fn close(self) -> JoinHandle<()> {
        // Already gone if the send fails
        let _ = self.write_tx.send(WriteMessage::Close);
        self.task
    }
}

/// Counts sockets currently held open by connection tasks.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveCounter {
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl LiveCounter {
    fn acquire(&self) -> LiveGuard {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        LiveGuard(self.live.clone())
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawn a connection task for `url`. If `previous` is given the task waits
/// for it to finish before connecting.
pub(crate) fn spawn_connection<L: ConnectionListener>(
    url: Url,
    previous: Option<JoinHandle<()>>,
    counter: LiveCounter,
    listener: L,
) -> ConnectionHandle {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_connection(url, previous, counter, write_rx, listener));
    ConnectionHandle { write_tx, task }
}

async fn run_connection<L: ConnectionListener>(
    url: Url,
    previous: Option<JoinHandle<()>>,
    counter: LiveCounter,
    mut rx: mpsc::UnboundedReceiver<WriteMessage>,
    listener: L,
) {
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(error = %e, "Previous connection task did not finish cleanly");
        }
    }

    // Never log the full url, it carries the token
    let host = url.host_str().unwrap_or_default().to_string();
    info!(host = %host, path = %url.path(), "Connecting to chat server");

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                error!(error = %e, host = %host, "Failed to connect to chat server");
                listener.on_closed();
                return;
            }
        },
        _ = wait_for_close(&mut rx) => {
            info!("Connection closed before it was established");
            listener.on_closed();
            return;
        }
    };

    let _live = counter.acquire();
    info!(host = %host, "Connected to chat server");
    listener.on_open();

    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(WriteMessage::Data(data)) => {
                        debug!(preview = %preview(&data), "Sending frame");
                        if let Err(e) = ws_write.send(Message::Text(data.into())).await {
                            error!(error = %e, "Failed to send frame");
                            break;
                        }
                    }
                    Some(WriteMessage::Close) | None => {
                        info!("Close requested, sending close frame");
                        if let Err(e) = ws_write.send(Message::Close(None)).await {
                            warn!(error = %e, "Failed to send close frame");
                        } else {
                            drain_until_closed(&mut ws_read).await;
                        }
                        break;
                    }
                }
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(preview = %preview(&text), "Received frame");
                        listener.on_frame(&text);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(host = %host, "Disconnected from chat server");
    listener.on_closed();
}

/// Resolve once the owner asks to close or drops the handle.
async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<WriteMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            WriteMessage::Close => return,
            WriteMessage::Data(_) => warn!("Dropping frame queued before the connection opened"),
        }
    }
}

/// Wait for the server's close acknowledgement, discarding anything else.
async fn drain_until_closed<S>(ws_read: &mut S)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(Ok(msg)) = ws_read.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!("Server did not acknowledge close in time");
    }
}
