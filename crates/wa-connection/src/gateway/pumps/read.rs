//! Gateway read pump: routes responses and push events.

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use std::sync::Arc;

use crmlink_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PONG_WAIT};
use crmlink_protocol::envelope::Message;

use crate::gateway::client::{DisconnectCallback, EventCallback, PendingMap};

/// Reads frames from the gateway until the socket dies.
///
/// Any inbound frame pushes the liveness deadline out by [`WS_PONG_WAIT`];
/// silence past it counts as a dead connection. Requests still waiting are
/// failed on every exit path; the disconnect callback fires on all of them
/// except cancellation.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    on_event: Arc<Mutex<Option<EventCallback>>>,
    on_disconnect: DisconnectCallback,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                pending.lock().await.clear();
                return;
            }

            () = &mut deadline => {
                warn!("gateway silent for {WS_PONG_WAIT:?}, closing");
                break;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("gateway read error: {e}");
                        break;
                    }
                    None => {
                        debug!("gateway stream ended");
                        break;
                    }
                };
                deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match msg {
                    tungstenite::Message::Text(text) => {
                        dispatch_text(&text, &pending, &on_event).await;
                    }
                    tungstenite::Message::Ping(data) => {
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Close(frame) => {
                        match frame {
                            Some(f) => debug!(code = u16::from(f.code), reason = %f.reason, "gateway closed"),
                            None => debug!("gateway closed"),
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Dropping the senders fails every in-flight request with `Closed`.
    pending.lock().await.clear();

    if let Some(cb) = on_disconnect.lock().await.as_ref() {
        cb();
    }
}

/// Parses one text frame and hands it to the waiting request or, if no
/// request claims its id, to the push event callback.
async fn dispatch_text(
    text: &str,
    pending: &PendingMap,
    on_event: &Arc<Mutex<Option<EventCallback>>>,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("gateway frame too large ({} bytes), dropping", text.len());
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("unparseable gateway frame: {e}");
            return;
        }
    };
    trace!(msg_type = ?msg.msg_type, id = %msg.id, "gateway frame");

    if let Some(tx) = pending.lock().await.remove(&msg.id) {
        let _ = tx.send(msg);
        return;
    }

    match on_event.lock().await.as_ref() {
        Some(cb) => cb(msg),
        None => warn!(msg_type = ?msg.msg_type, "no listener for gateway push, dropping"),
    }
}
