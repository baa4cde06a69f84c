//! Gateway write pump: serialises outbound frames and keepalive pings.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crmlink_protocol::constants::WS_PING_PERIOD;

/// Drains `write_rx` onto the socket and pings every [`WS_PING_PERIOD`].
///
/// Exits on cancel, on a write error, or when every sender is gone, and
/// always tries to leave a Close frame behind.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval(WS_PING_PERIOD);
    keepalive.tick().await;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = keepalive.tick() => {
                trace!("sending keepalive ping");
                tungstenite::Message::Ping(Vec::new().into())
            }
            msg = write_rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        let closing = matches!(frame, tungstenite::Message::Close(_));
        if let Err(e) = write.send(frame).await {
            error!("gateway write error: {e}");
            return;
        }
        if closing {
            return;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;
    use std::time::Duration;

    fn capture_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }))
    }

    #[tokio::test]
    async fn forwards_frames_then_closes_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(write_pump(capture_sink(sink_tx), write_rx, c));

        write_tx
            .send(tungstenite::Message::Text("hello".into()))
            .await
            .unwrap();
        let first = sink_rx.recv().await.unwrap();
        assert_eq!(first, tungstenite::Message::Text("hello".into()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(_))
        ));
    }

    #[tokio::test]
    async fn explicit_close_is_sent_once() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (write_tx, write_rx) = mpsc::channel(16);

        let handle = tokio::spawn(write_pump(
            capture_sink(sink_tx),
            write_rx,
            CancellationToken::new(),
        ));
        write_tx.send(tungstenite::Message::Close(None)).await.unwrap();
        handle.await.unwrap();

        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(None))
        ));
        assert!(sink_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_keepalive_period() {
        let (sink_tx, mut sink_rx) = mpsc::channel(16);
        let (_write_tx, write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tokio::spawn(write_pump(capture_sink(sink_tx), write_rx, cancel.clone()));

        let frame = tokio::time::timeout(WS_PING_PERIOD * 2, sink_rx.recv())
            .await
            .expect("ping within one period")
            .unwrap();
        assert!(matches!(frame, tungstenite::Message::Ping(_)));
        cancel.cancel();
    }
}
