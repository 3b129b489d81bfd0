use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use wsgate_protocol::{UpstreamEventMeta, inspect_event};

use crate::dial::UpstreamConn;
use crate::turn::ClientOutbound;

/// Capacity of the relay channel between the upstream reader and the client
/// writer. A slow client backpressures the reader instead of growing memory.
const RELAY_CHANNEL_CAP: usize = 16;
/// How long the reader gets to drain after cancellation before it is abandoned.
const READER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum RelayEnd {
    /// A terminal Responses event was relayed (or classified).
    Terminal(UpstreamEventMeta),
    /// The client vanished mid-turn.
    ClientGone,
    /// No upstream frame within the read deadline.
    UpstreamTimeout,
    /// Upstream closed or failed mid-stream.
    UpstreamLost(String),
    /// Server shutdown requested.
    Shutdown,
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub end: RelayEnd,
    pub forwarded: usize,
    pub ttft: Option<Duration>,
    /// Client frames that arrived while the turn was still relaying; the
    /// caller replays them as the next turns so ordering is preserved.
    pub pending_client_frames: Vec<String>,
}

/// Relay one turn's upstream event stream to the client, preserving order.
///
/// Two cooperating tasks: this function (the client writer) and a spawned
/// upstream reader feeding a bounded channel. Returns the connection for
/// reuse unless the reader could not be drained in time.
pub async fn relay_turn(
    conn: UpstreamConn,
    client_tx: &mpsc::Sender<ClientOutbound>,
    client_rx: &mut mpsc::Receiver<String>,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (Option<UpstreamConn>, RelayOutcome) {
    let UpstreamConn {
        conn_id,
        stream,
        created_at,
        ..
    } = conn;
    let (mut sink, read_half) = stream.split();

    let (event_tx, mut event_rx) = mpsc::channel::<Result<Message, String>>(RELAY_CHANNEL_CAP);
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let mut reader = tokio::spawn(async move {
        let mut read_half = read_half;
        loop {
            tokio::select! {
                frame = read_half.next() => {
                    let Some(frame) = frame else { break };
                    let item = frame.map_err(|err| err.to_string());
                    let failed = item.is_err();
                    tokio::select! {
                        sent = event_tx.send(item) => {
                            if sent.is_err() || failed {
                                break;
                            }
                        }
                        _ = cancel_rx.changed() => break,
                    }
                }
                _ = cancel_rx.changed() => break,
            }
        }
        read_half
    });

    let started = Instant::now();
    let mut ttft = None;
    let mut forwarded = 0usize;
    let mut pending_client_frames = Vec::new();
    let mut deadline = tokio::time::Instant::now() + read_timeout;

    let end = loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break RelayEnd::UpstreamLost("upstream stream ended".to_string());
                };
                let message = match event {
                    Ok(message) => message,
                    Err(err) => break RelayEnd::UpstreamLost(err),
                };
                deadline = tokio::time::Instant::now() + read_timeout;
                let text = match message {
                    Message::Text(text) => text.to_string(),
                    Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            break RelayEnd::UpstreamLost(
                                "upstream sent non-utf8 binary frame".to_string(),
                            );
                        }
                    },
                    Message::Ping(payload) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break RelayEnd::UpstreamLost("pong send failed".to_string());
                        }
                        continue;
                    }
                    Message::Pong(_) | Message::Frame(_) => continue,
                    Message::Close(frame) => {
                        break RelayEnd::UpstreamLost(format!("upstream closed: {frame:?}"));
                    }
                };

                let meta = inspect_event(&text);
                if ttft.is_none() {
                    ttft = Some(started.elapsed());
                }
                // Continuation failures are recovered transparently; the
                // frame is withheld so the client sees at most the final
                // surfaced error.
                if meta.kind == Some(wsgate_protocol::EventKind::ContinuationUnavailable) {
                    break RelayEnd::Terminal(meta);
                }
                if client_tx
                    .send(ClientOutbound::Event(text))
                    .await
                    .is_err()
                {
                    break RelayEnd::ClientGone;
                }
                forwarded += 1;
                if meta.is_terminal() {
                    break RelayEnd::Terminal(meta);
                }
            }
            frame = client_rx.recv() => {
                match frame {
                    // Turns serialize per client; a frame arriving mid-turn is
                    // the next turn, queued until this one ends.
                    Some(text) => pending_client_frames.push(text),
                    None => break RelayEnd::ClientGone,
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                break RelayEnd::UpstreamTimeout;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break RelayEnd::Shutdown;
                }
            }
        }
    };

    // Stop the reader and give it a short drain window so in-flight frames
    // are not torn mid-read; a stuck socket forfeits the connection.
    let _ = cancel_tx.send(true);
    event_rx.close();
    let conn = match tokio::time::timeout(READER_DRAIN, &mut reader).await {
        Ok(Ok(read_half)) => match read_half.reunite(sink) {
            Ok(stream) => Some(UpstreamConn {
                conn_id,
                stream,
                created_at,
                last_used: Instant::now(),
            }),
            Err(_) => None,
        },
        Ok(Err(_)) => None,
        Err(_) => {
            // Stuck mid-read on a dead socket; reap the task and forfeit the
            // connection.
            reader.abort();
            debug!(event = "relay_reader_abandoned", conn_id = %conn_id);
            None
        }
    };

    (
        conn,
        RelayOutcome {
            end,
            forwarded,
            ttft,
            pending_client_frames,
        },
    )
}
