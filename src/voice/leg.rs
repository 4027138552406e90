//! Channel view of one WebSocket connection.
//!
//! The bridge controller never touches a socket directly. Each leg is a set
//! of channels: text frames and lifecycle notifications come in on
//! `inbound`; outgoing frames take one of two paths. `outbound` is
//! unbounded and carries control messages and playback, which must never be
//! lost. `audio` is bounded and carries relayed caller audio only; when it is
//! full the caller's frame is dropped. The writer always drains `outbound`
//! first. A socket is attached with [`pump_websocket`]; tests attach plain
//! channels through [`Leg::channel`].

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Default depth of the inbound and audio queues (about five seconds of
/// 20 ms frames).
pub const LEG_CHANNEL_CAPACITY: usize = 256;

/// Something the remote end did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegInbound {
    /// One text frame.
    Text(String),
    /// The remote closed the connection (or the stream ended).
    Closed,
    /// Transport failure; the connection is unusable.
    Error(String),
}

/// Something the bridge wants the remote end to receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutbound {
    Text(String),
    /// Send a close frame and stop writing.
    Close,
}

/// Bridge-side handles of one connection.
#[derive(Debug)]
pub struct Leg {
    pub inbound: mpsc::Receiver<LegInbound>,
    /// Control messages and playback. Never drops.
    pub outbound: mpsc::UnboundedSender<LegOutbound>,
    /// Relayed caller audio. Lossy under backpressure.
    pub audio: mpsc::Sender<String>,
}

/// Far-end handles of a channel-backed leg.
#[derive(Debug)]
pub struct LegRemote {
    /// Deliver frames to the bridge as if they came off the wire.
    pub to_bridge: mpsc::Sender<LegInbound>,
    /// Control frames the bridge wrote to this leg.
    pub from_bridge: mpsc::UnboundedReceiver<LegOutbound>,
    /// Audio frames the bridge wrote to this leg.
    pub audio_from_bridge: mpsc::Receiver<String>,
}

impl Leg {
    /// A leg backed by bare channels, plus the remote end that drives it.
    ///
    /// `capacity` bounds the inbound and audio queues.
    pub fn channel(capacity: usize) -> (Leg, LegRemote) {
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(capacity);
        (
            Leg {
                inbound: in_rx,
                outbound: out_tx,
                audio: audio_tx,
            },
            LegRemote {
                to_bridge: in_tx,
                from_bridge: out_rx,
                audio_from_bridge: audio_rx,
            },
        )
    }
}

impl LegRemote {
    /// Push one text frame toward the bridge.
    pub async fn send_text(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.to_bridge
            .send(LegInbound::Text(text.into()))
            .await
            .map_err(|_| anyhow::anyhow!("Bridge dropped the leg"))
    }

    /// Signal a remote close.
    pub async fn close(&self) {
        let _ = self.to_bridge.send(LegInbound::Closed).await;
    }

    /// Next frame the bridge wrote, in the order a socket writer sends
    /// them: queued control frames before queued audio. `None` once the
    /// bridge dropped both senders and everything was read.
    pub async fn recv(&mut self) -> Option<LegOutbound> {
        tokio::select! {
            biased;
            Some(msg) = self.from_bridge.recv() => Some(msg),
            Some(audio) = self.audio_from_bridge.recv() => Some(LegOutbound::Text(audio)),
            else => None,
        }
    }

    /// Like [`LegRemote::recv`] without waiting.
    pub fn try_recv(&mut self) -> Option<LegOutbound> {
        self.from_bridge
            .try_recv()
            .ok()
            .or_else(|| self.audio_from_bridge.try_recv().ok().map(LegOutbound::Text))
    }
}

/// Attach a WebSocket to a new [`Leg`].
///
/// Spawns one reader and one writer task. The reader forwards text frames
/// and ends with exactly one `Closed` or `Error`. The writer stops after a
/// `Close` request or when the bridge drops its sender.
pub fn pump_websocket<S>(ws: WebSocketStream<S>, label: &'static str, session_id: String) -> Leg
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (leg, remote) = Leg::channel(LEG_CHANNEL_CAPACITY);
    let LegRemote {
        to_bridge,
        from_bridge,
        audio_from_bridge,
    } = remote;
    let (ws_sender, ws_receiver) = ws.split();

    let sid = session_id.clone();
    tokio::spawn(async move {
        writer_loop(from_bridge, audio_from_bridge, ws_sender, label, sid).await;
    });
    tokio::spawn(async move {
        reader_loop(ws_receiver, to_bridge, label, session_id).await;
    });

    leg
}

async fn writer_loop<S>(
    mut control: mpsc::UnboundedReceiver<LegOutbound>,
    mut audio: mpsc::Receiver<String>,
    mut ws_sender: futures_util::stream::SplitSink<WebSocketStream<S>, WsMessage>,
    label: &'static str,
    session_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            Some(msg) = control.recv() => msg,
            Some(text) = audio.recv() => LegOutbound::Text(text),
            else => break,
        };
        match msg {
            LegOutbound::Text(text) => {
                if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                    tracing::warn!(
                        session_id = %session_id,
                        leg = label,
                        error = %e,
                        "WebSocket send failed, closing writer"
                    );
                    break;
                }
            }
            LegOutbound::Close => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
    let _ = ws_sender.close().await;
    tracing::debug!(session_id = %session_id, leg = label, "Leg writer terminated");
}

async fn reader_loop<S>(
    mut ws_receiver: futures_util::stream::SplitStream<WebSocketStream<S>>,
    to_bridge: mpsc::Sender<LegInbound>,
    label: &'static str,
    session_id: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let terminal = loop {
        match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if to_bridge
                    .send(LegInbound::Text(text.as_str().to_owned()))
                    .await
                    .is_err()
                {
                    tracing::debug!(
                        session_id = %session_id,
                        leg = label,
                        "Bridge dropped the leg, stopping reader"
                    );
                    return;
                }
            }
            Some(Ok(WsMessage::Close(frame))) => {
                tracing::info!(
                    session_id = %session_id,
                    leg = label,
                    close_frame = ?frame,
                    "WebSocket closed by remote"
                );
                break LegInbound::Closed;
            }
            Some(Ok(
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) | WsMessage::Binary(_),
            )) => {
                // Both protocols are JSON text; ping/pong is answered by tungstenite.
            }
            Some(Err(e)) => {
                tracing::warn!(
                    session_id = %session_id,
                    leg = label,
                    error = %e,
                    "WebSocket error"
                );
                break LegInbound::Error(e.to_string());
            }
            None => break LegInbound::Closed,
        }
    };
    let _ = to_bridge.send(terminal).await;
    tracing::debug!(session_id = %session_id, leg = label, "Leg reader terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_leg_carries_both_directions() {
        let (mut leg, mut remote) = Leg::channel(4);

        remote.send_text("hello").await.unwrap();
        assert_eq!(
            leg.inbound.recv().await,
            Some(LegInbound::Text("hello".into()))
        );

        leg.outbound.send(LegOutbound::Text("reply".into())).unwrap();
        assert_eq!(remote.recv().await, Some(LegOutbound::Text("reply".into())));
    }

    #[tokio::test]
    async fn control_frames_overtake_queued_audio() {
        let (leg, mut remote) = Leg::channel(4);
        leg.audio.try_send("a1".into()).unwrap();
        leg.audio.try_send("a2".into()).unwrap();
        leg.outbound.send(LegOutbound::Text("ctl".into())).unwrap();

        assert_eq!(remote.recv().await, Some(LegOutbound::Text("ctl".into())));
        assert_eq!(remote.recv().await, Some(LegOutbound::Text("a1".into())));
        assert_eq!(remote.try_recv(), Some(LegOutbound::Text("a2".into())));
        assert_eq!(remote.try_recv(), None);

        drop(leg);
        assert_eq!(remote.recv().await, None);
    }

    #[tokio::test]
    async fn full_audio_queue_leaves_control_path_open() {
        let (leg, mut remote) = Leg::channel(2);
        leg.audio.try_send("a1".into()).unwrap();
        leg.audio.try_send("a2".into()).unwrap();
        assert!(leg.audio.try_send("a3".into()).is_err());

        for i in 0..(LEG_CHANNEL_CAPACITY * 2) {
            leg.outbound.send(LegOutbound::Text(format!("c{i}"))).unwrap();
        }
        let mut control = 0;
        while let Ok(LegOutbound::Text(_)) = remote.from_bridge.try_recv() {
            control += 1;
        }
        assert_eq!(control, LEG_CHANNEL_CAPACITY * 2);
    }

    #[tokio::test]
    async fn remote_close_is_delivered() {
        let (mut leg, remote) = Leg::channel(4);
        remote.close().await;
        assert_eq!(leg.inbound.recv().await, Some(LegInbound::Closed));
    }

    #[tokio::test]
    async fn send_after_bridge_drop_fails() {
        let (leg, remote) = Leg::channel(4);
        drop(leg);
        assert!(remote.send_text("late").await.is_err());
    }

    #[tokio::test]
    async fn pump_relays_over_a_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut leg = pump_websocket(ws, "carrier", "test".into());
            let first = leg.inbound.recv().await;
            leg.outbound.send(LegOutbound::Text("pong".into())).unwrap();
            let second = leg.inbound.recv().await;
            (first, second)
        });

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        client.send(WsMessage::Text("ping".into())).await.unwrap();
        let reply = client.next().await.unwrap().unwrap();
        assert_eq!(reply, WsMessage::Text("pong".into()));
        client.close(None).await.unwrap();

        let (first, second) = server.await.unwrap();
        assert_eq!(first, Some(LegInbound::Text("ping".into())));
        assert_eq!(second, Some(LegInbound::Closed));
    }
}
