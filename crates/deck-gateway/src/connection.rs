use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use deck_types::events::{PushEvent, RequestFrame, ResponseFrame};
use deck_types::models::Session;

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How a handled frame affects the connection's session.
#[derive(Debug, Clone)]
pub enum SessionChange {
    Unchanged,
    Started(Session),
    Ended,
}

#[derive(Debug, Clone)]
pub struct FrameReply {
    pub frame: ResponseFrame,
    pub session: SessionChange,
}

impl FrameReply {
    pub fn new(frame: ResponseFrame) -> Self {
        Self {
            frame,
            session: SessionChange::Unchanged,
        }
    }
}

/// Executes one request frame on behalf of a connection.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle_frame(
        &self,
        session: Option<Session>,
        frame: RequestFrame,
        cancel: CancellationToken,
    ) -> FrameReply;
}

/// Per-connection state shared between request tasks.
struct ConnState {
    conn_id: Uuid,
    session: RwLock<Option<Session>>,
    dispatcher: Dispatcher,
    push_tx: mpsc::UnboundedSender<PushEvent>,
}

impl ConnState {
    async fn apply(&self, change: SessionChange) {
        match change {
            SessionChange::Unchanged => {}
            SessionChange::Started(session) => {
                let user_id = session.user_id;
                let previous = self.session.write().await.replace(session);
                if let Some(prev) = previous.filter(|p| p.user_id != user_id) {
                    self.dispatcher.detach(prev.user_id, self.conn_id).await;
                }
                self.dispatcher
                    .attach(user_id, self.conn_id, self.push_tx.clone())
                    .await;
                info!("connection {} authenticated as {}", self.conn_id, user_id);
            }
            SessionChange::Ended => {
                if let Some(prev) = self.session.write().await.take() {
                    self.dispatcher.detach(prev.user_id, self.conn_id).await;
                    info!("connection {} signed out {}", self.conn_id, prev.user_id);
                }
            }
        }
    }
}

/// Serve one WebSocket. Requests run concurrently; closing the socket
/// cancels the ones still in flight.
pub async fn handle_connection<H: FrameHandler>(socket: WebSocket, dispatcher: Dispatcher, handler: Arc<H>) {
    let (mut sender, mut receiver) = socket.split();

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<PushEvent>();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ResponseFrame>();

    let state = Arc::new(ConnState {
        conn_id: Uuid::new_v4(),
        session: RwLock::new(None),
        dispatcher: dispatcher.clone(),
        push_tx,
    });
    let conn_id = state.conn_id;
    info!("connection {} opened", conn_id);

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward replies + push events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let text = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(frame) => serde_json::to_string(&frame),
                    None => break,
                },
                event = push_rx.recv() => match event {
                    Some(event) => serde_json::to_string(&event),
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            let text = match text {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read request frames from client
    let recv_state = state.clone();
    let recv_cancel = cancel.clone();
    let recv_tracker = tracker.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<RequestFrame>(&text) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(
                                "connection {} bad frame: {} -- raw: {}",
                                recv_state.conn_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            continue;
                        }
                    };
                    let state = recv_state.clone();
                    let handler = handler.clone();
                    let reply_tx = reply_tx.clone();
                    let cancel = recv_cancel.child_token();
                    recv_tracker.spawn(async move {
                        let session = state.session.read().await.clone();
                        let reply = handler.handle_frame(session, frame, cancel).await;
                        state.apply(reply.session).await;
                        let _ = reply_tx.send(reply.frame);
                    });
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    debug!("connection {} drained in-flight requests", conn_id);

    if let Some(session) = state.session.read().await.as_ref() {
        dispatcher.detach(session.user_id, conn_id).await;
    }
    info!("connection {} closed", conn_id);
}
