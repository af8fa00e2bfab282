use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use brabas_types::api::Claims;
use brabas_types::events::{ChangeFilter, RealtimeCommand, RealtimeEvent};

use crate::dispatcher::Dispatcher;

/// Server sends a Ping every 15 seconds; two missed Pongs drop the socket.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// A client must identify within this window.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashMap<String, ChangeFilter>>>;

/// Handle one realtime WebSocket: Identify handshake, then forward every
/// change that matches one of the connection's topics.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("Realtime client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to realtime", user_id);

    if send_event(&mut sender, &RealtimeEvent::Ready { user_id }).await.is_err() {
        return;
    }

    dispatcher.connected(user_id).await;
    run_connection_loop(sender, receiver, &dispatcher, user_id).await;
    dispatcher.disconnected(user_id).await;

    info!("{} disconnected from realtime", user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    user_id: Uuid,
) {
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashMap::new()));
    let send_subscriptions = subscriptions.clone();

    // Acks from the command side go through the send task so one task owns the sink
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    let mut changes = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = changes.recv() => {
                    let change = match result {
                        Ok(change) => change,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Realtime receiver for {} lagged by {} changes", user_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let topics: Vec<String> = send_subscriptions
                        .read()
                        .await
                        .iter()
                        .filter(|(_, filter)| filter.matches(&change))
                        .map(|(topic, _)| topic.clone())
                        .collect();

                    for topic in topics {
                        let event = RealtimeEvent::Change { topic, change: change.clone() };
                        if send_event(&mut sender, &event).await.is_err() {
                            return;
                        }
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(event) = reply else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for {}, dropping connection", user_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) = handle_command(user_id, cmd, &subscriptions).await {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad realtime command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_command(
    user_id: Uuid,
    cmd: RealtimeCommand,
    subscriptions: &Subscriptions,
) -> Option<RealtimeEvent> {
    match cmd {
        RealtimeCommand::Identify { .. } => None, // Already handled

        RealtimeCommand::Subscribe { topic, filter } => {
            if !filter.visible_to(user_id) {
                warn!("{} tried to subscribe to {:?}", user_id, filter);
                return Some(RealtimeEvent::Rejected {
                    topic,
                    reason: "filter does not involve the authenticated user".into(),
                });
            }
            debug!("{} subscribed {} -> {:?}", user_id, topic, filter);
            subscriptions.write().await.insert(topic.clone(), filter);
            Some(RealtimeEvent::Subscribed { topic })
        }

        RealtimeCommand::Unsubscribe { topic } => {
            debug!("{} unsubscribed {}", user_id, topic);
            subscriptions.write().await.remove(&topic);
            None
        }
    }
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        warn!("Failed to encode realtime event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Uuid> {
    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(RealtimeCommand::Identify { token }) =
                    serde_json::from_str::<RealtimeCommand>(&text)
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Uuid> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}
