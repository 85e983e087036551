use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_db::Database;
use huddle_types::api::Claims;
use huddle_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::session::SessionState;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Sender = SplitSink<WebSocket, Message>;
type SharedSession = Arc<Mutex<SessionState>>;

/// Handle a single WebSocket connection: Identify handshake, then the
/// event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user_id = claims.sub;
    let name = claims.name;

    info!("{} ({}) connected to gateway", name, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    };
    if !send_event(&mut sender, &ready).await {
        return;
    }

    // Register per-user channel and send existing online users, then go online
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    for (uid, uname) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            name: uname,
            online: true,
            last_seen: None,
        };
        if !send_event(&mut sender, &event).await {
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    dispatcher.user_online(user_id, name.clone()).await;

    let mut broadcast_rx = dispatcher.subscribe();
    let session: SharedSession = Arc::new(Mutex::new(SessionState::new(user_id)));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let send_session = session.clone();
    let send_db = db.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let outgoing = with_session(&send_db, &send_session, move |db, s| s.route(db, &event)).await;
                    if !send_all(&mut sender, outgoing).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };

                    let read = match &event {
                        GatewayEvent::ReadMarked { destination, .. } => Some(*destination),
                        _ => None,
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                    if let Some(destination) = read {
                        let outgoing =
                            with_session(&send_db, &send_session, move |db, s| s.read_marked(db, destination)).await;
                        if !send_all(&mut sender, outgoing).await {
                            break;
                        }
                    }
                }
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
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_name = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_dispatcher, &db, &session, &recv_name, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_name,
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

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    session: &SharedSession,
    name: &str,
    cmd: GatewayCommand,
) {
    let user_id = match session.lock() {
        Ok(s) => s.user_id(),
        Err(_) => return,
    };

    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { workspace_id } => {
            info!("{} ({}) subscribing to workspace {}", name, user_id, workspace_id);
            let outgoing = with_session(db, session, move |db, s| s.subscribe(db, workspace_id).map(|e| vec![e])).await;
            for event in outgoing {
                dispatcher.send_to_user(user_id, event).await;
            }
        }

        GatewayCommand::Heartbeat => {
            let db = db.clone();
            let touched = tokio::task::spawn_blocking(move || db.touch_last_seen(user_id, Utc::now())).await;
            match touched {
                Ok(Ok(user)) => dispatcher.broadcast(GatewayEvent::PresenceUpdate {
                    user_id,
                    name: user.name,
                    online: true,
                    last_seen: user.last_seen,
                }),
                Ok(Err(e)) => warn!("Heartbeat for {} failed: {}", user_id, e),
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }
    }
}

/// Run a session step against the store off the async runtime. Store
/// failures are logged and turn into "nothing to send".
async fn with_session<F>(db: &Arc<Database>, session: &SharedSession, f: F) -> Vec<GatewayEvent>
where
    F: FnOnce(&Database, &mut SessionState) -> huddle_db::Result<Vec<GatewayEvent>> + Send + 'static,
{
    let db = db.clone();
    let session = session.clone();
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = session.lock().map_err(|e| e.to_string())?;
        f(db.as_ref(), &mut *guard).map_err(|e| e.to_string())
    })
    .await;

    match result {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => {
            warn!("Gateway session update failed: {}", e);
            Vec::new()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    }
}

async fn send_event(sender: &mut Sender, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

async fn send_all(sender: &mut Sender, events: Vec<GatewayEvent>) -> bool {
    for event in &events {
        if !send_event(sender, event).await {
            return false;
        }
    }
    true
}
