use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{
        header::{HOST, ORIGIN},
        HeaderMap, HeaderName, StatusCode,
    },
    response::{IntoResponse, Response},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use sqlx::SqlitePool;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    config::Config,
    connections::access,
    db::ConnectionStatus,
    voice,
    AppState,
};

use super::{
    event::{ClientMessage, Signal, SignalKind, SignalRequest},
    Delivery, Event, Hub,
};

const PING_EVERY: Duration = Duration::from_secs(30);
/// Sockets silent for longer than this are dropped.
const IDLE_TIMEOUT: Duration = Duration::from_secs(40);

/// Browsers always send `Origin`; it must be our own host or one we allow.
/// Non-browser clients without one are let through.
fn origin_allowed(origin: Option<&str>, host: Option<&str>, allowed: &[String]) -> bool {
    let Some(origin) = origin.map(|origin| origin.trim_end_matches('/')) else {
        return true;
    };
    let same_host = origin
        .split_once("://")
        .is_some_and(|(_, authority)| Some(authority) == host);
    same_host || allowed.iter().any(|allowed| allowed == origin)
}

#[debug_handler(state = AppState)]
pub async fn upgrade(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    State(config): State<Arc<Config>>,
    user: Option<AuthUser>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let header = |name: HeaderName| headers.get(name).and_then(|value| value.to_str().ok());
    if !origin_allowed(header(ORIGIN), header(HOST), &config.allowed_origins()) {
        warn!("rejecting websocket from origin {:?}", header(ORIGIN));
        return StatusCode::FORBIDDEN.into_response();
    }

    let user_id = user.map(|AuthUser(user_id)| user_id);
    ws.on_upgrade(move |socket| run(socket, db_pool, hub, user_id))
}

type Sender = SplitSink<WebSocket, Message>;

async fn send(sender: &mut Sender, event: &Event) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!("could not serialize {}: {err}", event.kind());
            true
        }
    }
}

async fn run(socket: WebSocket, db_pool: SqlitePool, hub: Arc<Hub>, user_id: Option<Uuid>) {
    let (mut sender, receiver) = socket.split();
    let deliveries = hub.subscribe();

    if let Some(user_id) = user_id {
        if hub.connect(user_id) {
            info!("{user_id} online");
            announce(&db_pool, &hub, user_id, Event::UserOnline { user_id }).await;
        }
    }

    let greeting = match user_id {
        Some(user_id) => Event::AuthSuccess { user_id, message: "Authenticated".to_owned() },
        None => Event::AuthFailed { message: "Not authenticated".to_owned() },
    };
    let welcome = Event::Welcome { message: "Connected to Nexus Match".to_owned() };
    if send(&mut sender, &greeting).await && send(&mut sender, &welcome).await {
        pump(sender, receiver, deliveries, &db_pool, &hub, user_id).await;
    }

    if let Some(user_id) = user_id {
        if hub.disconnect(user_id) {
            info!("{user_id} offline");
            announce(&db_pool, &hub, user_id, Event::UserOffline { user_id }).await;
            if let Err(err) = voice::deactivate_user(&db_pool, user_id).await {
                warn!("could not clear group voice state of {user_id}: {err}");
            }
        }
    }
}

/// Runs until the socket closes, goes quiet or falls behind for good.
async fn pump(
    mut sender: Sender,
    mut receiver: SplitStream<WebSocket>,
    mut deliveries: broadcast::Receiver<Arc<Delivery>>,
    db_pool: &SqlitePool,
    hub: &Hub,
    user_id: Option<Uuid>,
) {
    let mut heartbeat = tokio::time::interval_at(Instant::now() + PING_EVERY, PING_EVERY);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let Some(Ok(frame)) = frame else { break };
                last_seen = Instant::now();
                match frame {
                    Message::Text(text) => {
                        let Ok(message) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
                            debug!("ignoring unknown frame");
                            continue;
                        };
                        if let Some(reply) = handle(db_pool, hub, user_id, message).await {
                            if !send(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            delivery = deliveries.recv() => match delivery {
                Ok(delivery) => {
                    if delivery.is_for(user_id)
                        && sender.send(Message::Text(delivery.payload.clone())).await.is_err()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("socket lagged, {skipped} events skipped"),
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > IDLE_TIMEOUT {
                    debug!("dropping idle socket");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Presence goes to accepted partners only.
async fn announce(db_pool: &SqlitePool, hub: &Hub, user_id: Uuid, event: Event) {
    match access::accepted_partner_ids(db_pool, user_id).await {
        Ok(partners) => hub.to_users(&partners, &event),
        Err(err) => warn!("could not load partners of {user_id}: {err}"),
    }
}

/// What the sender should hear back, if anything.
async fn handle(db_pool: &SqlitePool, hub: &Hub, user_id: Option<Uuid>, message: ClientMessage) -> Option<Event> {
    let Some((kind, request)) = message.into_signal() else {
        return Some(Event::Pong);
    };
    let Some(user_id) = user_id else {
        return Some(Event::Error { message: "Not authenticated".to_owned() });
    };

    match relay(db_pool, hub, user_id, kind, request).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!("signalling from {user_id} failed: {err}");
            Some(Event::Error { message: "Signalling failed".to_owned() })
        }
    }
}

/// Forwards a signalling frame to the other side of an accepted connection.
async fn relay(
    db_pool: &SqlitePool,
    hub: &Hub,
    from_user_id: Uuid,
    kind: SignalKind,
    request: SignalRequest,
) -> sqlx::Result<Option<Event>> {
    let (Some(target_user_id), Some(connection_id)) = (request.target_user_id, request.connection_id) else {
        return Ok(Some(Event::Error { message: "targetUserId and connectionId are required".to_owned() }));
    };

    let authorized = access::find_link(db_pool, connection_id, from_user_id)
        .await?
        .is_some_and(|link| link.status() == ConnectionStatus::Accepted && link.other(from_user_id) == Some(target_user_id));
    if !authorized {
        return Ok(Some(Event::Error { message: "Not authorized to signal this user".to_owned() }));
    }
    if !hub.is_online(target_user_id) {
        return Ok(Some(Event::WebrtcError { message: "Target user is not connected".to_owned() }));
    }

    hub.to_users(&[target_user_id], &kind.wrap(Signal {
        connection_id,
        offer: request.offer,
        answer: request.answer,
        candidate: request.candidate,
        from_user_id,
        user_id: from_user_id,
    }));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connections, db, users};

    #[test]
    fn origins() {
        let allowed = vec!["https://nexus.example".to_owned()];
        assert!(origin_allowed(None, Some("localhost:5000"), &allowed));
        assert!(origin_allowed(Some("http://localhost:5000"), Some("localhost:5000"), &allowed));
        assert!(origin_allowed(Some("https://nexus.example/"), Some("api.nexus.example"), &allowed));
        assert!(!origin_allowed(Some("https://evil.example"), Some("localhost:5000"), &allowed));
        assert!(!origin_allowed(Some("garbage"), Some("localhost:5000"), &[]));
    }

    #[tokio::test]
    async fn signals_need_an_accepted_link() {
        let db_pool = db::memory_pool().await.unwrap();
        let hub = Hub::new(8);
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let eve = users::store::create(&db_pool, "eve").await.unwrap();
        let request = connections::store::create(&db_pool, alice.id, bob.id).await.unwrap();

        let offer = |target| SignalRequest {
            target_user_id: Some(target),
            connection_id: Some(request.id),
            offer: Some(serde_json::json!({ "sdp": "v=0" })),
            ..Default::default()
        };

        let pending = relay(&db_pool, &hub, alice.id, SignalKind::WebrtcOffer, offer(bob.id)).await.unwrap();
        assert!(matches!(pending, Some(Event::Error { .. })));

        connections::store::set_status(&db_pool, request.id, ConnectionStatus::Accepted).await.unwrap();
        let offline = relay(&db_pool, &hub, alice.id, SignalKind::WebrtcOffer, offer(bob.id)).await.unwrap();
        assert!(matches!(offline, Some(Event::WebrtcError { .. })));

        let outsider = relay(&db_pool, &hub, alice.id, SignalKind::WebrtcOffer, offer(eve.id)).await.unwrap();
        assert!(matches!(outsider, Some(Event::Error { .. })));

        hub.connect(bob.id);
        let mut rx = hub.subscribe();
        let sent = relay(&db_pool, &hub, alice.id, SignalKind::WebrtcOffer, offer(bob.id)).await.unwrap();
        assert!(sent.is_none());

        let delivery = rx.recv().await.unwrap();
        assert!(delivery.is_for(Some(bob.id)));
        assert!(!delivery.is_for(Some(alice.id)));
        let event: Event = serde_json::from_str(delivery.payload.as_str()).unwrap();
        let Event::WebrtcOffer { data } = event else { panic!("expected an offer") };
        assert_eq!(data.from_user_id, alice.id);
        assert_eq!(data.connection_id, request.id);
    }

    #[tokio::test]
    async fn ping_is_answered_without_auth() {
        let db_pool = db::memory_pool().await.unwrap();
        let hub = Hub::new(8);
        assert_eq!(handle(&db_pool, &hub, None, ClientMessage::Ping).await, Some(Event::Pong));

        let unauthenticated = handle(&db_pool, &hub, None, ClientMessage::WebrtcAnswer(SignalRequest::default())).await;
        assert!(matches!(unauthenticated, Some(Event::Error { .. })));
    }
}
