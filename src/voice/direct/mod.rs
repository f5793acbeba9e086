pub mod store;

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    connections::access::{self, Link},
    db::{self, NotificationKind, VoiceChannel, VoiceParticipant, VoiceParticipantWithUser},
    notifications::{self, notify, NewNotification},
    users,
    ws::{
        event::{VoiceJoined, VoiceLeft, VoiceMuted},
        Event, Hub,
    },
    AppError, AppJson, AppResult, AppState,
};

use super::Voice;

/// A waiting-call notification is not repeated within this window.
const CALL_WAITING_COOLDOWN: time::Duration = time::Duration::minutes(5);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/voice/channel/{connection_id}", get(channel))
        .route("/voice/join", post(join))
        .route("/voice/leave", post(leave))
        .route("/voice/mute", post(mute))
        .route("/voice/create-room", post(create_room))
        .route("/voice/{voice_channel_id}/participants", get(participants))
}

/// The link if `user_id` may talk on it.
async fn voice_link(db_pool: &SqlitePool, connection_id: Uuid, user_id: Uuid) -> AppResult<Link> {
    access::find_link(db_pool, connection_id, user_id)
        .await?
        .filter(Link::can_chat)
        .ok_or_else(|| AppError::forbidden("You don't have access to this voice channel"))
}

fn others(participants: &[VoiceParticipantWithUser], user_id: Uuid) -> Vec<Uuid> {
    participants
        .iter()
        .map(|p| p.participant.user_id)
        .filter(|id| *id != user_id)
        .collect()
}

#[derive(Serialize)]
struct ChannelState {
    channel: Option<VoiceChannel>,
    participants: Vec<VoiceParticipantWithUser>,
}

#[debug_handler(state = AppState)]
async fn channel(
    Path(connection_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ChannelState>> {
    voice_link(&db_pool, connection_id, user_id).await?;

    let Some(channel) = store::for_connection(&db_pool, connection_id).await? else {
        return Ok(Json(ChannelState { channel: None, participants: Vec::new() }));
    };
    let participants = store::participants(&db_pool, channel.id).await?;
    Ok(Json(ChannelState { channel: Some(channel), participants }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionBody {
    connection_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Joined {
    token: String,
    room_id: String,
}

#[debug_handler(state = AppState)]
async fn join(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    State(voice): State<Voice>,
    AuthUser(user_id): AuthUser,
    AppJson(ConnectionBody { connection_id }): AppJson<ConnectionBody>,
) -> AppResult<Json<Joined>> {
    let connection_id = connection_id.ok_or_else(|| AppError::bad_request("connectionId is required"))?;
    let provider = voice.provider()?;
    let link = voice_link(&db_pool, connection_id, user_id).await?;

    // one call at a time
    if let Some(current) = store::active_for_user(&db_pool, user_id).await? {
        if current.connection_id != connection_id {
            debug!("{user_id} switching voice channel away from {}", current.connection_id);
            leave_channel(&db_pool, &hub, &current, user_id).await?;
        }
    }

    let room_id = match store::for_connection(&db_pool, connection_id).await?.and_then(|c| c.hms_room_id) {
        Some(room_id) => room_id,
        None => provider
            .create_room(&format!("room-{connection_id}"), "Voice channel for connection")
            .await?,
    };
    let channel = store::get_or_create(&db_pool, connection_id, &room_id).await?;
    let room_id = channel.hms_room_id.clone().unwrap_or(room_id);

    let participant = store::join(&db_pool, channel.id, user_id).await?;
    let token = provider.app_token(&room_id, user_id, "speaker")?;

    let participants = store::participants(&db_pool, channel.id).await?;
    let others = others(&participants, user_id);
    if others.is_empty() {
        if let Some(other_id) = link.other(user_id) {
            call_waiting(&db_pool, &hub, other_id, user_id, connection_id).await?;
        }
    } else {
        hub.to_users(&others, &Event::VoiceParticipantJoined {
            data: VoiceJoined { connection_id, participant, participants },
            message: "User joined voice channel".to_owned(),
        });
    }

    info!("{user_id} joined voice for {connection_id}");
    Ok(Json(Joined { token, room_id }))
}

/// Lets the other side know someone is waiting for them, at most once per cooldown.
async fn call_waiting(
    db_pool: &SqlitePool,
    hub: &Hub,
    recipient_id: Uuid,
    caller_id: Uuid,
    connection_id: Uuid,
) -> AppResult<()> {
    let recent = notifications::store::latest_of_kind(db_pool, recipient_id, NotificationKind::VoiceCallWaiting, caller_id)
        .await?
        .is_some_and(|latest| latest.created_at > db::now() - CALL_WAITING_COOLDOWN);
    if recent {
        return Ok(());
    }

    let name = users::store::display_name(db_pool, caller_id).await?;
    notify(
        db_pool,
        hub,
        NewNotification::new(
            recipient_id,
            NotificationKind::VoiceCallWaiting,
            "Voice Call Waiting",
            format!("{name} is waiting in your personal voice channel"),
        )
            .related_user(caller_id)
            .action_url("/connections")
            .action_data(json!({ "connectionId": connection_id })),
    )
        .await?;
    Ok(())
}

/// Takes the user out of `channel`, clears the waiting-call notification it
/// raised and tells whoever is still there.
async fn leave_channel(db_pool: &SqlitePool, hub: &Hub, channel: &VoiceChannel, user_id: Uuid) -> AppResult<()> {
    store::leave(db_pool, channel.id, user_id).await?;

    if let Some(other_id) = access::find_link(db_pool, channel.connection_id, user_id)
        .await?
        .and_then(|link| link.other(user_id))
    {
        notifications::store::mark_read_where(db_pool, other_id, NotificationKind::VoiceCallWaiting, user_id).await?;
    }

    let participants = store::participants(db_pool, channel.id).await?;
    let others = others(&participants, user_id);
    if !others.is_empty() {
        hub.to_users(&others, &Event::VoiceParticipantLeft {
            data: VoiceLeft { connection_id: channel.connection_id, user_id, participants },
            message: "User left voice channel".to_owned(),
        });
    }
    Ok(())
}

#[debug_handler(state = AppState)]
async fn leave(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(ConnectionBody { connection_id }): AppJson<ConnectionBody>,
) -> AppResult<Json<Value>> {
    let connection_id = connection_id.ok_or_else(|| AppError::bad_request("connectionId is required"))?;

    if let Some(channel) = store::for_connection(&db_pool, connection_id).await? {
        leave_channel(&db_pool, &hub, &channel, user_id).await?;
    }

    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MuteBody {
    connection_id: Option<Uuid>,
    is_muted: Option<bool>,
}

#[derive(Serialize)]
struct MuteState {
    participant: VoiceParticipant,
    participants: Vec<VoiceParticipantWithUser>,
}

#[debug_handler(state = AppState)]
async fn mute(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(MuteBody { connection_id, is_muted }): AppJson<MuteBody>,
) -> AppResult<Json<MuteState>> {
    let (Some(connection_id), Some(is_muted)) = (connection_id, is_muted) else {
        return Err(AppError::bad_request("connectionId and isMuted are required"));
    };

    let channel = store::for_connection(&db_pool, connection_id)
        .await?
        .ok_or_else(|| AppError::not_found("Voice channel not found"))?;
    let participant = store::set_muted(&db_pool, channel.id, user_id, is_muted)
        .await?
        .ok_or_else(|| AppError::not_found("You are not in this voice channel"))?;

    let participants = store::participants(&db_pool, channel.id).await?;
    hub.to_users(&others(&participants, user_id), &Event::VoiceParticipantMuted {
        data: VoiceMuted { connection_id, user_id, is_muted, participants: participants.clone() },
        message: "User mute status changed".to_owned(),
    });

    Ok(Json(MuteState { participant, participants }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Room {
    voice_channel_id: Uuid,
    room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

/// Prepares the connection's room without joining it.
#[debug_handler(state = AppState)]
async fn create_room(
    State(db_pool): State<SqlitePool>,
    State(voice): State<Voice>,
    AuthUser(user_id): AuthUser,
    AppJson(ConnectionBody { connection_id }): AppJson<ConnectionBody>,
) -> AppResult<Json<Room>> {
    let provider = voice.provider()?;
    let connection_id = connection_id.ok_or_else(|| AppError::bad_request("connectionId is required"))?;
    voice_link(&db_pool, connection_id, user_id).await?;

    if let Some(channel) = store::for_connection(&db_pool, connection_id).await? {
        if let Some(room_id) = channel.hms_room_id {
            return Ok(Json(Room {
                voice_channel_id: channel.id,
                room_id,
                message: Some("Using existing voice room"),
            }));
        }
    }

    let room_id = provider
        .create_room(&format!("room-{connection_id}"), "Voice channel for connection")
        .await?;
    let channel = store::get_or_create(&db_pool, connection_id, &room_id).await?;
    Ok(Json(Room {
        voice_channel_id: channel.id,
        room_id: channel.hms_room_id.unwrap_or(room_id),
        message: None,
    }))
}

#[debug_handler(state = AppState)]
async fn participants(
    Path(voice_channel_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<VoiceParticipantWithUser>>> {
    let channel = store::get(&db_pool, voice_channel_id)
        .await?
        .ok_or_else(|| AppError::not_found("Voice channel not found"))?;
    voice_link(&db_pool, channel.connection_id, user_id).await?;

    Ok(Json(store::participants(&db_pool, channel.id).await?))
}
