mod invites;
pub mod store;

use std::collections::HashSet;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{GroupVoiceChannel, GroupVoiceChannelDetails, GroupVoiceChannelWithCreator, GroupVoiceMemberWithUser},
    AppError, AppJson, AppResult, AppState,
};

use super::Voice;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/group-voice/create", post(create))
        .route("/group-voice/channels", get(channels))
        .route("/group-voice/channel/{channel_id}", get(channel).delete(remove))
        .route("/group-voice/channel-by-code/{invite_code}", get(by_code))
        .route("/group-voice/accept-invite-link", post(accept_invite_link))
        .route("/group-voice/join", post(join))
        .route("/group-voice/leave", post(leave))
        .route("/group-voice/exit", post(exit))
        .route("/group-voice/{channel_id}/members", get(members))
        .route("/group-voice/{channel_id}/member/{user_id}", delete(remove_member))
        .merge(invites::router())
}

async fn existing(db_pool: &SqlitePool, channel_id: Uuid) -> AppResult<GroupVoiceChannel> {
    store::get(db_pool, channel_id)
        .await?
        .ok_or_else(|| AppError::not_found("Channel not found"))
}

#[derive(Deserialize)]
struct NewChannel {
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Created {
    channel_id: Uuid,
    room_id: String,
    invite_code: String,
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    State(voice): State<Voice>,
    AuthUser(user_id): AuthUser,
    AppJson(NewChannel { name }): AppJson<NewChannel>,
) -> AppResult<Json<Created>> {
    let provider = voice.provider()?;
    let name = name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("Channel name is required"))?;

    let stamp = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let room_id = provider
        .create_room(&format!("group-{name}-{stamp}"), &format!("Group voice channel: {name}"))
        .await?;
    let channel = store::create(&db_pool, name, user_id, &room_id).await?;

    info!("{user_id} created group voice channel {} ({name})", channel.id);
    Ok(Json(Created {
        channel_id: channel.id,
        room_id,
        invite_code: channel.invite_code,
    }))
}

#[debug_handler(state = AppState)]
async fn channels(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<GroupVoiceChannelDetails>>> {
    Ok(Json(store::for_member(&db_pool, user_id).await?))
}

#[derive(Serialize)]
struct ChannelWithMembers {
    channel: GroupVoiceChannelWithCreator,
    members: Vec<GroupVoiceMemberWithUser>,
}

#[debug_handler(state = AppState)]
async fn channel(
    Path(channel_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
) -> AppResult<Json<ChannelWithMembers>> {
    let details = store::details(&db_pool, channel_id)
        .await?
        .ok_or_else(|| AppError::not_found("Channel not found"))?;
    Ok(Json(ChannelWithMembers {
        channel: details.channel,
        members: details.members,
    }))
}

/// Public so an invite link can be previewed before signing in.
#[debug_handler(state = AppState)]
async fn by_code(
    Path(invite_code): Path<String>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<GroupVoiceChannelDetails>> {
    store::details_by_code(&db_pool, &invite_code)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Channel not found or invite link is invalid"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelBody {
    channel_id: Option<Uuid>,
}

impl ChannelBody {
    fn required(self) -> AppResult<Uuid> {
        self.channel_id.ok_or_else(|| AppError::bad_request("channelId is required"))
    }
}

#[debug_handler(state = AppState)]
async fn accept_invite_link(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(body): AppJson<ChannelBody>,
) -> AppResult<Json<Value>> {
    let channel = existing(&db_pool, body.required()?).await?;
    store::add_member(&db_pool, channel.id, user_id).await?;
    Ok(Json(json!({ "success": true, "channelId": channel.id })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinBody {
    channel_id: Option<Uuid>,
    invite_code: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Joined {
    token: String,
    channel_id: Uuid,
    room_id: String,
}

/// Joining by invite code also makes the caller a member.
#[debug_handler(state = AppState)]
async fn join(
    State(db_pool): State<SqlitePool>,
    State(voice): State<Voice>,
    AuthUser(user_id): AuthUser,
    AppJson(JoinBody { channel_id, invite_code }): AppJson<JoinBody>,
) -> AppResult<Json<Joined>> {
    let provider = voice.provider()?;
    let channel = match (channel_id, invite_code) {
        (Some(channel_id), _) => store::get(&db_pool, channel_id).await?,
        (None, Some(code)) => store::get_by_code(&db_pool, &code).await?,
        (None, None) => return Err(AppError::bad_request("channelId or inviteCode is required")),
    }
        .ok_or_else(|| AppError::not_found("Channel not found"))?;
    let room_id = channel
        .hms_room_id
        .ok_or_else(|| AppError::from("group voice channel has no room"))?;

    store::add_member(&db_pool, channel.id, user_id).await?;
    store::set_active(&db_pool, channel.id, user_id, true).await?;
    let token = provider.app_token(&room_id, user_id, "speaker")?;

    Ok(Json(Joined { token, channel_id: channel.id, room_id }))
}

#[debug_handler(state = AppState)]
async fn leave(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(body): AppJson<ChannelBody>,
) -> AppResult<Json<Value>> {
    let channel_id = body.required()?;
    if !store::is_member(&db_pool, channel_id, user_id).await? {
        return Err(AppError::not_found("You are not a member of this channel"));
    }
    store::set_active(&db_pool, channel_id, user_id, false).await?;
    Ok(Json(json!({ "success": true })))
}

/// Leaves the channel for good. The last member out deletes it.
#[debug_handler(state = AppState)]
async fn exit(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(body): AppJson<ChannelBody>,
) -> AppResult<Json<Value>> {
    let channel = existing(&db_pool, body.required()?).await?;
    store::remove_member(&db_pool, channel.id, user_id).await?;

    let deleted = store::member_count(&db_pool, channel.id).await? == 0;
    if deleted {
        store::delete(&db_pool, channel.id).await?;
        info!("group voice channel {} deleted, nobody left", channel.id);
    }

    Ok(Json(json!({ "success": true, "channelDeleted": deleted })))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(channel_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let channel = existing(&db_pool, channel_id).await?;
    if channel.creator_id != user_id {
        return Err(AppError::forbidden("Only the channel creator can delete this channel"));
    }

    store::delete(&db_pool, channel.id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Members with `isActive` checked against the room's live peers when the
/// voice service can tell us, falling back to what we stored.
#[debug_handler(state = AppState)]
async fn members(
    Path(channel_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(voice): State<Voice>,
    AuthUser(_): AuthUser,
) -> AppResult<Json<Vec<GroupVoiceMemberWithUser>>> {
    let channel = existing(&db_pool, channel_id).await?;
    let mut members = store::members(&db_pool, channel.id).await?;

    if let (Ok(provider), Some(room_id)) = (voice.provider(), &channel.hms_room_id) {
        match provider.active_peers(room_id).await {
            Ok(peers) => {
                let peers: HashSet<String> = peers.into_iter().collect();
                for member in &mut members {
                    member.member.is_active = peers.contains(&member.member.user_id.to_string());
                }
            }
            Err(err) => warn!("could not list peers of {room_id}: {err:#}"),
        }
    }

    Ok(Json(members))
}

#[debug_handler(state = AppState)]
async fn remove_member(
    Path((channel_id, member_id)): Path<(Uuid, Uuid)>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let channel = existing(&db_pool, channel_id).await?;
    if channel.creator_id != user_id {
        return Err(AppError::forbidden("Only the channel creator can remove members"));
    }

    store::remove_member(&db_pool, channel.id, member_id).await?;
    Ok(Json(json!({ "success": true })))
}
