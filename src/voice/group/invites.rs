use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{ConnectionStatus, GroupVoiceInvite, GroupVoiceInviteWithUsers, NotificationKind},
    notifications::{notify, NewNotification},
    users,
    ws::Hub,
    AppError, AppJson, AppResult, AppState,
};

use super::{existing, store};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/group-voice/invite", post(invite))
        .route("/group-voice/invites", get(list))
        .route("/group-voice/invite/{invite_id}", delete(cancel))
        .route("/group-voice/invite/{invite_id}/accept", post(accept))
        .route("/group-voice/invite/{invite_id}/decline", post(decline))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InviteBody {
    channel_id: Option<Uuid>,
    #[serde(default)]
    user_ids: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Invited {
    success: bool,
    invited_count: usize,
    skipped_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Invites each user once; anyone with an invite still pending is skipped.
#[debug_handler(state = AppState)]
async fn invite(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(inviter_id): AuthUser,
    AppJson(InviteBody { channel_id, user_ids }): AppJson<InviteBody>,
) -> AppResult<Json<Invited>> {
    let channel_id = channel_id.ok_or_else(|| AppError::bad_request("channelId is required"))?;
    if user_ids.is_empty() {
        return Err(AppError::bad_request("userIds must not be empty"));
    }
    let channel = existing(&db_pool, channel_id).await?;
    let name = users::store::display_name(&db_pool, inviter_id).await?;

    let mut invited = 0;
    let mut skipped = 0;
    for invitee_id in user_ids {
        if invitee_id == inviter_id || store::has_pending_invite(&db_pool, channel.id, invitee_id).await? {
            skipped += 1;
            continue;
        }

        let invite = store::create_invite(&db_pool, channel.id, inviter_id, invitee_id).await?;
        notify(
            &db_pool,
            &hub,
            NewNotification::new(
                invitee_id,
                NotificationKind::VoiceChannelInvite,
                "Voice Channel Invite",
                format!("{name} invited you to join \"{}\"", channel.name),
            )
                .related_user(inviter_id)
                .action_url("/voice-channels")
                .action_data(json!({ "channelId": channel.id, "inviteId": invite.id })),
        )
            .await?;
        invited += 1;
    }

    let message = (skipped > 0).then(|| format!("{skipped} user(s) already have a pending invite"));
    Ok(Json(Invited {
        success: true,
        invited_count: invited,
        skipped_count: skipped,
        message,
    }))
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<GroupVoiceInviteWithUsers>>> {
    Ok(Json(store::pending_invites(&db_pool, user_id).await?))
}

async fn existing_invite(db_pool: &SqlitePool, invite_id: Uuid) -> AppResult<GroupVoiceInvite> {
    store::get_invite(db_pool, invite_id)
        .await?
        .ok_or_else(|| AppError::not_found("Invite not found"))
}

async fn answer(db_pool: &SqlitePool, invite_id: Uuid, status: ConnectionStatus) -> AppResult<GroupVoiceInvite> {
    store::respond(db_pool, invite_id, status)
        .await?
        .ok_or_else(|| AppError::bad_request("Invite has already been responded to"))
}

/// The inviter withdraws a pending invite.
#[debug_handler(state = AppState)]
async fn cancel(
    Path(invite_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let invite = existing_invite(&db_pool, invite_id).await?;
    if invite.inviter_id != user_id {
        return Err(AppError::forbidden("Only the inviter can cancel this invite"));
    }

    answer(&db_pool, invite.id, ConnectionStatus::Declined).await?;
    Ok(Json(json!({ "success": true })))
}

/// The invite if `user_id` received it and has not answered yet.
async fn received(db_pool: &SqlitePool, invite_id: Uuid, user_id: Uuid) -> AppResult<GroupVoiceInvite> {
    let invite = existing_invite(db_pool, invite_id).await?;
    if invite.invitee_id != user_id {
        return Err(AppError::forbidden("This invite is not for you"));
    }
    if invite.status != ConnectionStatus::Pending {
        return Err(AppError::bad_request("Invite has already been responded to"));
    }
    Ok(invite)
}

#[debug_handler(state = AppState)]
async fn accept(
    Path(invite_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let invite = received(&db_pool, invite_id, user_id).await?;
    let channel = existing(&db_pool, invite.channel_id).await?;

    store::add_member(&db_pool, channel.id, user_id).await?;
    answer(&db_pool, invite.id, ConnectionStatus::Accepted).await?;

    let name = users::store::display_name(&db_pool, user_id).await?;
    notify(
        &db_pool,
        &hub,
        NewNotification::new(
            invite.inviter_id,
            NotificationKind::VoiceChannelInviteAccepted,
            "Invite Accepted",
            format!("{name} accepted your invite to \"{}\"", channel.name),
        )
            .related_user(user_id)
            .action_url("/voice-channels")
            .action_data(json!({ "channelId": channel.id })),
    )
        .await?;

    Ok(Json(json!({ "success": true, "channelId": channel.id })))
}

#[debug_handler(state = AppState)]
async fn decline(
    Path(invite_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let invite = received(&db_pool, invite_id, user_id).await?;
    answer(&db_pool, invite.id, ConnectionStatus::Declined).await?;

    let channel_name = store::get(&db_pool, invite.channel_id)
        .await?
        .map(|channel| channel.name)
        .unwrap_or_else(|| "the channel".to_owned());
    let name = users::store::display_name(&db_pool, user_id).await?;
    notify(
        &db_pool,
        &hub,
        NewNotification::new(
            invite.inviter_id,
            NotificationKind::VoiceChannelInviteDeclined,
            "Invite Declined",
            format!("{name} declined your invite to \"{channel_name}\""),
        )
            .related_user(user_id),
    )
        .await?;

    Ok(Json(json!({ "success": true })))
}
