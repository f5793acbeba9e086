use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{ConnectionRequest, ConnectionRequestWithUsers, ConnectionStatus, NotificationKind},
    notifications::{notify, NewNotification},
    users,
    ws::{event::Deleted, Event, Hub},
    AppError, AppJson, AppResult, AppState,
};

use super::store;

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<ConnectionRequestWithUsers>>> {
    Ok(Json(store::for_user(&db_pool, user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewConnectionRequest {
    receiver_id: Option<Uuid>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(sender_id): AuthUser,
    AppJson(NewConnectionRequest { receiver_id }): AppJson<NewConnectionRequest>,
) -> AppResult<(StatusCode, Json<ConnectionRequest>)> {
    let receiver_id = receiver_id.ok_or_else(|| AppError::bad_request("receiverId is required"))?;
    if receiver_id == sender_id {
        return Err(AppError::bad_request("You cannot send a connection request to yourself"));
    }
    if users::store::get(&db_pool, receiver_id).await?.is_none() {
        return Err(AppError::not_found("User not found"));
    }
    if store::pending_between(&db_pool, sender_id, receiver_id).await? {
        return Err(AppError::bad_request("A pending connection request already exists"));
    }

    let request = store::create(&db_pool, sender_id, receiver_id).await?;

    let name = users::store::display_name(&db_pool, sender_id).await?;
    notify(
        &db_pool,
        &hub,
        NewNotification::new(
            receiver_id,
            NotificationKind::ConnectionRequest,
            "New Connection Request",
            format!("{name} wants to connect with you"),
        )
            .related_user(sender_id)
            .action_data(json!({ "requestId": request.id })),
    )
        .await?;

    hub.to_users(&[sender_id, receiver_id], &Event::ConnectionRequestCreated {
        data: request.clone(),
        message: "New connection request created".to_owned(),
    });

    Ok((StatusCode::CREATED, Json(request)))
}

/// The request if `user_id` sent or received it.
async fn participant_of(db_pool: &SqlitePool, id: Uuid, user_id: Uuid) -> AppResult<ConnectionRequest> {
    store::get(db_pool, id)
        .await?
        .filter(|request| request.sender_id == user_id || request.receiver_id == user_id)
        .ok_or_else(|| AppError::not_found("Connection request not found"))
}

#[derive(Deserialize)]
pub(crate) struct StatusUpdate {
    status: String,
}

/// Only the receiver answers a request. Declining deletes it.
#[debug_handler(state = AppState)]
pub(crate) async fn update_status(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(StatusUpdate { status }): AppJson<StatusUpdate>,
) -> AppResult<Response> {
    let status: ConnectionStatus = status.parse().map_err(|_| AppError::bad_request("Invalid status"))?;
    let request = participant_of(&db_pool, id, user_id).await?;
    if status != ConnectionStatus::Pending && request.receiver_id != user_id {
        return Err(AppError::forbidden("Only the receiver can respond to a connection request"));
    }

    let participants = [request.sender_id, request.receiver_id];
    let name = users::store::display_name(&db_pool, user_id).await?;

    if status == ConnectionStatus::Declined {
        store::delete(&db_pool, id).await?;
        notify(
            &db_pool,
            &hub,
            NewNotification::new(
                request.sender_id,
                NotificationKind::ConnectionDeclined,
                "Connection Declined",
                format!("{name} declined your connection request"),
            )
                .related_user(user_id),
        )
            .await?;

        hub.to_users(&participants, &Event::ConnectionRequestDeleted {
            data: Deleted { id },
            message: "Connection request declined and removed".to_owned(),
        });
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let request = store::set_status(&db_pool, id, status).await?;
    if status == ConnectionStatus::Accepted {
        notify(
            &db_pool,
            &hub,
            NewNotification::new(
                request.sender_id,
                NotificationKind::ConnectionAccepted,
                "Connection Accepted",
                format!("{name} accepted your connection request"),
            )
                .related_user(user_id)
                .action_data(json!({ "requestId": request.id })),
        )
            .await?;
    }

    hub.to_users(&participants, &Event::ConnectionRequestUpdated {
        data: request.clone(),
        message: format!("Connection request status updated to {status}"),
    });

    Ok(Json(request).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    let request = participant_of(&db_pool, id, user_id).await?;
    store::delete(&db_pool, id).await?;

    hub.to_users(&[request.sender_id, request.receiver_id], &Event::ConnectionRequestDeleted {
        data: Deleted { id },
        message: "Connection request deleted".to_owned(),
    });

    Ok(StatusCode::NO_CONTENT)
}
