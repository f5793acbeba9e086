pub mod store;

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{self, ConnectionStatus, MatchConnection, MatchConnectionWithUsers, NotificationKind},
    notifications::{notify, NewNotification},
    users,
    ws::{event::Deleted, Event, Hub},
    AppError, AppJson, AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/match-connections", post(create))
        .route("/match-connections/{id}", delete(remove))
        .route("/match-connections/{id}/status", patch(update_status))
        .route("/user/connections", get(list))
}

/// The connection if `user_id` is one of its two sides.
async fn participant_of(db_pool: &SqlitePool, id: Uuid, user_id: Uuid) -> AppResult<MatchConnection> {
    store::get(db_pool, id)
        .await?
        .filter(|connection| connection.requester_id == user_id || connection.accepter_id == user_id)
        .ok_or_else(|| AppError::not_found("Match connection not found"))
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<MatchConnectionWithUsers>>> {
    Ok(Json(store::for_user(&db_pool, user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewConnection {
    request_id: Option<Uuid>,
    accepter_id: Option<Uuid>,
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(requester_id): AuthUser,
    AppJson(NewConnection { request_id, accepter_id }): AppJson<NewConnection>,
) -> AppResult<(StatusCode, Json<MatchConnection>)> {
    let (Some(request_id), Some(accepter_id)) = (request_id, accepter_id) else {
        return Err(AppError::bad_request("requestId and accepterId are required"));
    };
    if accepter_id == requester_id {
        return Err(AppError::bad_request("You cannot apply to your own match request"));
    }

    let request = crate::matches::store::get(&db_pool, request_id)
        .await?
        .ok_or_else(|| AppError::not_found("Match request not found"))?;
    if request.user_id != accepter_id {
        return Err(AppError::bad_request("accepterId must be the owner of the match request"));
    }

    let connection = match store::create(&db_pool, request_id, requester_id, accepter_id).await {
        Ok(connection) => connection,
        Err(err) if db::is_unique_violation(&err) => {
            return Err(AppError::bad_request("You have already applied to this match request"));
        }
        Err(err) => return Err(err.into()),
    };

    let name = users::store::display_name(&db_pool, requester_id).await?;
    notify(
        &db_pool,
        &hub,
        NewNotification::new(
            accepter_id,
            NotificationKind::MatchApplication,
            "New Match Application",
            format!("{name} wants to join your {} match", request.game_name),
        )
            .related_user(requester_id)
            .related_match(request_id)
            .action_data(json!({ "connectionId": connection.id })),
    )
        .await?;

    hub.to_users(&[requester_id, accepter_id], &Event::MatchConnectionCreated {
        data: connection.clone(),
        message: "New match connection created".to_owned(),
    });

    Ok((StatusCode::CREATED, Json(connection)))
}

#[derive(Deserialize)]
struct StatusUpdate {
    status: String,
}

#[debug_handler(state = AppState)]
async fn update_status(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(StatusUpdate { status }): AppJson<StatusUpdate>,
) -> AppResult<Json<MatchConnection>> {
    let status: ConnectionStatus = status.parse().map_err(|_| AppError::bad_request("Invalid status"))?;
    participant_of(&db_pool, id, user_id).await?;

    let connection = store::set_status(&db_pool, id, status).await?;

    let outcome = match status {
        ConnectionStatus::Accepted => Some((NotificationKind::MatchAccepted, "Match Accepted", "accepted")),
        ConnectionStatus::Declined => Some((NotificationKind::MatchDeclined, "Match Declined", "declined")),
        ConnectionStatus::Pending => None,
    };
    if let Some((kind, title, verb)) = outcome {
        let name = users::store::display_name(&db_pool, connection.accepter_id).await?;
        let game = crate::matches::store::get(&db_pool, connection.request_id)
            .await?
            .map(|request| request.game_name)
            .unwrap_or_else(|| "the match".to_owned());
        notify(
            &db_pool,
            &hub,
            NewNotification::new(
                connection.requester_id,
                kind,
                title,
                format!("{name} {verb} your application for {game}"),
            )
                .related_user(connection.accepter_id)
                .related_match(connection.request_id)
                .action_data(json!({ "connectionId": connection.id })),
        )
            .await?;
    }

    hub.to_users(&[connection.requester_id, connection.accepter_id], &Event::MatchConnectionUpdated {
        data: connection.clone(),
        message: format!("Match connection status updated to {status}"),
    });

    Ok(Json(connection))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    let connection = participant_of(&db_pool, id, user_id).await?;
    store::delete(&db_pool, id).await?;

    hub.to_users(&[connection.requester_id, connection.accepter_id], &Event::MatchConnectionDeleted {
        data: Deleted { id },
        message: "Match connection deleted".to_owned(),
    });

    Ok(StatusCode::NO_CONTENT)
}
