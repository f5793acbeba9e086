use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{MatchRequest, MatchStatus},
    users,
    ws::{event::Deleted, Event, Hub},
    AppError, AppJson, AppResult, AppState,
};

use super::store::{self, MatchFilter, MatchRequestPage, NewMatchRequest};

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    Query(filter): Query<MatchFilter>,
) -> AppResult<Json<MatchRequestPage>> {
    Ok(Json(store::list(&db_pool, &filter).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(new): AppJson<NewMatchRequest>,
) -> AppResult<(StatusCode, Json<MatchRequest>)> {
    new.validate().map_err(AppError::bad_request)?;

    let request = store::create(&db_pool, user_id, &new).await?;
    let name = users::store::display_name(&db_pool, user_id).await?;

    hub.to_all(&Event::MatchRequestCreated {
        message: format!("New {} {} match request from {name}", request.game_name, request.game_mode),
        data: request.clone(),
    });

    Ok((StatusCode::CREATED, Json(request)))
}

#[debug_handler(state = AppState)]
pub(crate) async fn get_one(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(_): AuthUser,
) -> AppResult<Json<MatchRequest>> {
    store::get(&db_pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Match request not found"))
}

/// 404 when missing, 403 when someone else posted it.
async fn owned(db_pool: &SqlitePool, id: Uuid, user_id: Uuid, action: &str) -> AppResult<MatchRequest> {
    let request = store::get(db_pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Match request not found"))?;
    if request.user_id != user_id {
        return Err(AppError::forbidden(format!("You can only {action} your own match requests")));
    }
    Ok(request)
}

#[derive(Deserialize)]
pub(crate) struct StatusUpdate {
    status: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn update_status(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
    AppJson(StatusUpdate { status }): AppJson<StatusUpdate>,
) -> AppResult<Json<MatchRequest>> {
    let status: MatchStatus = status.parse().map_err(|_| AppError::bad_request("Invalid status"))?;
    owned(&db_pool, id, user_id, "update").await?;

    let request = store::set_status(&db_pool, id, status).await?;
    hub.to_all(&Event::MatchRequestUpdated {
        data: request.clone(),
        message: format!("Match request status updated to {status}"),
    });

    Ok(Json(request))
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    owned(&db_pool, id, user_id, "delete").await?;
    store::delete(&db_pool, id).await?;

    hub.to_all(&Event::MatchRequestDeleted {
        data: Deleted { id },
        message: "Match request deleted".to_owned(),
    });

    Ok(StatusCode::NO_CONTENT)
}
