pub mod store;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::Notification,
    ws::{Event, Hub},
    AppError, AppResult, AppState,
};

pub use store::NewNotification;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", patch(mark_all_read))
        .route("/notifications/delete-all", delete(delete_all))
        .route("/notifications/{id}/read", patch(mark_read))
        .route("/notifications/{id}", delete(remove))
}

/// Stores the notification and pushes it to its owner's sockets.
pub async fn notify(db_pool: &SqlitePool, hub: &Hub, notification: NewNotification) -> sqlx::Result<Notification> {
    let notification = store::create(db_pool, &notification).await?;
    hub.to_users(&[notification.user_id], &Event::NewNotification {
        data: notification.clone(),
        message: "New notification".to_owned(),
    });
    Ok(notification)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    unread_only: Option<bool>,
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    Query(ListQuery { unread_only }): Query<ListQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    Ok(Json(store::list(&db_pool, user_id, unread_only.unwrap_or(false)).await?))
}

#[debug_handler(state = AppState)]
async fn unread_count(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let count = store::unread_count(&db_pool, user_id).await?;
    Ok(Json(json!({ "count": count })))
}

/// 404 when missing, 403 when it belongs to someone else.
async fn owned(db_pool: &SqlitePool, id: Uuid, user_id: Uuid) -> AppResult<Notification> {
    let notification = store::get(db_pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Notification not found"))?;
    if notification.user_id != user_id {
        return Err(AppError::forbidden("Not authorized to modify this notification"));
    }
    Ok(notification)
}

#[debug_handler(state = AppState)]
async fn mark_read(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Notification>> {
    owned(&db_pool, id, user_id).await?;
    Ok(Json(store::mark_read(&db_pool, id).await?))
}

#[debug_handler(state = AppState)]
async fn mark_all_read(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Value>> {
    let updated = store::mark_all_read(&db_pool, user_id).await?;
    Ok(Json(json!({ "message": "All notifications marked as read", "updated": updated })))
}

#[debug_handler(state = AppState)]
async fn delete_all(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    store::delete_all(&db_pool, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    owned(&db_pool, id, user_id).await?;
    store::delete(&db_pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
