pub mod store;

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    connections::access::{self, Link},
    db::{ChatMessage, ChatMessageWithSender},
    ws::{Event, Hub},
    AppError, AppJson, AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(send))
        .route("/messages/{connection_id}", get(list))
}

/// The link if `user_id` may chat on it.
async fn chat_link(db_pool: &SqlitePool, connection_id: Uuid, user_id: Uuid) -> AppResult<Link> {
    access::find_link(db_pool, connection_id, user_id)
        .await?
        .filter(Link::can_chat)
        .ok_or_else(|| AppError::forbidden("Not authorized to access these messages"))
}

#[debug_handler(state = AppState)]
async fn list(
    Path(connection_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<ChatMessageWithSender>>> {
    chat_link(&db_pool, connection_id, user_id).await?;
    Ok(Json(store::list(&db_pool, connection_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage {
    connection_id: Option<Uuid>,
    receiver_id: Option<Uuid>,
    message: Option<String>,
}

#[debug_handler(state = AppState)]
async fn send(
    State(db_pool): State<SqlitePool>,
    State(hub): State<Arc<Hub>>,
    AuthUser(sender_id): AuthUser,
    AppJson(body): AppJson<NewMessage>,
) -> AppResult<(StatusCode, Json<ChatMessage>)> {
    let (Some(connection_id), Some(receiver_id), Some(text)) = (body.connection_id, body.receiver_id, body.message) else {
        return Err(AppError::bad_request("connectionId, receiverId and message are required"));
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("Message cannot be empty"));
    }

    let link = chat_link(&db_pool, connection_id, sender_id).await?;
    if link.other(sender_id) != Some(receiver_id) {
        return Err(AppError::bad_request("Receiver is not part of this connection"));
    }

    let message = store::create(&db_pool, connection_id, sender_id, receiver_id, text).await?;
    hub.to_users(&[receiver_id], &Event::NewMessage {
        data: message.clone(),
        message: "New message received".to_owned(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}
