use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::{self, HiddenMatch},
    AppError, AppJson, AppResult, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hidden-matches", get(list).post(create))
        .route("/hidden-matches/{match_request_id}", delete(remove))
}

/// Hiding twice returns the existing row.
pub async fn hide(db_pool: &SqlitePool, user_id: Uuid, match_request_id: Uuid) -> sqlx::Result<HiddenMatch> {
    sqlx::query_as(
        "INSERT INTO hidden_matches (id,user_id,match_request_id,created_at) VALUES (?,?,?,?)
         ON CONFLICT(user_id, match_request_id) DO UPDATE SET user_id = excluded.user_id
         RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(match_request_id)
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

pub async fn unhide(db_pool: &SqlitePool, user_id: Uuid, match_request_id: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM hidden_matches WHERE user_id=? AND match_request_id=?")
        .bind(user_id)
        .bind(match_request_id)
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn ids(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar("SELECT match_request_id FROM hidden_matches WHERE user_id=? ORDER BY id")
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

#[debug_handler(state = AppState)]
async fn list(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<Vec<Uuid>>> {
    Ok(Json(ids(&db_pool, user_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HideRequest {
    match_request_id: Option<Uuid>,
}

#[debug_handler(state = AppState)]
async fn create(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(HideRequest { match_request_id }): AppJson<HideRequest>,
) -> AppResult<(StatusCode, Json<HiddenMatch>)> {
    let match_request_id = match_request_id.ok_or_else(|| AppError::bad_request("matchRequestId is required"))?;
    if super::store::get(&db_pool, match_request_id).await?.is_none() {
        return Err(AppError::not_found("Match request not found"));
    }

    Ok((StatusCode::CREATED, Json(hide(&db_pool, user_id, match_request_id).await?)))
}

#[debug_handler(state = AppState)]
async fn remove(
    Path(match_request_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<StatusCode> {
    unhide(&db_pool, user_id, match_request_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{matches::store, users};

    #[tokio::test]
    async fn hiding_is_idempotent() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let request = store::create(&db_pool, alice.id, &store::sample_request("Valorant")).await.unwrap();

        let first = hide(&db_pool, alice.id, request.id).await.unwrap();
        let second = hide(&db_pool, alice.id, request.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(ids(&db_pool, alice.id).await.unwrap(), vec![request.id]);

        unhide(&db_pool, alice.id, request.id).await.unwrap();
        assert!(ids(&db_pool, alice.id).await.unwrap().is_empty());
    }
}
