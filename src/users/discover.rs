use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{auth::AuthUser, connections::access, db::User, AppError, AppResult, AppState};

use super::store::{self, UserFilter, UserPage};

/// Signed-in callers never see themselves or people they are already connected to.
#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    user: Option<AuthUser>,
    Query(filter): Query<UserFilter>,
) -> AppResult<Json<UserPage>> {
    let exclude = match user {
        Some(AuthUser(user_id)) => {
            let mut ids = access::direct_partner_ids(&db_pool, user_id).await?;
            ids.push(user_id);
            ids
        }
        None => Vec::new(),
    };

    Ok(Json(store::discover(&db_pool, &filter, &exclude).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn count(State(db_pool): State<SqlitePool>) -> AppResult<Json<Value>> {
    let count = store::count(&db_pool).await?;
    Ok(Json(json!({ "count": count })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn user(
    Path(id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<User>> {
    store::get(&db_pool, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("User not found"))
}
