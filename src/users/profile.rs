use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{auth::AuthUser, db::{self, User}, AppError, AppJson, AppResult, AppState};

use super::store::{self, PrivacyUpdate, ProfileUpdate};

#[debug_handler(state = AppState)]
pub(crate) async fn update(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(update): AppJson<ProfileUpdate>,
) -> AppResult<Json<User>> {
    update.validate().map_err(AppError::bad_request)?;

    match store::update_profile(&db_pool, user_id, &update).await {
        Ok(user) => user.map(Json).ok_or_else(|| AppError::not_found("User not found")),
        Err(err) if db::is_unique_violation(&err) => Err(AppError::bad_request("Gamertag is already taken")),
        Err(err) => Err(err.into()),
    }
}

#[debug_handler(state = AppState)]
pub(crate) async fn privacy(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(update): AppJson<PrivacyUpdate>,
) -> AppResult<Json<User>> {
    store::update_privacy(&db_pool, user_id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("User not found"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Settings {
    voice_overlay_enabled: Option<bool>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn settings(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
    AppJson(Settings { voice_overlay_enabled }): AppJson<Settings>,
) -> AppResult<Json<User>> {
    let user = match voice_overlay_enabled {
        Some(enabled) => store::set_voice_overlay(&db_pool, user_id, enabled).await?,
        None => store::get(&db_pool, user_id).await?,
    };
    user.map(Json).ok_or_else(|| AppError::not_found("User not found"))
}
