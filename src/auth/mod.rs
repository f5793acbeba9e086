mod clients;
mod dev;
mod extract;
mod lockin;
mod login;
mod logout;

use axum::{debug_handler, extract::State, routing::get, Json, Router};
use sqlx::SqlitePool;

use crate::{db::User, users, AppError, AppResult, AppState};

pub use clients::Clients;
pub use dev::{ensure_dev_user, DEV_GAMERTAG};
pub use extract::AuthUser;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(login::login))
        .route("/auth/google/callback", get(lockin::lockin))
        .route("/auth/user", get(current_user))
        .route("/logout", get(logout::logout))
}

#[debug_handler(state = AppState)]
async fn current_user(
    State(db_pool): State<SqlitePool>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<User>> {
    // a session can outlive its user
    users::store::get(&db_pool, user_id)
        .await?
        .map(Json)
        .ok_or(AppError::Unauthorized)
}
