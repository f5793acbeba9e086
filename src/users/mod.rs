mod discover;
mod profile;
pub mod store;

use axum::{routing::{get, patch}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(discover::list))
        .route("/users/count", get(discover::count))
        .route("/users/{id}", get(discover::user))
        .route("/users/me/settings", patch(profile::settings))
        .route("/user/profile", patch(profile::update))
        .route("/user/privacy", patch(profile::privacy))
}
