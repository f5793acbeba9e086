pub mod access;
mod requests;
pub mod store;

use axum::{routing::{delete, get, patch}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connection-requests", get(requests::list).post(requests::create))
        .route("/connection-requests/{id}", delete(requests::remove))
        .route("/connection-requests/{id}/status", patch(requests::update_status))
}
