pub mod connections;
pub mod hidden;
mod requests;
pub mod store;

use axum::{routing::{get, patch}, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/match-requests", get(requests::list).post(requests::create))
        .route("/match-requests/{id}", get(requests::get_one).delete(requests::remove))
        .route("/match-requests/{id}/status", patch(requests::update_status))
        .merge(connections::router())
        .merge(hidden::router())
}
