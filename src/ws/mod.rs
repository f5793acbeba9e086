pub mod event;
mod hub;
mod socket;

use axum::{routing::get, Router};

use crate::AppState;

pub use event::Event;
pub use hub::{Audience, Delivery, Hub};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(socket::upgrade))
}
