use std::sync::Arc;

use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{config::Config, AppResult};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<Redirect> {
    session.flush().await?;

    let return_url = return_url
        .or_else(|| config.frontend_url.clone())
        .unwrap_or_else(|| "/".to_owned());
    Ok(Redirect::to(&return_url))
}
