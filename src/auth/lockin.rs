use std::sync::Arc;

use axum::{debug_handler, extract::{Query, State}, response::Redirect};
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeVerifier, TokenResponse};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tower_sessions::Session;
use tracing::info;

use crate::{
    config::Config,
    session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL, USER_ID},
    users::{self, store::GoogleProfile},
    AppError, AppResult, AppState, GetField,
};

use super::{clients::GOOGLE_USERINFO_URL, Clients};

#[derive(Deserialize)]
pub(crate) struct LockinQuery {
    pub(crate) state: Option<String>,
    pub(crate) code: Option<String>,
}

/// Google's userinfo response.
fn google_profile(body: &Value) -> AppResult<GoogleProfile> {
    Ok(GoogleProfile {
        google_id: body.get_str_field("sub")?,
        email: body.get_opt_str_field("email"),
        first_name: body.get_opt_str_field("given_name"),
        last_name: body.get_opt_str_field("family_name"),
        profile_image_url: body.get_opt_str_field("picture"),
    })
}

#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(db_pool): State<SqlitePool>,
    State(clients): State<Clients>,
    State(config): State<Arc<Config>>,
    session: Session,
) -> AppResult<Redirect> {
    let state = CsrfToken::new(state.ok_or_else(|| AppError::bad_request("OAuth: without state"))?);
    let code = AuthorizationCode::new(code.ok_or_else(|| AppError::bad_request("OAuth: without code"))?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err(AppError::bad_request("OAuth: no login in progress"));
    };
    if state.secret() != &stored_state {
        return Err(AppError::bad_request("OAuth: state mismatch"));
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err(AppError::bad_request("OAuth: no login in progress"));
    };

    let client = clients.google()?;
    let http_client = reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let token_result = client
        .exchange_code(code)
        .set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier))
        .request_async(&http_client)
        .await?;

    let body: Value = http_client
        .get(GOOGLE_USERINFO_URL)
        .bearer_auth(token_result.access_token().secret())
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let user = users::store::upsert_google(&db_pool, &google_profile(&body)?).await?;
    session.cycle_id().await?;
    session.insert(USER_ID, user.id).await?;

    info!("signed in @{} ({})", user.gamertag, user.id);

    let return_url = session
        .remove::<String>(RETURN_URL)
        .await?
        .or_else(|| config.frontend_url.clone())
        .unwrap_or_else(|| "/".to_owned());
    Ok(Redirect::to(&return_url))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn userinfo_maps_to_profile() {
        let body = json!({
            "sub": "1234",
            "email": "ace@example.com",
            "given_name": "Ace",
            "family_name": "",
            "picture": "https://example.com/a.png",
        });

        let profile = google_profile(&body).unwrap();
        assert_eq!(profile.google_id, "1234");
        assert_eq!(profile.email.as_deref(), Some("ace@example.com"));
        assert_eq!(profile.first_name.as_deref(), Some("Ace"));
        assert_eq!(profile.last_name, None);

        assert!(google_profile(&json!({ "email": "x@y.z" })).is_err());
    }
}
