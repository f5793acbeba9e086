use anyhow::Context;
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RedirectUrl, TokenUrl,
};
use tracing::warn;

use crate::{config::Config, AppError, AppResult};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub(crate) const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

pub(crate) type GoogleClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Clone)]
pub struct Clients {
    google: Option<GoogleClient>,
}

impl Clients {
    pub fn from_config(config: &Config) -> anyhow::Result<Clients> {
        let (Some(client_id), Some(client_secret)) = (&config.google_client_id, &config.google_client_secret) else {
            if !config.auth_disabled {
                warn!("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET not set, Google sign-in is off");
            }
            return Ok(Clients { google: None });
        };

        let google = BasicClient::new(ClientId::new(client_id.clone()))
            .set_client_secret(ClientSecret::new(client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_owned())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_owned())?)
            .set_redirect_uri(
                RedirectUrl::new(config.oauth_redirect_url.clone()).context("invalid OAUTH_REDIRECT_URL")?,
            );

        Ok(Clients { google: Some(google) })
    }

    pub(crate) fn google(&self) -> AppResult<&GoogleClient> {
        self.google
            .as_ref()
            .ok_or_else(|| AppError::Unavailable("Google sign-in is not configured".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_needs_both_keys() {
        let mut config = Config::default();
        config.google_client_id = Some("id".to_owned());
        assert!(Clients::from_config(&config).unwrap().google().is_err());

        config.google_client_secret = Some("secret".to_owned());
        assert!(Clients::from_config(&config).unwrap().google().is_ok());
    }

    #[test]
    fn bad_redirect_url_fails_startup() {
        let config = Config {
            google_client_id: Some("id".to_owned()),
            google_client_secret: Some("secret".to_owned()),
            oauth_redirect_url: "not a url".to_owned(),
            ..Config::default()
        };
        assert!(Clients::from_config(&config).is_err());
    }
}
