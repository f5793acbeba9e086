use std::{env, fmt::Display, str::FromStr};

use anyhow::Context;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,

    /// Every request is served as the dev user, no OAuth involved.
    pub auth_disabled: bool,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub oauth_redirect_url: String,

    pub frontend_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub cookie_secure: bool,
    pub cross_origin_cookies: bool,
    pub session_days: i64,

    pub hms_access_key: Option<String>,
    pub hms_secret: Option<String>,
    pub hms_template_id: Option<String>,

    pub ws_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            database_url: "sqlite://nexus.db?mode=rwc".to_owned(),
            database_max_connections: 16,
            auth_disabled: false,
            google_client_id: None,
            google_client_secret: None,
            oauth_redirect_url: "http://localhost:5000/api/auth/google/callback".to_owned(),
            frontend_url: None,
            cors_origins: Vec::new(),
            cookie_secure: false,
            cross_origin_cookies: false,
            session_days: 7,
            hms_access_key: None,
            hms_secret: None,
            hms_template_id: None,
            ws_channel_capacity: 256,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let port = try_load("PORT", defaults.port)?;

        Ok(Self {
            port,
            database_url: try_load("DATABASE_URL", defaults.database_url)?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            auth_disabled: try_load("AUTH_DISABLED", defaults.auth_disabled)?,
            google_client_id: optional("GOOGLE_CLIENT_ID"),
            google_client_secret: optional("GOOGLE_CLIENT_SECRET"),
            oauth_redirect_url: try_load(
                "OAUTH_REDIRECT_URL",
                format!("http://localhost:{port}/api/auth/google/callback"),
            )?,
            frontend_url: optional("FRONTEND_URL"),
            cors_origins: optional("CORS_ORIGIN")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            cookie_secure: try_load("COOKIE_SECURE", defaults.cookie_secure)?,
            cross_origin_cookies: try_load("CROSS_ORIGIN_COOKIES", defaults.cross_origin_cookies)?,
            session_days: defaults.session_days,
            hms_access_key: optional("HMS_APP_ACCESS_KEY"),
            hms_secret: optional("HMS_APP_SECRET"),
            hms_template_id: optional("HMS_TEMPLATE_ID"),
            ws_channel_capacity: try_load("WS_CHANNEL_CAPACITY", defaults.ws_channel_capacity)?,
        })
    }

    /// Origins a browser may call us from, besides our own host.
    pub fn allowed_origins(&self) -> Vec<String> {
        self.frontend_url
            .iter()
            .chain(self.cors_origins.iter())
            .map(|origin| origin.trim_end_matches('/').to_owned())
            .collect()
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn optional(key: &str) -> Option<String> {
    let value = var(key);
    if value.is_none() {
        warn!("{key} not set");
    }
    value
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {key} value: {value}")),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_origins_strip_trailing_slash() {
        let config = Config {
            frontend_url: Some("https://nexus.example/".to_owned()),
            cors_origins: vec!["https://preview.example".to_owned()],
            ..Config::default()
        };

        assert_eq!(
            config.allowed_origins(),
            vec!["https://nexus.example", "https://preview.example"]
        );
    }
}
