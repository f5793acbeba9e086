use anyhow::{bail, Context};
use reqwest::{header::COOKIE, RequestBuilder};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    db::MatchConnectionWithUsers,
    matches::store::{MatchFilter, MatchRequestPage},
};

/// `http(s)://host[:port]` to the matching `ws(s)://host[:port]/ws`.
pub fn ws_url(api_base: &str) -> anyhow::Result<String> {
    let base = api_base.trim_end_matches('/');
    let base = base.strip_suffix("/api").unwrap_or(base);
    let url = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}/ws")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}/ws")
    } else {
        bail!("expected an http(s) url, got {api_base}");
    };
    Ok(url)
}

/// Talks to the REST API the way the web client does.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
}

impl ApiClient {
    /// `base_url` is the server root, without `/api`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            cookie: None,
        }
    }

    /// Sends the session cookie with every request.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    pub fn ws_url(&self) -> anyhow::Result<String> {
        ws_url(&self.base_url)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.http.get(format!("{}/api{path}", self.base_url));
        match &self.cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    async fn fetch<T: DeserializeOwned>(request: RequestBuilder, path: &str) -> anyhow::Result<T> {
        let response = request
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {path}"))?;
        Ok(response.json().await?)
    }

    pub async fn match_requests(&self, filter: &MatchFilter) -> anyhow::Result<MatchRequestPage> {
        Self::fetch(self.get("/match-requests").query(filter), "/match-requests").await
    }

    pub async fn hidden_matches(&self) -> anyhow::Result<Vec<Uuid>> {
        Self::fetch(self.get("/hidden-matches"), "/hidden-matches").await
    }

    pub async fn my_connections(&self) -> anyhow::Result<Vec<MatchConnectionWithUsers>> {
        Self::fetch(self.get("/user/connections"), "/user/connections").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_urls_follow_the_scheme() {
        assert_eq!(ws_url("http://localhost:5000").unwrap(), "ws://localhost:5000/ws");
        assert_eq!(ws_url("https://nexus.example/").unwrap(), "wss://nexus.example/ws");
        assert_eq!(ws_url("https://nexus.example/api").unwrap(), "wss://nexus.example/ws");
        assert!(ws_url("ftp://nexus.example").is_err());
    }

    #[test]
    fn client_keeps_a_clean_base() {
        let client = ApiClient::new("http://localhost:5000/").with_cookie("id=abc");
        assert_eq!(client.ws_url().unwrap(), "ws://localhost:5000/ws");
        assert_eq!(client.cookie(), Some("id=abc"));
    }
}
