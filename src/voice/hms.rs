use anyhow::{anyhow, Context};
use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::GetField;

pub const API_BASE: &str = "https://api.100ms.live/v2";

/// Tokens stay valid for a day.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// The slice of a hosted voice service the server needs: rooms, join
/// tokens and who is in a room right now.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Returns the new room's id.
    async fn create_room(&self, name: &str, description: &str) -> anyhow::Result<String>;

    fn app_token(&self, room_id: &str, user_id: Uuid, role: &str) -> anyhow::Result<String>;

    /// User ids of the peers currently connected to the room.
    async fn active_peers(&self, room_id: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ManagementClaims {
    access_key: String,
    #[serde(rename = "type")]
    kind: String,
    version: u8,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AppClaims {
    access_key: String,
    room_id: String,
    user_id: String,
    role: String,
    #[serde(rename = "type")]
    kind: String,
    version: u8,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: String,
}

/// 100ms over its REST API, authenticated with HS256 tokens signed by the app secret.
pub struct HmsClient {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    key: EncodingKey,
    template_id: Option<String>,
}

impl HmsClient {
    pub fn new(access_key: String, secret: &str, template_id: Option<String>) -> Self {
        Self::with_base_url(API_BASE.to_owned(), access_key, secret, template_id)
    }

    pub fn with_base_url(base_url: String, access_key: String, secret: &str, template_id: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            access_key,
            key: EncodingKey::from_secret(secret.as_bytes()),
            template_id,
        }
    }

    fn management_token(&self) -> anyhow::Result<String> {
        let iat = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = ManagementClaims {
            access_key: self.access_key.clone(),
            kind: "management".to_owned(),
            version: 2,
            iat,
            nbf: iat,
            exp: iat + TOKEN_TTL_SECS,
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.key)?)
    }
}

#[async_trait]
impl VoiceProvider for HmsClient {
    async fn create_room(&self, name: &str, description: &str) -> anyhow::Result<String> {
        let mut body = json!({ "name": name, "description": description });
        if let Some(template_id) = &self.template_id {
            body["template_id"] = json!(template_id);
        }

        let room: Value = self.http
            .post(format!("{}/rooms", self.base_url))
            .bearer_auth(self.management_token()?)
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .context("creating voice room")?
            .json()
            .await?;

        let id = room.get_str_field("id").map_err(|err| anyhow!("{err}"))?;
        debug!("created voice room {id} ({name})");
        Ok(id)
    }

    fn app_token(&self, room_id: &str, user_id: Uuid, role: &str) -> anyhow::Result<String> {
        let iat = time::OffsetDateTime::now_utc().unix_timestamp();
        let claims = AppClaims {
            access_key: self.access_key.clone(),
            room_id: room_id.to_owned(),
            user_id: user_id.to_string(),
            role: role.to_owned(),
            kind: "app".to_owned(),
            version: 2,
            iat,
            nbf: iat,
            exp: iat + TOKEN_TTL_SECS,
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::default(), &claims, &self.key)?)
    }

    async fn active_peers(&self, room_id: &str) -> anyhow::Result<Vec<String>> {
        let response = self.http
            .get(format!("{}/active-rooms/{room_id}/peers", self.base_url))
            .bearer_auth(self.management_token()?)
            .send()
            .await?;

        // an idle room is not "active" as far as 100ms is concerned
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let body: Value = response
            .error_for_status()
            .context("listing active peers")?
            .json()
            .await?;
        Ok(peer_user_ids(&body))
    }
}

/// `{"peers": {"<peer id>": {"user_id": ...}}}` to the user ids.
fn peer_user_ids(body: &Value) -> Vec<String> {
    let Some(peers) = body.get("peers").and_then(Value::as_object) else {
        return Vec::new();
    };
    peers
        .values()
        .filter_map(|peer| peer.get_opt_str_field("user_id"))
        .collect()
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    use super::*;

    fn client() -> HmsClient {
        HmsClient::new("access".to_owned(), "s3cret", None)
    }

    #[test]
    fn app_tokens_carry_room_and_role() {
        let user_id = Uuid::now_v7();
        let token = client().app_token("room-1", user_id, "speaker").unwrap();

        let data = decode::<AppClaims>(
            &token,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::new(Algorithm::HS256),
        )
            .unwrap();
        let claims = data.claims;
        assert_eq!(claims.access_key, "access");
        assert_eq!(claims.room_id, "room-1");
        assert_eq!(claims.user_id, user_id.to_string());
        assert_eq!(claims.role, "speaker");
        assert_eq!(claims.kind, "app");
        assert_eq!(claims.version, 2);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn management_tokens_are_unique() {
        let client = client();
        let first = client.management_token().unwrap();
        let second = client.management_token().unwrap();
        assert_ne!(first, second);

        let data = decode::<ManagementClaims>(
            &first,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::new(Algorithm::HS256),
        )
            .unwrap();
        assert_eq!(data.claims.kind, "management");
    }

    #[test]
    fn wrong_secret_does_not_verify() {
        let token = client().app_token("room-1", Uuid::now_v7(), "speaker").unwrap();
        let result = decode::<AppClaims>(
            &token,
            &DecodingKey::from_secret(b"other"),
            &Validation::new(Algorithm::HS256),
        );
        assert!(result.is_err());
    }

    #[test]
    fn peers_are_read_from_the_map() {
        let body = json!({
            "peers": {
                "p1": { "user_id": "a", "role": "speaker" },
                "p2": { "user_id": "b" },
                "p3": { "role": "viewer" },
            }
        });
        let mut ids = peer_user_ids(&body);
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
        assert!(peer_user_ids(&json!({})).is_empty());
    }
}
