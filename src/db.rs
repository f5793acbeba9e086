use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
    FromRow, SqlitePool,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Config;

pub async fn connect(config: &Config) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    Ok(
        SqlitePoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect_with(options)
            .await?
    )
}

pub async fn migrate(db_pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(db_pool).await?;
    Ok(())
}

/// A migrated in-memory database. A single connection that never expires,
/// otherwise every new connection would see an empty database.
pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// `%value%` for `LIKE ? ESCAPE '\'`, with `%` and `_` in `value` taken literally.
pub fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Custom,
    PreferNotToSay,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Everyone,
    Connections,
    Nobody,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Lfg,
    Lfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum MatchDuration {
    #[default]
    ShortTerm,
    LongTerm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Waiting,
    Connected,
    Declined,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Connected => "connected",
            Self::Declined => "declined",
        })
    }
}

impl FromStr for MatchStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "connected" => Ok(Self::Connected),
            "declined" => Ok(Self::Declined),
            _ => Err(()),
        }
    }
}

/// Shared by match connections, connection requests and group voice invites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Pending,
    Accepted,
    Declined,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        })
    }
}

impl FromStr for ConnectionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationKind {
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionDeclined,
    MatchApplication,
    MatchAccepted,
    MatchDeclined,
    VoiceChannelInvite,
    VoiceChannelInviteAccepted,
    VoiceChannelInviteDeclined,
    VoiceCallWaiting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    #[serde(skip_serializing, default)]
    pub google_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub gamertag: String,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub age: Option<i64>,
    pub gender: Option<Gender>,
    pub language: Option<String>,
    pub preferred_games: Option<Json<Vec<String>>>,
    pub show_mutual_games: Visibility,
    pub show_mutual_friends: Visibility,
    pub show_mutual_hobbies: Visibility,
    pub voice_overlay_enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub game_name: String,
    pub game_mode: String,
    pub match_type: MatchType,
    pub duration: MatchDuration,
    pub tournament_name: Option<String>,
    pub description: String,
    pub status: MatchStatus,
    pub region: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequestWithUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: MatchRequest,
    pub gamertag: Option<String>,
    pub profile_image_url: Option<String>,
    #[serde(skip)]
    pub latitude: Option<f64>,
    #[serde(skip)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchConnection {
    pub id: Uuid,
    pub request_id: Uuid,
    pub requester_id: Uuid,
    pub accepter_id: Uuid,
    pub status: ConnectionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MatchConnectionWithUsers {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub connection: MatchConnection,
    pub requester_gamertag: Option<String>,
    pub requester_profile_image_url: Option<String>,
    pub accepter_gamertag: Option<String>,
    pub accepter_profile_image_url: Option<String>,
    pub game_name: Option<String>,
    pub game_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: ConnectionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequestWithUsers {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub request: ConnectionRequest,
    pub sender_gamertag: Option<String>,
    pub sender_profile_image_url: Option<String>,
    pub receiver_gamertag: Option<String>,
    pub receiver_profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HiddenMatch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub match_request_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageWithSender {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender_gamertag: Option<String>,
    pub sender_profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_user_id: Option<Uuid>,
    pub related_match_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub action_data: Option<Json<Value>>,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoiceChannel {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub hms_room_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipant {
    pub id: Uuid,
    pub voice_channel_id: Uuid,
    pub user_id: Uuid,
    pub is_muted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipantWithUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub participant: VoiceParticipant,
    pub gamertag: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceChannel {
    pub id: Uuid,
    pub name: String,
    pub creator_id: Uuid,
    pub hms_room_id: Option<String>,
    pub invite_code: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceChannelWithCreator {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub channel: GroupVoiceChannel,
    pub creator_gamertag: Option<String>,
    pub creator_profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceChannelDetails {
    #[serde(flatten)]
    pub channel: GroupVoiceChannelWithCreator,
    pub member_count: usize,
    pub active_count: usize,
    pub members: Vec<GroupVoiceMemberWithUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceMember {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub is_active: bool,
    pub is_muted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceMemberWithUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub member: GroupVoiceMember,
    pub gamertag: Option<String>,
    pub profile_image_url: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceInvite {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub status: ConnectionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub responded_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GroupVoiceInviteWithUsers {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub invite: GroupVoiceInvite,
    pub inviter_gamertag: Option<String>,
    pub inviter_profile_image_url: Option<String>,
    pub invitee_gamertag: Option<String>,
    pub invitee_profile_image_url: Option<String>,
    pub channel_name: Option<String>,
}

/// Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl Paging {
    pub const DEFAULT_LIMIT: i64 = 10;
    pub const MAX_LIMIT: i64 = 100;
    /// Keeps `offset` inside `i64` for any limit.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_LIMIT;

    pub fn bounds(page: Option<i64>, limit: Option<i64>) -> (i64, i64) {
        let page = page.unwrap_or(1).clamp(1, Self::MAX_PAGE);
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT);
        (page, limit)
    }

    pub fn new(total: i64, page: i64, limit: i64) -> Self {
        Self {
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// The slice of `items` this page covers, for lists filtered in memory.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_clamps() {
        assert_eq!(Paging::bounds(None, None), (1, 10));
        assert_eq!(Paging::bounds(Some(0), Some(1000)), (1, 100));
        assert_eq!(Paging::bounds(Some(3), Some(0)), (3, 1));
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(contains_pattern("ace"), "%ace%");
        assert_eq!(contains_pattern("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[test]
    fn huge_pages_are_capped() {
        let (page, limit) = Paging::bounds(Some(i64::MAX), Some(Paging::MAX_LIMIT));
        assert_eq!(page, Paging::MAX_PAGE);
        let paging = Paging::new(3, page, limit);
        assert!(paging.offset() > 0);
        assert!(paging.slice(vec![1, 2, 3]).is_empty());
    }

    #[test]
    fn paging_rounds_total_pages_up() {
        assert_eq!(Paging::new(0, 1, 10).total_pages, 0);
        assert_eq!(Paging::new(10, 1, 10).total_pages, 1);
        assert_eq!(Paging::new(11, 1, 10).total_pages, 2);
    }

    #[test]
    fn paging_slices_in_memory_lists() {
        let paging = Paging::new(25, 3, 10);
        assert_eq!(paging.slice((0..25).collect()), (20..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn memory_pool_is_migrated() {
        let db_pool = memory_pool().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
