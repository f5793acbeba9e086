use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    db::{self, MatchDuration, MatchRequest, MatchRequestWithUser, MatchStatus, MatchType, Paging},
    geo::Radius,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatchRequest {
    pub game_name: String,
    pub game_mode: String,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub duration: MatchDuration,
    pub tournament_name: Option<String>,
    pub description: String,
    pub region: Option<String>,
}

impl NewMatchRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if [&self.game_name, &self.game_mode, &self.description]
            .iter()
            .any(|field| field.trim().is_empty())
        {
            return Err("gameName, gameMode and description are required");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFilter {
    pub game: Option<String>,
    pub mode: Option<String>,
    pub region: Option<String>,
    pub gender: Option<String>,
    pub language: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub max_distance: Option<f64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequestPage {
    pub match_requests: Vec<MatchRequestWithUser>,
    #[serde(flatten)]
    pub paging: Paging,
}

const FROM_JOINED: &str = " FROM match_requests r LEFT JOIN users u ON u.id = r.user_id WHERE 1=1";

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &MatchFilter) {
    let non_empty = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());

    if let Some(game) = non_empty(&filter.game) {
        query
            .push(" AND r.game_name LIKE ")
            .push_bind(db::contains_pattern(&game))
            .push(" ESCAPE '\\'");
    }
    if let Some(mode) = non_empty(&filter.mode) {
        query.push(" AND r.game_mode = ").push_bind(mode);
    }
    if let Some(region) = non_empty(&filter.region) {
        query.push(" AND r.region = ").push_bind(region);
    }
    if let Some(gender) = non_empty(&filter.gender) {
        query.push(" AND u.gender = ").push_bind(gender);
    }
    if let Some(language) = non_empty(&filter.language) {
        query.push(" AND u.language = ").push_bind(language);
    }
}

/// The public feed, newest first, with the author's display fields.
pub async fn list(db_pool: &SqlitePool, filter: &MatchFilter) -> sqlx::Result<MatchRequestPage> {
    let (page, limit) = Paging::bounds(filter.page, filter.limit);
    let select = "SELECT r.*, u.gamertag, u.profile_image_url, u.latitude, u.longitude";

    if let Some(radius) = Radius::from_parts(filter.latitude, filter.longitude, filter.max_distance) {
        let mut query = QueryBuilder::new(select);
        query.push(FROM_JOINED);
        push_filters(&mut query, filter);
        query.push(" ORDER BY r.id DESC");

        let match_requests: Vec<MatchRequestWithUser> = query
            .build_query_as::<MatchRequestWithUser>()
            .fetch_all(db_pool)
            .await?
            .into_iter()
            .filter(|row| radius.contains(row.latitude, row.longitude))
            .collect();
        let paging = Paging::new(match_requests.len() as i64, page, limit);
        return Ok(MatchRequestPage { match_requests: paging.slice(match_requests), paging });
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*)");
    count.push(FROM_JOINED);
    push_filters(&mut count, filter);
    let total: i64 = count.build_query_scalar().fetch_one(db_pool).await?;
    let paging = Paging::new(total, page, limit);

    let mut query = QueryBuilder::new(select);
    query.push(FROM_JOINED);
    push_filters(&mut query, filter);
    query
        .push(" ORDER BY r.id DESC LIMIT ")
        .push_bind(paging.limit)
        .push(" OFFSET ")
        .push_bind(paging.offset());
    let match_requests = query.build_query_as().fetch_all(db_pool).await?;

    Ok(MatchRequestPage { match_requests, paging })
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<MatchRequest>> {
    sqlx::query_as("SELECT * FROM match_requests WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn create(db_pool: &SqlitePool, user_id: Uuid, new: &NewMatchRequest) -> sqlx::Result<MatchRequest> {
    let now = db::now();
    sqlx::query_as(
        "INSERT INTO match_requests
            (id,user_id,game_name,game_mode,match_type,duration,tournament_name,description,status,region,created_at,updated_at)
         VALUES (?,?,?,?,?,?,?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(new.game_name.trim())
        .bind(new.game_mode.trim())
        .bind(new.match_type)
        .bind(new.duration)
        .bind(&new.tournament_name)
        .bind(new.description.trim())
        .bind(MatchStatus::Waiting)
        .bind(&new.region)
        .bind(now)
        .bind(now)
        .fetch_one(db_pool)
        .await
}

pub async fn set_status(db_pool: &SqlitePool, id: Uuid, status: MatchStatus) -> sqlx::Result<MatchRequest> {
    sqlx::query_as("UPDATE match_requests SET status=?, updated_at=? WHERE id=? RETURNING *")
        .bind(status)
        .bind(db::now())
        .bind(id)
        .fetch_one(db_pool)
        .await
}

/// Connections and hides cascade; their chat history goes explicitly.
pub async fn delete(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<()> {
    let mut tx = db_pool.begin().await?;
    sqlx::query(
        "DELETE FROM chat_messages
         WHERE connection_id IN (SELECT id FROM match_connections WHERE request_id=?)",
    )
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM match_requests WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

#[cfg(test)]
pub(crate) fn sample_request(game: &str) -> NewMatchRequest {
    NewMatchRequest {
        game_name: game.to_owned(),
        game_mode: "Ranked".to_owned(),
        match_type: MatchType::Lfg,
        duration: MatchDuration::ShortTerm,
        tournament_name: None,
        description: "need a duo".to_owned(),
        region: Some("EU".to_owned()),
    }
}
