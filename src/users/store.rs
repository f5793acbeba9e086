use serde::{Deserialize, Serialize};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    db::{self, Gender, Paging, User, Visibility},
    geo::Radius,
};

/// How far `upsert_google` counts when the email-derived gamertag is taken.
const MAX_GAMERTAG_SUFFIX: u32 = 1000;

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn get_by_gamertag(db_pool: &SqlitePool, gamertag: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE gamertag=?")
        .bind(gamertag)
        .fetch_optional(db_pool)
        .await
}

/// The gamertag shown in notification texts.
pub async fn display_name(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<String> {
    let gamertag: Option<String> = sqlx::query_scalar("SELECT gamertag FROM users WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await?;
    Ok(gamertag.unwrap_or_else(|| "Someone".to_owned()))
}

pub async fn count(db_pool: &SqlitePool) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(db_pool)
        .await
}

pub async fn create(db_pool: &SqlitePool, gamertag: &str) -> sqlx::Result<User> {
    insert(db_pool, gamertag, None).await
}

async fn insert(db_pool: &SqlitePool, gamertag: &str, google: Option<&GoogleProfile>) -> sqlx::Result<User> {
    let now = db::now();
    sqlx::query_as(
        "INSERT INTO users (id,google_id,email,first_name,last_name,profile_image_url,gamertag,created_at,updated_at)
         VALUES (?,?,?,?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(google.map(|profile| profile.google_id.as_str()))
        .bind(google.and_then(|profile| profile.email.as_deref()))
        .bind(google.and_then(|profile| profile.first_name.as_deref()))
        .bind(google.and_then(|profile| profile.last_name.as_deref()))
        .bind(google.and_then(|profile| profile.profile_image_url.as_deref()))
        .bind(gamertag)
        .bind(now)
        .bind(now)
        .fetch_one(db_pool)
        .await
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoogleProfile {
    pub google_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

impl GoogleProfile {
    /// Email local part, or the google id when there is no usable email.
    fn base_gamertag(&self) -> &str {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or(&self.google_id)
    }
}

/// Refreshes a returning user's Google fields, or creates the user with a
/// gamertag derived from their email (`name`, `name1`, `name2`, ...).
pub async fn upsert_google(db_pool: &SqlitePool, profile: &GoogleProfile) -> sqlx::Result<User> {
    let existing: Option<User> = sqlx::query_as(
        "UPDATE users SET email=?, first_name=?, last_name=?, profile_image_url=?, updated_at=?
         WHERE google_id=? RETURNING *",
    )
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.profile_image_url)
        .bind(db::now())
        .bind(&profile.google_id)
        .fetch_optional(db_pool)
        .await?;
    if let Some(user) = existing {
        return Ok(user);
    }

    let base = profile.base_gamertag();
    let mut suffix = 0;
    loop {
        let gamertag = match suffix {
            0 => base.to_owned(),
            n => format!("{base}{n}"),
        };
        match insert(db_pool, &gamertag, Some(profile)).await {
            Err(err) if db::is_unique_violation(&err) && suffix < MAX_GAMERTAG_SUFFIX => suffix += 1,
            result => return result,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub gamertag: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub age: Option<i64>,
    pub gender: Option<Gender>,
    pub language: Option<String>,
    pub preferred_games: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(gamertag) = &self.gamertag {
            let len = gamertag.chars().count();
            if len < 3 {
                return Err("Gamertag must be at least 3 characters");
            }
            if len > 20 {
                return Err("Gamertag must be at most 20 characters");
            }
        }
        match self.age {
            Some(age) if age < 13 => return Err("You must be at least 13 years old"),
            Some(age) if age > 120 => return Err("Age must be at most 120"),
            _ => {}
        }
        if self.bio.as_ref().is_some_and(|bio| bio.chars().count() > 500) {
            return Err("Bio must be at most 500 characters");
        }
        Ok(())
    }
}

/// Fields left out of `update` keep their value. `None` when the user is gone.
pub async fn update_profile(db_pool: &SqlitePool, id: Uuid, update: &ProfileUpdate) -> sqlx::Result<Option<User>> {
    sqlx::query_as(
        "UPDATE users SET
            gamertag = COALESCE(?1, gamertag),
            first_name = COALESCE(?2, first_name),
            last_name = COALESCE(?3, last_name),
            profile_image_url = COALESCE(?4, profile_image_url),
            bio = COALESCE(?5, bio),
            location = COALESCE(?6, location),
            latitude = COALESCE(?7, latitude),
            longitude = COALESCE(?8, longitude),
            age = COALESCE(?9, age),
            gender = COALESCE(?10, gender),
            language = COALESCE(?11, language),
            preferred_games = COALESCE(?12, preferred_games),
            updated_at = ?13
         WHERE id = ?14 RETURNING *",
    )
        .bind(&update.gamertag)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.profile_image_url)
        .bind(&update.bio)
        .bind(&update.location)
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(update.age)
        .bind(update.gender)
        .bind(&update.language)
        .bind(update.preferred_games.clone().map(Json))
        .bind(db::now())
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyUpdate {
    pub show_mutual_games: Option<Visibility>,
    pub show_mutual_friends: Option<Visibility>,
    pub show_mutual_hobbies: Option<Visibility>,
}

pub async fn update_privacy(db_pool: &SqlitePool, id: Uuid, update: &PrivacyUpdate) -> sqlx::Result<Option<User>> {
    sqlx::query_as(
        "UPDATE users SET
            show_mutual_games = COALESCE(?1, show_mutual_games),
            show_mutual_friends = COALESCE(?2, show_mutual_friends),
            show_mutual_hobbies = COALESCE(?3, show_mutual_hobbies),
            updated_at = ?4
         WHERE id = ?5 RETURNING *",
    )
        .bind(update.show_mutual_games)
        .bind(update.show_mutual_friends)
        .bind(update.show_mutual_hobbies)
        .bind(db::now())
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn set_voice_overlay(db_pool: &SqlitePool, id: Uuid, enabled: bool) -> sqlx::Result<Option<User>> {
    sqlx::query_as("UPDATE users SET voice_overlay_enabled=?, updated_at=? WHERE id=? RETURNING *")
        .bind(enabled)
        .bind(db::now())
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub search: Option<String>,
    pub gender: Option<String>,
    pub language: Option<String>,
    pub game: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub max_distance: Option<f64>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPage {
    pub users: Vec<User>,
    #[serde(flatten)]
    pub paging: Paging,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter, exclude: &[Uuid]) {
    query.push(" WHERE 1=1");

    if !exclude.is_empty() {
        query.push(" AND id NOT IN (");
        let mut ids = query.separated(", ");
        for id in exclude {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
    }
    if let Some(search) = non_empty(&filter.search) {
        let pattern = db::contains_pattern(search);
        query
            .push(" AND (gamertag LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR first_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR last_name LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(gender) = non_empty(&filter.gender) {
        query.push(" AND gender = ").push_bind(gender.to_owned());
    }
    if let Some(language) = non_empty(&filter.language) {
        query.push(" AND language = ").push_bind(language.to_owned());
    }
    if let Some(game) = non_empty(&filter.game) {
        query
            .push(" AND EXISTS (SELECT 1 FROM json_each(users.preferred_games) WHERE value = ")
            .push_bind(game.to_owned())
            .push(")");
    }
}

/// Player discovery, newest accounts first.
pub async fn discover(db_pool: &SqlitePool, filter: &UserFilter, exclude: &[Uuid]) -> sqlx::Result<UserPage> {
    let (page, limit) = Paging::bounds(filter.page, filter.limit);

    // distance is computed in memory, so page after filtering to keep `total` right
    if let Some(radius) = Radius::from_parts(filter.latitude, filter.longitude, filter.max_distance) {
        let mut query = QueryBuilder::new("SELECT * FROM users");
        push_filters(&mut query, filter, exclude);
        query.push(" ORDER BY id DESC");

        let users: Vec<User> = query
            .build_query_as::<User>()
            .fetch_all(db_pool)
            .await?
            .into_iter()
            .filter(|user| radius.contains(user.latitude, user.longitude))
            .collect();
        let paging = Paging::new(users.len() as i64, page, limit);
        return Ok(UserPage { users: paging.slice(users), paging });
    }

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_filters(&mut count, filter, exclude);
    let total: i64 = count.build_query_scalar().fetch_one(db_pool).await?;
    let paging = Paging::new(total, page, limit);

    let mut query = QueryBuilder::new("SELECT * FROM users");
    push_filters(&mut query, filter, exclude);
    query
        .push(" ORDER BY id DESC LIMIT ")
        .push_bind(paging.limit)
        .push(" OFFSET ")
        .push_bind(paging.offset());
    let users = query.build_query_as().fetch_all(db_pool).await?;

    Ok(UserPage { users, paging })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn google(id: &str, email: &str) -> GoogleProfile {
        GoogleProfile {
            google_id: id.to_owned(),
            email: Some(email.to_owned()),
            first_name: Some("Sam".to_owned()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn google_users_get_unique_gamertags() {
        let db_pool = db::memory_pool().await.unwrap();

        let first = upsert_google(&db_pool, &google("g-1", "ace@example.com")).await.unwrap();
        let second = upsert_google(&db_pool, &google("g-2", "ace@other.org")).await.unwrap();
        let third = upsert_google(&db_pool, &google("g-3", "ace@third.net")).await.unwrap();

        assert_eq!(first.gamertag, "ace");
        assert_eq!(second.gamertag, "ace1");
        assert_eq!(third.gamertag, "ace2");
    }

    #[tokio::test]
    async fn returning_google_users_are_updated_in_place() {
        let db_pool = db::memory_pool().await.unwrap();
        let user = upsert_google(&db_pool, &google("g-1", "ace@example.com")).await.unwrap();

        let mut again = google("g-1", "new@example.com");
        again.first_name = Some("Samantha".to_owned());
        let updated = upsert_google(&db_pool, &again).await.unwrap();

        assert_eq!(updated.id, user.id);
        assert_eq!(updated.gamertag, "ace");
        assert_eq!(updated.email.as_deref(), Some("new@example.com"));
        assert_eq!(updated.first_name.as_deref(), Some("Samantha"));
        assert_eq!(count(&db_pool).await.unwrap(), 1);
    }

    #[test]
    fn profile_validation() {
        let ok = ProfileUpdate { gamertag: Some("abc".to_owned()), age: Some(13), ..Default::default() };
        assert!(ok.validate().is_ok());

        let short = ProfileUpdate { gamertag: Some("ab".to_owned()), ..Default::default() };
        assert!(short.validate().is_err());
        let long = ProfileUpdate { gamertag: Some("a".repeat(21)), ..Default::default() };
        assert!(long.validate().is_err());
        let young = ProfileUpdate { age: Some(12), ..Default::default() };
        assert!(young.validate().is_err());
        let bio = ProfileUpdate { bio: Some("x".repeat(501)), ..Default::default() };
        assert!(bio.validate().is_err());
    }

    #[tokio::test]
    async fn partial_profile_update_keeps_other_fields() {
        let db_pool = db::memory_pool().await.unwrap();
        let user = create(&db_pool, "ace").await.unwrap();

        let update = ProfileUpdate {
            bio: Some("support main".to_owned()),
            preferred_games: Some(vec!["Valorant".to_owned()]),
            ..Default::default()
        };
        let updated = update_profile(&db_pool, user.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.gamertag, "ace");
        assert_eq!(updated.bio.as_deref(), Some("support main"));

        let update = ProfileUpdate { location: Some("Berlin".to_owned()), ..Default::default() };
        let updated = update_profile(&db_pool, user.id, &update).await.unwrap().unwrap();
        assert_eq!(updated.bio.as_deref(), Some("support main"));
        assert_eq!(updated.preferred_games.map(|games| games.0), Some(vec!["Valorant".to_owned()]));
    }

    #[tokio::test]
    async fn taken_gamertag_is_a_unique_violation() {
        let db_pool = db::memory_pool().await.unwrap();
        create(&db_pool, "ace").await.unwrap();
        let other = create(&db_pool, "bob").await.unwrap();

        let update = ProfileUpdate { gamertag: Some("ace".to_owned()), ..Default::default() };
        let err = update_profile(&db_pool, other.id, &update).await.unwrap_err();
        assert!(db::is_unique_violation(&err));
    }

    #[tokio::test]
    async fn discover_filters_and_pages() {
        let db_pool = db::memory_pool().await.unwrap();
        let me = create(&db_pool, "me").await.unwrap();
        for name in ["valor1", "valor2", "valor3", "other"] {
            let user = create(&db_pool, name).await.unwrap();
            if name.starts_with("valor") {
                let update = ProfileUpdate {
                    preferred_games: Some(vec!["Valorant".to_owned(), "Chess".to_owned()]),
                    ..Default::default()
                };
                update_profile(&db_pool, user.id, &update).await.unwrap();
            }
        }

        let filter = UserFilter { game: Some("Valorant".to_owned()), limit: Some(2), ..Default::default() };
        let page = discover(&db_pool, &filter, &[me.id]).await.unwrap();
        assert_eq!(page.paging.total, 3);
        assert_eq!(page.paging.total_pages, 2);
        assert_eq!(page.users.len(), 2);
        // newest first
        assert_eq!(page.users[0].gamertag, "valor3");

        let filter = UserFilter { search: Some("OTH".to_owned()), ..Default::default() };
        let page = discover(&db_pool, &filter, &[]).await.unwrap();
        assert_eq!(page.users.len(), 1);

        let filter = UserFilter { search: Some("_".to_owned()), ..Default::default() };
        assert_eq!(discover(&db_pool, &filter, &[]).await.unwrap().paging.total, 0);

        let filter = UserFilter { page: Some(i64::MAX), ..Default::default() };
        assert!(discover(&db_pool, &filter, &[]).await.unwrap().users.is_empty());

        let page = discover(&db_pool, &UserFilter::default(), &[me.id]).await.unwrap();
        assert!(page.users.iter().all(|user| user.id != me.id));
        assert_eq!(page.paging.total, 4);
    }

    #[tokio::test]
    async fn discover_by_distance_counts_after_filtering() {
        let db_pool = db::memory_pool().await.unwrap();
        let london = create(&db_pool, "london").await.unwrap();
        let paris = create(&db_pool, "paris").await.unwrap();
        create(&db_pool, "nowhere").await.unwrap();

        for (user, (lat, lon)) in [(&london, (51.5074, -0.1278)), (&paris, (48.8566, 2.3522))] {
            let update = ProfileUpdate { latitude: Some(lat), longitude: Some(lon), ..Default::default() };
            update_profile(&db_pool, user.id, &update).await.unwrap();
        }

        let filter = UserFilter {
            latitude: Some(51.5),
            longitude: Some(-0.12),
            max_distance: Some(50.0),
            ..Default::default()
        };
        let page = discover(&db_pool, &filter, &[]).await.unwrap();
        assert_eq!(page.paging.total, 1);
        assert_eq!(page.users[0].id, london.id);
    }
}
