use serde_json::Value;
use sqlx::{types::Json, SqlitePool};
use uuid::Uuid;

use crate::db::{self, Notification, NotificationKind};

/// Lists are capped at the latest this many.
pub const LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub related_user_id: Option<Uuid>,
    pub related_match_id: Option<Uuid>,
    pub action_url: Option<String>,
    pub action_data: Option<Value>,
}

impl NewNotification {
    pub fn new(user_id: Uuid, kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            related_user_id: None,
            related_match_id: None,
            action_url: None,
            action_data: None,
        }
    }

    pub fn related_user(mut self, user_id: Uuid) -> Self {
        self.related_user_id = Some(user_id);
        self
    }

    pub fn related_match(mut self, match_request_id: Uuid) -> Self {
        self.related_match_id = Some(match_request_id);
        self
    }

    pub fn action_url(mut self, url: impl Into<String>) -> Self {
        self.action_url = Some(url.into());
        self
    }

    pub fn action_data(mut self, data: Value) -> Self {
        self.action_data = Some(data);
        self
    }
}

pub async fn create(db_pool: &SqlitePool, new: &NewNotification) -> sqlx::Result<Notification> {
    sqlx::query_as(
        "INSERT INTO notifications
            (id,user_id,type,title,message,related_user_id,related_match_id,action_url,action_data,is_read,created_at)
         VALUES (?,?,?,?,?,?,?,?,?,FALSE,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(new.user_id)
        .bind(new.kind)
        .bind(&new.title)
        .bind(&new.message)
        .bind(new.related_user_id)
        .bind(new.related_match_id)
        .bind(&new.action_url)
        .bind(new.action_data.clone().map(Json))
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

/// Newest first.
pub async fn list(db_pool: &SqlitePool, user_id: Uuid, unread_only: bool) -> sqlx::Result<Vec<Notification>> {
    sqlx::query_as(
        "SELECT * FROM notifications
         WHERE user_id = ?1 AND (?2 = FALSE OR is_read = FALSE)
         ORDER BY id DESC LIMIT ?3",
    )
        .bind(user_id)
        .bind(unread_only)
        .bind(LIST_LIMIT)
        .fetch_all(db_pool)
        .await
}

pub async fn unread_count(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id=? AND is_read=FALSE")
        .bind(user_id)
        .fetch_one(db_pool)
        .await
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<Notification>> {
    sqlx::query_as("SELECT * FROM notifications WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn mark_read(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Notification> {
    sqlx::query_as("UPDATE notifications SET is_read=TRUE WHERE id=? RETURNING *")
        .bind(id)
        .fetch_one(db_pool)
        .await
}

pub async fn mark_all_read(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE notifications SET is_read=TRUE WHERE user_id=? AND is_read=FALSE")
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM notifications WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(())
}

pub async fn delete_all(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM notifications WHERE user_id=?")
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

/// The user's newest notification of `kind` about `related_user_id`.
pub async fn latest_of_kind(
    db_pool: &SqlitePool,
    user_id: Uuid,
    kind: NotificationKind,
    related_user_id: Uuid,
) -> sqlx::Result<Option<Notification>> {
    sqlx::query_as(
        "SELECT * FROM notifications
         WHERE user_id=? AND type=? AND related_user_id=?
         ORDER BY id DESC LIMIT 1",
    )
        .bind(user_id)
        .bind(kind)
        .bind(related_user_id)
        .fetch_optional(db_pool)
        .await
}

pub async fn mark_read_where(
    db_pool: &SqlitePool,
    user_id: Uuid,
    kind: NotificationKind,
    related_user_id: Uuid,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read=TRUE
         WHERE user_id=? AND type=? AND related_user_id=? AND is_read=FALSE",
    )
        .bind(user_id)
        .bind(kind)
        .bind(related_user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::users;

    #[tokio::test]
    async fn unread_filter_and_counts() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();

        let first = create(
            &db_pool,
            &NewNotification::new(alice.id, NotificationKind::ConnectionRequest, "New Connection Request", "bob wants to connect")
                .related_user(bob.id)
                .action_data(json!({ "requestId": "x" })),
        )
            .await
            .unwrap();
        create(&db_pool, &NewNotification::new(alice.id, NotificationKind::MatchApplication, "t", "m")).await.unwrap();

        assert_eq!(unread_count(&db_pool, alice.id).await.unwrap(), 2);
        mark_read(&db_pool, first.id).await.unwrap();
        assert_eq!(unread_count(&db_pool, alice.id).await.unwrap(), 1);

        let unread = list(&db_pool, alice.id, true).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, NotificationKind::MatchApplication);

        let all = list(&db_pool, alice.id, false).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].action_data.as_ref().map(|data| &data.0), Some(&json!({ "requestId": "x" })));

        assert_eq!(mark_all_read(&db_pool, alice.id).await.unwrap(), 1);
        assert_eq!(delete_all(&db_pool, alice.id).await.unwrap(), 2);
        assert!(list(&db_pool, alice.id, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookups_by_kind_and_related_user() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let carol = users::store::create(&db_pool, "carol").await.unwrap();

        let waiting = |from: Uuid| NewNotification::new(alice.id, NotificationKind::VoiceCallWaiting, "t", "m").related_user(from);
        create(&db_pool, &waiting(bob.id)).await.unwrap();
        let latest = create(&db_pool, &waiting(bob.id)).await.unwrap();
        create(&db_pool, &waiting(carol.id)).await.unwrap();

        let found = latest_of_kind(&db_pool, alice.id, NotificationKind::VoiceCallWaiting, bob.id).await.unwrap();
        assert_eq!(found.map(|n| n.id), Some(latest.id));

        assert_eq!(mark_read_where(&db_pool, alice.id, NotificationKind::VoiceCallWaiting, bob.id).await.unwrap(), 2);
        assert_eq!(unread_count(&db_pool, alice.id).await.unwrap(), 1);
    }
}
