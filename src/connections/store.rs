use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, ConnectionRequest, ConnectionRequestWithUsers, ConnectionStatus};

pub async fn create(db_pool: &SqlitePool, sender_id: Uuid, receiver_id: Uuid) -> sqlx::Result<ConnectionRequest> {
    let now = db::now();
    sqlx::query_as(
        "INSERT INTO connection_requests (id,sender_id,receiver_id,status,created_at,updated_at)
         VALUES (?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(sender_id)
        .bind(receiver_id)
        .bind(ConnectionStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(db_pool)
        .await
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<ConnectionRequest>> {
    sqlx::query_as("SELECT * FROM connection_requests WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

/// Every request the user sent or received, newest first.
pub async fn for_user(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<ConnectionRequestWithUsers>> {
    sqlx::query_as(
        "SELECT r.*,
                s.gamertag AS sender_gamertag, s.profile_image_url AS sender_profile_image_url,
                v.gamertag AS receiver_gamertag, v.profile_image_url AS receiver_profile_image_url
         FROM connection_requests r
         LEFT JOIN users s ON s.id = r.sender_id
         LEFT JOIN users v ON v.id = r.receiver_id
         WHERE r.sender_id = ?1 OR r.receiver_id = ?1
         ORDER BY r.id DESC",
    )
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

/// A pending request in either direction.
pub async fn pending_between(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> sqlx::Result<bool> {
    let found: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM connection_requests
         WHERE status = 'pending'
           AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
         LIMIT 1",
    )
        .bind(a)
        .bind(b)
        .fetch_optional(db_pool)
        .await?;
    Ok(found.is_some())
}

pub async fn set_status(db_pool: &SqlitePool, id: Uuid, status: ConnectionStatus) -> sqlx::Result<ConnectionRequest> {
    sqlx::query_as("UPDATE connection_requests SET status=?, updated_at=? WHERE id=? RETURNING *")
        .bind(status)
        .bind(db::now())
        .bind(id)
        .fetch_one(db_pool)
        .await
}

/// Removes the request together with its chat history.
pub async fn delete(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<()> {
    let mut tx = db_pool.begin().await?;
    sqlx::query("DELETE FROM chat_messages WHERE connection_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM connection_requests WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    #[tokio::test]
    async fn pending_is_checked_both_ways() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();

        assert!(!pending_between(&db_pool, alice.id, bob.id).await.unwrap());
        let request = create(&db_pool, alice.id, bob.id).await.unwrap();
        assert!(pending_between(&db_pool, bob.id, alice.id).await.unwrap());

        set_status(&db_pool, request.id, ConnectionStatus::Accepted).await.unwrap();
        assert!(!pending_between(&db_pool, alice.id, bob.id).await.unwrap());

        let listed = for_user(&db_pool, bob.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sender_gamertag.as_deref(), Some("alice"));
        assert_eq!(listed[0].receiver_gamertag.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn delete_takes_messages_along() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let request = create(&db_pool, alice.id, bob.id).await.unwrap();
        crate::messages::store::create(&db_pool, request.id, alice.id, bob.id, "gg").await.unwrap();

        delete(&db_pool, request.id).await.unwrap();

        assert!(get(&db_pool, request.id).await.unwrap().is_none());
        assert!(crate::messages::store::list(&db_pool, request.id).await.unwrap().is_empty());
    }
}
