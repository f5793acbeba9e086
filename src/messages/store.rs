use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, ChatMessage, ChatMessageWithSender};

pub async fn create(
    db_pool: &SqlitePool,
    connection_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    message: &str,
) -> sqlx::Result<ChatMessage> {
    sqlx::query_as(
        "INSERT INTO chat_messages (id,connection_id,sender_id,receiver_id,message,created_at)
         VALUES (?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(connection_id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(message)
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

/// Oldest first.
pub async fn list(db_pool: &SqlitePool, connection_id: Uuid) -> sqlx::Result<Vec<ChatMessageWithSender>> {
    sqlx::query_as(
        "SELECT m.*, u.gamertag AS sender_gamertag, u.profile_image_url AS sender_profile_image_url
         FROM chat_messages m
         LEFT JOIN users u ON u.id = m.sender_id
         WHERE m.connection_id = ?
         ORDER BY m.id ASC",
    )
        .bind(connection_id)
        .fetch_all(db_pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    #[tokio::test]
    async fn messages_come_back_in_order() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let connection_id = Uuid::now_v7();

        create(&db_pool, connection_id, alice.id, bob.id, "first").await.unwrap();
        create(&db_pool, connection_id, bob.id, alice.id, "second").await.unwrap();
        create(&db_pool, Uuid::now_v7(), bob.id, alice.id, "elsewhere").await.unwrap();

        let messages = list(&db_pool, connection_id).await.unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.message.message.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
        assert_eq!(messages[1].sender_gamertag.as_deref(), Some("bob"));
    }
}
