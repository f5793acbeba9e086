use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, VoiceChannel, VoiceParticipant, VoiceParticipantWithUser};

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<VoiceChannel>> {
    sqlx::query_as("SELECT * FROM voice_channels WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn for_connection(db_pool: &SqlitePool, connection_id: Uuid) -> sqlx::Result<Option<VoiceChannel>> {
    sqlx::query_as("SELECT * FROM voice_channels WHERE connection_id=?")
        .bind(connection_id)
        .fetch_optional(db_pool)
        .await
}

/// One channel per connection. An existing room id is kept unless the
/// channel has none yet.
pub async fn get_or_create(db_pool: &SqlitePool, connection_id: Uuid, hms_room_id: &str) -> sqlx::Result<VoiceChannel> {
    sqlx::query_as(
        "INSERT INTO voice_channels (id,connection_id,hms_room_id,created_at) VALUES (?,?,?,?)
         ON CONFLICT(connection_id) DO UPDATE
            SET hms_room_id = COALESCE(voice_channels.hms_room_id, excluded.hms_room_id)
         RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(connection_id)
        .bind(hms_room_id)
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

/// The channel the user is currently in, if any.
pub async fn active_for_user(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Option<VoiceChannel>> {
    sqlx::query_as(
        "SELECT c.* FROM voice_channels c
         INNER JOIN voice_participants p ON p.voice_channel_id = c.id
         WHERE p.user_id = ?
         ORDER BY p.id DESC LIMIT 1",
    )
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

/// Joining again keeps the existing row and its mute state.
pub async fn join(db_pool: &SqlitePool, channel_id: Uuid, user_id: Uuid) -> sqlx::Result<VoiceParticipant> {
    sqlx::query_as(
        "INSERT INTO voice_participants (id,voice_channel_id,user_id,is_muted,joined_at) VALUES (?,?,?,FALSE,?)
         ON CONFLICT(voice_channel_id, user_id) DO UPDATE SET user_id = excluded.user_id
         RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(channel_id)
        .bind(user_id)
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

/// Removes the participant and, once nobody is left, the channel itself.
/// Returns whether the channel was deleted.
pub async fn leave(db_pool: &SqlitePool, channel_id: Uuid, user_id: Uuid) -> sqlx::Result<bool> {
    let mut tx = db_pool.begin().await?;

    sqlx::query("DELETE FROM voice_participants WHERE voice_channel_id=? AND user_id=?")
        .bind(channel_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voice_participants WHERE voice_channel_id=?")
        .bind(channel_id)
        .fetch_one(&mut *tx)
        .await?;
    if remaining == 0 {
        sqlx::query("DELETE FROM voice_channels WHERE id=?")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(remaining == 0)
}

pub async fn set_muted(
    db_pool: &SqlitePool,
    channel_id: Uuid,
    user_id: Uuid,
    muted: bool,
) -> sqlx::Result<Option<VoiceParticipant>> {
    sqlx::query_as(
        "UPDATE voice_participants SET is_muted=? WHERE voice_channel_id=? AND user_id=? RETURNING *",
    )
        .bind(muted)
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

/// In join order.
pub async fn participants(db_pool: &SqlitePool, channel_id: Uuid) -> sqlx::Result<Vec<VoiceParticipantWithUser>> {
    sqlx::query_as(
        "SELECT p.*, u.gamertag, u.profile_image_url
         FROM voice_participants p
         LEFT JOIN users u ON u.id = p.user_id
         WHERE p.voice_channel_id = ?
         ORDER BY p.id",
    )
        .bind(channel_id)
        .fetch_all(db_pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    #[tokio::test]
    async fn channel_is_shared_per_connection() {
        let db_pool = db::memory_pool().await.unwrap();
        let connection_id = Uuid::now_v7();

        let first = get_or_create(&db_pool, connection_id, "room-a").await.unwrap();
        let second = get_or_create(&db_pool, connection_id, "room-b").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.hms_room_id.as_deref(), Some("room-a"));
        assert_eq!(for_connection(&db_pool, connection_id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn last_one_out_removes_the_channel() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let channel = get_or_create(&db_pool, Uuid::now_v7(), "room").await.unwrap();

        join(&db_pool, channel.id, alice.id).await.unwrap();
        let muted = set_muted(&db_pool, channel.id, alice.id, true).await.unwrap().unwrap();
        assert!(muted.is_muted);
        // rejoining keeps the mute
        assert!(join(&db_pool, channel.id, alice.id).await.unwrap().is_muted);
        join(&db_pool, channel.id, bob.id).await.unwrap();

        let listed = participants(&db_pool, channel.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].gamertag.as_deref(), Some("alice"));
        assert_eq!(active_for_user(&db_pool, bob.id).await.unwrap().map(|c| c.id), Some(channel.id));

        assert!(!leave(&db_pool, channel.id, alice.id).await.unwrap());
        assert!(leave(&db_pool, channel.id, bob.id).await.unwrap());
        assert!(get(&db_pool, channel.id).await.unwrap().is_none());
        assert!(set_muted(&db_pool, channel.id, bob.id, false).await.unwrap().is_none());
    }
}
