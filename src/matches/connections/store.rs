use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, ConnectionStatus, MatchConnection, MatchConnectionWithUsers};

pub async fn create(
    db_pool: &SqlitePool,
    request_id: Uuid,
    requester_id: Uuid,
    accepter_id: Uuid,
) -> sqlx::Result<MatchConnection> {
    let now = db::now();
    sqlx::query_as(
        "INSERT INTO match_connections (id,request_id,requester_id,accepter_id,status,created_at,updated_at)
         VALUES (?,?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(request_id)
        .bind(requester_id)
        .bind(accepter_id)
        .bind(ConnectionStatus::Pending)
        .bind(now)
        .bind(now)
        .fetch_one(db_pool)
        .await
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<MatchConnection>> {
    sqlx::query_as("SELECT * FROM match_connections WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

/// Applications the user made or received, newest first.
pub async fn for_user(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<MatchConnectionWithUsers>> {
    sqlx::query_as(
        "SELECT c.*,
                a.gamertag AS requester_gamertag, a.profile_image_url AS requester_profile_image_url,
                b.gamertag AS accepter_gamertag, b.profile_image_url AS accepter_profile_image_url,
                r.game_name, r.game_mode
         FROM match_connections c
         LEFT JOIN users a ON a.id = c.requester_id
         LEFT JOIN users b ON b.id = c.accepter_id
         LEFT JOIN match_requests r ON r.id = c.request_id
         WHERE c.requester_id = ?1 OR c.accepter_id = ?1
         ORDER BY c.id DESC",
    )
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

pub async fn set_status(db_pool: &SqlitePool, id: Uuid, status: ConnectionStatus) -> sqlx::Result<MatchConnection> {
    sqlx::query_as("UPDATE match_connections SET status=?, updated_at=? WHERE id=? RETURNING *")
        .bind(status)
        .bind(db::now())
        .bind(id)
        .fetch_one(db_pool)
        .await
}

pub async fn delete(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<()> {
    let mut tx = db_pool.begin().await?;
    sqlx::query("DELETE FROM chat_messages WHERE connection_id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM match_connections WHERE id=?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
