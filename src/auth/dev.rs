use sqlx::SqlitePool;

use crate::{db::User, users};

pub const DEV_GAMERTAG: &str = "DevGamer";

/// The user every request runs as while auth is disabled.
pub async fn ensure_dev_user(db_pool: &SqlitePool) -> anyhow::Result<User> {
    if let Some(user) = users::store::get_by_gamertag(db_pool, DEV_GAMERTAG).await? {
        return Ok(user);
    }
    Ok(users::store::create(db_pool, DEV_GAMERTAG).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn dev_user_is_created_once() {
        let db_pool = db::memory_pool().await.unwrap();
        let first = ensure_dev_user(&db_pool).await.unwrap();
        let second = ensure_dev_user(&db_pool).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.gamertag, DEV_GAMERTAG);
    }
}
