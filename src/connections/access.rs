use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{ConnectionRequest, ConnectionStatus, MatchConnection};

/// A conversation between two users: either an application to a match
/// request or a direct connection request. Chat, voice and signalling all
/// key off the id of one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Link {
    Match(MatchConnection),
    Direct(ConnectionRequest),
}

impl Link {
    pub fn id(&self) -> Uuid {
        match self {
            Link::Match(connection) => connection.id,
            Link::Direct(request) => request.id,
        }
    }

    pub fn participants(&self) -> (Uuid, Uuid) {
        match self {
            Link::Match(connection) => (connection.requester_id, connection.accepter_id),
            Link::Direct(request) => (request.sender_id, request.receiver_id),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            Link::Match(connection) => connection.status,
            Link::Direct(request) => request.status,
        }
    }

    pub fn includes(&self, user_id: Uuid) -> bool {
        let (a, b) = self.participants();
        a == user_id || b == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants() {
            (a, b) if a == user_id => Some(b),
            (a, b) if b == user_id => Some(a),
            _ => None,
        }
    }

    /// Match applications can always chat, direct requests only once accepted.
    pub fn can_chat(&self) -> bool {
        match self {
            Link::Match(_) => true,
            Link::Direct(request) => request.status == ConnectionStatus::Accepted,
        }
    }
}

/// The link with this id, if `user_id` takes part in it.
pub async fn find_link(db_pool: &SqlitePool, connection_id: Uuid, user_id: Uuid) -> sqlx::Result<Option<Link>> {
    let connection: Option<MatchConnection> = sqlx::query_as(
        "SELECT * FROM match_connections WHERE id = ?1 AND (requester_id = ?2 OR accepter_id = ?2)",
    )
        .bind(connection_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?;
    if let Some(connection) = connection {
        return Ok(Some(Link::Match(connection)));
    }

    let request: Option<ConnectionRequest> = sqlx::query_as(
        "SELECT * FROM connection_requests WHERE id = ?1 AND (sender_id = ?2 OR receiver_id = ?2)",
    )
        .bind(connection_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(request.map(Link::Direct))
}

/// Everyone the user has an accepted link with.
pub async fn accepted_partner_ids(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar(
        "SELECT CASE WHEN requester_id = ?1 THEN accepter_id ELSE requester_id END
         FROM match_connections
         WHERE status = 'accepted' AND (requester_id = ?1 OR accepter_id = ?1)
         UNION
         SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
         FROM connection_requests
         WHERE status = 'accepted' AND (sender_id = ?1 OR receiver_id = ?1)",
    )
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

/// Partners from accepted direct connection requests only.
pub async fn direct_partner_ids(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<Uuid>> {
    sqlx::query_scalar(
        "SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
         FROM connection_requests
         WHERE status = 'accepted' AND (sender_id = ?1 OR receiver_id = ?1)",
    )
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connections, db, matches, users};

    #[tokio::test]
    async fn links_resolve_for_participants_only() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let eve = users::store::create(&db_pool, "eve").await.unwrap();

        let request = connections::store::create(&db_pool, alice.id, bob.id).await.unwrap();

        let link = find_link(&db_pool, request.id, bob.id).await.unwrap().unwrap();
        assert_eq!(link.id(), request.id);
        assert_eq!(link.other(bob.id), Some(alice.id));
        assert!(!link.can_chat());
        assert!(find_link(&db_pool, request.id, eve.id).await.unwrap().is_none());

        connections::store::set_status(&db_pool, request.id, ConnectionStatus::Accepted).await.unwrap();
        let link = find_link(&db_pool, request.id, alice.id).await.unwrap().unwrap();
        assert!(link.can_chat());
    }

    #[tokio::test]
    async fn partners_come_from_both_kinds_of_link() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let carol = users::store::create(&db_pool, "carol").await.unwrap();
        let dave = users::store::create(&db_pool, "dave").await.unwrap();

        let request = connections::store::create(&db_pool, alice.id, bob.id).await.unwrap();
        connections::store::set_status(&db_pool, request.id, ConnectionStatus::Accepted).await.unwrap();

        let post = matches::store::create(&db_pool, carol.id, &matches::store::sample_request("Valorant")).await.unwrap();
        let application = matches::connections::store::create(&db_pool, post.id, alice.id, carol.id).await.unwrap();
        matches::connections::store::set_status(&db_pool, application.id, ConnectionStatus::Accepted).await.unwrap();

        // still pending, not a partner
        connections::store::create(&db_pool, dave.id, alice.id).await.unwrap();

        let mut partners = accepted_partner_ids(&db_pool, alice.id).await.unwrap();
        partners.sort();
        let mut expected = vec![bob.id, carol.id];
        expected.sort();
        assert_eq!(partners, expected);

        assert_eq!(direct_partner_ids(&db_pool, alice.id).await.unwrap(), vec![bob.id]);
    }
}
