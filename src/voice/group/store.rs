use rand::{distr::Alphanumeric, Rng};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

use crate::db::{
    self, ConnectionStatus, GroupVoiceChannel, GroupVoiceChannelDetails, GroupVoiceChannelWithCreator,
    GroupVoiceInvite, GroupVoiceInviteWithUsers, GroupVoiceMember, GroupVoiceMemberWithUser,
};

pub const INVITE_CODE_LEN: usize = 8;

/// Fresh codes are drawn again this many times when they collide.
const INVITE_CODE_ATTEMPTS: usize = 5;

pub fn invite_code() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect()
}

const WITH_CREATOR: &str = "SELECT c.*, u.gamertag AS creator_gamertag, u.profile_image_url AS creator_profile_image_url
    FROM group_voice_channels c
    LEFT JOIN users u ON u.id = c.creator_id";

/// Creates the channel under a fresh invite code with its creator as first member.
pub async fn create(
    db_pool: &SqlitePool,
    name: &str,
    creator_id: Uuid,
    hms_room_id: &str,
) -> sqlx::Result<GroupVoiceChannel> {
    let mut attempt = 1;
    loop {
        let mut tx = db_pool.begin().await?;
        let inserted: sqlx::Result<GroupVoiceChannel> = sqlx::query_as(
            "INSERT INTO group_voice_channels (id,name,creator_id,hms_room_id,invite_code,is_active,created_at)
             VALUES (?,?,?,?,?,TRUE,?) RETURNING *",
        )
            .bind(Uuid::now_v7())
            .bind(name)
            .bind(creator_id)
            .bind(hms_room_id)
            .bind(invite_code())
            .bind(db::now())
            .fetch_one(&mut *tx)
            .await;

        match inserted {
            Ok(channel) => {
                add_member(&mut *tx, channel.id, creator_id).await?;
                tx.commit().await?;
                return Ok(channel);
            }
            Err(err) if db::is_unique_violation(&err) && attempt < INVITE_CODE_ATTEMPTS => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

pub async fn get(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<GroupVoiceChannel>> {
    sqlx::query_as("SELECT * FROM group_voice_channels WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn get_by_code(db_pool: &SqlitePool, invite_code: &str) -> sqlx::Result<Option<GroupVoiceChannel>> {
    sqlx::query_as("SELECT * FROM group_voice_channels WHERE invite_code=?")
        .bind(invite_code)
        .fetch_optional(db_pool)
        .await
}

async fn with_members(
    db_pool: &SqlitePool,
    channel: GroupVoiceChannelWithCreator,
) -> sqlx::Result<GroupVoiceChannelDetails> {
    let members = members(db_pool, channel.channel.id).await?;
    Ok(GroupVoiceChannelDetails {
        channel,
        member_count: members.len(),
        active_count: members.iter().filter(|m| m.member.is_active).count(),
        members,
    })
}

pub async fn details(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<GroupVoiceChannelDetails>> {
    let channel: Option<GroupVoiceChannelWithCreator> = sqlx::query_as(&format!("{WITH_CREATOR} WHERE c.id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?;
    match channel {
        Some(channel) => Ok(Some(with_members(db_pool, channel).await?)),
        None => Ok(None),
    }
}

pub async fn details_by_code(db_pool: &SqlitePool, invite_code: &str) -> sqlx::Result<Option<GroupVoiceChannelDetails>> {
    let channel: Option<GroupVoiceChannelWithCreator> =
        sqlx::query_as(&format!("{WITH_CREATOR} WHERE c.invite_code=?"))
            .bind(invite_code)
            .fetch_optional(db_pool)
            .await?;
    match channel {
        Some(channel) => Ok(Some(with_members(db_pool, channel).await?)),
        None => Ok(None),
    }
}

/// Channels the user belongs to, newest first.
pub async fn for_member(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<GroupVoiceChannelDetails>> {
    let channels: Vec<GroupVoiceChannelWithCreator> = sqlx::query_as(&format!(
        "{WITH_CREATOR}
         INNER JOIN group_voice_members m ON m.channel_id = c.id
         WHERE m.user_id=?
         ORDER BY c.id DESC"
    ))
        .bind(user_id)
        .fetch_all(db_pool)
        .await?;

    let mut details = Vec::with_capacity(channels.len());
    for channel in channels {
        details.push(with_members(db_pool, channel).await?);
    }
    Ok(details)
}

/// Members and invites go with the channel.
pub async fn delete(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM group_voice_channels WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Adding an existing member returns them unchanged.
pub async fn add_member<'e>(
    executor: impl SqliteExecutor<'e>,
    channel_id: Uuid,
    user_id: Uuid,
) -> sqlx::Result<GroupVoiceMember> {
    sqlx::query_as(
        "INSERT INTO group_voice_members (id,channel_id,user_id,is_active,is_muted,joined_at)
         VALUES (?,?,?,FALSE,FALSE,?)
         ON CONFLICT(channel_id, user_id) DO UPDATE SET user_id = excluded.user_id
         RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(channel_id)
        .bind(user_id)
        .bind(db::now())
        .fetch_one(executor)
        .await
}

pub async fn remove_member(db_pool: &SqlitePool, channel_id: Uuid, user_id: Uuid) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM group_voice_members WHERE channel_id=? AND user_id=?")
        .bind(channel_id)
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn is_member(db_pool: &SqlitePool, channel_id: Uuid, user_id: Uuid) -> sqlx::Result<bool> {
    let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM group_voice_members WHERE channel_id=? AND user_id=?")
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(found.is_some())
}

pub async fn member_count(db_pool: &SqlitePool, channel_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM group_voice_members WHERE channel_id=?")
        .bind(channel_id)
        .fetch_one(db_pool)
        .await
}

/// In join order.
pub async fn members(db_pool: &SqlitePool, channel_id: Uuid) -> sqlx::Result<Vec<GroupVoiceMemberWithUser>> {
    sqlx::query_as(
        "SELECT m.*, u.gamertag, u.profile_image_url, u.first_name, u.last_name
         FROM group_voice_members m
         LEFT JOIN users u ON u.id = m.user_id
         WHERE m.channel_id=?
         ORDER BY m.id",
    )
        .bind(channel_id)
        .fetch_all(db_pool)
        .await
}

pub async fn set_active(
    db_pool: &SqlitePool,
    channel_id: Uuid,
    user_id: Uuid,
    active: bool,
) -> sqlx::Result<Option<GroupVoiceMember>> {
    sqlx::query_as("UPDATE group_voice_members SET is_active=? WHERE channel_id=? AND user_id=? RETURNING *")
        .bind(active)
        .bind(channel_id)
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

/// Marks the user inactive in every group channel. Returns how many memberships changed.
pub async fn deactivate_user(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<u64> {
    let result = sqlx::query("UPDATE group_voice_members SET is_active=FALSE WHERE user_id=? AND is_active=TRUE")
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn create_invite(
    db_pool: &SqlitePool,
    channel_id: Uuid,
    inviter_id: Uuid,
    invitee_id: Uuid,
) -> sqlx::Result<GroupVoiceInvite> {
    sqlx::query_as(
        "INSERT INTO group_voice_invites (id,channel_id,inviter_id,invitee_id,status,created_at)
         VALUES (?,?,?,?,?,?) RETURNING *",
    )
        .bind(Uuid::now_v7())
        .bind(channel_id)
        .bind(inviter_id)
        .bind(invitee_id)
        .bind(ConnectionStatus::Pending)
        .bind(db::now())
        .fetch_one(db_pool)
        .await
}

pub async fn get_invite(db_pool: &SqlitePool, id: Uuid) -> sqlx::Result<Option<GroupVoiceInvite>> {
    sqlx::query_as("SELECT * FROM group_voice_invites WHERE id=?")
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

pub async fn has_pending_invite(db_pool: &SqlitePool, channel_id: Uuid, invitee_id: Uuid) -> sqlx::Result<bool> {
    let found: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM group_voice_invites WHERE channel_id=? AND invitee_id=? AND status='pending' LIMIT 1",
    )
        .bind(channel_id)
        .bind(invitee_id)
        .fetch_optional(db_pool)
        .await?;
    Ok(found.is_some())
}

/// Pending invites the user received, then the ones they sent, each newest first.
pub async fn pending_invites(db_pool: &SqlitePool, user_id: Uuid) -> sqlx::Result<Vec<GroupVoiceInviteWithUsers>> {
    sqlx::query_as(
        "SELECT i.*,
                a.gamertag AS inviter_gamertag, a.profile_image_url AS inviter_profile_image_url,
                b.gamertag AS invitee_gamertag, b.profile_image_url AS invitee_profile_image_url,
                c.name AS channel_name
         FROM group_voice_invites i
         LEFT JOIN users a ON a.id = i.inviter_id
         LEFT JOIN users b ON b.id = i.invitee_id
         LEFT JOIN group_voice_channels c ON c.id = i.channel_id
         WHERE i.status = 'pending' AND (i.invitee_id = ?1 OR i.inviter_id = ?1)
         ORDER BY (i.invitee_id = ?1) DESC, i.id DESC",
    )
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

/// Answers a pending invite. `None` if it was already answered.
pub async fn respond(
    db_pool: &SqlitePool,
    id: Uuid,
    status: ConnectionStatus,
) -> sqlx::Result<Option<GroupVoiceInvite>> {
    sqlx::query_as(
        "UPDATE group_voice_invites SET status=?, responded_at=?
         WHERE id=? AND status='pending' RETURNING *",
    )
        .bind(status)
        .bind(db::now())
        .bind(id)
        .fetch_optional(db_pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users;

    #[test]
    fn invite_codes_are_alphanumeric() {
        let code = invite_code();
        assert_eq!(code.len(), INVITE_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn creator_is_the_first_member() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();

        let channel = create(&db_pool, "Raid night", alice.id, "room-1").await.unwrap();
        assert_eq!(get_by_code(&db_pool, &channel.invite_code).await.unwrap().map(|c| c.id), Some(channel.id));

        let first = add_member(&db_pool, channel.id, bob.id).await.unwrap();
        let again = add_member(&db_pool, channel.id, bob.id).await.unwrap();
        assert_eq!(first.id, again.id);
        set_active(&db_pool, channel.id, bob.id, true).await.unwrap();

        let details = details(&db_pool, channel.id).await.unwrap().unwrap();
        assert_eq!(details.channel.creator_gamertag.as_deref(), Some("alice"));
        assert_eq!(details.member_count, 2);
        assert_eq!(details.active_count, 1);
        assert_eq!(details.members[0].member.user_id, alice.id);

        assert_eq!(for_member(&db_pool, bob.id).await.unwrap().len(), 1);
        assert_eq!(deactivate_user(&db_pool, bob.id).await.unwrap(), 1);
        assert_eq!(deactivate_user(&db_pool, bob.id).await.unwrap(), 0);

        assert!(remove_member(&db_pool, channel.id, bob.id).await.unwrap());
        assert!(!is_member(&db_pool, channel.id, bob.id).await.unwrap());
        assert_eq!(member_count(&db_pool, channel.id).await.unwrap(), 1);

        delete(&db_pool, channel.id).await.unwrap();
        assert!(get(&db_pool, channel.id).await.unwrap().is_none());
        assert!(members(&db_pool, channel.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invites_are_answered_once() {
        let db_pool = db::memory_pool().await.unwrap();
        let alice = users::store::create(&db_pool, "alice").await.unwrap();
        let bob = users::store::create(&db_pool, "bob").await.unwrap();
        let carol = users::store::create(&db_pool, "carol").await.unwrap();
        let channel = create(&db_pool, "Squad", alice.id, "room-1").await.unwrap();

        let to_bob = create_invite(&db_pool, channel.id, alice.id, bob.id).await.unwrap();
        let to_alice = create_invite(&db_pool, channel.id, carol.id, alice.id).await.unwrap();
        assert!(has_pending_invite(&db_pool, channel.id, bob.id).await.unwrap());

        // received first
        let listed = pending_invites(&db_pool, alice.id).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|i| i.invite.id).collect();
        assert_eq!(ids, vec![to_alice.id, to_bob.id]);
        assert_eq!(listed[0].channel_name.as_deref(), Some("Squad"));

        let accepted = respond(&db_pool, to_bob.id, ConnectionStatus::Accepted).await.unwrap().unwrap();
        assert_eq!(accepted.status, ConnectionStatus::Accepted);
        assert!(accepted.responded_at.is_some());
        assert!(respond(&db_pool, to_bob.id, ConnectionStatus::Declined).await.unwrap().is_none());
        assert!(!has_pending_invite(&db_pool, channel.id, bob.id).await.unwrap());
    }
}
