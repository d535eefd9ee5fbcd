use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use deck_types::models::{SubscriptionType, User};

use super::{id_params, placeholders};
use crate::Store;
use crate::models::{USER_COLUMNS, user_from_row};

impl Store<'_> {
    // -- Follows --

    /// Returns false when the follow already existed.
    pub fn follow(&self, follower_id: Uuid, followee_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO user_follows (follower_id, followee_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![follower_id, followee_id, at],
        )?;
        Ok(inserted > 0)
    }

    pub fn unfollow(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM user_follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn is_following(&self, follower_id: Uuid, followee_id: Uuid) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM user_follows WHERE follower_id = ?1 AND followee_id = ?2)",
            params![follower_id, followee_id],
            |row| row.get(0),
        )?)
    }

    /// Which of `candidates` the follower follows.
    pub fn following_among(&self, follower_id: Uuid, candidates: &[Uuid]) -> Result<HashSet<Uuid>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT followee_id FROM user_follows WHERE follower_id = ?1 AND followee_id IN ({})",
            placeholders(2, candidates.len())
        );
        let mut params = id_params(candidates);
        params.insert(0, &follower_id);
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params.as_slice(), |row| row.get(0))?
            .collect::<std::result::Result<HashSet<Uuid>, _>>()?;
        Ok(ids)
    }

    pub fn get_following(&self, user_id: Uuid) -> Result<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM users WHERE id IN
                (SELECT followee_id FROM user_follows WHERE follower_id = ?1)
             ORDER BY username",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([user_id], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    // -- Mutes and blocks --

    pub fn mute_user(&self, user_id: Uuid, muted_user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO user_mutes (user_id, muted_user_id) VALUES (?1, ?2)",
            params![user_id, muted_user_id],
        )?;
        Ok(())
    }

    pub fn unmute_user(&self, user_id: Uuid, muted_user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM user_mutes WHERE user_id = ?1 AND muted_user_id = ?2",
            params![user_id, muted_user_id],
        )?;
        Ok(())
    }

    pub fn block_user(&self, user_id: Uuid, blocked_user: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_blocks (user_id, blocked_user)
             SELECT ?1, ?2 WHERE NOT EXISTS
                (SELECT 1 FROM user_blocks WHERE user_id = ?1 AND blocked_user = ?2)",
            params![user_id, blocked_user],
        )?;
        Ok(())
    }

    /// Hide an alias for the viewer, only within one thread.
    pub fn block_alias_in_thread(&self, user_id: Uuid, alias_id: Uuid, thread_root_id: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_blocks (user_id, blocked_alias, for_thread)
             SELECT ?1, ?2, ?3 WHERE NOT EXISTS
                (SELECT 1 FROM user_blocks
                 WHERE user_id = ?1 AND blocked_alias = ?2 AND for_thread = ?3)",
            params![user_id, alias_id, thread_root_id],
        )?;
        Ok(())
    }

    pub fn mute_thread(&self, user_id: Uuid, thread_root_id: Uuid) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO thread_mutes (user_id, thread_root_id) VALUES (?1, ?2)",
            params![user_id, thread_root_id],
        )?;
        Ok(())
    }

    pub fn unmute_thread(&self, user_id: Uuid, thread_root_id: Uuid) -> Result<()> {
        self.conn.execute(
            "DELETE FROM thread_mutes WHERE user_id = ?1 AND thread_root_id = ?2",
            params![user_id, thread_root_id],
        )?;
        Ok(())
    }

    pub fn thread_muted_by(&self, thread_root_id: Uuid) -> Result<HashSet<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM thread_mutes WHERE thread_root_id = ?1")?;
        let ids = stmt
            .query_map([thread_root_id], |row| row.get(0))?
            .collect::<std::result::Result<HashSet<Uuid>, _>>()?;
        Ok(ids)
    }

    // -- Subscriptions --

    pub fn subscribe(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        kind: SubscriptionType,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO subscriptions (user_id, card_id, type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, card_id, kind.as_str(), at],
        )?;
        Ok(())
    }

    /// Drop the subscription and stamp the still-open notification it
    /// produced for this card as opened.
    pub fn unsubscribe(
        &self,
        user_id: Uuid,
        card_id: Uuid,
        kind: SubscriptionType,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM subscriptions WHERE user_id = ?1 AND card_id = ?2 AND type = ?3",
            params![user_id, card_id, kind.as_str()],
        )?;
        self.open_notifications_for_target(user_id, card_id, kind.notification_type(), at)?;
        Ok(())
    }

    pub fn subscribers(&self, card_id: Uuid, kind: SubscriptionType) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM subscriptions WHERE card_id = ?1 AND type = ?2 ORDER BY created_at",
        )?;
        let ids = stmt
            .query_map(params![card_id, kind.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn subscribed_types(&self, user_id: Uuid, card_id: Uuid) -> Result<Vec<SubscriptionType>> {
        let mut stmt = self
            .conn
            .prepare("SELECT type FROM subscriptions WHERE user_id = ?1 AND card_id = ?2")?;
        let names = stmt
            .query_map(params![user_id, card_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names.iter().filter_map(|n| SubscriptionType::parse(n)).collect())
    }

    /// Which of `card_ids` the user holds any subscription on.
    pub fn subscribed_among(&self, user_id: Uuid, card_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if card_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT DISTINCT card_id FROM subscriptions WHERE user_id = ?1 AND card_id IN ({})",
            placeholders(2, card_ids.len())
        );
        let mut params = id_params(card_ids);
        params.insert(0, &user_id);
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params.as_slice(), |row| row.get(0))?
            .collect::<std::result::Result<HashSet<Uuid>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, notification, read, user};
    use deck_types::models::NotificationType;

    #[test]
    fn test_follow_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        assert!(db.with_conn_mut(|s| s.follow(a.id, b.id, at(1))).unwrap());
        assert!(!db.with_conn_mut(|s| s.follow(a.id, b.id, at(2))).unwrap());
        assert!(read(&db, |s| s.is_following(a.id, b.id)));
        assert!(db.with_conn_mut(|s| s.unfollow(a.id, b.id)).unwrap());
        assert!(!read(&db, |s| s.is_following(a.id, b.id)));
    }

    #[test]
    fn test_subscriptions_by_type() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let card = Uuid::new_v4();
        db.with_conn_mut(|s| {
            s.subscribe(a.id, card, SubscriptionType::Comment, at(1))?;
            s.subscribe(a.id, card, SubscriptionType::Comment, at(2))?;
            s.subscribe(a.id, card, SubscriptionType::Boost, at(3))
        })
        .unwrap();
        assert_eq!(read(&db, |s| s.subscribers(card, SubscriptionType::Comment)), vec![a.id]);
        assert_eq!(read(&db, |s| s.subscribed_types(a.id, card)).len(), 2);

        db.with_conn_mut(|s| s.unsubscribe(a.id, card, SubscriptionType::Comment, at(4))).unwrap();
        assert!(read(&db, |s| s.subscribers(card, SubscriptionType::Comment)).is_empty());
        assert!(read(&db, |s| s.subscribed_among(a.id, &[card])).contains(&card));
    }

    #[test]
    fn test_unsubscribe_opens_pending_notification() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let card = Uuid::new_v4();
        let reply = notification(a.id, Some(card), NotificationType::Reply, 1);
        let like = notification(a.id, Some(card), NotificationType::Like, 1);
        db.with_conn_mut(|s| {
            s.subscribe(a.id, card, SubscriptionType::Comment, at(1))?;
            s.save_notification(&reply)?;
            s.save_notification(&like)
        })
        .unwrap();

        db.with_conn_mut(|s| s.unsubscribe(a.id, card, SubscriptionType::Comment, at(5))).unwrap();
        let opened = read(&db, |s| s.get_notification(reply.id)).unwrap();
        assert_eq!(opened.opened_at, Some(at(5)));
        // other types are left alone
        assert!(read(&db, |s| s.get_notification(like.id)).unwrap().opened_at.is_none());
    }

    #[test]
    fn test_following_among() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        db.with_conn_mut(|s| s.follow(a.id, b.id, at(1))).unwrap();
        let set = read(&db, |s| s.following_among(a.id, &[b.id, c.id]));
        assert!(set.contains(&b.id));
        assert!(!set.contains(&c.id));
    }
}
