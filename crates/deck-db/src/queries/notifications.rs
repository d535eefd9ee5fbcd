use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Row, ToSql, params};
use uuid::Uuid;

use deck_types::models::{Notification, NotificationType};

use super::{OptionalExt, id_params, placeholders};
use crate::Store;
use crate::models::{
    ActorRow, CARD_COLUMNS, CommentExportRow, LikeExportRow, MENTION_COLUMNS, MentionExportRow,
    NOTIFICATION_COLUMNS, card_from_row, mention_from_row, notification_from_row,
};

/// One underlying event aggregated into a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRow {
    Reaction { user_id: Uuid, card_id: Uuid },
    Comment { card_id: Uuid },
    Follow { follower_id: Uuid, followee_id: Uuid },
    Mention { mention_id: Uuid },
}

/// Notifications of these types with no event rows left are reaped.
const EMPTY_CHECK: &str = "type IN ('like', 'reply', 'follow', 'mention')
    AND id NOT IN (
        SELECT notification_id FROM notifications_reactions
        UNION SELECT notification_id FROM notifications_comments
        UNION SELECT notification_id FROM notifications_follows
        UNION SELECT notification_id FROM notifications_mentions)";

/// Identity columns for an actor whose alias (if any) is `alias_col`.
fn actor_columns(alias_col: &str, ts_col: &str) -> String {
    format!(
        "users.id, {alias}, COALESCE(anonymous_aliases.username, users.username),
         COALESCE(anonymous_aliases.display_name, users.display_name),
         COALESCE(anonymous_aliases.profile_image_path, users.profile_image_path), {ts}",
        alias = alias_col,
        ts = ts_col
    )
}

fn actor_from_row(row: &Row, start: usize) -> rusqlite::Result<ActorRow> {
    Ok(ActorRow {
        user_id: row.get(start)?,
        alias_id: row.get(start + 1)?,
        username: row.get(start + 2)?,
        display_name: row.get(start + 3)?,
        profile_image_path: row.get(start + 4)?,
        created_at: row.get(start + 5)?,
    })
}

impl Store<'_> {
    // -- Notifications --

    pub fn save_notification(&self, n: &Notification) -> Result<()> {
        let payload = n.payload.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            &format!(
                "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT (id) DO UPDATE SET
                    target_id = excluded.target_id,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at,
                    seen_at = excluded.seen_at,
                    opened_at = excluded.opened_at",
                NOTIFICATION_COLUMNS
            ),
            params![
                n.id,
                n.user_id,
                n.target_id,
                n.kind.as_str(),
                payload,
                n.created_at,
                n.updated_at,
                n.seen_at,
                n.opened_at
            ],
        )?;
        Ok(())
    }

    pub fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
                [id],
                notification_from_row,
            )
            .optional()
    }

    /// Most recent notification of `kind` for the user; with a target it
    /// must match, without one any target does.
    pub fn latest_for_type(
        &self,
        user_id: Uuid,
        target_id: Option<Uuid>,
        kind: NotificationType,
        unopened_only: bool,
    ) -> Result<Option<Notification>> {
        let target = if target_id.is_some() { "AND target_id = ?3" } else { "" };
        let opened = if unopened_only { "AND opened_at IS NULL" } else { "" };
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE user_id = ?1 AND type = ?2 {} {}
             ORDER BY updated_at DESC LIMIT 1",
            NOTIFICATION_COLUMNS, target, opened
        );
        let kind = kind.as_str();
        let mut params: Vec<&dyn ToSql> = vec![&user_id, &kind];
        if let Some(t) = target_id.as_ref() {
            params.push(t);
        }
        self.conn
            .query_row(&sql, params.as_slice(), notification_from_row)
            .optional()
    }

    pub fn notifications_page(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Notification>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notifications WHERE user_id = ?1
             ORDER BY updated_at DESC LIMIT ?2 OFFSET ?3",
            NOTIFICATION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit, offset], notification_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn unseen_count(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND seen_at IS NULL",
            [user_id],
            |row| row.get(0),
        )?)
    }

    // -- Seen / opened --

    pub fn mark_all_seen(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE notifications SET seen_at = ?2 WHERE user_id = ?1 AND seen_at IS NULL",
            params![user_id, at],
        )?;
        Ok(())
    }

    pub fn mark_seen(&self, user_id: Uuid, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        self.stamp_ids("seen_at", user_id, ids, at)
    }

    pub fn mark_opened(&self, user_id: Uuid, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        self.stamp_ids("opened_at", user_id, ids, at)
    }

    fn stamp_ids(&self, column: &str, user_id: Uuid, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE notifications SET {col} = ?2 WHERE user_id = ?1 AND id IN ({ids})",
            col = column,
            ids = placeholders(3, ids.len())
        );
        let mut params: Vec<&dyn ToSql> = vec![&user_id, &at];
        params.extend(id_params(ids));
        self.conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    /// Stamp every open notification of `kind` on `target_id` as opened.
    pub fn open_notifications_for_target(
        &self,
        user_id: Uuid,
        target_id: Uuid,
        kind: NotificationType,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE notifications SET opened_at = ?4
             WHERE user_id = ?1 AND target_id = ?2 AND type = ?3 AND opened_at IS NULL",
            params![user_id, target_id, kind.as_str(), at],
        )?;
        Ok(updated)
    }

    // -- Deletion --

    /// Reap notifications left without event rows, for one user or all.
    pub fn clear_empty_notifications(&self, user_id: Option<Uuid>) -> Result<usize> {
        let deleted = match user_id {
            Some(id) => self.conn.execute(
                &format!("DELETE FROM notifications WHERE user_id = ?1 AND {}", EMPTY_CHECK),
                [id],
            )?,
            None => self
                .conn
                .execute(&format!("DELETE FROM notifications WHERE {}", EMPTY_CHECK), [])?,
        };
        Ok(deleted)
    }

    /// Remove every event row the card contributed, then reap.
    pub fn delete_notifications_for_card(&self, card_id: Uuid) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM notifications_mentions
             WHERE mention_id IN (SELECT id FROM mentions WHERE in_card = ?1)",
            [card_id],
        )?;
        self.conn
            .execute("DELETE FROM notifications_comments WHERE card_id = ?1", [card_id])?;
        self.conn
            .execute("DELETE FROM notifications_reactions WHERE card_id = ?1", [card_id])?;
        self.conn.execute(
            "DELETE FROM notifications WHERE target_id = ?1 AND type IN ('like', 'reply', 'mention')",
            [card_id],
        )?;
        self.clear_empty_notifications(None)
    }

    // -- Event rows --

    pub fn add_event_row(&self, notification_id: Uuid, row: &EventRow, at: DateTime<Utc>) -> Result<()> {
        match *row {
            EventRow::Reaction { user_id, card_id } => self.conn.execute(
                "INSERT INTO notifications_reactions (notification_id, user_id, card_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (notification_id, user_id, card_id)
                 DO UPDATE SET created_at = excluded.created_at",
                params![notification_id, user_id, card_id, at],
            )?,
            EventRow::Comment { card_id } => self.conn.execute(
                "INSERT OR IGNORE INTO notifications_comments (notification_id, card_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![notification_id, card_id, at],
            )?,
            EventRow::Follow { follower_id, followee_id } => self.conn.execute(
                "INSERT INTO notifications_follows (notification_id, follower_id, followee_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (notification_id, follower_id, followee_id)
                 DO UPDATE SET created_at = excluded.created_at",
                params![notification_id, follower_id, followee_id, at],
            )?,
            EventRow::Mention { mention_id } => self.conn.execute(
                "INSERT OR IGNORE INTO notifications_mentions (notification_id, mention_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![notification_id, mention_id, at],
            )?,
        };
        Ok(())
    }

    pub fn delete_event_row(&self, notification_id: Uuid, row: &EventRow) -> Result<bool> {
        let deleted = match *row {
            EventRow::Reaction { user_id, card_id } => self.conn.execute(
                "DELETE FROM notifications_reactions
                 WHERE notification_id = ?1 AND user_id = ?2 AND card_id = ?3",
                params![notification_id, user_id, card_id],
            )?,
            EventRow::Comment { card_id } => self.conn.execute(
                "DELETE FROM notifications_comments WHERE notification_id = ?1 AND card_id = ?2",
                params![notification_id, card_id],
            )?,
            EventRow::Follow { follower_id, followee_id } => self.conn.execute(
                "DELETE FROM notifications_follows
                 WHERE notification_id = ?1 AND follower_id = ?2 AND followee_id = ?3",
                params![notification_id, follower_id, followee_id],
            )?,
            EventRow::Mention { mention_id } => self.conn.execute(
                "DELETE FROM notifications_mentions WHERE notification_id = ?1 AND mention_id = ?2",
                params![notification_id, mention_id],
            )?,
        };
        Ok(deleted > 0)
    }

    /// Drop follow rows for a pair wherever they were aggregated.
    pub fn delete_follow_rows(&self, follower_id: Uuid, followee_id: Uuid) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM notifications_follows WHERE follower_id = ?1 AND followee_id = ?2",
            params![follower_id, followee_id],
        )?;
        Ok(deleted)
    }

    pub fn event_row_count(&self, notification_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM notifications_reactions WHERE notification_id = ?1)
              + (SELECT COUNT(*) FROM notifications_comments WHERE notification_id = ?1)
              + (SELECT COUNT(*) FROM notifications_follows WHERE notification_id = ?1)
              + (SELECT COUNT(*) FROM notifications_mentions WHERE notification_id = ?1)",
            [notification_id],
            |row| row.get(0),
        )?)
    }

    // -- Export projections --

    /// The liked card and everyone who liked it, latest first.
    pub fn like_export(&self, n: &Notification) -> Result<Option<LikeExportRow>> {
        let Some(card_id) = n.target_id else {
            return Ok(None);
        };
        let Some(card) = self.get_card(card_id)? else {
            return Ok(None);
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM notifications_reactions
                JOIN user_reactions r
                    ON notifications_reactions.user_id = r.user_id
                   AND notifications_reactions.card_id = r.card_id
                JOIN users ON r.user_id = users.id
                LEFT JOIN anonymous_aliases ON r.alias_id = anonymous_aliases.id
             WHERE notifications_reactions.notification_id = ?1
             ORDER BY notifications_reactions.created_at DESC",
            actor_columns("r.alias_id", "notifications_reactions.created_at")
        ))?;
        let actors = stmt
            .query_map([n.id], |row| actor_from_row(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(LikeExportRow { card, actors }))
    }

    /// The thread root, its author and the aggregated comments, newest first.
    pub fn comment_export(&self, n: &Notification) -> Result<Option<CommentExportRow>> {
        let Some(root_id) = n.target_id else {
            return Ok(None);
        };
        let root = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, {} FROM cards
                        JOIN users ON cards.owner_id = users.id
                        LEFT JOIN anonymous_aliases ON cards.alias_id = anonymous_aliases.id
                     WHERE cards.id = ?1",
                    CARD_COLUMNS,
                    actor_columns("cards.alias_id", "cards.created_at")
                ),
                [root_id],
                |row| Ok((card_from_row(row)?, actor_from_row(row, 16)?)),
            )
            .optional()?;
        let Some((root, root_author)) = root else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, {} FROM notifications_comments
                JOIN cards ON notifications_comments.card_id = cards.id
                JOIN users ON cards.owner_id = users.id
                LEFT JOIN anonymous_aliases ON cards.alias_id = anonymous_aliases.id
             WHERE notifications_comments.notification_id = ?1
             ORDER BY cards.created_at DESC",
            CARD_COLUMNS,
            actor_columns("cards.alias_id", "cards.created_at")
        ))?;
        let comments = stmt
            .query_map([n.id], |row| Ok((card_from_row(row)?, actor_from_row(row, 16)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Some(CommentExportRow { root, root_author, comments }))
    }

    pub fn mention_export(&self, n: &Notification) -> Result<Option<MentionExportRow>> {
        let mention = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM mentions WHERE id IN
                        (SELECT mention_id FROM notifications_mentions WHERE notification_id = ?1)
                     ORDER BY created_at DESC LIMIT 1",
                    MENTION_COLUMNS
                ),
                [n.id],
                mention_from_row,
            )
            .optional()?;
        let Some(mention) = mention else {
            return Ok(None);
        };
        let card = self
            .conn
            .query_row(
                &format!(
                    "SELECT {}, {} FROM cards
                        JOIN users ON cards.owner_id = users.id
                        LEFT JOIN anonymous_aliases ON cards.alias_id = anonymous_aliases.id
                     WHERE cards.id = ?1",
                    CARD_COLUMNS,
                    actor_columns("cards.alias_id", "cards.created_at")
                ),
                [mention.in_card],
                |row| Ok((card_from_row(row)?, actor_from_row(row, 16)?)),
            )
            .optional()?;
        Ok(card.map(|(card, mentioner)| MentionExportRow { mention, card, mentioner }))
    }

    /// Followers aggregated into a follow notification, latest first.
    pub fn follow_export(&self, n: &Notification) -> Result<Vec<ActorRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT users.id, NULL, users.username, users.display_name,
                    users.profile_image_path, notifications_follows.created_at
             FROM notifications_follows
                JOIN users ON notifications_follows.follower_id = users.id
             WHERE notifications_follows.notification_id = ?1
             ORDER BY notifications_follows.created_at DESC",
        )?;
        let actors = stmt
            .query_map([n.id], |row| actor_from_row(row, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(actors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, notification, post, read, reply, user};
    use deck_types::models::{Mention, ReactionType, UserReaction};

    #[test]
    fn test_latest_for_type_respects_opened() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let target = Uuid::new_v4();
        let mut n = notification(a.id, Some(target), NotificationType::Like, 1);
        db.with_conn_mut(|s| s.save_notification(&n)).unwrap();

        let found = read(&db, |s| s.latest_for_type(a.id, Some(target), NotificationType::Like, true));
        assert_eq!(found.map(|f| f.id), Some(n.id));

        n.opened_at = Some(at(2));
        db.with_conn_mut(|s| s.save_notification(&n)).unwrap();
        assert!(read(&db, |s| s.latest_for_type(a.id, Some(target), NotificationType::Like, true)).is_none());
        assert!(read(&db, |s| s.latest_for_type(a.id, None, NotificationType::Like, false)).is_some());
    }

    #[test]
    fn test_empty_notifications_are_reaped() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let n = notification(a.id, None, NotificationType::Follow, 1);
        let row = EventRow::Follow { follower_id: b.id, followee_id: a.id };
        db.with_conn_mut(|s| {
            s.save_notification(&n)?;
            s.add_event_row(n.id, &row, at(1))
        })
        .unwrap();
        assert_eq!(read(&db, |s| s.event_row_count(n.id)), 1);
        assert_eq!(db.with_conn_mut(|s| s.clear_empty_notifications(Some(a.id))).unwrap(), 0);

        db.with_conn_mut(|s| s.delete_follow_rows(b.id, a.id)).unwrap();
        assert_eq!(db.with_conn_mut(|s| s.clear_empty_notifications(Some(a.id))).unwrap(), 1);
        assert!(read(&db, |s| s.get_notification(n.id)).is_none());
    }

    #[test]
    fn test_rowless_types_survive_reaping() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let n = notification(a.id, None, NotificationType::Introduction, 1);
        db.with_conn_mut(|s| s.save_notification(&n)).unwrap();
        db.with_conn_mut(|s| s.clear_empty_notifications(None)).unwrap();
        assert!(read(&db, |s| s.get_notification(n.id)).is_some());
    }

    #[test]
    fn test_like_export_lists_likers() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let card = post(&db, &a, 0);
        let n = notification(a.id, Some(card.id), NotificationType::Like, 1);
        db.with_conn_mut(|s| {
            s.save_reaction(&UserReaction {
                user_id: b.id,
                card_id: card.id,
                kind: ReactionType::Like,
                alias_id: None,
                created_at: at(1),
                updated_at: at(1),
            })?;
            s.save_notification(&n)?;
            s.add_event_row(n.id, &EventRow::Reaction { user_id: b.id, card_id: card.id }, at(1))
        })
        .unwrap();

        let export = read(&db, |s| s.like_export(&n)).unwrap();
        assert_eq!(export.card.id, card.id);
        assert_eq!(export.actors.len(), 1);
        assert_eq!(export.actors[0].username, "bob");
        assert!(!export.actors[0].is_anonymous());
    }

    #[test]
    fn test_deleting_card_reaps_comment_notification() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        let r = reply(&db, &b, &root, 1);
        let n = notification(a.id, Some(root.id), NotificationType::Reply, 1);
        db.with_conn_mut(|s| {
            s.save_notification(&n)?;
            s.add_event_row(n.id, &EventRow::Comment { card_id: r.id }, at(1))
        })
        .unwrap();

        let export = read(&db, |s| s.comment_export(&n)).unwrap();
        assert_eq!(export.comments.len(), 1);
        assert_eq!(export.root_author.user_id, a.id);

        db.with_conn_mut(|s| s.delete_notifications_for_card(r.id)).unwrap();
        assert!(read(&db, |s| s.get_notification(n.id)).is_none());
    }

    #[test]
    fn test_mention_export_resolves_card() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let card = post(&db, &b, 0);
        let mention = Mention {
            id: Uuid::new_v4(),
            in_card: card.id,
            mentioner_id: b.id,
            mentioner_alias_id: None,
            mentioned_user_id: a.id,
            created_at: at(1),
        };
        let n = notification(a.id, Some(card.id), NotificationType::Mention, 1);
        db.with_conn_mut(|s| {
            s.insert_mention(&mention)?;
            s.save_notification(&n)?;
            s.add_event_row(n.id, &EventRow::Mention { mention_id: mention.id }, at(1))
        })
        .unwrap();
        let export = read(&db, |s| s.mention_export(&n)).unwrap();
        assert_eq!(export.card.id, card.id);
        assert_eq!(export.mentioner.username, "bob");
    }

    #[test]
    fn test_mark_opened_and_seen() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let n1 = notification(a.id, None, NotificationType::Introduction, 1);
        let n2 = notification(a.id, None, NotificationType::Leaderboard, 2);
        db.with_conn_mut(|s| {
            s.save_notification(&n1)?;
            s.save_notification(&n2)
        })
        .unwrap();
        assert_eq!(read(&db, |s| s.unseen_count(a.id)), 2);

        db.with_conn_mut(|s| s.mark_opened(a.id, &[n1.id], at(3))).unwrap();
        assert!(read(&db, |s| s.get_notification(n1.id)).unwrap().opened_at.is_some());
        db.with_conn_mut(|s| s.mark_all_seen(a.id, at(4))).unwrap();
        assert_eq!(read(&db, |s| s.unseen_count(a.id)), 0);
        let page = read(&db, |s| s.notifications_page(a.id, 10, 0));
        assert_eq!(page[0].id, n2.id);
    }
}
