use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use deck_types::models::{Card, PopularRankEntry, RankDelta};

use super::{OptionalExt, id_params, placeholders};
use crate::Store;
use crate::models::{CARD_COLUMNS, RANK_COLUMNS, card_from_row, rank_from_row};

impl Store<'_> {
    // -- Popular ranks --

    pub fn insert_popular_rank(&self, entry: &PopularRankEntry) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO popular_ranks (card_id, views, upvote_count, downvote_count,
                comment_count, unique_commenters_count, score_mod, created_at_timestamp, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.card_id,
                entry.views,
                entry.upvotes,
                entry.downvotes,
                entry.comments,
                entry.unique_commenters,
                entry.score_mod,
                entry.created_at_timestamp,
                entry.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_popular_rank(&self, card_id: Uuid) -> Result<Option<PopularRankEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM popular_ranks WHERE card_id = ?1", RANK_COLUMNS),
                [card_id],
                rank_from_row,
            )
            .optional()
    }

    /// Apply signed counter changes in one statement so concurrent updates
    /// to the same card never lose increments. Cards without an entry
    /// (replies, private channels) are left alone.
    pub fn update_rank_counters(&self, card_id: Uuid, delta: RankDelta, at: DateTime<Utc>) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE popular_ranks SET
                views = MAX(0, views + ?2),
                upvote_count = MAX(0, upvote_count + ?3),
                downvote_count = MAX(0, downvote_count + ?4),
                comment_count = MAX(0, comment_count + ?5),
                score_mod = score_mod + ?6,
                updated_at = ?7
             WHERE card_id = ?1",
            params![
                card_id,
                delta.views,
                delta.upvotes,
                delta.downvotes,
                delta.comments,
                delta.score_mod,
                at
            ],
        )?;
        Ok(updated > 0)
    }

    pub fn set_unique_commenters(&self, card_id: Uuid, count: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE popular_ranks SET unique_commenters_count = ?2 WHERE card_id = ?1",
            params![card_id, count],
        )?;
        Ok(())
    }

    /// Count one more view on each card that has an entry.
    pub fn increment_views(&self, card_ids: &[Uuid]) -> Result<()> {
        if card_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE popular_ranks SET views = views + 1 WHERE card_id IN ({})",
            placeholders(1, card_ids.len())
        );
        self.conn.execute(&sql, id_params(card_ids).as_slice())?;
        Ok(())
    }

    /// Ranked cards created since `since` outside private channels.
    pub fn popular_ranks_since(&self, since: DateTime<Utc>) -> Result<Vec<PopularRankEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM popular_ranks
                JOIN cards ON popular_ranks.card_id = cards.id
                LEFT JOIN channels ON cards.channel_id = channels.id
             WHERE cards.shadowbanned_at IS NULL
               AND cards.created_at >= ?1
               AND COALESCE(channels.is_private, 0) = 0",
            RANK_COLUMNS
        ))?;
        let entries = stmt
            .query_map([since], rank_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn insert_score_modification(
        &self,
        id: Uuid,
        card_id: Uuid,
        user_id: Uuid,
        strength: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO score_modifications (id, card_id, user_id, strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, card_id, user_id, strength, at],
        )?;
        Ok(())
    }

    // -- Popular feed --

    /// Replace the user's popular list with `ids`, best first.
    pub fn set_popular_feed(&self, user_id: Uuid, ids: &[Uuid]) -> Result<()> {
        self.conn
            .execute("DELETE FROM user_popular_feeds WHERE user_id = ?1", [user_id])?;
        let mut stmt = self.conn.prepare(
            "INSERT INTO user_popular_feeds (user_id, card_id, position) VALUES (?1, ?2, ?3)",
        )?;
        for (i, id) in ids.iter().enumerate() {
            stmt.execute(params![user_id, id, i as i64 + 1])?;
        }
        Ok(())
    }

    pub fn popular_feed_page(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM user_popular_feeds
                JOIN cards ON user_popular_feeds.card_id = cards.id
             WHERE user_popular_feeds.user_id = ?1
               AND (cards.shadowbanned_at IS NULL OR cards.owner_id = ?1)
             ORDER BY user_popular_feeds.position
             LIMIT ?2 OFFSET ?3",
            CARD_COLUMNS
        ))?;
        let cards = stmt
            .query_map(params![user_id, limit, offset], card_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, post, read, user};

    #[test]
    fn test_counters_never_go_negative() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let card = post(&db, &a, 0);
        db.with_conn_mut(|s| s.insert_popular_rank(&PopularRankEntry::new(card.id, at(0))))
            .unwrap();

        db.with_conn_mut(|s| s.update_rank_counters(card.id, RankDelta::upvotes(1), at(1)))
            .unwrap();
        db.with_conn_mut(|s| s.update_rank_counters(card.id, RankDelta::upvotes(-1), at(2)))
            .unwrap();
        db.with_conn_mut(|s| s.update_rank_counters(card.id, RankDelta::upvotes(-1), at(3)))
            .unwrap();

        let entry = read(&db, |s| s.get_popular_rank(card.id)).unwrap();
        assert_eq!(entry.upvotes, 0);
    }

    #[test]
    fn test_missing_entry_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let touched = db
            .with_conn_mut(|s| s.update_rank_counters(Uuid::new_v4(), RankDelta::comments(1), at(0)))
            .unwrap();
        assert!(!touched);
    }

    #[test]
    fn test_popular_feed_pages_in_order() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let c1 = post(&db, &a, 0);
        let c2 = post(&db, &a, 1);
        db.with_conn_mut(|s| s.set_popular_feed(a.id, &[c2.id, c1.id])).unwrap();
        let page: Vec<Uuid> = read(&db, |s| s.popular_feed_page(a.id, 10, 0))
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(page, vec![c2.id, c1.id]);
    }
}
