use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{ToSql, params};
use uuid::Uuid;

use deck_types::models::{Card, FeedEntry, PopularRankEntry};

use super::{OptionalExt, id_params, placeholders};
use super::cards::visible_to;
use crate::Store;
use crate::models::{CARD_COLUMNS, RANK_COLUMNS, card_from_row, rank_from_row};

/// Highest position a page may show: the top marker, or the whole feed
/// when no marker has been set yet.
const FEED_TOP: &str = "COALESCE(
    (SELECT position FROM user_feeds WHERE user_id = ?1 AND current_top = 1),
    (SELECT MAX(position) FROM user_feeds WHERE user_id = ?1))";

impl Store<'_> {
    // -- Feed pages --

    pub fn count_feed(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM user_feeds WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?)
    }

    /// Cards at or below the top marker, newest position first. `search`
    /// matches content, the visible author name and the channel handle.
    pub fn feed_page(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
        search: Option<&str>,
    ) -> Result<Vec<Card>> {
        let pattern = search.map(|s| format!("%{}%", s.trim()));
        let search_clause = if pattern.is_some() {
            "AND (cards.content LIKE ?4
                  OR (cards.alias_id IS NULL AND (users.username LIKE ?4 OR users.display_name LIKE ?4))
                  OR anonymous_aliases.username LIKE ?4
                  OR channels.handle LIKE ?4)"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM user_feeds
                JOIN cards ON user_feeds.card_id = cards.id
                LEFT JOIN users ON cards.owner_id = users.id
                LEFT JOIN anonymous_aliases ON cards.alias_id = anonymous_aliases.id
                LEFT JOIN channels ON cards.channel_id = channels.id
             WHERE user_feeds.user_id = ?1
               AND user_feeds.position <= {}
               AND {}
               {}
             ORDER BY user_feeds.position DESC, cards.created_at DESC
             LIMIT ?2 OFFSET ?3",
            CARD_COLUMNS,
            FEED_TOP,
            visible_to(1),
            search_clause
        );
        let mut params: Vec<&dyn ToSql> = vec![&user_id, &limit, &offset];
        if let Some(p) = pattern.as_ref() {
            params.push(p);
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let cards = stmt
            .query_map(params.as_slice(), card_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    pub fn get_feed_entry(&self, user_id: Uuid, card_id: Uuid) -> Result<Option<FeedEntry>> {
        self.conn
            .query_row(
                "SELECT user_id, card_id, position, current_top, last_visited_at
                 FROM user_feeds WHERE user_id = ?1 AND card_id = ?2",
                params![user_id, card_id],
                |row| {
                    Ok(FeedEntry {
                        user_id: row.get(0)?,
                        card_id: row.get(1)?,
                        position: row.get(2)?,
                        current_top: row.get(3)?,
                        last_visited_at: row.get(4)?,
                    })
                },
            )
            .optional()
    }

    // -- Feed building --

    /// Seed a brand-new feed with every ranked card from the user's
    /// channels, best rank at the highest position.
    pub fn build_initial_feed(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM popular_ranks
                JOIN cards ON popular_ranks.card_id = cards.id
             WHERE cards.shadowbanned_at IS NULL
               AND cards.channel_id IN
                   (SELECT channel_id FROM channel_memberships WHERE user_id = ?1)",
            RANK_COLUMNS
        ))?;
        let mut entries = stmt
            .query_map([user_id], rank_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.rank().total_cmp(&b.rank()));

        let mut insert = self.conn.prepare(
            "INSERT INTO user_feeds (user_id, card_id, position, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, card_id) DO NOTHING",
        )?;
        for (i, entry) in entries.iter().enumerate() {
            insert.execute(params![user_id, entry.card_id, i as i64 + 1, at])?;
        }
        Ok(entries.len())
    }

    /// Queue `card_ids` above everything in the feed; the first id lands
    /// highest. Cards the user may not see are dropped. Returns the ids
    /// actually queued, in input order.
    pub fn add_cards_to_top(&self, user_id: Uuid, card_ids: &[Uuid], at: DateTime<Utc>) -> Result<Vec<Uuid>> {
        if card_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT cards.id FROM cards WHERE cards.id IN ({}) AND {}",
            placeholders(2, card_ids.len()),
            visible_to(1)
        );
        let mut params = id_params(card_ids);
        params.insert(0, &user_id);
        let mut stmt = self.conn.prepare(&sql)?;
        let visible = stmt
            .query_map(params.as_slice(), |row| row.get::<_, Uuid>(0))?
            .collect::<std::result::Result<std::collections::HashSet<_>, _>>()?;

        let top: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), 0) FROM user_feeds WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;

        let mut upsert = self.conn.prepare(
            "INSERT INTO user_feeds (user_id, card_id, position, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, card_id)
             DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at",
        )?;
        let queued: Vec<Uuid> = card_ids.iter().copied().filter(|id| visible.contains(id)).collect();
        for (offset, id) in queued.iter().rev().enumerate() {
            upsert.execute(params![user_id, id, top + offset as i64 + 1, at])?;
        }
        Ok(queued)
    }

    /// Move the top marker to the highest row of this user's feed.
    pub fn reset_feed_top(&self, user_id: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE user_feeds SET current_top = 0 WHERE user_id = ?1 AND current_top = 1",
            [user_id],
        )?;
        self.conn.execute(
            "UPDATE user_feeds SET current_top = 1
             WHERE user_id = ?1 AND card_id =
                (SELECT card_id FROM user_feeds WHERE user_id = ?1
                 ORDER BY position DESC LIMIT 1)",
            [user_id],
        )?;
        Ok(())
    }

    pub fn set_card_visited(&self, user_id: Uuid, card_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE user_feeds SET last_visited_at = ?3 WHERE user_id = ?1 AND card_id = ?2",
            params![user_id, card_id, at],
        )?;
        Ok(())
    }

    // -- Candidates --

    /// Cards left over from earlier hands plus new top-level cards from
    /// followed users or joined channels since the last refresh. Cards
    /// without a rank entry are dropped.
    pub fn rankable_cards(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<PopularRankEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM popular_ranks
             WHERE popular_ranks.card_id IN (
                SELECT user_card_ranks.card_id FROM user_card_ranks
                    JOIN cards ON user_card_ranks.card_id = cards.id
                WHERE user_card_ranks.user_id = ?1
                  AND cards.shadowbanned_at IS NULL
                  AND {visible}
                UNION
                SELECT cards.id FROM cards
                WHERE cards.created_at >=
                        COALESCE((SELECT feed_last_updated_at FROM users WHERE id = ?1), ?2)
                  AND cards.thread_root_id IS NULL
                  AND cards.shadowbanned_at IS NULL
                  AND {visible}
                  AND cards.owner_id NOT IN
                      (SELECT muted_user_id FROM user_mutes WHERE user_id = ?1)
                  AND ((cards.alias_id IS NULL AND cards.owner_id IN
                          (SELECT followee_id FROM user_follows WHERE follower_id = ?1))
                       OR cards.channel_id IN
                          (SELECT channel_id FROM channel_memberships WHERE user_id = ?1))
             )",
            RANK_COLUMNS,
            visible = visible_to(1)
        ))?;
        let entries = stmt
            .query_map(params![user_id, now], rank_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Replace the user's leftover candidates.
    pub fn replace_card_ranks(&self, user_id: Uuid, card_ids: &[Uuid]) -> Result<()> {
        self.conn
            .execute("DELETE FROM user_card_ranks WHERE user_id = ?1", [user_id])?;
        let mut stmt = self.conn.prepare(
            "INSERT OR IGNORE INTO user_card_ranks (user_id, card_id) VALUES (?1, ?2)",
        )?;
        for id in card_ids {
            stmt.execute(params![user_id, id])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::migrations::GENERAL_CHANNEL_ID;
    use crate::queries::fixtures::{at, post, read, user};

    fn ids(cards: Vec<Card>) -> Vec<Uuid> {
        cards.into_iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_new_cards_hidden_until_top_reset() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let c1 = post(&db, &a, 0);
        let c2 = post(&db, &a, 1);
        let c3 = post(&db, &a, 2);

        db.with_conn_mut(|s| {
            s.add_cards_to_top(a.id, &[c1.id], at(3))?;
            s.reset_feed_top(a.id)
        })
        .unwrap();
        db.with_conn_mut(|s| s.add_cards_to_top(a.id, &[c3.id, c2.id], at(4))).unwrap();

        assert_eq!(ids(read(&db, |s| s.feed_page(a.id, 10, 0, None))), vec![c1.id]);

        db.with_conn_mut(|s| s.reset_feed_top(a.id)).unwrap();
        assert_eq!(
            ids(read(&db, |s| s.feed_page(a.id, 10, 0, None))),
            vec![c3.id, c2.id, c1.id]
        );
    }

    #[test]
    fn test_reset_top_only_touches_one_user() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c1 = post(&db, &a, 0);
        let c2 = post(&db, &a, 1);
        db.with_conn_mut(|s| {
            s.add_cards_to_top(a.id, &[c1.id], at(2))?;
            s.add_cards_to_top(b.id, &[c1.id], at(2))?;
            s.reset_feed_top(a.id)?;
            s.reset_feed_top(b.id)?;
            s.add_cards_to_top(a.id, &[c2.id], at(3))?;
            s.reset_feed_top(a.id)
        })
        .unwrap();

        assert!(read(&db, |s| s.get_feed_entry(b.id, c1.id)).unwrap().current_top);
        assert!(read(&db, |s| s.get_feed_entry(a.id, c2.id)).unwrap().current_top);
        assert!(!read(&db, |s| s.get_feed_entry(a.id, c1.id)).unwrap().current_top);
    }

    #[test]
    fn test_add_to_top_drops_shadowbanned() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let mut banned = post(&db, &b, 0);
        banned.shadowbanned_at = Some(at(0));
        db.with_conn_mut(|s| s.save_card(&banned)).unwrap();

        let fine = post(&db, &b, 1);
        let added = db
            .with_conn_mut(|s| s.add_cards_to_top(a.id, &[banned.id, fine.id], at(1)))
            .unwrap();
        assert_eq!(added, vec![fine.id]);
        let own = db.with_conn_mut(|s| s.add_cards_to_top(b.id, &[banned.id], at(1))).unwrap();
        assert_eq!(own, vec![banned.id]);
    }

    #[test]
    fn test_search_matches_content() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let mut card = post(&db, &a, 0);
        card.content = "sourdough starter tips".into();
        db.with_conn_mut(|s| s.save_card(&card)).unwrap();
        let other = post(&db, &a, 1);
        db.with_conn_mut(|s| s.add_cards_to_top(a.id, &[card.id, other.id], at(2))).unwrap();

        let hits = ids(read(&db, |s| s.feed_page(a.id, 10, 0, Some("sourdough"))));
        assert_eq!(hits, vec![card.id]);
    }

    #[test]
    fn test_initial_feed_orders_by_rank() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let mut old = post(&db, &a, 0);
        let mut new = post(&db, &a, 100_000);
        for card in [&mut old, &mut new] {
            card.channel_id = Some(GENERAL_CHANNEL_ID);
        }
        db.with_conn_mut(|s| {
            s.save_card(&old)?;
            s.save_card(&new)?;
            s.insert_popular_rank(&PopularRankEntry::new(old.id, old.created_at))?;
            s.insert_popular_rank(&PopularRankEntry::new(new.id, new.created_at))?;
            s.join_channel(a.id, GENERAL_CHANNEL_ID, at(0))?;
            s.build_initial_feed(a.id, at(200_000))
        })
        .unwrap();

        assert_eq!(read(&db, |s| s.count_feed(a.id)), 2);
        assert_eq!(ids(read(&db, |s| s.feed_page(a.id, 10, 0, None))), vec![new.id, old.id]);
    }

    #[test]
    fn test_rankable_cards_include_followed_and_leftovers() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let c = user(&db, "carol");
        db.with_conn_mut(|s| {
            s.follow(a.id, b.id, at(0))?;
            s.set_feed_last_updated(a.id, at(5))
        })
        .unwrap();
        let stale = post(&db, &c, 1);
        let fresh = post(&db, &b, 10);
        let stranger = post(&db, &c, 10);
        db.with_conn_mut(|s| {
            for card in [&stale, &fresh, &stranger] {
                s.insert_popular_rank(&PopularRankEntry::new(card.id, card.created_at))?;
            }
            s.replace_card_ranks(a.id, &[stale.id])
        })
        .unwrap();

        let mut got: Vec<Uuid> = read(&db, |s| s.rankable_cards(a.id, at(20)))
            .into_iter()
            .map(|e| e.card_id)
            .collect();
        got.sort();
        let mut want = vec![stale.id, fresh.id];
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_rankable_cards_skip_blocked_authors() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        db.with_conn_mut(|s| {
            s.follow(a.id, b.id, at(0))?;
            s.set_feed_last_updated(a.id, at(5))
        })
        .unwrap();
        let leftover = post(&db, &b, 1);
        let fresh = post(&db, &b, 10);
        db.with_conn_mut(|s| {
            for card in [&leftover, &fresh] {
                s.insert_popular_rank(&PopularRankEntry::new(card.id, card.created_at))?;
            }
            s.replace_card_ranks(a.id, &[leftover.id])?;
            s.block_user(a.id, b.id)
        })
        .unwrap();

        assert!(read(&db, |s| s.rankable_cards(a.id, at(20))).is_empty());
    }
}
