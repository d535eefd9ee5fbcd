use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{ToSql, params};
use uuid::Uuid;

use deck_types::models::{AnonymousAlias, Card, Mention, ReactionType, UserReaction, UserTip};

use super::{OptionalExt, id_params, placeholders};
use crate::Store;
use crate::models::{
    ALIAS_COLUMNS, CARD_COLUMNS, CardCounts, MENTION_COLUMNS, REACTION_COLUMNS, alias_from_row,
    card_from_row, mention_from_row, reaction_from_row,
};

/// Rows the viewer bound to parameter `?{v}` may see: shadowbanned cards
/// only to their owner, blocked users nowhere, blocked aliases not in the
/// thread they were blocked in.
pub(crate) fn visible_to(v: usize) -> String {
    format!(
        "(cards.shadowbanned_at IS NULL OR cards.owner_id = ?{v})
         AND (cards.alias_id IS NOT NULL OR cards.owner_id NOT IN
             (SELECT blocked_user FROM user_blocks WHERE user_id = ?{v} AND blocked_user IS NOT NULL))
         AND (cards.alias_id IS NULL OR cards.alias_id NOT IN
             (SELECT blocked_alias FROM user_blocks
              WHERE user_id = ?{v} AND blocked_alias IS NOT NULL
                AND for_thread = COALESCE(cards.thread_root_id, cards.id)))",
        v = v
    )
}

impl Store<'_> {
    // -- Cards --

    pub fn save_card(&self, card: &Card) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cards (id, owner_id, alias_id, channel_id, thread_root_id, thread_reply_id,
                content, url, background_color, background_image_path, author_to_alias,
                is_intro_card, coins_earned, shadowbanned_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT (id) DO UPDATE SET
                alias_id = excluded.alias_id,
                channel_id = excluded.channel_id,
                content = excluded.content,
                url = excluded.url,
                background_color = excluded.background_color,
                background_image_path = excluded.background_image_path,
                author_to_alias = excluded.author_to_alias,
                is_intro_card = excluded.is_intro_card,
                shadowbanned_at = excluded.shadowbanned_at,
                updated_at = excluded.updated_at",
            params![
                card.id,
                card.owner_id,
                card.alias_id,
                card.channel_id,
                card.thread_root_id,
                card.thread_reply_id,
                card.content,
                card.url,
                card.background_color,
                card.background_image_path,
                serde_json::to_string(&card.author_to_alias)?,
                card.is_intro_card,
                card.coins_earned,
                card.shadowbanned_at,
                card.created_at,
                card.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_card(&self, id: Uuid) -> Result<Option<Card>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLUMNS),
                [id],
                card_from_row,
            )
            .optional()
    }

    /// Remove a card together with everything that only exists for it.
    pub fn delete_card(&self, id: Uuid) -> Result<()> {
        self.conn.execute("DELETE FROM user_feeds WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM user_card_ranks WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM user_popular_feeds WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM popular_ranks WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM user_reactions WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM subscriptions WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM like_rewards WHERE card_id = ?1", [id])?;
        self.conn.execute("DELETE FROM cards WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn set_author_to_alias(&self, root_id: Uuid, map: &HashMap<Uuid, Uuid>) -> Result<()> {
        self.conn.execute(
            "UPDATE cards SET author_to_alias = ?2 WHERE id = ?1",
            params![root_id, serde_json::to_string(map)?],
        )?;
        Ok(())
    }

    pub fn count_posts_by_alias_in_thread(&self, alias_id: Uuid, root_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM cards
             WHERE alias_id = ?1 AND (thread_root_id = ?2 OR id = ?2)",
            params![alias_id, root_id],
            |row| row.get(0),
        )?)
    }

    pub fn thread_count(&self, root_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM cards WHERE thread_root_id = ?1",
            [root_id],
            |row| row.get(0),
        )?)
    }

    /// Number of distinct identities (alias or user) that posted in a thread.
    pub fn count_unique_commenters(&self, root_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(DISTINCT COALESCE(alias_id, owner_id)) FROM cards
             WHERE thread_root_id = ?1 OR id = ?1",
            [root_id],
            |row| row.get(0),
        )?)
    }

    /// Every reply in a thread, oldest first.
    pub fn thread_replies(&self, root_id: Uuid, viewer: Uuid) -> Result<Vec<Card>> {
        self.select_cards(
            &format!(
                "SELECT {} FROM cards WHERE cards.thread_root_id = ?1 AND {}
                 ORDER BY cards.created_at",
                CARD_COLUMNS,
                visible_to(2)
            ),
            &[&root_id, &viewer],
        )
    }

    /// Direct replies to a card, oldest first.
    pub fn immediate_replies(&self, card_id: Uuid, viewer: Uuid) -> Result<Vec<Card>> {
        self.select_cards(
            &format!(
                "SELECT {} FROM cards WHERE cards.thread_reply_id = ?1 AND {}
                 ORDER BY cards.created_at",
                CARD_COLUMNS,
                visible_to(2)
            ),
            &[&card_id, &viewer],
        )
    }

    /// All replies below a card at any depth, oldest first.
    pub fn flat_replies(&self, card_id: Uuid, viewer: Uuid) -> Result<Vec<Card>> {
        self.select_cards(
            &format!(
                "WITH RECURSIVE sub_replies(id) AS (
                    SELECT id FROM cards WHERE thread_reply_id = ?1
                    UNION ALL
                    SELECT c.id FROM cards c JOIN sub_replies r ON c.thread_reply_id = r.id
                 )
                 SELECT {} FROM cards WHERE cards.id IN (SELECT id FROM sub_replies) AND {}
                 ORDER BY cards.created_at",
                CARD_COLUMNS,
                visible_to(2)
            ),
            &[&card_id, &viewer],
        )
    }

    /// Posts shown on a profile; anonymous posts never appear.
    pub fn posts_for_user(
        &self,
        user_id: Uuid,
        viewer: Uuid,
        include_replies: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Card>> {
        let replies = if include_replies { "" } else { "AND cards.thread_root_id IS NULL" };
        self.select_cards(
            &format!(
                "SELECT {} FROM cards
                 WHERE cards.owner_id = ?1 AND cards.alias_id IS NULL {} AND {}
                 ORDER BY cards.created_at DESC LIMIT ?3 OFFSET ?4",
                CARD_COLUMNS,
                replies,
                visible_to(2)
            ),
            &[&user_id, &viewer, &limit, &offset],
        )
    }

    pub fn cards_for_channel(
        &self,
        channel_id: Uuid,
        viewer: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Card>> {
        self.select_cards(
            &format!(
                "SELECT {} FROM cards
                 WHERE cards.channel_id = ?1 AND cards.thread_root_id IS NULL AND {}
                 ORDER BY cards.created_at DESC LIMIT ?3 OFFSET ?4",
                CARD_COLUMNS,
                visible_to(2)
            ),
            &[&channel_id, &viewer, &limit, &offset],
        )
    }

    pub fn intro_card_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM cards WHERE is_intro_card = 1 ORDER BY created_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn add_coins_earned(&self, card_id: Uuid, amount: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE cards SET coins_earned = coins_earned + ?2 WHERE id = ?1",
            params![card_id, amount],
        )?;
        Ok(())
    }

    pub fn card_counts(&self, card_ids: &[Uuid]) -> Result<HashMap<Uuid, CardCounts>> {
        let mut counts = HashMap::with_capacity(card_ids.len());
        let mut stmt = self.conn.prepare(
            "SELECT
                (SELECT COUNT(*) FROM user_reactions WHERE card_id = ?1 AND type = 'like'),
                (SELECT COUNT(*) FROM user_reactions WHERE card_id = ?1 AND type = 'dislike'),
                (SELECT COUNT(*) FROM cards WHERE thread_root_id = ?1 OR thread_reply_id = ?1),
                (SELECT COUNT(DISTINCT COALESCE(alias_id, owner_id)) FROM cards
                    WHERE thread_root_id = ?1 OR thread_reply_id = ?1),
                coins_earned
             FROM cards WHERE id = ?1",
        )?;
        for id in card_ids {
            let row = stmt
                .query_row([*id], |row| {
                    Ok(CardCounts {
                        likes: row.get(0)?,
                        dislikes: row.get(1)?,
                        comments: row.get(2)?,
                        unique_commenters: row.get(3)?,
                        coins_earned: row.get(4)?,
                    })
                })
                .optional()?;
            if let Some(row) = row {
                counts.insert(*id, row);
            }
        }
        Ok(counts)
    }

    fn select_cards(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(sql)?;
        let cards = stmt
            .query_map(params, card_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    // -- Aliases --

    pub fn get_alias(&self, id: Uuid) -> Result<Option<AnonymousAlias>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM anonymous_aliases WHERE id = ?1", ALIAS_COLUMNS),
                [id],
                alias_from_row,
            )
            .optional()
    }

    pub fn get_alias_by_username(&self, username: &str) -> Result<Option<AnonymousAlias>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM anonymous_aliases WHERE lower(username) = lower(?1)",
                    ALIAS_COLUMNS
                ),
                [username],
                alias_from_row,
            )
            .optional()
    }

    pub fn get_aliases_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, AnonymousAlias>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {} FROM anonymous_aliases WHERE id IN ({})",
            ALIAS_COLUMNS,
            placeholders(1, ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let aliases = stmt
            .query_map(id_params(ids).as_slice(), alias_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(aliases.into_iter().map(|a| (a.id, a)).collect())
    }

    /// A random active alias not yet bound in `taken`.
    pub fn unused_alias(&self, taken: &HashSet<Uuid>) -> Result<Option<AnonymousAlias>> {
        let taken: Vec<Uuid> = taken.iter().copied().collect();
        let exclude = if taken.is_empty() {
            String::new()
        } else {
            format!("AND id NOT IN ({})", placeholders(1, taken.len()))
        };
        let sql = format!(
            "SELECT {} FROM anonymous_aliases WHERE inactive = 0 {} ORDER BY RANDOM() LIMIT 1",
            ALIAS_COLUMNS, exclude
        );
        self.conn
            .query_row(&sql, id_params(&taken).as_slice(), alias_from_row)
            .optional()
    }

    /// Whether the user's most recent act in the thread (post or like) was
    /// made under an alias.
    pub fn alias_last_used(&self, user_id: Uuid, root_id: Uuid) -> Result<bool> {
        let latest: Option<Option<Uuid>> = self
            .conn
            .query_row(
                "SELECT alias_id FROM (
                    SELECT alias_id, created_at FROM cards
                    WHERE owner_id = ?1 AND (thread_root_id = ?2 OR id = ?2)
                    UNION ALL
                    SELECT alias_id, created_at FROM user_reactions
                    WHERE user_id = ?1 AND type = 'like'
                      AND card_id IN (SELECT id FROM cards WHERE thread_root_id = ?2 OR id = ?2)
                 ) ORDER BY created_at DESC LIMIT 1",
                params![user_id, root_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest.flatten().is_some())
    }

    // -- Reactions --

    pub fn get_reaction(&self, user_id: Uuid, card_id: Uuid) -> Result<Option<UserReaction>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM user_reactions WHERE user_id = ?1 AND card_id = ?2",
                    REACTION_COLUMNS
                ),
                params![user_id, card_id],
                reaction_from_row,
            )
            .optional()
    }

    pub fn save_reaction(&self, reaction: &UserReaction) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_reactions (user_id, card_id, type, alias_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (user_id, card_id) DO UPDATE SET
                type = excluded.type,
                alias_id = excluded.alias_id,
                updated_at = excluded.updated_at",
            params![
                reaction.user_id,
                reaction.card_id,
                reaction.kind.as_str(),
                reaction.alias_id,
                reaction.created_at,
                reaction.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_reaction(&self, user_id: Uuid, card_id: Uuid) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM user_reactions WHERE user_id = ?1 AND card_id = ?2",
            params![user_id, card_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn reactions_among(&self, user_id: Uuid, card_ids: &[Uuid]) -> Result<HashMap<Uuid, ReactionType>> {
        if card_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {} FROM user_reactions WHERE user_id = ?1 AND card_id IN ({})",
            REACTION_COLUMNS,
            placeholders(2, card_ids.len())
        );
        let mut params = id_params(card_ids);
        params.insert(0, &user_id);
        let mut stmt = self.conn.prepare(&sql)?;
        let reactions = stmt
            .query_map(params.as_slice(), reaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(reactions.into_iter().map(|r| (r.card_id, r.kind)).collect())
    }

    // -- Tips --

    pub fn insert_tip(&self, tip: &UserTip) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_tips (id, user_id, card_id, amount, anonymous, alias_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tip.id,
                tip.user_id,
                tip.card_id,
                tip.amount,
                tip.anonymous,
                tip.alias_id,
                tip.created_at
            ],
        )?;
        Ok(())
    }

    /// Point the user's earlier anonymous tips in a thread at their alias.
    pub fn assign_alias_for_tips_in_thread(&self, user_id: Uuid, root_id: Uuid, alias_id: Uuid) -> Result<usize> {
        Ok(self.conn.execute(
            "UPDATE user_tips SET alias_id = ?1
             WHERE user_id = ?2 AND anonymous = 1
               AND card_id IN (SELECT id FROM cards WHERE thread_root_id = ?3 OR id = ?3)",
            params![alias_id, user_id, root_id],
        )?)
    }

    pub fn tips_for_card(&self, card_id: Uuid) -> Result<Vec<UserTip>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, card_id, amount, anonymous, alias_id, created_at
             FROM user_tips WHERE card_id = ?1 ORDER BY created_at",
        )?;
        let tips = stmt
            .query_map([card_id], |row| {
                Ok(UserTip {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    card_id: row.get(2)?,
                    amount: row.get(3)?,
                    anonymous: row.get(4)?,
                    alias_id: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tips)
    }

    // -- Mentions --

    pub fn insert_mention(&self, mention: &Mention) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO mentions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", MENTION_COLUMNS),
            params![
                mention.id,
                mention.in_card,
                mention.mentioner_id,
                mention.mentioner_alias_id,
                mention.mentioned_user_id,
                mention.created_at
            ],
        )?;
        Ok(())
    }

    pub fn mentions_for_card(&self, card_id: Uuid) -> Result<Vec<Mention>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM mentions WHERE in_card = ?1 ORDER BY created_at",
            MENTION_COLUMNS
        ))?;
        let mentions = stmt
            .query_map([card_id], mention_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mentions)
    }

    pub fn delete_mentions_for_card(&self, card_id: Uuid) -> Result<()> {
        self.conn.execute("DELETE FROM mentions WHERE in_card = ?1", [card_id])?;
        Ok(())
    }

    pub fn touch_card(&self, card_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE cards SET updated_at = ?2 WHERE id = ?1",
            params![card_id, at],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, post, read, reply, user};

    #[test]
    fn test_alias_binding_persists() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner");
        let root = post(&db, &owner, 0);
        let alias = read(&db, |s| s.unused_alias(&HashSet::new())).unwrap();

        let mut map = HashMap::new();
        map.insert(owner.id, alias.id);
        db.with_conn_mut(|s| s.set_author_to_alias(root.id, &map)).unwrap();

        let loaded = read(&db, |s| s.get_card(root.id)).unwrap();
        assert_eq!(loaded.author_to_alias.get(&owner.id), Some(&alias.id));
    }

    #[test]
    fn test_unused_alias_skips_taken() {
        let db = Database::open_in_memory().unwrap();
        let all: HashSet<Uuid> = db
            .with_conn(|s| {
                let mut stmt = s.conn().prepare("SELECT id FROM anonymous_aliases")?;
                let ids = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<std::result::Result<HashSet<Uuid>, _>>()?;
                Ok(ids)
            })
            .unwrap();
        let mut taken = all.clone();
        let free = *all.iter().next().unwrap();
        taken.remove(&free);
        let picked = read(&db, |s| s.unused_alias(&taken)).unwrap();
        assert_eq!(picked.id, free);

        assert!(read(&db, |s| s.unused_alias(&all)).is_none());
    }

    #[test]
    fn test_flat_replies_reach_all_depths() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        let r1 = reply(&db, &b, &root, 1);
        let r2 = reply(&db, &a, &r1, 2);
        let r3 = reply(&db, &b, &r2, 3);

        let below_r1: Vec<Uuid> = read(&db, |s| s.flat_replies(r1.id, a.id))
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(below_r1, vec![r2.id, r3.id]);
        assert_eq!(read(&db, |s| s.immediate_replies(root.id, a.id)).len(), 1);
        assert_eq!(read(&db, |s| s.thread_count(root.id)), 3);
        assert_eq!(read(&db, |s| s.count_unique_commenters(root.id)), 2);
    }

    #[test]
    fn test_shadowbanned_cards_visible_to_owner_only() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        let mut hidden = reply(&db, &b, &root, 1);
        hidden.shadowbanned_at = Some(at(1));
        db.with_conn_mut(|s| s.save_card(&hidden)).unwrap();

        assert!(read(&db, |s| s.thread_replies(root.id, a.id)).is_empty());
        assert_eq!(read(&db, |s| s.thread_replies(root.id, b.id)).len(), 1);
    }

    #[test]
    fn test_blocked_alias_hidden_in_its_thread() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        let alias = read(&db, |s| s.unused_alias(&HashSet::new())).unwrap();
        let mut anon = Card::new(Uuid::new_v4(), b.id, at(1));
        anon.content = "psst".into();
        anon.alias_id = Some(alias.id);
        anon.reply_to(&root);
        db.with_conn_mut(|s| s.save_card(&anon)).unwrap();

        db.with_conn_mut(|s| s.block_alias_in_thread(a.id, alias.id, root.id)).unwrap();
        assert!(read(&db, |s| s.thread_replies(root.id, a.id)).is_empty());
    }

    #[test]
    fn test_tips_reassigned_to_alias() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        let tip = UserTip {
            id: Uuid::new_v4(),
            user_id: b.id,
            card_id: root.id,
            amount: 2,
            anonymous: true,
            alias_id: None,
            created_at: at(1),
        };
        db.with_conn_mut(|s| s.insert_tip(&tip)).unwrap();
        let alias = Uuid::new_v4();
        let changed = db
            .with_conn_mut(|s| s.assign_alias_for_tips_in_thread(b.id, root.id, alias))
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(read(&db, |s| s.tips_for_card(root.id))[0].alias_id, Some(alias));
    }

    #[test]
    fn test_alias_last_used() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = post(&db, &a, 0);
        reply(&db, &b, &root, 1);
        assert!(!read(&db, |s| s.alias_last_used(b.id, root.id)));

        let mut anon = Card::new(Uuid::new_v4(), b.id, at(2));
        anon.content = "again".into();
        anon.alias_id = Some(Uuid::new_v4());
        anon.reply_to(&root);
        db.with_conn_mut(|s| s.save_card(&anon)).unwrap();
        assert!(read(&db, |s| s.alias_last_used(b.id, root.id)));
    }
}
