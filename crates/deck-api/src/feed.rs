use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;
use uuid::Uuid;

use deck_db::Store;
use deck_types::models::{Card, User};

use crate::ranking::choose_hand;

/// Cards per feed page.
pub const PAGE_SIZE: i64 = 20;

/// How far back the popular list looks.
pub const POPULAR_WINDOW_DAYS: i64 = 14;

/// What a page-0 read did to the feed before serving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// First read ever: the feed was seeded from popular rank.
    Initial { intro_cards: usize },
    /// A hand was dealt above the top marker.
    Dealt { new_cards: usize },
    /// The user switched the feed off.
    Disabled,
}

impl Refresh {
    pub fn new_card_count(&self) -> i64 {
        match self {
            Refresh::Dealt { new_cards } => *new_cards as i64,
            _ => 0,
        }
    }
}

/// One page of cards plus whether another follows.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub cards: Vec<Card>,
    pub has_next_page: bool,
}

impl Page {
    /// Build from a query that fetched one row past the page.
    pub fn from_lookahead(mut cards: Vec<Card>, size: i64) -> Self {
        let has_next_page = cards.len() as i64 > size;
        cards.truncate(size.max(0) as usize);
        Self { cards, has_next_page }
    }
}

/// Per-user feed queue: refreshes on page 0, serves pages below the top marker.
pub struct FeedEngine {
    rng: Mutex<StdRng>,
}

impl Default for FeedEngine {
    fn default() -> Self {
        Self::new(StdRng::from_os_rng())
    }
}

impl FeedEngine {
    pub fn new(rng: StdRng) -> Self {
        Self { rng: Mutex::new(rng) }
    }

    /// Replenish the feed for a page-0 read. `user` must be freshly loaded.
    pub fn refresh(&self, s: &Store, user: &User, now: DateTime<Utc>) -> Result<Refresh> {
        if s.count_feed(user.id)? == 0 && user.feed_last_updated_at.is_none() {
            let seeded = s.build_initial_feed(user.id, now)?;
            let mut intro_cards = 0;
            if !user.seen_intro_cards {
                let intro = s.intro_card_ids()?;
                intro_cards = s.add_cards_to_top(user.id, &intro, now)?.len();
                s.set_seen_intro_cards(user.id)?;
            }
            s.set_feed_last_updated(user.id, now)?;
            debug!(
                "seeded feed for {} with {} ranked and {} intro cards",
                user.id, seeded, intro_cards
            );
            return Ok(Refresh::Initial { intro_cards });
        }

        if user.disable_feed {
            return Ok(Refresh::Disabled);
        }

        // reads feed_last_updated_at, so it has to run before the stamp below
        let candidates = s.rankable_cards(user.id, now)?;
        let pool = candidates.len();
        let (hand, rest) = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|e| anyhow::anyhow!("feed rng lock poisoned: {}", e))?;
            choose_hand(candidates, &mut *rng)
        };

        s.replace_card_ranks(user.id, &rest)?;
        let dealt = s.add_cards_to_top(user.id, &hand, now)?;
        if !dealt.is_empty() {
            s.increment_views(&dealt)?;
        }
        let new_cards = dealt.len();
        s.set_feed_last_updated(user.id, now)?;
        s.reset_feed_top(user.id)?;
        debug!("dealt {} of {} candidates to {}", new_cards, pool, user.id);
        Ok(Refresh::Dealt { new_cards })
    }

    /// Cards at or below the top marker.
    pub fn page(&self, s: &Store, user_id: Uuid, page: i64, search: Option<&str>) -> Result<Page> {
        let search = search.filter(|q| !q.trim().is_empty());
        let cards = s.feed_page(user_id, PAGE_SIZE + 1, page * PAGE_SIZE, search)?;
        Ok(Page::from_lookahead(cards, PAGE_SIZE))
    }

    /// Re-rank recent cards into the user's popular list.
    pub fn rebuild_popular(&self, s: &Store, user_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = s.popular_ranks_since(now - Duration::days(POPULAR_WINDOW_DAYS))?;
        entries.sort_by(|a, b| b.rank().total_cmp(&a.rank()));
        let ids: Vec<Uuid> = entries.iter().map(|e| e.card_id).collect();
        s.set_popular_feed(user_id, &ids)?;
        Ok(ids.len())
    }

    pub fn popular_page(&self, s: &Store, user_id: Uuid, page: i64) -> Result<Page> {
        let cards = s.popular_feed_page(user_id, PAGE_SIZE + 1, page * PAGE_SIZE)?;
        Ok(Page::from_lookahead(cards, PAGE_SIZE))
    }

    /// Opening a card's thread marks it visited without moving the top.
    pub fn visit(&self, s: &Store, user_id: Uuid, card_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        s.set_card_visited(user_id, card_id, now)
    }
}

#[cfg(test)]
mod tests {
    use deck_db::Database;
    use deck_db::migrations::GENERAL_CHANNEL_ID;
    use deck_types::models::PopularRankEntry;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + secs, 0).unwrap()
    }

    fn user(db: &Database, name: &str) -> User {
        let u = User::new(Uuid::new_v4(), name, &format!("{}@x", name), at(0));
        db.with_conn_mut(|s| s.insert_user(&u)).unwrap();
        u
    }

    fn ranked_post(db: &Database, owner: &User, secs: i64) -> Card {
        let mut card = Card::new(Uuid::new_v4(), owner.id, at(secs));
        card.content = format!("post {}", secs);
        card.channel_id = Some(GENERAL_CHANNEL_ID);
        db.with_conn_mut(|s| {
            s.save_card(&card)?;
            s.insert_popular_rank(&PopularRankEntry::new(card.id, card.created_at))
        })
        .unwrap();
        card
    }

    fn reload(db: &Database, id: Uuid) -> User {
        db.with_conn(|s| s.get_user(id)).unwrap().unwrap()
    }

    fn engine() -> FeedEngine {
        FeedEngine::new(StdRng::seed_from_u64(11))
    }

    #[test]
    fn test_first_read_seeds_feed() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");
        let reader = user(&db, "reader");
        db.with_conn_mut(|s| s.join_channel(reader.id, GENERAL_CHANNEL_ID, at(0)).map(|_| ()))
            .unwrap();
        let mut intro = ranked_post(&db, &author, 1);
        intro.is_intro_card = true;
        db.with_conn_mut(|s| s.save_card(&intro)).unwrap();
        ranked_post(&db, &author, 2);

        let feed = engine();
        let refresh = db.with_conn_mut(|s| feed.refresh(s, &reader, at(10))).unwrap();
        assert_eq!(refresh, Refresh::Initial { intro_cards: 1 });

        let reader = reload(&db, reader.id);
        assert!(reader.seen_intro_cards);
        assert_eq!(reader.feed_last_updated_at, Some(at(10)));
        let page = db.with_conn(|s| feed.page(s, reader.id, 0, None)).unwrap();
        assert_eq!(page.cards.len(), 2);
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_empty_feed_is_not_rebuilt() {
        let db = Database::open_in_memory().unwrap();
        let reader = user(&db, "reader");
        let feed = engine();
        db.with_conn_mut(|s| feed.refresh(s, &reader, at(10))).unwrap();
        let reader = reload(&db, reader.id);
        let refresh = db.with_conn_mut(|s| feed.refresh(s, &reader, at(20))).unwrap();
        assert_eq!(refresh, Refresh::Dealt { new_cards: 0 });
    }

    #[test]
    fn test_second_read_deals_followed_cards() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");
        let reader = user(&db, "reader");
        db.with_conn_mut(|s| s.follow(reader.id, author.id, at(0)).map(|_| ()))
            .unwrap();
        let feed = engine();
        db.with_conn_mut(|s| feed.refresh(s, &reader, at(5))).unwrap();

        let mut liked = ranked_post(&db, &author, 6);
        liked.channel_id = None;
        db.with_conn_mut(|s| {
            s.save_card(&liked)?;
            s.update_rank_counters(liked.id, deck_types::models::RankDelta::upvotes(40), at(7))
                .map(|_| ())
        })
        .unwrap();

        let reader = reload(&db, reader.id);
        let refresh = db.with_conn_mut(|s| feed.refresh(s, &reader, at(10))).unwrap();
        assert_eq!(refresh.new_card_count(), 1);

        let page = db.with_conn(|s| feed.page(s, reader.id, 0, None)).unwrap();
        assert_eq!(page.cards[0].id, liked.id);
        let rank = db.with_conn(|s| s.get_popular_rank(liked.id)).unwrap().unwrap();
        assert_eq!(rank.views, 1);
        assert!(db.with_conn(|s| s.get_feed_entry(reader.id, liked.id)).unwrap().unwrap().current_top);
    }

    #[test]
    fn test_blocked_author_is_not_dealt() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");
        let reader = user(&db, "reader");
        db.with_conn_mut(|s| s.follow(reader.id, author.id, at(0)).map(|_| ()))
            .unwrap();
        let feed = engine();
        db.with_conn_mut(|s| feed.refresh(s, &reader, at(5))).unwrap();

        let mut blocked = ranked_post(&db, &author, 6);
        blocked.channel_id = None;
        db.with_conn_mut(|s| {
            s.save_card(&blocked)?;
            s.block_user(reader.id, author.id)
        })
        .unwrap();

        let reader = reload(&db, reader.id);
        let refresh = db.with_conn_mut(|s| feed.refresh(s, &reader, at(10))).unwrap();
        assert_eq!(refresh, Refresh::Dealt { new_cards: 0 });
        let rank = db.with_conn(|s| s.get_popular_rank(blocked.id)).unwrap().unwrap();
        assert_eq!(rank.views, 0);
        assert!(db.with_conn(|s| s.get_feed_entry(reader.id, blocked.id)).unwrap().is_none());
    }

    #[test]
    fn test_disabled_feed_skips_dealing() {
        let db = Database::open_in_memory().unwrap();
        let mut reader = user(&db, "reader");
        reader.feed_last_updated_at = Some(at(1));
        reader.disable_feed = true;
        let refresh = db.with_conn_mut(|s| engine().refresh(s, &reader, at(10))).unwrap();
        assert_eq!(refresh, Refresh::Disabled);
    }

    #[test]
    fn test_lookahead_page() {
        let cards: Vec<Card> = (0..3).map(|i| Card::new(Uuid::new_v4(), Uuid::nil(), at(i))).collect();
        let page = Page::from_lookahead(cards.clone(), 2);
        assert_eq!(page.cards.len(), 2);
        assert!(page.has_next_page);
        let page = Page::from_lookahead(cards, 3);
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_popular_list_is_ranked() {
        let db = Database::open_in_memory().unwrap();
        let author = user(&db, "author");
        let reader = user(&db, "reader");
        let older = ranked_post(&db, &author, 0);
        let newer = ranked_post(&db, &author, 50_000);
        let feed = engine();
        let n = db
            .with_conn_mut(|s| feed.rebuild_popular(s, reader.id, at(60_000)))
            .unwrap();
        assert_eq!(n, 2);
        let page = db.with_conn(|s| feed.popular_page(s, reader.id, 0)).unwrap();
        let ids: Vec<Uuid> = page.cards.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
