//! Row mapping between SQLite and the domain models, plus the row types
//! that only exist for notification export.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use deck_types::models::{
    AnonymousAlias, Card, Channel, CoinTransactionType, Invite, Mention, Notification,
    NotificationType, PopularRankEntry, ReactionType, User, UserReaction,
};

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_enum(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown enum value: {}", value).into(),
    )
}

pub const USER_COLUMNS: &str = "id, username, email, display_name, first_name, last_name, \
    password_hash, bio, profile_image_path, cover_image_path, is_admin, is_default, \
    signups_frozen_exempt, seen_intro_cards, disable_feed, allow_email, verified_at, \
    shadowbanned_at, blocked_at, joined_from_invite, coin_balance, temporary_coin_balance, \
    devices, feed_last_updated_at, created_at, updated_at";

pub fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        password_hash: row.get(6)?,
        bio: row.get(7)?,
        profile_image_path: row.get(8)?,
        cover_image_path: row.get(9)?,
        is_admin: row.get(10)?,
        is_default: row.get(11)?,
        signups_frozen_exempt: row.get(12)?,
        seen_intro_cards: row.get(13)?,
        disable_feed: row.get(14)?,
        allow_email: row.get(15)?,
        verified_at: row.get(16)?,
        shadowbanned_at: row.get(17)?,
        blocked_at: row.get(18)?,
        joined_from_invite: row.get(19)?,
        coin_balance: row.get(20)?,
        temporary_coin_balance: row.get(21)?,
        devices: json_col(row, 22)?,
        feed_last_updated_at: row.get(23)?,
        created_at: row.get(24)?,
        updated_at: row.get(25)?,
    })
}

pub const CARD_COLUMNS: &str = "cards.id, cards.owner_id, cards.alias_id, cards.channel_id, \
    cards.thread_root_id, cards.thread_reply_id, cards.content, cards.url, \
    cards.background_color, cards.background_image_path, cards.author_to_alias, \
    cards.is_intro_card, cards.coins_earned, cards.shadowbanned_at, cards.created_at, \
    cards.updated_at";

pub fn card_from_row(row: &Row) -> rusqlite::Result<Card> {
    Ok(Card {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        alias_id: row.get(2)?,
        channel_id: row.get(3)?,
        thread_root_id: row.get(4)?,
        thread_reply_id: row.get(5)?,
        content: row.get(6)?,
        url: row.get(7)?,
        background_color: row.get(8)?,
        background_image_path: row.get(9)?,
        author_to_alias: json_col(row, 10)?,
        is_intro_card: row.get(11)?,
        coins_earned: row.get(12)?,
        shadowbanned_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

pub const ALIAS_COLUMNS: &str = "id, username, display_name, profile_image_path, inactive";

pub fn alias_from_row(row: &Row) -> rusqlite::Result<AnonymousAlias> {
    Ok(AnonymousAlias {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        profile_image_path: row.get(3)?,
        inactive: row.get(4)?,
    })
}

pub const CHANNEL_COLUMNS: &str =
    "channels.id, channels.owner_id, channels.handle, channels.name, channels.description, \
     channels.is_private, channels.is_default, channels.created_at";

pub fn channel_from_row(row: &Row) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        handle: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        is_private: row.get(5)?,
        is_default: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub const INVITE_COLUMNS: &str =
    "id, token, node_id, channel_id, group_id, remaining_uses, system, created_at";

pub fn invite_from_row(row: &Row) -> rusqlite::Result<Invite> {
    Ok(Invite {
        id: row.get(0)?,
        token: row.get(1)?,
        node_id: row.get(2)?,
        channel_id: row.get(3)?,
        group_id: row.get(4)?,
        remaining_uses: row.get(5)?,
        system: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub const RANK_COLUMNS: &str = "popular_ranks.card_id, popular_ranks.views, \
    popular_ranks.upvote_count, popular_ranks.downvote_count, popular_ranks.comment_count, \
    popular_ranks.unique_commenters_count, popular_ranks.score_mod, \
    popular_ranks.created_at_timestamp, popular_ranks.updated_at";

pub fn rank_from_row(row: &Row) -> rusqlite::Result<PopularRankEntry> {
    Ok(PopularRankEntry {
        card_id: row.get(0)?,
        views: row.get(1)?,
        upvotes: row.get(2)?,
        downvotes: row.get(3)?,
        comments: row.get(4)?,
        unique_commenters: row.get(5)?,
        score_mod: row.get(6)?,
        created_at_timestamp: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub const REACTION_COLUMNS: &str = "user_id, card_id, type, alias_id, created_at, updated_at";

pub fn reaction_from_row(row: &Row) -> rusqlite::Result<UserReaction> {
    let kind: String = row.get(2)?;
    Ok(UserReaction {
        user_id: row.get(0)?,
        card_id: row.get(1)?,
        kind: ReactionType::parse(&kind).ok_or_else(|| bad_enum(2, &kind))?,
        alias_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub const NOTIFICATION_COLUMNS: &str =
    "id, user_id, target_id, type, payload, created_at, updated_at, seen_at, opened_at";

pub fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    let payload: Option<String> = row.get(4)?;
    let payload = match payload {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        target_id: row.get(2)?,
        kind: NotificationType::parse(&kind).ok_or_else(|| bad_enum(3, &kind))?,
        payload,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        seen_at: row.get(7)?,
        opened_at: row.get(8)?,
    })
}

pub const MENTION_COLUMNS: &str =
    "id, in_card, mentioner_id, mentioner_alias_id, mentioned_user_id, created_at";

pub fn mention_from_row(row: &Row) -> rusqlite::Result<Mention> {
    Ok(Mention {
        id: row.get(0)?,
        in_card: row.get(1)?,
        mentioner_id: row.get(2)?,
        mentioner_alias_id: row.get(3)?,
        mentioned_user_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn coin_type_from_str(idx: usize, value: &str) -> rusqlite::Result<CoinTransactionType> {
    use CoinTransactionType::*;
    const ALL: [CoinTransactionType; 16] = [
        InitialBalance,
        UsedInvite,
        InviteAccepted,
        LikeReceived,
        ReplyReceived,
        FirstPostActivity,
        PopularPost,
        TipGiven,
        LeaderboardFirst,
        LeaderboardSecond,
        LeaderboardThird,
        LeaderboardTopTen,
        LeaderboardRanked,
        BoughtThreadAlias,
        BoughtPostAlias,
        BoughtChannel,
    ];
    ALL.into_iter()
        .find(|t| t.as_str() == value)
        .ok_or_else(|| bad_enum(idx, value))
}

/// Someone who contributed an event row to a notification, already
/// resolved to the identity the recipient is allowed to see.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorRow {
    pub user_id: Uuid,
    pub alias_id: Option<Uuid>,
    pub username: String,
    pub display_name: String,
    pub profile_image_path: String,
    pub created_at: DateTime<Utc>,
}

impl ActorRow {
    pub fn is_anonymous(&self) -> bool {
        self.alias_id.is_some()
    }

    /// Name shown in notification text.
    pub fn name(&self) -> &str {
        if self.is_anonymous() || self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

/// Everything needed to render a Like notification.
#[derive(Debug, Clone)]
pub struct LikeExportRow {
    pub card: Card,
    pub actors: Vec<ActorRow>,
}

/// Everything needed to render a Reply notification.
#[derive(Debug, Clone)]
pub struct CommentExportRow {
    pub root: Card,
    pub root_author: ActorRow,
    /// Newest comment first.
    pub comments: Vec<(Card, ActorRow)>,
}

#[derive(Debug, Clone)]
pub struct MentionExportRow {
    pub mention: Mention,
    pub card: Card,
    pub mentioner: ActorRow,
}

/// Engagement counters shown on a card.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CardCounts {
    pub likes: i64,
    pub dislikes: i64,
    pub comments: i64,
    pub unique_commenters: i64,
    pub coins_earned: i64,
}
