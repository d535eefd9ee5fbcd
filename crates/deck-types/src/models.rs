use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub bio: String,
    pub profile_image_path: String,
    pub cover_image_path: String,
    pub is_admin: bool,
    /// New users follow default users at signup.
    pub is_default: bool,
    pub signups_frozen_exempt: bool,
    pub seen_intro_cards: bool,
    pub disable_feed: bool,
    pub allow_email: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub shadowbanned_at: Option<DateTime<Utc>>,
    pub blocked_at: Option<DateTime<Utc>>,
    pub joined_from_invite: Option<Uuid>,
    pub coin_balance: i64,
    pub temporary_coin_balance: i64,
    pub devices: HashMap<String, Device>,
    pub feed_last_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid, username: &str, email: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_lowercase(),
            email: email.to_string(),
            display_name: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            bio: String::new(),
            profile_image_path: String::new(),
            cover_image_path: String::new(),
            is_admin: false,
            is_default: false,
            signups_frozen_exempt: false,
            seen_intro_cards: false,
            disable_feed: false,
            allow_email: true,
            verified_at: None,
            shadowbanned_at: None,
            blocked_at: None,
            joined_from_invite: None,
            coin_balance: 0,
            temporary_coin_balance: 0,
            devices: HashMap::new(),
            feed_last_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balances(&self) -> CoinBalances {
        CoinBalances {
            coin_balance: self.coin_balance,
            temporary_coin_balance: self.temporary_coin_balance,
        }
    }

    pub fn can_afford(&self, amount: i64) -> bool {
        self.coin_balance + self.temporary_coin_balance >= amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub token: String,
    pub platform: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinBalances {
    pub coin_balance: i64,
    pub temporary_coin_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthAccount {
    pub provider: String,
    pub subject: String,
    pub user_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct ResetToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// An authenticated connection. The user snapshot is taken at login and
/// refreshed when the service rewrites the user.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user: User,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.user.is_admin
    }
}

// -- Cards --

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub alias_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub thread_reply_id: Option<Uuid>,
    pub content: String,
    pub url: String,
    pub background_color: String,
    pub background_image_path: String,
    /// Only populated on thread roots.
    pub author_to_alias: HashMap<Uuid, Uuid>,
    pub is_intro_card: bool,
    pub coins_earned: i64,
    pub shadowbanned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(id: Uuid, owner_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            alias_id: None,
            channel_id: None,
            thread_root_id: None,
            thread_reply_id: None,
            content: String::new(),
            url: String::new(),
            background_color: String::new(),
            background_image_path: String::new(),
            author_to_alias: HashMap::new(),
            is_intro_card: false,
            coins_earned: 0,
            shadowbanned_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.thread_root_id.is_some()
    }

    /// Id of the top card of this card's thread.
    pub fn root_id(&self) -> Uuid {
        self.thread_root_id.unwrap_or(self.id)
    }

    /// Place this card in `parent`'s thread, directly under `parent`.
    pub fn reply_to(&mut self, parent: &Card) {
        self.thread_root_id = Some(parent.root_id());
        self.thread_reply_id = Some(parent.id);
        self.channel_id = parent.channel_id;
    }

    pub fn is_anonymous(&self) -> bool {
        self.alias_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousAlias {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub profile_image_path: String,
    #[serde(skip)]
    pub inactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReactionType {
    Like,
    Dislike,
}

impl ReactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "dislike" => Some(Self::Dislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserReaction {
    pub user_id: Uuid,
    pub card_id: Uuid,
    pub kind: ReactionType,
    pub alias_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub id: Uuid,
    pub in_card: Uuid,
    pub mentioner_id: Uuid,
    pub mentioner_alias_id: Option<Uuid>,
    pub mentioned_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserTip {
    pub id: Uuid,
    pub user_id: Uuid,
    pub card_id: Uuid,
    pub amount: i64,
    pub anonymous: bool,
    pub alias_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

// -- Ranking --

#[derive(Debug, Clone, PartialEq)]
pub struct PopularRankEntry {
    pub card_id: Uuid,
    pub views: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comments: i64,
    pub unique_commenters: i64,
    pub score_mod: f64,
    pub created_at_timestamp: i64,
    pub updated_at: DateTime<Utc>,
}

impl PopularRankEntry {
    pub fn new(card_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            card_id,
            views: 0,
            upvotes: 0,
            downvotes: 0,
            comments: 0,
            unique_commenters: 0,
            score_mod: 0.0,
            created_at_timestamp: now.timestamp(),
            updated_at: now,
        }
    }

    /// Retrieval rank: vote score compressed by a power curve, plus a time
    /// term so that newer cards outrank older ones with equal votes.
    pub fn rank(&self) -> f64 {
        let score = self.upvotes as f64 * UPVOTE_WEIGHT + self.comments as f64 * COMMENT_WEIGHT
            - self.downvotes as f64 * DOWNVOTE_WEIGHT;
        power_compress(score, RANK_POWER)
            + (self.created_at_timestamp as f64 - RANK_EPOCH) / RANK_TIME_SCALE
            + self.score_mod
    }
}

const UPVOTE_WEIGHT: f64 = 1.0;
const DOWNVOTE_WEIGHT: f64 = 2.0;
const COMMENT_WEIGHT: f64 = 1.5;
const RANK_POWER: f64 = 0.7;
const RANK_EPOCH: f64 = 1_475_280_000.0;
const RANK_TIME_SCALE: f64 = 45_000.0;

/// Sign-symmetric power curve whose derivative at zero is one.
fn power_compress(v: f64, power: f64) -> f64 {
    if power == 1.0 {
        return v;
    }
    let vp = power.powf(1.0 / (1.0 - power));
    if v < 0.0 {
        -((-v + vp).powf(power) - vp / power)
    } else {
        (v + vp).powf(power) - vp / power
    }
}

/// Signed counter adjustments applied to one popular-rank entry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankDelta {
    pub views: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub comments: i64,
    pub score_mod: f64,
}

impl RankDelta {
    pub fn upvotes(n: i64) -> Self {
        Self { upvotes: n, ..Self::default() }
    }

    pub fn downvotes(n: i64) -> Self {
        Self { downvotes: n, ..Self::default() }
    }

    pub fn comments(n: i64) -> Self {
        Self { comments: n, ..Self::default() }
    }

    pub fn score_mod(strength: f64) -> Self {
        Self { score_mod: strength, ..Self::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub user_id: Uuid,
    pub card_id: Uuid,
    pub position: i64,
    pub current_top: bool,
    pub last_visited_at: Option<DateTime<Utc>>,
}

// -- Channels --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub handle: String,
    pub name: String,
    pub description: String,
    pub is_private: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: Uuid,
    pub member_count: i64,
    pub subscribed: bool,
    pub muted: bool,
}

// -- Invites --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: Uuid,
    pub token: String,
    pub node_id: Uuid,
    pub channel_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub remaining_uses: i64,
    /// Issued by the system rather than a person; no inviter side effects.
    pub system: bool,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_usable(&self) -> bool {
        self.remaining_uses > 0
    }
}

// -- Notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    Like,
    Reply,
    Follow,
    Mention,
    InviteAccepted,
    Introduction,
    Leaderboard,
    PopularPost,
    CoinsReceived,
}

impl NotificationType {
    pub const ALL: [NotificationType; 9] = [
        Self::Like,
        Self::Reply,
        Self::Follow,
        Self::Mention,
        Self::InviteAccepted,
        Self::Introduction,
        Self::Leaderboard,
        Self::PopularPost,
        Self::CoinsReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Reply => "reply",
            Self::Follow => "follow",
            Self::Mention => "mention",
            Self::InviteAccepted => "inviteAccepted",
            Self::Introduction => "introduction",
            Self::Leaderboard => "leaderboard",
            Self::PopularPost => "popularPost",
            Self::CoinsReceived => "coinsReceived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_id: Option<Uuid>,
    pub kind: NotificationType,
    /// Extra data for row-less types (leaderboard rank, coin amount).
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub seen_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        id: Uuid,
        user_id: Uuid,
        target_id: Option<Uuid>,
        kind: NotificationType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            target_id,
            kind,
            payload: None,
            created_at: now,
            updated_at: now,
            seen_at: None,
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionType {
    Boost,
    Comment,
}

impl SubscriptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boost => "boost",
            Self::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boost" => Some(Self::Boost),
            "comment" => Some(Self::Comment),
            _ => None,
        }
    }

    /// The notification type a subscription of this kind produces.
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::Boost => NotificationType::Like,
            Self::Comment => NotificationType::Reply,
        }
    }
}

// -- Coins --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoinTransactionType {
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
}

impl CoinTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialBalance => "initialBalance",
            Self::UsedInvite => "usedInvite",
            Self::InviteAccepted => "inviteAccepted",
            Self::LikeReceived => "likeReceived",
            Self::ReplyReceived => "replyReceived",
            Self::FirstPostActivity => "firstPostActivity",
            Self::PopularPost => "popularPost",
            Self::TipGiven => "tipGiven",
            Self::LeaderboardFirst => "leaderboardFirst",
            Self::LeaderboardSecond => "leaderboardSecond",
            Self::LeaderboardThird => "leaderboardThird",
            Self::LeaderboardTopTen => "leaderboardTopTen",
            Self::LeaderboardRanked => "leaderboardRanked",
            Self::BoughtThreadAlias => "boughtThreadAlias",
            Self::BoughtPostAlias => "boughtPostAlias",
            Self::BoughtChannel => "boughtChannel",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoinTransaction {
    pub id: Uuid,
    pub source_user_id: Option<Uuid>,
    pub recipient_user_id: Option<Uuid>,
    pub card_id: Option<Uuid>,
    pub amount: i64,
    pub kind: CoinTransactionType,
    pub created_at: DateTime<Utc>,
}

// -- Settings --

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub signups_frozen: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_reply_lineage_from_root() {
        let root = Card::new(Uuid::new_v4(), Uuid::new_v4(), at(0));
        let mut reply = Card::new(Uuid::new_v4(), Uuid::new_v4(), at(1));
        reply.reply_to(&root);
        assert_eq!(reply.thread_root_id, Some(root.id));
        assert_eq!(reply.thread_reply_id, Some(root.id));
        assert!(reply.is_reply());
        assert!(!root.is_reply());
    }

    #[test]
    fn test_reply_lineage_from_comment() {
        let mut root = Card::new(Uuid::new_v4(), Uuid::new_v4(), at(0));
        root.channel_id = Some(Uuid::new_v4());
        let mut comment = Card::new(Uuid::new_v4(), Uuid::new_v4(), at(1));
        comment.reply_to(&root);
        let mut nested = Card::new(Uuid::new_v4(), Uuid::new_v4(), at(2));
        nested.reply_to(&comment);
        assert_eq!(nested.thread_root_id, Some(root.id));
        assert_eq!(nested.thread_reply_id, Some(comment.id));
        assert_eq!(nested.channel_id, root.channel_id);
        assert_eq!(nested.root_id(), root.id);
    }

    #[test]
    fn test_notification_type_names() {
        for t in NotificationType::ALL {
            assert_eq!(NotificationType::parse(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_subscription_maps_to_notification() {
        assert_eq!(SubscriptionType::Boost.notification_type(), NotificationType::Like);
        assert_eq!(SubscriptionType::Comment.notification_type(), NotificationType::Reply);
    }

    #[test]
    fn test_rank_is_zero_centred_in_score() {
        let mut entry = PopularRankEntry::new(Uuid::new_v4(), at(1_475_280_000));
        assert!(entry.rank().abs() < 1e-9);
        entry.upvotes = 4;
        let up = entry.rank();
        entry.upvotes = 0;
        entry.downvotes = 2;
        let down = entry.rank();
        assert!(up > 0.0);
        assert!((up + down).abs() < 1e-9);
    }

    #[test]
    fn test_rank_prefers_newer_cards() {
        let old = PopularRankEntry::new(Uuid::new_v4(), at(1_500_000_000));
        let new = PopularRankEntry::new(Uuid::new_v4(), at(1_500_045_000));
        assert!((new.rank() - old.rank() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_can_afford_counts_temporary_balance() {
        let mut user = User::new(Uuid::new_v4(), "Chad", "chad@x", at(0));
        assert_eq!(user.username, "chad");
        user.coin_balance = 3;
        user.temporary_coin_balance = 2;
        assert!(user.can_afford(5));
        assert!(!user.can_afford(6));
    }
}
