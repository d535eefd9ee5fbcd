//! Notification aggregation and export.
//!
//! Event-bearing types (like, reply, follow, mention) keep one open
//! notification per (recipient, target, type) and attach event rows to it.
//! The remaining types are single-shot and carry their data in `payload`.
//! Everything here runs against a `Store` inside the caller's transaction;
//! delivery happens after commit in the service.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use deck_db::Store;
use deck_db::models::ActorRow;
use deck_db::queries::EventRow;
use deck_types::api::{ExportedNotification, NotificationAction};
use deck_types::models::{Card, Notification, NotificationType};

use crate::coins::CoinConfig;
use crate::collaborators::IdGen;
use crate::content::content_tail;

pub const PAGE_SIZE: i64 = 20;

/// Characters of card content quoted in a message.
const TAIL_LENGTH: usize = 80;

/// Image shown next to notifications that have no human actor.
const SYSTEM_IMAGE: &str = "";

/// Outcome of attaching an event to a recipient's notification.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub notification: Notification,
    /// First event of the tuple: the device push is only sent for these.
    pub created: bool,
}

#[derive(Clone)]
pub struct NotificationAggregator {
    ids: Arc<dyn IdGen>,
    coins: CoinConfig,
}

impl NotificationAggregator {
    pub fn new(ids: Arc<dyn IdGen>, coins: CoinConfig) -> Self {
        Self { ids, coins }
    }

    /// Attach `row` to the recipient's notification for `(target, kind)`,
    /// creating it on the first event and reopening it if it was opened.
    pub fn record(
        &self,
        s: &Store,
        user_id: Uuid,
        target_id: Option<Uuid>,
        kind: NotificationType,
        row: EventRow,
        now: DateTime<Utc>,
    ) -> Result<Recorded> {
        let (mut notification, created) = match s.latest_for_type(user_id, target_id, kind, false)? {
            Some(n) => (n, false),
            None => (Notification::new(self.ids.new_id(), user_id, target_id, kind, now), true),
        };
        notification.updated_at = now;
        notification.opened_at = None;
        notification.seen_at = None;
        s.save_notification(&notification)?;
        s.add_event_row(notification.id, &row, now)?;
        Ok(Recorded { notification, created })
    }

    /// Create a notification of a type without event rows.
    pub fn record_single(
        &self,
        s: &Store,
        user_id: Uuid,
        target_id: Option<Uuid>,
        kind: NotificationType,
        payload: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Recorded> {
        let mut notification = Notification::new(self.ids.new_id(), user_id, target_id, kind, now);
        notification.payload = payload;
        s.save_notification(&notification)?;
        Ok(Recorded { notification, created: true })
    }

    /// Remove `row` from the recipient's notification and reap it when empty.
    /// Returns the notification if it still has rows.
    pub fn retract(
        &self,
        s: &Store,
        user_id: Uuid,
        target_id: Option<Uuid>,
        kind: NotificationType,
        row: EventRow,
    ) -> Result<Option<Notification>> {
        let Some(n) = s.latest_for_type(user_id, target_id, kind, false)? else {
            return Ok(None);
        };
        s.delete_event_row(n.id, &row)?;
        s.clear_empty_notifications(Some(user_id))?;
        s.get_notification(n.id)
    }

    /// Point the user's welcome notification at the inviter, creating it if
    /// the user never had one.
    pub fn retarget_introduction(
        &self,
        s: &Store,
        user_id: Uuid,
        inviter_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Recorded> {
        match s.latest_for_type(user_id, None, NotificationType::Introduction, false)? {
            Some(mut n) => {
                n.target_id = Some(inviter_id);
                n.updated_at = now;
                n.opened_at = None;
                n.seen_at = None;
                s.save_notification(&n)?;
                Ok(Recorded { notification: n, created: false })
            }
            None => self.record_single(
                s,
                user_id,
                Some(inviter_id),
                NotificationType::Introduction,
                None,
                now,
            ),
        }
    }

    /// One page of the user's notifications, newest activity first. Empty
    /// notifications that have not been reaped yet are skipped.
    pub fn page(&self, s: &Store, user_id: Uuid, page: i64) -> Result<(Vec<ExportedNotification>, bool)> {
        let mut rows = s.notifications_page(user_id, PAGE_SIZE + 1, page * PAGE_SIZE)?;
        let has_next_page = rows.len() as i64 > PAGE_SIZE;
        rows.truncate(PAGE_SIZE as usize);
        let mut exported = Vec::with_capacity(rows.len());
        for n in &rows {
            if let Some(e) = self.export(s, n)? {
                exported.push(e);
            }
        }
        Ok((exported, has_next_page))
    }

    /// Render a notification for the client. `None` when it has nothing left to show.
    pub fn export(&self, s: &Store, n: &Notification) -> Result<Option<ExportedNotification>> {
        let rendered = match n.kind {
            NotificationType::Like => self.export_like(s, n)?,
            NotificationType::Reply => self.export_reply(s, n)?,
            NotificationType::Follow => self.export_follow(s, n)?,
            NotificationType::Mention => self.export_mention(s, n)?,
            NotificationType::InviteAccepted => self.export_invite_accepted(s, n)?,
            NotificationType::Introduction => self.export_introduction(s, n)?,
            NotificationType::Leaderboard => self.export_leaderboard(n),
            NotificationType::PopularPost => self.export_popular_post(s, n)?,
            NotificationType::CoinsReceived => self.export_coins_received(n),
        };
        Ok(rendered.map(|r| r.finish(n)))
    }

    fn export_like(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let Some(data) = s.like_export(n)? else {
            return Ok(None);
        };
        let Some(latest) = data.actors.first() else {
            return Ok(None);
        };
        let card = &data.card;
        let noun = if card.is_reply() { "comment" } else { "post" };
        let message = format!("{} liked your {}{}", format_names(&data.actors), noun, quote_tail(&card.content));

        let mut action_data = thread_data(card.root_id());
        if card.is_reply() {
            let username = match card.alias_id {
                Some(alias_id) => s.get_alias(alias_id)?.map(|a| a.username),
                None => s.get_user(card.owner_id)?.map(|u| u.username),
            };
            comment_data(&mut action_data, card, &username.unwrap_or_default());
        }
        Ok(Some(Rendered {
            image_path: latest.profile_image_path.clone(),
            message,
            timestamp: latest.created_at,
            action: NotificationAction::OpenThread,
            action_data,
        }))
    }

    fn export_reply(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let Some(data) = s.comment_export(n)? else {
            return Ok(None);
        };
        let Some((latest_card, latest)) = data.comments.first() else {
            return Ok(None);
        };
        let actors: Vec<ActorRow> = data.comments.iter().map(|(_, a)| a.clone()).collect();

        let root = &data.root;
        let (also, owner) = if root.owner_id == n.user_id {
            ("", "your".to_string())
        } else if root.owner_id == latest.user_id && !latest.is_anonymous() && !root.is_anonymous() {
            ("", "their".to_string())
        } else {
            (" also", format!("{}'s", format_name(&data.root_author)))
        };
        let message = format!(
            "{}{} commented on {} post{}",
            format_names(&actors),
            also,
            owner,
            quote_tail(&latest_card.content)
        );

        let mut action_data = thread_data(root.id);
        comment_data(&mut action_data, latest_card, &latest.username);
        Ok(Some(Rendered {
            image_path: latest.profile_image_path.clone(),
            message,
            timestamp: latest.created_at,
            action: NotificationAction::OpenThread,
            action_data,
        }))
    }

    fn export_follow(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let followers = s.follow_export(n)?;
        let Some(latest) = followers.first() else {
            return Ok(None);
        };
        let mut action_data = Map::new();
        action_data.insert("userID".into(), json!(latest.user_id));
        Ok(Some(Rendered {
            image_path: latest.profile_image_path.clone(),
            message: format!("{} followed you.", format_names(&followers)),
            timestamp: latest.created_at,
            action: NotificationAction::OpenUserProfile,
            action_data,
        }))
    }

    fn export_mention(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let Some(data) = s.mention_export(n)? else {
            return Ok(None);
        };
        let card = &data.card;
        let message = if card.is_reply() {
            format!("{} mentioned you in a comment.", format_name(&data.mentioner))
        } else {
            format!("{} tagged you in a post.", format_name(&data.mentioner))
        };
        let mut action_data = thread_data(card.root_id());
        if card.is_reply() {
            comment_data(&mut action_data, card, &data.mentioner.username);
        }
        Ok(Some(Rendered {
            image_path: data.mentioner.profile_image_path.clone(),
            message,
            timestamp: data.mention.created_at,
            action: NotificationAction::OpenThread,
            action_data,
        }))
    }

    fn export_invite_accepted(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let Some(invitee) = n.target_id.map(|id| s.get_user(id)).transpose()?.flatten() else {
            return Ok(None);
        };
        let name = if invitee.display_name.is_empty() { &invitee.username } else { &invitee.display_name };
        let mut action_data = Map::new();
        action_data.insert("userID".into(), json!(invitee.id));
        Ok(Some(Rendered {
            image_path: invitee.profile_image_path.clone(),
            message: format!("{} accepted your invitation.", emphasize(name)),
            timestamp: n.updated_at,
            action: NotificationAction::OpenUserProfile,
            action_data,
        }))
    }

    fn export_introduction(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let inviter = n.target_id.map(|id| s.get_user(id)).transpose()?.flatten();
        let rendered = match inviter {
            Some(inviter) => {
                let name = if inviter.display_name.is_empty() { &inviter.username } else { &inviter.display_name };
                let mut action_data = Map::new();
                action_data.insert("userID".into(), json!(inviter.id));
                Rendered {
                    image_path: inviter.profile_image_path.clone(),
                    message: format!("You were invited by {}!", emphasize(name)),
                    timestamp: n.updated_at,
                    action: NotificationAction::OpenUserProfile,
                    action_data,
                }
            }
            None => Rendered::system("You joined!".to_string(), n.updated_at),
        };
        Ok(Some(rendered))
    }

    fn export_leaderboard(&self, n: &Notification) -> Option<Rendered> {
        let rank = payload_i64(n, "rank")?;
        let message = match rank {
            1 => format!(
                "You were the #1 top contributor yesterday! You earned {}. Can you defend your position?",
                coin_text(self.coins.leaderboard_first, self.coins.units_per_coin)
            ),
            2 => format!(
                "Game on! You made it to the runner-up slot on the leaderboard. You earned {}. Can you make it to the top spot today?",
                coin_text(self.coins.leaderboard_second, self.coins.units_per_coin)
            ),
            3 => format!(
                "Woo! You made third place on the leaderboard yesterday. You earned {}. Can you make it to the top spot today?",
                coin_text(self.coins.leaderboard_third, self.coins.units_per_coin)
            ),
            4..=10 => format!(
                "You were the {} top contributor yesterday! You earned {}. Can you hit the Top 3 today?",
                ordinal(rank),
                coin_text(self.coins.leaderboard_top_ten, self.coins.units_per_coin)
            ),
            _ => format!(
                "You made the leaderboard today! You earned {}. Think you can make the top 10 today?",
                coin_text(self.coins.leaderboard_ranked, self.coins.units_per_coin)
            ),
        };
        Some(Rendered::system(message, n.created_at))
    }

    fn export_popular_post(&self, s: &Store, n: &Notification) -> Result<Option<Rendered>> {
        let Some(card) = n.target_id.map(|id| s.get_card(id)).transpose()?.flatten() else {
            return Ok(None);
        };
        let amount = payload_i64(n, "amount").unwrap_or(self.coins.popular_post);
        let coins = amount / self.coins.units_per_coin.max(1);
        let mut action_data = thread_data(card.root_id());
        if card.is_reply() {
            let username = match card.alias_id {
                Some(alias_id) => s.get_alias(alias_id)?.map(|a| a.username),
                None => s.get_user(card.owner_id)?.map(|u| u.username),
            };
            comment_data(&mut action_data, &card, &username.unwrap_or_default());
        }
        Ok(Some(Rendered {
            image_path: SYSTEM_IMAGE.to_string(),
            message: format!("Your recent posts got a lot of attention, here's an extra {} coins.", coins),
            timestamp: n.created_at,
            action: NotificationAction::OpenThread,
            action_data,
        }))
    }

    fn export_coins_received(&self, n: &Notification) -> Option<Rendered> {
        let amount = payload_i64(n, "amount")?;
        let kickoff = n
            .payload
            .as_ref()
            .and_then(|p| p.get("kickoff"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let coins = coin_text(amount, self.coins.units_per_coin);
        let message = if kickoff {
            format!("You got {} from your past posts and reactions!", coins)
        } else {
            format!("You got {} from your activity yesterday!", coins)
        };
        Some(Rendered::system(message, n.created_at))
    }
}

/// Export fields that depend on the notification type.
struct Rendered {
    image_path: String,
    message: String,
    timestamp: DateTime<Utc>,
    action: NotificationAction,
    action_data: Map<String, Value>,
}

impl Rendered {
    fn system(message: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            image_path: SYSTEM_IMAGE.to_string(),
            message,
            timestamp,
            action: NotificationAction::None,
            action_data: Map::new(),
        }
    }

    fn finish(self, n: &Notification) -> ExportedNotification {
        ExportedNotification {
            id: n.id,
            user_id: n.user_id,
            image_path: self.image_path,
            message: self.message,
            timestamp: self.timestamp,
            kind: n.kind,
            action: self.action,
            action_data: self.action_data,
            seen: n.seen_at.is_some(),
            opened: n.opened_at.is_some(),
        }
    }
}

fn thread_data(root_id: Uuid) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("threadRootID".into(), json!(root_id));
    data
}

fn comment_data(data: &mut Map<String, Value>, card: &Card, username: &str) {
    data.insert("commentCardID".into(), json!(card.id));
    data.insert("commentCardUsername".into(), json!(username));
    if let Some(parent) = card.thread_reply_id {
        if Some(parent) != card.thread_root_id {
            data.insert("parentCommentID".into(), json!(parent));
        }
    }
}

fn payload_i64(n: &Notification, key: &str) -> Option<i64> {
    n.payload.as_ref()?.get(key)?.as_i64()
}

fn emphasize(name: &str) -> String {
    format!("**{}**", name)
}

/// Bold name, prefixed with `!` for an alias.
pub fn format_name(actor: &ActorRow) -> String {
    if actor.is_anonymous() {
        emphasize(&format!("!{}", actor.name()))
    } else {
        emphasize(actor.name())
    }
}

/// `A`, `A and B`, `A, B, and 1 other`, `A, B, and N others`. Actors
/// appearing more than once (several comments by one person) count once.
pub fn format_names(actors: &[ActorRow]) -> String {
    let mut seen = HashSet::new();
    let distinct: Vec<&ActorRow> = actors
        .iter()
        .filter(|a| seen.insert(a.alias_id.unwrap_or(a.user_id)))
        .collect();
    match distinct.as_slice() {
        [] => String::new(),
        [a] => format_name(a),
        [a, b] => format!("{} and {}", format_name(a), format_name(b)),
        [a, b, rest @ ..] => {
            let others = if rest.len() == 1 { "other" } else { "others" };
            format!("{}, {}, and {} {}", format_name(a), format_name(b), rest.len(), others)
        }
    }
}

/// `: "<tail>"`, or `.` when the content has nothing printable left.
fn quote_tail(content: &str) -> String {
    let tail = content_tail(content, TAIL_LENGTH);
    if tail.trim().is_empty() {
        ".".to_string()
    } else {
        format!(": \"{}\"", tail)
    }
}

/// 1st, 2nd, 3rd, 4th, 11th, 12th, 13th, 21st...
pub fn ordinal(n: i64) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// `a Coin` or `N Coins` for a balance amount.
pub fn coin_text(amount: i64, units_per_coin: i64) -> String {
    let coins = amount / units_per_coin.max(1);
    if coins == 1 {
        "a Coin".to_string()
    } else {
        format!("{} Coins", coins)
    }
}

/// Plain text for device pushes.
pub fn plain_message(message: &str) -> String {
    message.replace("**", "")
}
