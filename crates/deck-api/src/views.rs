//! Projections of stored rows into what a viewer is allowed to see.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use deck_db::Store;
use deck_db::models::CardCounts;
use deck_types::api::{Author, CardView, ChannelView, Engagement, ExportedUser};
use deck_types::models::{AnonymousAlias, Card, Channel, User};

/// A user as `viewer_id` sees them. Balances, email and onboarding state
/// are only included for the user's own record.
pub fn export_user(user: &User, viewer_id: Uuid, is_following: bool) -> ExportedUser {
    let own = user.id == viewer_id;
    ExportedUser {
        id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        bio: user.bio.clone(),
        profile_image_url: user.profile_image_path.clone(),
        cover_image_url: user.cover_image_path.clone(),
        is_verified: user.verified_at.is_some(),
        is_following,
        is_admin: user.is_admin,
        email: own.then(|| user.email.clone()),
        coin_balance: own.then_some(user.coin_balance),
        temporary_coin_balance: own.then_some(user.temporary_coin_balance),
        seen_intro_cards: own.then_some(user.seen_intro_cards),
    }
}

/// Export several users, resolving follow state in one query.
pub fn export_users(s: &Store, users: &[User], viewer_id: Uuid) -> Result<Vec<ExportedUser>> {
    let ids: Vec<Uuid> = users.iter().map(|u| u.id).collect();
    let following = s.following_among(viewer_id, &ids)?;
    Ok(users
        .iter()
        .map(|u| export_user(u, viewer_id, following.contains(&u.id)))
        .collect())
}

pub fn engagement(card_id: Uuid, counts: CardCounts) -> Engagement {
    Engagement {
        card_id,
        likes: counts.likes,
        dislikes: counts.dislikes,
        comments: counts.comments,
        unique_commenters: counts.unique_commenters,
        coins_earned: counts.coins_earned,
    }
}

/// Current counters for one card.
pub fn card_engagement(s: &Store, card_id: Uuid) -> Result<Engagement> {
    let counts = s.card_counts(&[card_id])?.remove(&card_id).unwrap_or_default();
    Ok(engagement(card_id, counts))
}

fn alias_author(alias: &AnonymousAlias) -> Author {
    Author {
        id: alias.id,
        username: alias.username.clone(),
        display_name: alias.display_name.clone(),
        profile_image_url: alias.profile_image_path.clone(),
        is_anonymous: true,
        is_following: false,
    }
}

fn user_author(user: &User, is_following: bool) -> Author {
    Author {
        id: user.id,
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        profile_image_url: user.profile_image_path.clone(),
        is_anonymous: false,
        is_following,
    }
}

/// Card views for `viewer_id`, in input order. Cards whose author can no
/// longer be resolved are dropped.
pub fn card_views(s: &Store, viewer_id: Uuid, cards: &[Card]) -> Result<Vec<CardView>> {
    if cards.is_empty() {
        return Ok(Vec::new());
    }
    let card_ids: Vec<Uuid> = cards.iter().map(|c| c.id).collect();
    let owner_ids: Vec<Uuid> = cards
        .iter()
        .filter(|c| !c.is_anonymous())
        .map(|c| c.owner_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let alias_ids: Vec<Uuid> = cards.iter().filter_map(|c| c.alias_id).collect();

    let users = s.get_users_by_ids(&owner_ids)?;
    let aliases = s.get_aliases_by_ids(&alias_ids)?;
    let following = s.following_among(viewer_id, &owner_ids)?;
    let reactions = s.reactions_among(viewer_id, &card_ids)?;
    let subscribed = s.subscribed_among(viewer_id, &card_ids)?;
    let mut counts = s.card_counts(&card_ids)?;

    let mut views = Vec::with_capacity(cards.len());
    for card in cards {
        let author = match card.alias_id {
            Some(alias_id) => aliases.get(&alias_id).map(alias_author),
            None => users
                .get(&card.owner_id)
                .map(|u| user_author(u, following.contains(&u.id))),
        };
        let Some(author) = author else {
            continue;
        };
        views.push(CardView {
            id: card.id,
            content: card.content.clone(),
            url: card.url.clone(),
            background_color: card.background_color.clone(),
            background_image_url: card.background_image_path.clone(),
            channel_id: card.channel_id,
            thread_root_id: card.thread_root_id,
            thread_reply_id: card.thread_reply_id,
            is_intro_card: card.is_intro_card,
            created_at: card.created_at,
            author,
            viewer_reaction: reactions.get(&card.id).copied(),
            subscribed: subscribed.contains(&card.id),
            engagement: engagement(card.id, counts.remove(&card.id).unwrap_or_default()),
        });
    }
    Ok(views)
}

pub fn card_view(s: &Store, viewer_id: Uuid, card: &Card) -> Result<Option<CardView>> {
    Ok(card_views(s, viewer_id, std::slice::from_ref(card))?.pop())
}

pub fn channel_views(s: &Store, user_id: Uuid, channels: Vec<Channel>) -> Result<Vec<ChannelView>> {
    let ids: Vec<Uuid> = channels.iter().map(|c| c.id).collect();
    let mut infos = s.channel_infos(user_id, &ids)?;
    Ok(channels
        .into_iter()
        .map(|channel| {
            let info = infos.remove(&channel.id);
            ChannelView {
                member_count: info.as_ref().map_or(0, |i| i.member_count),
                subscribed: info.as_ref().is_some_and(|i| i.subscribed),
                muted: info.as_ref().is_some_and(|i| i.muted),
                channel,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use deck_db::Database;
    use deck_types::models::{ReactionType, UserReaction};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_private_fields_only_for_self() {
        let mut u = User::new(Uuid::new_v4(), "chad", "chad@x", at(0));
        u.coin_balance = 7;
        let own = export_user(&u, u.id, false);
        assert_eq!(own.email.as_deref(), Some("chad@x"));
        assert_eq!(own.coin_balance, Some(7));
        let other = export_user(&u, Uuid::new_v4(), true);
        assert!(other.email.is_none());
        assert!(other.coin_balance.is_none());
        assert!(other.is_following);
    }

    #[test]
    fn test_card_views_resolve_authors() {
        let db = Database::open_in_memory().unwrap();
        let owner = User::new(Uuid::new_v4(), "owner", "owner@x", at(0));
        let viewer = User::new(Uuid::new_v4(), "viewer", "viewer@x", at(0));
        let mut public = Card::new(Uuid::new_v4(), owner.id, at(1));
        public.content = "hi".into();
        let mut hidden = Card::new(Uuid::new_v4(), owner.id, at(2));
        hidden.content = "psst".into();

        let views = db
            .with_conn_mut(|s| {
                s.insert_user(&owner)?;
                s.insert_user(&viewer)?;
                let alias = s.unused_alias(&HashSet::new())?.unwrap();
                hidden.alias_id = Some(alias.id);
                s.save_card(&public)?;
                s.save_card(&hidden)?;
                s.follow(viewer.id, owner.id, at(3))?;
                s.save_reaction(&UserReaction {
                    user_id: viewer.id,
                    card_id: public.id,
                    kind: ReactionType::Like,
                    alias_id: None,
                    created_at: at(4),
                    updated_at: at(4),
                })?;
                card_views(s, viewer.id, &[public.clone(), hidden.clone()])
            })
            .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].author.username, "owner");
        assert!(views[0].author.is_following);
        assert_eq!(views[0].viewer_reaction, Some(ReactionType::Like));
        assert_eq!(views[0].engagement.likes, 1);
        assert!(views[1].author.is_anonymous);
        assert_ne!(views[1].author.id, owner.id);
        assert!(!views[1].author.is_following);
    }
}
