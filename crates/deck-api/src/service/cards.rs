use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use deck_db::Store;
use deck_db::queries::EventRow;
use deck_types::api::{
    ActionCosts, AnonymousHandleResponse, CanAffordResponse, CardParams, CardView, CardsResponse,
    Engagement, GetCardsParams, GetPostsForUserParams, GetThreadParams, ModifyCardScoreParams,
    PageParams, PostCardParams, PostCardResponse, ReplyTargetParams, ReportCardParams,
    SubmitFeedbackParams, ThreadResponse, UploadImageParams, UploadImageResponse,
};
use deck_types::error::{ApiError, ApiResult};
use deck_types::events::PushEvent;
use deck_types::models::{
    Card, Channel, CoinBalances, CoinTransactionType, Mention, NotificationType,
    PopularRankEntry, RankDelta, Session, SubscriptionType, User,
};

use super::{ActionService, required};
use crate::coins::Transfer;
use crate::content::{image_urls, mentioned_names, replace_urls};
use crate::feed::{FeedEngine, PAGE_SIZE, Page};
use crate::notifications::Recorded;
use crate::views::{card_engagement, card_view, card_views};

/// Shadowbanned cards exist only for their owner.
fn visible(card: &Card, viewer: Uuid) -> bool {
    card.shadowbanned_at.is_none() || card.owner_id == viewer
}

pub(super) fn visible_card(s: &Store, id: Uuid, viewer: Uuid) -> anyhow::Result<Card> {
    match s.get_card(id)? {
        Some(card) if visible(&card, viewer) => Ok(card),
        _ => Err(ApiError::not_found("card").into()),
    }
}

/// The thread root of `card`, which may be the card itself.
pub(super) fn thread_root(s: &Store, card: &Card) -> anyhow::Result<Card> {
    match card.thread_root_id {
        Some(root_id) => required(s.get_card(root_id)?, "thread"),
        None => Ok(card.clone()),
    }
}

/// Slice one page out of an in-memory list.
fn paginate<T>(items: Vec<T>, page: i64) -> (Vec<T>, bool) {
    let start = (page * PAGE_SIZE).max(0) as usize;
    let end = start + PAGE_SIZE as usize;
    let has_next_page = items.len() > end;
    let items = items.into_iter().skip(start).take(PAGE_SIZE as usize).collect();
    (items, has_next_page)
}

/// Reply order within a thread: net approval first, then age.
fn reply_score(e: &Engagement) -> i64 {
    e.likes * 2 + e.comments * 3 - e.dislikes * 4
}

/// Images uploaded for a card before its transaction opens.
struct Uploads {
    content: String,
    background_image_path: String,
}

/// Committed result of a post.
struct Posted {
    card: Card,
    view: CardView,
    channel: Option<Channel>,
    new_balances: Option<CoinBalances>,
    recorded: Vec<Recorded>,
    rewarded: Option<Uuid>,
    participants: Vec<Uuid>,
    root_engagement: Option<Engagement>,
}

impl ActionService {
    // -- Reads --

    pub async fn get_cards(
        &self,
        session: &Session,
        params: GetCardsParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CardsResponse> {
        let user_id = session.user_id;
        let feed = self.feed.clone();
        let search = params.search.clone();
        let page = params.page;

        if page > 0 {
            return self
                .read(cancel, move |s| {
                    let Page { cards, has_next_page } = feed.page(s, user_id, page, search.as_deref())?;
                    Ok(CardsResponse {
                        cards: card_views(s, user_id, &cards)?,
                        has_next_page,
                        new_card_count: None,
                    })
                })
                .await;
        }

        let now = self.now();
        let response = self
            .write(cancel, move |s| {
                let user = required(s.get_user(user_id)?, "user")?;
                let refresh = feed.refresh(s, &user, now)?;
                let Page { cards, has_next_page } = feed.page(s, user_id, 0, search.as_deref())?;
                Ok(CardsResponse {
                    cards: card_views(s, user_id, &cards)?,
                    has_next_page,
                    new_card_count: Some(refresh.new_card_count()),
                })
            })
            .await?;
        debug!("served feed page 0 to {} with {} card(s)", user_id, response.cards.len());
        Ok(response)
    }

    pub async fn get_popular_cards(
        &self,
        session: &Session,
        params: PageParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CardsResponse> {
        let user_id = session.user_id;
        let feed = self.feed.clone();
        let page = params.page;
        if page > 0 {
            return self
                .read(cancel, move |s| popular_cards(&feed, s, user_id, page))
                .await;
        }
        let now = self.now();
        self.write(cancel, move |s| {
            feed.rebuild_popular(s, user_id, now)?;
            popular_cards(&feed, s, user_id, 0)
        })
        .await
    }

    pub async fn get_card(&self, session: &Session, params: CardParams, cancel: &CancellationToken) -> ApiResult<CardView> {
        let viewer = session.user_id;
        self.read(cancel, move |s| {
            let card = visible_card(s, params.card_id, viewer)?;
            required(card_view(s, viewer, &card)?, "card")
        })
        .await
    }

    /// A card and its replies. Flat threads list every reply in order;
    /// nested ones rank the root's direct replies and flatten below a comment.
    pub async fn get_thread(
        &self,
        session: &Session,
        params: GetThreadParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ThreadResponse> {
        let viewer = session.user_id;
        let feed = self.feed.clone();
        let now = self.now();
        self.write(cancel, move |s| {
            let card = visible_card(s, params.card_id, viewer)?;
            feed.visit(s, viewer, card.id, now)?;

            let replies = match (card.is_reply(), params.nested) {
                (false, false) => s.thread_replies(card.id, viewer)?,
                (false, true) => s.immediate_replies(card.id, viewer)?,
                (true, _) => s.flat_replies(card.id, viewer)?,
            };
            let mut replies = card_views(s, viewer, &replies)?;
            if params.nested && !card.is_reply() {
                // stable sort keeps creation order among equals
                replies.sort_by_key(|v| std::cmp::Reverse(reply_score(&v.engagement)));
            }
            let (replies, has_next_page) = paginate(replies, params.page);
            let card = required(card_view(s, viewer, &card)?, "card")?;
            Ok(ThreadResponse {
                card,
                replies,
                has_next_page,
            })
        })
        .await
    }

    pub async fn get_posts_for_user(
        &self,
        session: &Session,
        params: GetPostsForUserParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CardsResponse> {
        let viewer = session.user_id;
        self.read(cancel, move |s| {
            required(s.get_user(params.user_id)?, "user")?;
            let cards = s.posts_for_user(
                params.user_id,
                viewer,
                params.include_replies,
                PAGE_SIZE + 1,
                params.page * PAGE_SIZE,
            )?;
            let Page { cards, has_next_page } = Page::from_lookahead(cards, PAGE_SIZE);
            Ok(CardsResponse {
                cards: card_views(s, viewer, &cards)?,
                has_next_page,
                new_card_count: None,
            })
        })
        .await
    }

    // -- Posting --

    pub async fn post_card(
        &self,
        session: &Session,
        params: PostCardParams,
        cancel: &CancellationToken,
    ) -> ApiResult<PostCardResponse> {
        let author_id = match params.author_id {
            Some(id) if id != session.user_id => {
                if !session.is_admin() {
                    return Err(ApiError::forbidden());
                }
                id
            }
            _ => session.user_id,
        };
        if params.is_intro_card && !session.is_admin() {
            return Err(ApiError::forbidden());
        }
        let author = self.load_user(cancel, author_id).await?;

        // fail before uploading anything when an alias cannot be paid for
        if params.anonymous {
            let (ledger, aliases, reply_to) = (self.ledger, self.aliases, params.reply_card_id);
            let affordable = self
                .read(cancel, move |s| {
                    let root = match reply_to {
                        Some(id) => Some(thread_root(s, &visible_card(s, id, author_id)?)?),
                        None => None,
                    };
                    let plan = aliases.plan(s, author_id, root.as_ref())?;
                    match plan.charge(root.is_some()) {
                        Some(kind) => ledger.validate(s, &Transfer::purchase(kind, author_id)),
                        None => Ok(true),
                    }
                })
                .await?;
            if !affordable {
                return Err(ApiError::insufficient_balance());
            }
        }

        let uploads = self.upload_card_images(&params, cancel).await?;
        let posted = self.commit_post(author, params, uploads, cancel).await?;
        let Posted {
            card,
            view,
            channel,
            new_balances,
            recorded,
            rewarded,
            participants,
            root_engagement,
        } = posted;
        info!("user {} posted card {}", author_id, card.id);

        self.deliver(recorded).await;
        for user_id in &participants {
            self.push(*user_id, PushEvent::NewCard(Box::new(view.clone()))).await;
        }
        if let Some(engagement) = root_engagement {
            for user_id in participants.iter().chain(std::iter::once(&author_id)) {
                self.push(*user_id, PushEvent::UpdateEngagement(engagement)).await;
            }
        }
        if let Some(owner) = rewarded {
            self.push_balance(owner, cancel).await;
        }
        if let Some(balances) = new_balances {
            self.push(author_id, PushEvent::UpdateCoinBalance(balances)).await;
        }
        Ok(PostCardResponse {
            card: view,
            channel,
            new_balances,
        })
    }

    /// Re-host embedded images and build the background.
    async fn upload_card_images(&self, params: &PostCardParams, cancel: &CancellationToken) -> ApiResult<Uploads> {
        let images = self.deps.images.clone();
        let mut rehosted = Vec::new();
        for url in image_urls(&params.content) {
            let hosted = self.call(cancel, "image store", images.save_from_url(&url)).await?;
            rehosted.push((url, hosted));
        }
        let content = replace_urls(params.content.trim(), &rehosted);

        let color = params.background_color.as_deref().filter(|c| !c.is_empty());
        let background_image_path = match (params.background_image.as_deref(), params.background_image_url.as_deref(), color) {
            (Some(data), _, _) => self.call(cancel, "image store", images.save_base64(data)).await?,
            (None, Some(url), Some(color)) => {
                self.call(cancel, "image store", images.gradient(color, Some(url))).await?
            }
            (None, Some(url), None) => self.call(cancel, "image store", images.save_from_url(url)).await?,
            (None, None, Some(color)) => self.call(cancel, "image store", images.gradient(color, None)).await?,
            (None, None, None) => String::new(),
        };
        Ok(Uploads {
            content,
            background_image_path,
        })
    }

    /// Everything a post writes, in one transaction: the card, its alias
    /// binding and charge, rank counters, mentions, reply notifications
    /// and the reply reward.
    async fn commit_post(
        &self,
        author: User,
        params: PostCardParams,
        uploads: Uploads,
        cancel: &CancellationToken,
    ) -> ApiResult<Posted> {
        let (ledger, aliases, agg) = (self.ledger, self.aliases, self.notifications.clone());
        let now = self.now();
        let card_id = self.new_id();
        let (charge_tx, reward_tx) = (self.new_id(), self.new_id());
        let mention_ids: Vec<Uuid> = (0..mentioned_names(&uploads.content).len())
            .map(|_| self.new_id())
            .collect();

        self.write(cancel, move |s| {
            let mut card = Card::new(card_id, author.id, now);
            card.content = uploads.content;
            card.url = params.url.unwrap_or_default();
            card.background_color = params.background_color.unwrap_or_default();
            card.background_image_path = uploads.background_image_path;
            card.is_intro_card = params.is_intro_card;
            card.shadowbanned_at = author.shadowbanned_at.map(|_| now);

            let parent = match params.reply_card_id {
                Some(id) => Some(visible_card(s, id, author.id)?),
                None => None,
            };
            let mut root = match &parent {
                Some(parent) => {
                    card.reply_to(parent);
                    Some(thread_root(s, parent)?)
                }
                None => None,
            };

            let mut channel = None;
            if root.is_none() {
                if let Some(channel_id) = params.channel_id {
                    let found = required(s.get_channel(channel_id)?, "channel")?;
                    if found.is_private && found.owner_id != Some(author.id) && !s.is_member(author.id, channel_id)? {
                        return Err(ApiError::forbidden().into());
                    }
                    card.channel_id = Some(channel_id);
                }
            }
            if let Some(channel_id) = card.channel_id {
                channel = s.get_channel(channel_id)?;
            }

            let mut charged = false;
            if params.anonymous {
                let plan = aliases.plan(s, author.id, root.as_ref())?;
                let alias = match root.as_mut() {
                    Some(root) => aliases.bind(s, author.id, root)?,
                    None => aliases.bind_new_root(s, &mut card)?,
                };
                card.alias_id = Some(alias.id);
                if let Some(kind) = plan.charge(root.is_some()) {
                    ledger.process(s, &Transfer::purchase(kind, author.id), charge_tx, now)?;
                    charged = true;
                }
            }
            s.save_card(&card)?;

            let root_id = card.root_id();
            s.subscribe(author.id, root_id, SubscriptionType::Boost, now)?;
            s.subscribe(author.id, root_id, SubscriptionType::Comment, now)?;

            let mut root_engagement = None;
            match &root {
                None if channel.as_ref().is_some_and(|c| c.is_private) => {}
                None => s.insert_popular_rank(&PopularRankEntry::new(card.id, now))?,
                Some(root) => {
                    s.touch_card(root.id, now)?;
                    if s.update_rank_counters(root.id, RankDelta::comments(1), now)? {
                        s.set_unique_commenters(root.id, s.count_unique_commenters(root.id)?)?;
                    }
                    root_engagement = Some(card_engagement(s, root.id)?);
                }
            }

            let notify = card.shadowbanned_at.is_none();
            let thread = root.as_ref().unwrap_or(&card);
            let mut recorded = Vec::new();
            let mut mentioned = HashSet::new();
            for (name, mention_id) in mentioned_names(&card.content).into_iter().zip(mention_ids) {
                let Some(user_id) = resolve_mention(s, &name, thread)? else {
                    continue;
                };
                if user_id == author.id || !mentioned.insert(user_id) {
                    continue;
                }
                let mention = Mention {
                    id: mention_id,
                    in_card: card.id,
                    mentioner_id: author.id,
                    mentioner_alias_id: card.alias_id,
                    mentioned_user_id: user_id,
                    created_at: now,
                };
                s.insert_mention(&mention)?;
                if notify {
                    recorded.push(agg.record(
                        s,
                        user_id,
                        Some(card.id),
                        NotificationType::Mention,
                        EventRow::Mention { mention_id },
                        now,
                    )?);
                }
            }

            let mut participants = Vec::new();
            let mut rewarded = None;
            if let (Some(root), Some(parent)) = (&root, &parent) {
                if notify {
                    let muted = s.thread_muted_by(root.id)?;
                    for user_id in s.subscribers(root.id, SubscriptionType::Comment)? {
                        if user_id == author.id {
                            continue;
                        }
                        participants.push(user_id);
                        if mentioned.contains(&user_id) || muted.contains(&user_id) {
                            continue;
                        }
                        recorded.push(agg.record(
                            s,
                            user_id,
                            Some(root.id),
                            NotificationType::Reply,
                            EventRow::Comment { card_id: card.id },
                            now,
                        )?);
                    }
                }
                if parent.owner_id != author.id {
                    ledger.process(
                        s,
                        &Transfer::reward(CoinTransactionType::ReplyReceived, parent.owner_id).for_card(parent.id),
                        reward_tx,
                        now,
                    )?;
                    rewarded = Some(parent.owner_id);
                }
            }

            let view = required(card_view(s, author.id, &card)?, "card")?;
            let new_balances = if charged { Some(ledger.balances(s, author.id)?) } else { None };
            Ok(Posted {
                card,
                view,
                channel,
                new_balances,
                recorded,
                rewarded,
                participants,
                root_engagement,
            })
        })
        .await
    }

    /// Owner or admin only. Notifications, mentions and feed entries of the
    /// card go with it; a deleted reply gives back its comment count.
    pub async fn delete_card(&self, session: &Session, params: CardParams, cancel: &CancellationToken) -> ApiResult<()> {
        let card = self.load_card(cancel, params.card_id).await?;
        if card.owner_id != session.user_id && !session.is_admin() {
            return Err(ApiError::forbidden());
        }
        let now = self.now();
        let deleted = card.clone();
        let engagement = self
            .write(cancel, move |s| {
                let reaped = s.delete_notifications_for_card(deleted.id)?;
                s.delete_mentions_for_card(deleted.id)?;
                s.delete_card(deleted.id)?;
                debug!("card {} deleted, {} notification(s) reaped", deleted.id, reaped);

                let Some(root_id) = deleted.thread_root_id else {
                    return Ok(None);
                };
                if s.update_rank_counters(root_id, RankDelta::comments(-1), now)? {
                    s.set_unique_commenters(root_id, s.count_unique_commenters(root_id)?)?;
                }
                s.unsubscribe(deleted.owner_id, root_id, SubscriptionType::Comment, now)?;
                let root = s.get_card(root_id)?;
                Ok(Some((card_engagement(s, root_id)?, root.map(|r| r.owner_id))))
            })
            .await?;
        info!("user {} deleted card {}", session.user_id, card.id);

        if let Some((engagement, root_owner)) = engagement {
            self.push(session.user_id, PushEvent::UpdateEngagement(engagement)).await;
            if let Some(owner) = root_owner.filter(|o| *o != session.user_id) {
                self.push(owner, PushEvent::UpdateEngagement(engagement)).await;
            }
        }
        Ok(())
    }

    pub async fn modify_card_score(
        &self,
        session: &Session,
        params: ModifyCardScoreParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        if !session.is_admin() {
            return Err(ApiError::forbidden());
        }
        let (id, admin, now) = (self.new_id(), session.user_id, self.now());
        self.write(cancel, move |s| {
            required(s.get_card(params.card_id)?, "card")?;
            s.insert_score_modification(id, params.card_id, admin, params.strength, now)?;
            if !s.update_rank_counters(params.card_id, RankDelta::score_mod(params.strength), now)? {
                debug!("card {} has no popular rank to modify", params.card_id);
            }
            Ok(())
        })
        .await?;
        info!("admin {} modified score of {} by {}", admin, params.card_id, params.strength);
        Ok(())
    }

    // -- Subscriptions --

    pub async fn subscribe_to_card(&self, session: &Session, params: CardParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            let card = visible_card(s, params.card_id, user_id)?;
            s.subscribe(user_id, card.root_id(), SubscriptionType::Comment, now)
        })
        .await
    }

    /// Stop like and reply notifications for the card's thread and mark
    /// the open ones as opened.
    pub async fn unsubscribe_from_card(
        &self,
        session: &Session,
        params: CardParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            let card = required(s.get_card(params.card_id)?, "card")?;
            let root_id = card.root_id();
            s.unsubscribe(user_id, root_id, SubscriptionType::Boost, now)?;
            s.unsubscribe(user_id, root_id, SubscriptionType::Comment, now)
        })
        .await
    }

    // -- Anonymity --

    /// The alias the user would post under, without binding it.
    pub async fn get_anonymous_handle(
        &self,
        session: &Session,
        params: ReplyTargetParams,
        cancel: &CancellationToken,
    ) -> ApiResult<AnonymousHandleResponse> {
        let (user_id, aliases) = (session.user_id, self.aliases);
        self.read(cancel, move |s| {
            let Some(reply_to) = params.reply_card_id else {
                let alias = s
                    .unused_alias(&HashSet::new())?
                    .ok_or_else(|| ApiError::conflict("no anonymous handles left"))?;
                return Ok(AnonymousHandleResponse {
                    alias,
                    was_last_used: false,
                });
            };
            let root = thread_root(s, &visible_card(s, reply_to, user_id)?)?;
            match root.author_to_alias.get(&user_id) {
                Some(&alias_id) => Ok(AnonymousHandleResponse {
                    alias: required(s.get_alias(alias_id)?, "alias")?,
                    was_last_used: s.alias_last_used(user_id, root.id)?,
                }),
                None => Ok(AnonymousHandleResponse {
                    alias: aliases.unbound(s, &root)?,
                    was_last_used: false,
                }),
            }
        })
        .await
    }

    pub async fn can_afford_anonymous_post(
        &self,
        session: &Session,
        params: ReplyTargetParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CanAffordResponse> {
        let (user_id, ledger, aliases) = (session.user_id, self.ledger, self.aliases);
        self.read(cancel, move |s| {
            let root = match params.reply_card_id {
                Some(id) => Some(thread_root(s, &visible_card(s, id, user_id)?)?),
                None => None,
            };
            let plan = aliases.plan(s, user_id, root.as_ref())?;
            let Some(kind) = plan.charge(root.is_some()) else {
                return Ok(CanAffordResponse { can_afford: true, cost: 0 });
            };
            Ok(CanAffordResponse {
                can_afford: ledger.validate(s, &Transfer::purchase(kind, user_id))?,
                cost: ledger.config.amount(kind).unwrap_or_default(),
            })
        })
        .await
    }

    pub fn get_action_costs(&self) -> ActionCosts {
        let config = self.ledger.config;
        ActionCosts {
            thread_alias: config.thread_alias,
            post_alias: config.post_alias,
            channel: config.channel,
            units_per_coin: config.units_per_coin,
        }
    }

    // -- Misc --

    pub async fn upload_image(
        &self,
        session: &Session,
        params: UploadImageParams,
        cancel: &CancellationToken,
    ) -> ApiResult<UploadImageResponse> {
        let images = self.deps.images.clone();
        let url = self.call(cancel, "image store", images.save_base64(&params.image_data)).await?;
        debug!("user {} uploaded {}", session.user_id, url);
        Ok(UploadImageResponse { url })
    }

    pub async fn report_card(&self, session: &Session, params: ReportCardParams, cancel: &CancellationToken) -> ApiResult<()> {
        let card = self.load_card(cancel, params.card_id).await?;
        let reason = if params.reason.trim().is_empty() { "no reason given" } else { params.reason.trim() };
        self.slack(format!(
            "{} reported card {} by {}: {}",
            session.user.username, card.id, card.owner_id, reason
        ));
        info!("user {} reported card {}", session.user_id, card.id);
        Ok(())
    }

    pub async fn submit_feedback(&self, session: &Session, params: SubmitFeedbackParams) -> ApiResult<()> {
        self.slack(format!("Feedback from {}: {}", session.user.username, params.feedback.trim()));
        Ok(())
    }
}

fn popular_cards(feed: &FeedEngine, s: &Store, user_id: Uuid, page: i64) -> anyhow::Result<CardsResponse> {
    let Page { cards, has_next_page } = feed.popular_page(s, user_id, page)?;
    Ok(CardsResponse {
        cards: card_views(s, user_id, &cards)?,
        has_next_page,
        new_card_count: None,
    })
}

/// The user behind `@name`: a username, or an alias bound in the thread.
fn resolve_mention(s: &Store, name: &str, thread: &Card) -> anyhow::Result<Option<Uuid>> {
    if let Some(user) = s.get_user_by_username(name)? {
        return Ok(Some(user.id));
    }
    let Some(alias) = s.get_alias_by_username(name)? else {
        return Ok(None);
    };
    Ok(thread
        .author_to_alias
        .iter()
        .find(|(_, alias_id)| **alias_id == alias.id)
        .map(|(user_id, _)| *user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let items: Vec<i64> = (0..45).collect();
        let (first, more) = paginate(items.clone(), 0);
        assert_eq!(first.len(), 20);
        assert!(more);
        let (last, more) = paginate(items, 2);
        assert_eq!(last, vec![40, 41, 42, 43, 44]);
        assert!(!more);
    }

    #[test]
    fn test_reply_score_orders_by_approval() {
        let e = |likes, dislikes, comments| Engagement {
            card_id: Uuid::nil(),
            likes,
            dislikes,
            comments,
            unique_commenters: 0,
            coins_earned: 0,
        };
        assert!(reply_score(&e(3, 0, 0)) > reply_score(&e(0, 0, 1)));
        assert!(reply_score(&e(1, 1, 0)) < 0);
    }

    #[test]
    fn test_shadowbanned_cards_hidden_from_others() {
        let owner = Uuid::new_v4();
        let mut card = Card::new(Uuid::new_v4(), owner, chrono::Utc::now());
        assert!(visible(&card, Uuid::new_v4()));
        card.shadowbanned_at = Some(card.created_at);
        assert!(visible(&card, owner));
        assert!(!visible(&card, Uuid::new_v4()));
    }
}
