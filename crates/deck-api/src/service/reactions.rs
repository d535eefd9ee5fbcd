use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use deck_db::queries::EventRow;
use deck_types::api::{
    ReactToCardParams, ReactToCardResponse, TipCardParams, TipCardResponse, VoteOnCardParams,
};
use deck_types::error::{ApiError, ApiResult};
use deck_types::events::PushEvent;
use deck_types::models::{
    CoinTransactionType, NotificationType, RankDelta, ReactionType, Session, SubscriptionType,
    UserReaction, UserTip,
};

use super::ActionService;
use super::cards::{thread_root, visible_card};
use crate::coins::Transfer;
use crate::views::card_engagement;

/// Reaction names accepted from clients. `boost` is the legacy name for a like.
pub(crate) fn parse_reaction(name: &str) -> Option<ReactionType> {
    match name.trim().to_lowercase().as_str() {
        "like" | "boost" => Some(ReactionType::Like),
        "dislike" => Some(ReactionType::Dislike),
        _ => None,
    }
}

/// Counter change for adding (`sign = 1`) or removing (`-1`) a reaction.
fn rank_delta(kind: ReactionType, sign: i64) -> RankDelta {
    match kind {
        ReactionType::Like => RankDelta::upvotes(sign),
        ReactionType::Dislike => RankDelta::downvotes(sign),
    }
}

impl ActionService {
    /// Add, change or undo the user's reaction to a card. Repeating a
    /// reaction, or undoing one that is not there, changes nothing.
    pub async fn react_to_card(
        &self,
        session: &Session,
        params: ReactToCardParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ReactToCardResponse> {
        let kind = parse_reaction(&params.reaction)
            .ok_or_else(|| ApiError::invalid_input(format!("unknown reaction {}", params.reaction)))?;
        let user_id = session.user_id;
        let (ledger, aliases, agg) = (self.ledger, self.aliases, self.notifications.clone());
        let (now, reward_tx) = (self.now(), self.new_id());

        let outcome = self
            .write(cancel, move |s| {
                let card = visible_card(s, params.card_id, user_id)?;
                let existing = s.get_reaction(user_id, card.id)?.map(|r| r.kind);
                let like_row = EventRow::Reaction {
                    user_id,
                    card_id: card.id,
                };

                let mut response = ReactToCardResponse::default();
                let mut recorded = Vec::new();
                let mut rewarded = None;

                if params.undo {
                    if existing != Some(kind) {
                        return Ok(None);
                    }
                    s.delete_reaction(user_id, card.id)?;
                    s.update_rank_counters(card.id, rank_delta(kind, -1), now)?;
                    if kind == ReactionType::Like {
                        agg.retract(s, card.owner_id, Some(card.id), NotificationType::Like, like_row)?;
                    }
                    s.unsubscribe(user_id, card.id, SubscriptionType::Comment, now)?;
                } else {
                    if existing == Some(kind) {
                        return Ok(None);
                    }
                    let mut alias_id = None;
                    if params.anonymous && kind == ReactionType::Like {
                        let mut root = thread_root(s, &card)?;
                        let alias = aliases.bind(s, user_id, &mut root)?;
                        alias_id = Some(alias.id);
                        response.alias = Some(alias);
                    }
                    s.save_reaction(&UserReaction {
                        user_id,
                        card_id: card.id,
                        kind,
                        alias_id,
                        created_at: now,
                        updated_at: now,
                    })?;

                    if let Some(previous) = existing {
                        s.update_rank_counters(card.id, rank_delta(previous, -1), now)?;
                        if previous == ReactionType::Like {
                            agg.retract(s, card.owner_id, Some(card.id), NotificationType::Like, like_row)?;
                        }
                    }
                    s.update_rank_counters(card.id, rank_delta(kind, 1), now)?;

                    match kind {
                        ReactionType::Like => {
                            s.subscribe(user_id, card.id, SubscriptionType::Comment, now)?;
                            if card.owner_id != user_id {
                                recorded.push(agg.record(
                                    s,
                                    card.owner_id,
                                    Some(card.id),
                                    NotificationType::Like,
                                    like_row,
                                    now,
                                )?);
                                // paid once per liker and card, however often the like is toggled
                                if s.claim_like_reward(user_id, card.id, now)? {
                                    ledger.process(
                                        s,
                                        &Transfer::reward(CoinTransactionType::LikeReceived, card.owner_id)
                                            .for_card(card.id),
                                        reward_tx,
                                        now,
                                    )?;
                                    rewarded = Some(card.owner_id);
                                }
                            }
                        }
                        ReactionType::Dislike => s.unsubscribe(user_id, card.id, SubscriptionType::Comment, now)?,
                    }
                }

                let engagement = card_engagement(s, card.id)?;
                Ok(Some((response, recorded, rewarded, engagement, card.owner_id)))
            })
            .await?;

        let Some((response, recorded, rewarded, engagement, owner_id)) = outcome else {
            debug!("reaction of {} on {} unchanged", user_id, params.card_id);
            return Ok(ReactToCardResponse::default());
        };
        self.deliver(recorded).await;
        self.push(user_id, PushEvent::UpdateEngagement(engagement)).await;
        if owner_id != user_id {
            self.push(owner_id, PushEvent::UpdateEngagement(engagement)).await;
        }
        if let Some(owner) = rewarded {
            self.push_balance(owner, cancel).await;
        }
        Ok(response)
    }

    /// Up/down vote: a like or a dislike under another name.
    pub async fn vote_on_card(
        &self,
        session: &Session,
        params: VoteOnCardParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let reaction = if params.upvote { ReactionType::Like } else { ReactionType::Dislike };
        let react = ReactToCardParams {
            card_id: params.card_id,
            reaction: reaction.as_str().to_string(),
            undo: params.undo,
            anonymous: false,
        };
        self.react_to_card(session, react, cancel).await.map(|_| ())
    }

    /// Move coins from the tipper to the card's owner. Tipping your own
    /// card changes nothing.
    pub async fn tip_card(
        &self,
        session: &Session,
        params: TipCardParams,
        cancel: &CancellationToken,
    ) -> ApiResult<TipCardResponse> {
        let user_id = session.user_id;
        let ledger = self.ledger;
        let (now, tip_id, tx_id) = (self.now(), self.new_id(), self.new_id());

        let (new_balances, tipped) = self
            .write(cancel, move |s| {
                let card = visible_card(s, params.card_id, user_id)?;
                if card.owner_id == user_id {
                    return Ok((ledger.balances(s, user_id)?, None));
                }
                let alias_id = if params.anonymous {
                    thread_root(s, &card)?.author_to_alias.get(&user_id).copied()
                } else {
                    None
                };
                ledger.process(
                    s,
                    &Transfer::tip(user_id, card.owner_id, card.id, params.amount),
                    tx_id,
                    now,
                )?;
                s.insert_tip(&UserTip {
                    id: tip_id,
                    user_id,
                    card_id: card.id,
                    amount: params.amount,
                    anonymous: params.anonymous,
                    alias_id,
                    created_at: now,
                })?;
                let engagement = card_engagement(s, card.id)?;
                Ok((ledger.balances(s, user_id)?, Some((card.owner_id, engagement))))
            })
            .await?;

        let Some((owner_id, engagement)) = tipped else {
            debug!("user {} tipped their own card {}", user_id, params.card_id);
            return Ok(TipCardResponse { new_balances });
        };
        info!("user {} tipped {} on card {}", user_id, params.amount, params.card_id);
        self.push(user_id, PushEvent::UpdateCoinBalance(new_balances)).await;
        self.push_balance(owner_id, cancel).await;
        self.push(owner_id, PushEvent::UpdateEngagement(engagement)).await;
        Ok(TipCardResponse { new_balances })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reaction_accepts_legacy_boost() {
        assert_eq!(parse_reaction("Boost"), Some(ReactionType::Like));
        assert_eq!(parse_reaction("like"), Some(ReactionType::Like));
        assert_eq!(parse_reaction("DISLIKE"), Some(ReactionType::Dislike));
        assert_eq!(parse_reaction("upvote"), None);
    }

    #[test]
    fn test_rank_delta_signs() {
        assert_eq!(rank_delta(ReactionType::Like, 1), RankDelta::upvotes(1));
        assert_eq!(rank_delta(ReactionType::Dislike, -1), RankDelta::downvotes(-1));
    }
}
