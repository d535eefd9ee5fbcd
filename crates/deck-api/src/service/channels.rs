use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use deck_db::Store;
use deck_db::queries::ChannelFilter;
use deck_types::api::{
    CardsResponse, ChannelNameParams, ChannelParams, ChannelView, ChannelsResponse,
    CreateChannelParams, CreateChannelResponse, GetCardsForChannelParams, GetChannelParams,
    GetChannelsParams, UpdateChannelSubscriptionParams, ValidResponse,
};
use deck_types::error::{ApiError, ApiResult};
use deck_types::models::{Channel, CoinTransactionType, Session};

use super::{ActionService, required};
use crate::coins::Transfer;
use crate::content::is_valid_channel_name;
use crate::feed::{PAGE_SIZE, Page};
use crate::views::{card_views, channel_views};

/// Private channels are hidden from everyone but their owner and members.
fn readable(s: &Store, channel: &Channel, user_id: Uuid) -> anyhow::Result<bool> {
    Ok(!channel.is_private || channel.owner_id == Some(user_id) || s.is_member(user_id, channel.id)?)
}

fn readable_channel(s: &Store, id: Uuid, user_id: Uuid) -> anyhow::Result<Channel> {
    let channel = required(s.get_channel(id)?, "channel")?;
    if !readable(s, &channel, user_id)? {
        return Err(ApiError::not_found("channel").into());
    }
    Ok(channel)
}

fn single_view(s: &Store, user_id: Uuid, channel: Channel) -> anyhow::Result<ChannelView> {
    channel_views(s, user_id, vec![channel])?
        .pop()
        .ok_or_else(|| anyhow::anyhow!("channel view went missing"))
}

impl ActionService {
    pub async fn create_channel(
        &self,
        session: &Session,
        params: CreateChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CreateChannelResponse> {
        let name = params.name.trim().to_string();
        if !is_valid_channel_name(&name) {
            return Err(ApiError::invalid_input("invalid channel name"));
        }
        let user_id = session.user_id;
        let ledger = self.ledger;
        let (channel_id, tx_id, now) = (self.new_id(), self.new_id(), self.now());

        let response = self
            .write(cancel, move |s| {
                let handle = name.to_lowercase();
                if s.get_channel_by_handle(&handle)?.is_some() {
                    return Err(ApiError::conflict("channel handle is taken").into());
                }
                ledger.process(
                    s,
                    &Transfer::purchase(CoinTransactionType::BoughtChannel, user_id),
                    tx_id,
                    now,
                )?;
                let channel = Channel {
                    id: channel_id,
                    owner_id: Some(user_id),
                    handle,
                    name,
                    description: params.description,
                    is_private: params.is_private,
                    is_default: false,
                    created_at: now,
                };
                s.insert_channel(&channel)?;
                s.join_channel(user_id, channel.id, now)?;
                Ok(CreateChannelResponse {
                    channel: single_view(s, user_id, channel)?,
                    new_balances: ledger.balances(s, user_id)?,
                })
            })
            .await?;

        info!("user {} created channel {}", user_id, response.channel.channel.handle);
        let indexer = self.deps.indexer.clone();
        let channel = response.channel.channel.clone();
        self.spawn_best_effort("channel indexing", async move { indexer.index_channel(&channel).await });
        Ok(response)
    }

    /// Whether a name is well formed and its handle still free.
    pub async fn validate_channel_name(
        &self,
        params: ChannelNameParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ValidResponse> {
        let name = params.name.trim().to_string();
        if !is_valid_channel_name(&name) {
            return Ok(ValidResponse { valid: false });
        }
        let handle = name.to_lowercase();
        let taken = self.read(cancel, move |s| Ok(s.get_channel_by_handle(&handle)?.is_some())).await?;
        Ok(ValidResponse { valid: !taken })
    }

    pub async fn get_channel(
        &self,
        session: &Session,
        params: GetChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ChannelView> {
        let user_id = session.user_id;
        self.read(cancel, move |s| {
            let channel = match (params.channel_id, params.handle.as_deref()) {
                (Some(id), _) => s.get_channel(id)?,
                (None, Some(handle)) => s.get_channel_by_handle(&handle.trim().to_lowercase())?,
                (None, None) => None,
            };
            let channel = match channel {
                Some(c) if readable(s, &c, user_id)? => c,
                _ => return Err(ApiError::not_found("channel").into()),
            };
            single_view(s, user_id, channel)
        })
        .await
    }

    pub async fn get_channels(
        &self,
        session: &Session,
        params: GetChannelsParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ChannelsResponse> {
        let user_id = session.user_id;
        let filter = ChannelFilter {
            only_subscribed: params.only_subscribed,
            only_postable: params.only_postable,
            hide_empty: params.hide_empty,
        };
        self.read(cancel, move |s| {
            let channels = s.list_channels(user_id, filter)?;
            Ok(ChannelsResponse {
                channels: channel_views(s, user_id, channels)?,
            })
        })
        .await
    }

    pub async fn get_cards_for_channel(
        &self,
        session: &Session,
        params: GetCardsForChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<CardsResponse> {
        let viewer = session.user_id;
        self.read(cancel, move |s| {
            readable_channel(s, params.channel_id, viewer)?;
            let cards = s.cards_for_channel(params.channel_id, viewer, PAGE_SIZE + 1, params.page * PAGE_SIZE)?;
            let Page { cards, has_next_page } = Page::from_lookahead(cards, PAGE_SIZE);
            Ok(CardsResponse {
                cards: card_views(s, viewer, &cards)?,
                has_next_page,
                new_card_count: None,
            })
        })
        .await
    }

    pub async fn join_channel(
        &self,
        session: &Session,
        params: ChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        let joined = self
            .write(cancel, move |s| {
                readable_channel(s, params.channel_id, user_id)?;
                s.join_channel(user_id, params.channel_id, now)
            })
            .await?;
        if !joined {
            debug!("user {} already in channel {}", user_id, params.channel_id);
        }
        Ok(())
    }

    pub async fn leave_channel(
        &self,
        session: &Session,
        params: ChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let user_id = session.user_id;
        self.write(cancel, move |s| {
            required(s.get_channel(params.channel_id)?, "channel")?;
            s.leave_channel(user_id, params.channel_id)?;
            Ok(())
        })
        .await
    }

    pub async fn mute_channel(
        &self,
        session: &Session,
        params: ChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        self.set_channel_muted(session.user_id, params.channel_id, true, cancel).await
    }

    pub async fn unmute_channel(
        &self,
        session: &Session,
        params: ChannelParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        self.set_channel_muted(session.user_id, params.channel_id, false, cancel).await
    }

    /// Join or leave, optionally setting the mute flag in the same step.
    pub async fn update_channel_subscription(
        &self,
        session: &Session,
        params: UpdateChannelSubscriptionParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            readable_channel(s, params.channel_id, user_id)?;
            if params.subscribed {
                s.join_channel(user_id, params.channel_id, now)?;
                if let Some(muted) = params.muted {
                    s.set_channel_muted(user_id, params.channel_id, muted)?;
                }
            } else {
                s.leave_channel(user_id, params.channel_id)?;
            }
            Ok(())
        })
        .await
    }

    /// Muting a channel you are not in is a no-op.
    async fn set_channel_muted(
        &self,
        user_id: Uuid,
        channel_id: Uuid,
        muted: bool,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let changed = self
            .write(cancel, move |s| {
                required(s.get_channel(channel_id)?, "channel")?;
                s.set_channel_muted(user_id, channel_id, muted)
            })
            .await?;
        if !changed {
            debug!("user {} is not in channel {}", user_id, channel_id);
        }
        Ok(())
    }
}
