use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use deck_types::api::{InviteTokenParams, InvitesResponse, NewInviteParams};
use deck_types::error::{ApiError, ApiResult};
use deck_types::models::{CoinTransactionType, Invite, NotificationType, Session};

use super::{ActionService, required};
use crate::coins::Transfer;

/// Characters that cannot be confused with each other when read aloud.
const TOKEN_ALPHABET: &[u8] = b"2345679ABCDEFGHJKMNPQRSTVWXYZ";
const TOKEN_LENGTH: usize = 5;
const TOKEN_ATTEMPTS: usize = 20;
const DEFAULT_USES: i64 = 1;

pub(crate) fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

impl ActionService {
    pub async fn new_invite(
        &self,
        session: &Session,
        params: NewInviteParams,
        cancel: &CancellationToken,
    ) -> ApiResult<Invite> {
        let remaining_uses = params.remaining_uses.unwrap_or(DEFAULT_USES);
        if remaining_uses <= 0 {
            return Err(ApiError::invalid_input("remaining uses must be positive"));
        }
        let user_id = session.user_id;
        let candidates: Vec<String> = {
            let mut rng = rand::rng();
            (0..TOKEN_ATTEMPTS).map(|_| random_token(&mut rng)).collect()
        };
        let (id, now) = (self.new_id(), self.now());

        let invite = self
            .write(cancel, move |s| {
                if let Some(channel_id) = params.channel_id {
                    let channel = required(s.get_channel(channel_id)?, "channel")?;
                    if channel.is_private
                        && channel.owner_id != Some(user_id)
                        && !s.is_member(user_id, channel_id)?
                    {
                        return Err(ApiError::forbidden().into());
                    }
                }
                let mut token = None;
                for candidate in candidates {
                    if !s.invite_token_exists(&candidate)? {
                        token = Some(candidate);
                        break;
                    }
                }
                let token = token
                    .ok_or_else(|| anyhow::anyhow!("no free invite token after {} attempts", TOKEN_ATTEMPTS))?;
                let invite = Invite {
                    id,
                    token,
                    node_id: user_id,
                    channel_id: params.channel_id,
                    group_id: None,
                    remaining_uses,
                    system: false,
                    created_at: now,
                };
                s.insert_invite(&invite)?;
                Ok(invite)
            })
            .await?;
        info!("user {} created invite {}", user_id, invite.token);
        Ok(invite)
    }

    pub async fn get_invites(&self, session: &Session, cancel: &CancellationToken) -> ApiResult<InvitesResponse> {
        let user_id = session.user_id;
        let invites = self.read(cancel, move |s| s.invites_for_user(user_id)).await?;
        Ok(InvitesResponse { invites })
    }

    /// Redeem an invite after signing up without one.
    pub async fn use_invite_code(
        &self,
        session: &Session,
        params: InviteTokenParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let user_id = session.user_id;
        let ledger = self.ledger;
        let agg = self.notifications.clone();
        let now = self.now();
        let (redeemer_tx, inviter_tx) = (self.new_id(), self.new_id());
        let token = params.invite_token;

        let (recorded, inviter) = self
            .write(cancel, move |s| {
                let mut user = required(s.get_user(user_id)?, "user")?;
                if user.joined_from_invite.is_some() {
                    return Err(ApiError::conflict("an invite was already redeemed").into());
                }
                let invite = match s.get_invite_by_token(&token)? {
                    Some(invite) if invite.is_usable() => invite,
                    _ => return Err(ApiError::invalid_invite_code().into()),
                };
                if invite.node_id == user_id {
                    return Err(ApiError::invalid_invite_code().into());
                }
                if !s.decrement_invite_uses(invite.id)? {
                    return Err(ApiError::invalid_invite_code().into());
                }

                if let Some(channel_id) = invite.channel_id {
                    s.leave_all_channels(user_id)?;
                    s.join_channel(user_id, channel_id, now)?;
                }
                ledger.process(
                    s,
                    &Transfer::reward(CoinTransactionType::UsedInvite, user_id),
                    redeemer_tx,
                    now,
                )?;

                user.joined_from_invite = Some(invite.node_id);
                user.updated_at = now;
                s.save_user(&user)?;

                let mut recorded = Vec::new();
                let inviter = (!invite.system).then_some(invite.node_id);
                if let Some(inviter) = inviter {
                    s.follow(user_id, inviter, now)?;
                    recorded.push(agg.retarget_introduction(s, user_id, inviter, now)?);
                    ledger.process(
                        s,
                        &Transfer::reward(CoinTransactionType::InviteAccepted, inviter),
                        inviter_tx,
                        now,
                    )?;
                    recorded.push(agg.record_single(
                        s,
                        inviter,
                        Some(user_id),
                        NotificationType::InviteAccepted,
                        None,
                        now,
                    )?);
                }
                Ok((recorded, inviter))
            })
            .await?;

        info!("user {} redeemed an invite", user_id);
        self.deliver(recorded).await;
        self.push_balance(user_id, cancel).await;
        if let Some(inviter) = inviter {
            self.push_balance(inviter, cancel).await;
        }
        Ok(())
    }
}
