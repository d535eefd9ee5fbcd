use tokio_util::sync::CancellationToken;
use tracing::debug;

use deck_db::queries::EventRow;
use deck_types::api::{BlockUserParams, CardParams, UserParams};
use deck_types::error::{ApiError, ApiResult};
use deck_types::models::{NotificationType, Session};

use super::{ActionService, required};

impl ActionService {
    pub async fn follow_user(&self, session: &Session, params: UserParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (follower, followee) = (session.user_id, params.user_id);
        if follower == followee {
            return Err(ApiError::invalid_input("cannot follow yourself"));
        }
        let agg = self.notifications.clone();
        let now = self.now();
        let recorded = self
            .write(cancel, move |s| {
                required(s.get_user(followee)?, "user")?;
                if !s.follow(follower, followee, now)? {
                    return Ok(None);
                }
                let row = EventRow::Follow { follower_id: follower, followee_id: followee };
                agg.record(s, followee, None, NotificationType::Follow, row, now).map(Some)
            })
            .await?;
        match recorded {
            Some(r) => self.deliver(vec![r]).await,
            None => debug!("{} already follows {}", follower, followee),
        }
        Ok(())
    }

    pub async fn unfollow_user(&self, session: &Session, params: UserParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (follower, followee) = (session.user_id, params.user_id);
        self.write(cancel, move |s| {
            s.unfollow(follower, followee)?;
            s.delete_follow_rows(follower, followee)?;
            s.clear_empty_notifications(Some(followee))?;
            Ok(())
        })
        .await
    }

    pub async fn mute_user(&self, session: &Session, params: UserParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (user_id, muted) = (session.user_id, params.user_id);
        if user_id == muted {
            return Err(ApiError::invalid_input("cannot mute yourself"));
        }
        self.write(cancel, move |s| {
            required(s.get_user(muted)?, "user")?;
            s.mute_user(user_id, muted)
        })
        .await
    }

    pub async fn unmute_user(&self, session: &Session, params: UserParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (user_id, muted) = (session.user_id, params.user_id);
        self.write(cancel, move |s| s.unmute_user(user_id, muted)).await
    }

    /// Block a user outright, or an alias within the thread it was seen in.
    pub async fn block_user(&self, session: &Session, params: BlockUserParams, cancel: &CancellationToken) -> ApiResult<()> {
        let user_id = session.user_id;
        if params.user_id == Some(user_id) {
            return Err(ApiError::invalid_input("cannot block yourself"));
        }
        self.write(cancel, move |s| match (params.user_id, params.alias_id, params.card_id) {
            (Some(blocked), _, _) => {
                required(s.get_user(blocked)?, "user")?;
                s.block_user(user_id, blocked)?;
                s.unfollow(user_id, blocked)?;
                Ok(())
            }
            (None, Some(alias_id), Some(card_id)) => {
                let card = required(s.get_card(card_id)?, "card")?;
                s.block_alias_in_thread(user_id, alias_id, card.root_id())
            }
            _ => Err(ApiError::invalid_input("user id, or alias id with card id, required").into()),
        })
        .await
    }

    pub async fn mute_thread(&self, session: &Session, params: CardParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (user_id, card_id) = (session.user_id, params.card_id);
        self.write(cancel, move |s| {
            let card = required(s.get_card(card_id)?, "card")?;
            s.mute_thread(user_id, card.root_id())
        })
        .await
    }

    pub async fn unmute_thread(&self, session: &Session, params: CardParams, cancel: &CancellationToken) -> ApiResult<()> {
        let (user_id, card_id) = (session.user_id, params.card_id);
        self.write(cancel, move |s| {
            let card = required(s.get_card(card_id)?, "card")?;
            s.unmute_thread(user_id, card.root_id())
        })
        .await
    }
}
