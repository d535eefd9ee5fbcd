use tokio_util::sync::CancellationToken;
use tracing::debug;

use deck_types::api::{NotificationsResponse, PageParams, UpdateNotificationsParams};
use deck_types::error::ApiResult;
use deck_types::models::Session;

use super::ActionService;

impl ActionService {
    pub async fn get_notifications(
        &self,
        session: &Session,
        params: PageParams,
        cancel: &CancellationToken,
    ) -> ApiResult<NotificationsResponse> {
        let user_id = session.user_id;
        let agg = self.notifications.clone();
        self.read(cancel, move |s| {
            let (notifications, has_next_page) = agg.page(s, user_id, params.page)?;
            Ok(NotificationsResponse {
                notifications,
                has_next_page,
                unseen_count: s.unseen_count(user_id)?,
            })
        })
        .await
    }

    /// Stamp notifications seen and/or opened. Marking seen without ids
    /// covers every notification the user has.
    pub async fn update_notifications(
        &self,
        session: &Session,
        params: UpdateNotificationsParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        if !params.seen && !params.opened {
            debug!("notification update from {} changes nothing", session.user_id);
            return Ok(());
        }
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            if params.seen {
                if params.ids.is_empty() {
                    s.mark_all_seen(user_id, now)?;
                } else {
                    s.mark_seen(user_id, &params.ids, now)?;
                }
            }
            if params.opened {
                s.mark_opened(user_id, &params.ids, now)?;
            }
            Ok(())
        })
        .await
    }
}
