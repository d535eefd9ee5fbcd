//! The action service: every client-visible operation, composed from the
//! store, the ledger, the alias allocator, the feed engine and the
//! notification aggregator.
//!
//! Store work runs on the blocking pool. Reads race the caller's
//! cancellation token; writes, once started, always run to commit or
//! rollback so a cancelled request never leaves half a grouping behind.

mod auth;
mod cards;
mod channels;
mod invites;
mod notifications;
mod reactions;
mod social;
mod users;

use std::future::Future;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use deck_db::{Database, Store};
use deck_types::error::{ApiError, ApiResult};
use deck_types::events::PushEvent;
use deck_types::models::{Card, Settings, User};

use crate::alias::AliasAllocator;
use crate::coins::{CoinConfig, CoinLedger};
use crate::collaborators::Collaborators;
use crate::feed::FeedEngine;
use crate::notifications::{NotificationAggregator, Recorded, plain_message};

pub use auth::hash_password;

/// Slack channel for reports, feedback and signup notices.
const SLACK_CHANNEL: &str = "activity";

pub struct ActionService {
    db: Arc<Database>,
    deps: Collaborators,
    ledger: CoinLedger,
    aliases: AliasAllocator,
    feed: Arc<FeedEngine>,
    notifications: NotificationAggregator,
    settings: RwLock<Settings>,
}

/// What one maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub reaped_notifications: usize,
    pub purged_reset_tokens: usize,
    pub settings: Settings,
}

impl ActionService {
    pub fn new(db: Arc<Database>, deps: Collaborators, coins: CoinConfig, feed: FeedEngine) -> Self {
        let notifications = NotificationAggregator::new(deps.ids.clone(), coins);
        Self {
            db,
            deps,
            ledger: CoinLedger::new(coins),
            aliases: AliasAllocator,
            feed: Arc::new(feed),
            notifications,
            settings: RwLock::new(Settings::default()),
        }
    }

    pub fn settings(&self) -> Settings {
        match self.settings.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Refresh the settings snapshot from the store.
    pub async fn reload_settings(&self) -> ApiResult<Settings> {
        let settings = self.read(&CancellationToken::new(), |s| s.get_settings()).await?;
        match self.settings.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
        Ok(settings)
    }

    /// One pass of the periodic cleanup.
    pub async fn run_maintenance(&self) -> ApiResult<MaintenanceReport> {
        let now = self.now();
        let (reaped_notifications, purged_reset_tokens) = self
            .write(&CancellationToken::new(), move |s| {
                Ok((s.clear_empty_notifications(None)?, s.purge_expired_reset_tokens(now)?))
            })
            .await?;
        let settings = self.reload_settings().await?;
        if reaped_notifications > 0 || purged_reset_tokens > 0 {
            info!(
                "maintenance reaped {} notification(s) and {} reset token(s)",
                reaped_notifications, purged_reset_tokens
            );
        }
        Ok(MaintenanceReport {
            reaped_notifications,
            purged_reset_tokens,
            settings,
        })
    }

    // -- Plumbing --

    fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    fn new_id(&self) -> Uuid {
        self.deps.ids.new_id()
    }

    /// Run read-only queries. Gives up early when `cancel` fires.
    async fn read<F, T>(&self, cancel: &CancellationToken, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }
        let db = self.db.clone();
        let task = tokio::task::spawn_blocking(move || db.with_conn(f));
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::cancelled()),
            joined = task => flatten(joined),
        }
    }

    /// Run writes in one transaction. Cancellation is only honoured
    /// before the transaction starts.
    async fn write<F, T>(&self, cancel: &CancellationToken, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ApiError::cancelled());
        }
        let db = self.db.clone();
        flatten(tokio::task::spawn_blocking(move || db.with_conn_mut(f)).await)
    }

    /// Await a collaborator on the primary path.
    async fn call<T>(
        &self,
        cancel: &CancellationToken,
        service: &str,
        fut: impl Future<Output = Result<T>>,
    ) -> ApiResult<T> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ApiError::cancelled()),
            res = fut => res.map_err(|e| {
                error!("{} failed: {:#}", service, e);
                ApiError::dependency(service)
            }),
        }
    }

    /// Fire-and-forget side channel. Failures are only logged.
    fn spawn_best_effort<F>(&self, what: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = fut.await {
                warn!("{} failed: {:#}", what, e);
            }
        });
    }

    async fn push(&self, user_id: Uuid, event: PushEvent) {
        let name = event.name();
        if let Err(e) = self.deps.pusher.push(user_id, event).await {
            warn!("push {} to {} failed: {:#}", name, user_id, e);
        }
    }

    fn slack(&self, text: String) {
        let notifier = self.deps.notifier.clone();
        self.spawn_best_effort("slack notice", async move { notifier.slack(SLACK_CHANNEL, &text).await });
    }

    fn index_user(&self, user: User) {
        let indexer = self.deps.indexer.clone();
        self.spawn_best_effort("user indexing", async move { indexer.index_user(&user).await });
    }

    /// Push committed notifications: an in-app refresh always, a device
    /// notification only for newly created ones.
    async fn deliver(&self, recorded: Vec<Recorded>) {
        for r in recorded {
            let agg = self.notifications.clone();
            let n = r.notification.clone();
            let user_id = n.user_id;
            let exported = self
                .read(&CancellationToken::new(), move |s| {
                    let user = if r.created { s.get_user(user_id)? } else { None };
                    Ok((agg.export(s, &n)?, user))
                })
                .await;
            let (exported, user) = match exported {
                Ok((Some(e), user)) => (e, user),
                Ok((None, _)) => {
                    debug!("notification {} is empty, nothing to deliver", r.notification.id);
                    continue;
                }
                Err(e) => {
                    warn!("exporting notification {} failed: {}", r.notification.id, e);
                    continue;
                }
            };
            let message = plain_message(&exported.message);
            self.push(user_id, PushEvent::NewNotification(exported)).await;
            if let Some(user) = user {
                if let Err(e) = self.deps.notifier.notify_devices(&user, &message).await {
                    warn!("device notification for {} failed: {:#}", user_id, e);
                }
            }
        }
    }

    async fn push_balance(&self, user_id: Uuid, cancel: &CancellationToken) {
        let ledger = self.ledger;
        match self.read(cancel, move |s| ledger.balances(s, user_id)).await {
            Ok(balances) => self.push(user_id, PushEvent::UpdateCoinBalance(balances)).await,
            Err(e) => warn!("reading balance of {} failed: {}", user_id, e),
        }
    }

    async fn load_user(&self, cancel: &CancellationToken, id: Uuid) -> ApiResult<User> {
        self.read(cancel, move |s| s.get_user(id))
            .await?
            .ok_or_else(|| ApiError::not_found("user"))
    }

    async fn load_card(&self, cancel: &CancellationToken, id: Uuid) -> ApiResult<Card> {
        self.read(cancel, move |s| s.get_card(id))
            .await?
            .ok_or_else(|| ApiError::not_found("card"))
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> ApiResult<T> {
    match joined {
        Ok(res) => res.map_err(map_store_err),
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Err(ApiError::internal())
        }
    }
}

/// Typed errors raised inside a transaction come back as themselves;
/// anything else is an internal failure.
pub(crate) fn map_store_err(e: anyhow::Error) -> ApiError {
    match e.downcast::<ApiError>() {
        Ok(api) => api,
        Err(e) => ApiError::from(e),
    }
}

/// Look up a row inside a transaction or fail it with `NOT_FOUND`.
pub(crate) fn required<T>(row: Option<T>, what: &str) -> Result<T> {
    row.ok_or_else(|| ApiError::not_found(what).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_types::error::ErrorKind;

    #[test]
    fn test_typed_errors_survive_the_store() {
        let e: anyhow::Error = ApiError::insufficient_balance().into();
        assert_eq!(map_store_err(e).code, ErrorKind::InsufficientBalance);
        let e = anyhow::anyhow!("disk I/O error");
        assert_eq!(map_store_err(e).code, ErrorKind::Internal);
    }

    #[test]
    fn test_required() {
        assert_eq!(required(Some(3), "x").unwrap(), 3);
        let err = required::<i32>(None, "card").unwrap_err();
        assert_eq!(err.downcast::<ApiError>().unwrap().code, ErrorKind::NotFound);
    }
}
