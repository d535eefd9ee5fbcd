//! Shared harness: an in-memory store, recording fakes for every
//! collaborator, a clock the test moves by hand and predictable ids.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use deck_api::ActionService;
use deck_api::coins::CoinConfig;
use deck_api::collaborators::{
    Clock, Collaborators, IdGen, ImageStore, Indexer, Notifier, OAuth2, OAuthProfile, Pusher,
};
use deck_api::feed::FeedEngine;
use deck_db::{Database, Store};
use deck_types::api::{AuthParams, PostCardParams, PostCardResponse};
use deck_types::events::PushEvent;
use deck_types::models::{Channel, CoinBalances, Session, User};

#[derive(Default)]
pub struct RecordingPusher {
    pub events: Mutex<Vec<(Uuid, PushEvent)>>,
}

impl RecordingPusher {
    pub fn names_for(&self, user_id: Uuid) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, e)| e.name())
            .collect()
    }
}

#[async_trait]
impl Pusher for RecordingPusher {
    async fn push(&self, user_id: Uuid, event: PushEvent) -> Result<()> {
        self.events.lock().unwrap().push((user_id, event));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub devices: Mutex<Vec<(Uuid, String)>>,
    pub slack: Mutex<Vec<String>>,
    pub emails: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_devices(&self, user: &User, message: &str) -> Result<()> {
        self.devices.lock().unwrap().push((user.id, message.to_string()));
        Ok(())
    }

    async fn slack(&self, _channel: &str, text: &str) -> Result<()> {
        self.slack.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_email(&self, to: &str, _subject: &str, body: &str) -> Result<()> {
        self.emails.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeImages {
    saved: AtomicU64,
}

impl FakeImages {
    fn next(&self) -> String {
        format!("https://img.test/{}.png", self.saved.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait]
impl ImageStore for FakeImages {
    async fn save_base64(&self, _data: &str) -> Result<String> {
        Ok(self.next())
    }

    async fn save_from_url(&self, _url: &str) -> Result<String> {
        Ok(self.next())
    }

    async fn gradient(&self, _color: &str, _background_url: Option<&str>) -> Result<String> {
        Ok(self.next())
    }

    async fn identicon(&self, seed: &str) -> Result<String> {
        Ok(format!("https://img.test/identicon/{}.png", seed))
    }
}

#[derive(Default)]
pub struct RecordingIndexer {
    pub users: Mutex<Vec<Uuid>>,
    pub channels: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl Indexer for RecordingIndexer {
    async fn index_user(&self, user: &User) -> Result<()> {
        self.users.lock().unwrap().push(user.id);
        Ok(())
    }

    async fn index_channel(&self, channel: &Channel) -> Result<()> {
        self.channels.lock().unwrap().push(channel.id);
        Ok(())
    }

    async fn remove_user(&self, _user_id: Uuid) -> Result<()> {
        Ok(())
    }
}

pub struct FakeOAuth;

#[async_trait]
impl OAuth2 for FakeOAuth {
    async fn extend_token(&self, token: &str) -> Result<String> {
        Ok(format!("long-{}", token))
    }

    async fn profile(&self, _token: &str) -> Result<OAuthProfile> {
        Ok(OAuthProfile {
            subject: "fb-1".into(),
            email: "oauth@x".into(),
            first_name: "O".into(),
            last_name: "Auth".into(),
            picture_url: None,
        })
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Sequential ids well clear of the seeded rows.
pub struct SeqIds(AtomicU64);

impl IdGen for SeqIds {
    fn new_id(&self) -> Uuid {
        Uuid::from_u128(self.0.fetch_add(1, Ordering::Relaxed) as u128)
    }
}

pub struct Harness {
    pub db: Arc<Database>,
    pub service: Arc<ActionService>,
    pub pusher: Arc<RecordingPusher>,
    pub notifier: Arc<RecordingNotifier>,
    pub indexer: Arc<RecordingIndexer>,
    pub clock: Arc<ManualClock>,
    pub coins: CoinConfig,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let pusher = Arc::new(RecordingPusher::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let indexer = Arc::new(RecordingIndexer::default());
        let clock = Arc::new(ManualClock {
            now: Mutex::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        });
        let deps = Collaborators {
            pusher: pusher.clone(),
            notifier: notifier.clone(),
            images: Arc::new(FakeImages::default()),
            indexer: indexer.clone(),
            oauth: Arc::new(FakeOAuth),
            clock: clock.clone(),
            ids: Arc::new(SeqIds(AtomicU64::new(1_000_000))),
        };
        let coins = CoinConfig::default();
        let feed = FeedEngine::new(StdRng::seed_from_u64(42));
        let service = Arc::new(ActionService::new(db.clone(), deps, coins, feed));
        Self {
            db,
            service,
            pusher,
            notifier,
            indexer,
            clock,
            coins,
            cancel: CancellationToken::new(),
        }
    }

    /// Read from the store outside the service.
    pub fn store<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> T {
        self.db.with_conn(f).unwrap()
    }

    /// Write to the store outside the service, in one transaction.
    pub fn store_mut<T>(&self, f: impl FnOnce(&Store) -> Result<T>) -> T {
        self.db.with_conn_mut(f).unwrap()
    }

    pub fn signup_params(name: &str) -> AuthParams {
        AuthParams {
            username: Some(name.to_string()),
            email: Some(format!("{}@x", name)),
            password: Some("secret".to_string()),
            is_signup: true,
            ..AuthParams::default()
        }
    }

    pub async fn signup(&self, name: &str) -> Session {
        let (_, session) = self
            .service
            .auth(Self::signup_params(name), &self.cancel)
            .await
            .unwrap();
        session
    }

    pub async fn admin(&self, name: &str) -> Session {
        let session = self.signup(name).await;
        let mut user = session.user.clone();
        user.is_admin = true;
        self.store_mut(|s| s.save_user(&user));
        self.service.session_for(session.id, &self.cancel).await.unwrap()
    }

    pub async fn post(&self, session: &Session, params: PostCardParams) -> PostCardResponse {
        self.service.post_card(session, params, &self.cancel).await.unwrap()
    }

    pub async fn post_text(&self, session: &Session, content: &str) -> Uuid {
        let params = PostCardParams {
            content: content.to_string(),
            ..PostCardParams::default()
        };
        self.post(session, params).await.card.id
    }

    pub async fn reply(&self, session: &Session, to: Uuid, content: &str, anonymous: bool) -> PostCardResponse {
        let params = PostCardParams {
            content: content.to_string(),
            reply_card_id: Some(to),
            anonymous,
            ..PostCardParams::default()
        };
        self.post(session, params).await
    }

    pub fn balances(&self, user_id: Uuid) -> CoinBalances {
        self.store(|s| s.get_balances(user_id)).unwrap_or_default()
    }

    pub fn drain_coins(&self, user_id: Uuid) {
        let balance = self.balances(user_id).coin_balance;
        self.store_mut(|s| s.subtract_coins(user_id, balance));
    }

    /// Let best-effort side tasks finish.
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}
