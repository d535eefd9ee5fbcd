use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use deck_gateway::Dispatcher;
use deck_types::events::PushEvent;
use deck_types::models::{Channel, User};

/// Largest image accepted from a client or a remote URL.
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Delivers live events to a user's open connections.
#[async_trait]
pub trait Pusher: Send + Sync {
    async fn push(&self, user_id: Uuid, event: PushEvent) -> Result<()>;
}

/// Device notifications and out-of-band messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_devices(&self, user: &User, message: &str) -> Result<()>;
    async fn slack(&self, channel: &str, text: &str) -> Result<()>;
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Persists images and returns the URL they are served from.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save_base64(&self, data: &str) -> Result<String>;
    async fn save_from_url(&self, url: &str) -> Result<String>;
    /// Background built from a colour, optionally blended over an image.
    async fn gradient(&self, color: &str, background_url: Option<&str>) -> Result<String>;
    /// Default profile picture derived from `seed`.
    async fn identicon(&self, seed: &str) -> Result<String>;
}

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index_user(&self, user: &User) -> Result<()>;
    async fn index_channel(&self, channel: &Channel) -> Result<()>;
    async fn remove_user(&self, user_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthProfile {
    pub subject: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub picture_url: Option<String>,
}

#[async_trait]
pub trait OAuth2: Send + Sync {
    /// Trade a short-lived client token for a long-lived one.
    async fn extend_token(&self, token: &str) -> Result<String>;
    async fn profile(&self, token: &str) -> Result<OAuthProfile>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGen: Send + Sync {
    fn new_id(&self) -> Uuid;
}

/// Everything the service talks to besides the store.
#[derive(Clone)]
pub struct Collaborators {
    pub pusher: Arc<dyn Pusher>,
    pub notifier: Arc<dyn Notifier>,
    pub images: Arc<dyn ImageStore>,
    pub indexer: Arc<dyn Indexer>,
    pub oauth: Arc<dyn OAuth2>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGen>,
}

// -- Production implementations --

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[async_trait]
impl Pusher for Dispatcher {
    async fn push(&self, user_id: Uuid, event: PushEvent) -> Result<()> {
        let name = event.name();
        let delivered = self.send_to_user(user_id, event).await;
        debug!("pushed {} to {} connection(s) of {}", name, delivered, user_id);
        Ok(())
    }
}

/// Posts notifications to webhook endpoints. Unconfigured endpoints are skipped.
pub struct HttpNotifier {
    client: Client,
    slack_webhook: Option<String>,
    push_url: Option<String>,
    email_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(
        client: Client,
        slack_webhook: Option<String>,
        push_url: Option<String>,
        email_url: Option<String>,
    ) -> Self {
        Self {
            client,
            slack_webhook,
            push_url,
            email_url,
        }
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<()> {
        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_devices(&self, user: &User, message: &str) -> Result<()> {
        if user.devices.is_empty() {
            return Ok(());
        }
        let Some(url) = &self.push_url else {
            debug!("push endpoint not configured, skipping device notification for {}", user.id);
            return Ok(());
        };
        let devices: Vec<_> = user.devices.values().collect();
        self.post(url, json!({ "userId": user.id, "devices": devices, "message": message }))
            .await
    }

    async fn slack(&self, channel: &str, text: &str) -> Result<()> {
        let Some(url) = &self.slack_webhook else {
            debug!("slack webhook not configured, dropping #{} notice", channel);
            return Ok(());
        };
        self.post(url, json!({ "channel": channel, "text": text })).await
    }

    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let Some(url) = &self.email_url else {
            debug!("email endpoint not configured, dropping mail to {}", to);
            return Ok(());
        };
        self.post(url, json!({ "to": to, "subject": subject, "body": body }))
            .await
    }
}

/// Writes images to a local directory served under `base_url`.
pub struct FsImageStore {
    client: Client,
    dir: PathBuf,
    base_url: String,
}

impl FsImageStore {
    pub fn new(client: Client, dir: PathBuf, base_url: &str) -> Self {
        Self {
            client,
            dir,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn store(&self, bytes: &[u8], ext: &str) -> Result<String> {
        if bytes.len() > MAX_IMAGE_BYTES {
            bail!("image of {} bytes exceeds limit", bytes.len());
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = format!("{}.{}", Uuid::new_v4(), ext);
        tokio::fs::write(self.dir.join(&name), bytes)
            .await
            .with_context(|| format!("failed to write image {}", name))?;
        Ok(format!("{}/{}", self.base_url, name))
    }
}

/// File extension for the image format recognised from magic bytes.
fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("jpg"),
        [b'G', b'I', b'F', b'8', ..] => Some("gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("webp"),
        _ => None,
    }
}

/// Decode base64 image data, with or without a `data:` URL prefix.
pub fn decode_image(data: &str) -> Result<(Vec<u8>, &'static str)> {
    let payload = match data.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .context("image data is not valid base64")?;
    let Some(ext) = sniff_extension(&bytes) else {
        bail!("unrecognised image format");
    };
    Ok((bytes, ext))
}

fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.trim().trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn gradient_svg(color: &str, background_url: Option<&str>) -> Result<String> {
    let Some((r, g, b)) = parse_hex_color(color) else {
        bail!("invalid colour {:?}", color);
    };
    let dark = |c: u8| (c as f64 * 0.6) as u8;
    let (opacity, image) = match background_url {
        Some(url) => (
            "0.7",
            format!(
                r#"<image href="{}" width="750" height="750" preserveAspectRatio="xMidYMid slice"/>"#,
                url.replace('"', "%22")
            ),
        ),
        None => ("1", String::new()),
    };
    Ok(format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="750" height="750"><defs><linearGradient id="g" x1="0" y1="0" x2="1" y2="1"><stop offset="0" stop-color="#{:02x}{:02x}{:02x}"/><stop offset="1" stop-color="#{:02x}{:02x}{:02x}"/></linearGradient></defs>{}<rect width="750" height="750" fill="url(#g)" opacity="{}"/></svg>"##,
        r,
        g,
        b,
        dark(r),
        dark(g),
        dark(b),
        image,
        opacity
    ))
}

/// Mirrored 5x5 grid seeded by the sha256 of `seed`.
fn identicon_svg(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let color = hex::encode(&digest[..3]);
    let mut cells = String::new();
    for row in 0..5 {
        for col in 0..3 {
            if digest[3 + row * 3 + col] % 2 == 0 {
                continue;
            }
            for x in [col, 4 - col] {
                cells.push_str(&format!(
                    r#"<rect x="{}" y="{}" width="50" height="50"/>"#,
                    25 + x * 50,
                    25 + row * 50
                ));
                if x == 2 {
                    break;
                }
            }
        }
    }
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="300"><rect width="300" height="300" fill="#f0f0f0"/><g fill="#{}">{}</g></svg>"##,
        color, cells
    )
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save_base64(&self, data: &str) -> Result<String> {
        let (bytes, ext) = decode_image(data)?;
        self.store(&bytes, ext).await
    }

    async fn save_from_url(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        let Some(ext) = sniff_extension(&bytes) else {
            bail!("{} is not an image", url);
        };
        self.store(&bytes, ext).await
    }

    async fn gradient(&self, color: &str, background_url: Option<&str>) -> Result<String> {
        let svg = gradient_svg(color, background_url)?;
        self.store(svg.as_bytes(), "svg").await
    }

    async fn identicon(&self, seed: &str) -> Result<String> {
        self.store(identicon_svg(seed).as_bytes(), "svg").await
    }
}

/// Pushes documents to a search service. Without a URL every call is a no-op.
pub struct HttpIndexer {
    client: Client,
    url: Option<String>,
}

impl HttpIndexer {
    pub fn new(client: Client, url: Option<String>) -> Self {
        Self {
            client,
            url: url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }
}

#[async_trait]
impl Indexer for HttpIndexer {
    async fn index_user(&self, user: &User) -> Result<()> {
        let Some(base) = &self.url else {
            debug!("indexer not configured, skipping user {}", user.id);
            return Ok(());
        };
        self.client
            .put(format!("{}/users/{}", base, user.id))
            .json(&json!({
                "username": user.username,
                "displayName": user.display_name,
                "firstName": user.first_name,
                "lastName": user.last_name,
                "profileImageUrl": user.profile_image_path,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn index_channel(&self, channel: &Channel) -> Result<()> {
        let Some(base) = &self.url else {
            debug!("indexer not configured, skipping channel {}", channel.id);
            return Ok(());
        };
        self.client
            .put(format!("{}/channels/{}", base, channel.id))
            .json(channel)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn remove_user(&self, user_id: Uuid) -> Result<()> {
        let Some(base) = &self.url else {
            return Ok(());
        };
        self.client
            .delete(format!("{}/users/{}", base, user_id))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Graph-API style OAuth provider.
pub struct GraphOAuth {
    client: Client,
    graph_url: String,
    client_id: String,
    client_secret: String,
}

impl GraphOAuth {
    pub fn new(client: Client, graph_url: &str, client_id: String, client_secret: String) -> Self {
        Self {
            client,
            graph_url: graph_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }
}

#[derive(Deserialize)]
struct ExchangedToken {
    access_token: String,
}

#[derive(Deserialize)]
struct GraphPictureData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct GraphPicture {
    data: GraphPictureData,
}

#[derive(Deserialize)]
struct GraphProfile {
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_name: String,
    picture: Option<GraphPicture>,
}

#[async_trait]
impl OAuth2 for GraphOAuth {
    async fn extend_token(&self, token: &str) -> Result<String> {
        if self.client_id.is_empty() {
            debug!("oauth client not configured, using token as given");
            return Ok(token.to_string());
        }
        let exchanged: ExchangedToken = self
            .client
            .get(format!("{}/oauth/access_token", self.graph_url))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("fb_exchange_token", token),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(exchanged.access_token)
    }

    async fn profile(&self, token: &str) -> Result<OAuthProfile> {
        let profile: GraphProfile = self
            .client
            .get(format!("{}/me", self.graph_url))
            .query(&[
                ("fields", "id,email,first_name,last_name,picture.type(large)"),
                ("access_token", token),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(OAuthProfile {
            subject: profile.id,
            email: profile.email,
            first_name: profile.first_name,
            last_name: profile.last_name,
            picture_url: profile.picture.and_then(|p| p.data.url),
        })
    }
}
