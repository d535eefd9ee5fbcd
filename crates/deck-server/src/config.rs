use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use deck_api::coins::CoinConfig;

/// Everything the binary reads from the environment, parsed once.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub image_dir: PathBuf,
    pub image_base_url: String,
    pub slack_webhook: Option<String>,
    pub push_url: Option<String>,
    pub email_url: Option<String>,
    pub index_url: Option<String>,
    pub oauth_graph_url: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub signups_frozen: bool,
    pub maintenance_interval: Duration,
    pub coins: CoinConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port = parse(&get, "DECK_PORT", 3000)?;
        let interval_secs: u64 = parse(&get, "DECK_MAINTENANCE_INTERVAL_SECS", 300)?;
        if interval_secs == 0 {
            anyhow::bail!("DECK_MAINTENANCE_INTERVAL_SECS must be positive");
        }

        let defaults = CoinConfig::default();
        let coins = CoinConfig {
            initial_balance: parse(&get, "DECK_COINS_INITIAL_BALANCE", defaults.initial_balance)?,
            used_invite: parse(&get, "DECK_COINS_USED_INVITE", defaults.used_invite)?,
            invite_accepted: parse(&get, "DECK_COINS_INVITE_ACCEPTED", defaults.invite_accepted)?,
            like_received: parse(&get, "DECK_COINS_LIKE_RECEIVED", defaults.like_received)?,
            reply_received: parse(&get, "DECK_COINS_REPLY_RECEIVED", defaults.reply_received)?,
            first_post_activity: parse(&get, "DECK_COINS_FIRST_POST_ACTIVITY", defaults.first_post_activity)?,
            popular_post: parse(&get, "DECK_COINS_POPULAR_POST", defaults.popular_post)?,
            leaderboard_first: parse(&get, "DECK_COINS_LEADERBOARD_FIRST", defaults.leaderboard_first)?,
            leaderboard_second: parse(&get, "DECK_COINS_LEADERBOARD_SECOND", defaults.leaderboard_second)?,
            leaderboard_third: parse(&get, "DECK_COINS_LEADERBOARD_THIRD", defaults.leaderboard_third)?,
            leaderboard_top_ten: parse(&get, "DECK_COINS_LEADERBOARD_TOP_TEN", defaults.leaderboard_top_ten)?,
            leaderboard_ranked: parse(&get, "DECK_COINS_LEADERBOARD_RANKED", defaults.leaderboard_ranked)?,
            thread_alias: parse(&get, "DECK_COINS_THREAD_ALIAS", defaults.thread_alias)?,
            post_alias: parse(&get, "DECK_COINS_POST_ALIAS", defaults.post_alias)?,
            channel: parse(&get, "DECK_COINS_CHANNEL", defaults.channel)?,
            units_per_coin: parse(&get, "DECK_UNITS_PER_COIN", defaults.units_per_coin)?,
        };
        if coins.units_per_coin <= 0 {
            anyhow::bail!("DECK_UNITS_PER_COIN must be positive");
        }

        Ok(Self {
            host: or("DECK_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(or("DECK_DB_PATH", "deck.db")),
            image_dir: PathBuf::from(or("DECK_IMAGE_DIR", "./images")),
            image_base_url: or("DECK_IMAGE_BASE_URL", "http://localhost:3000/images"),
            slack_webhook: get("DECK_SLACK_WEBHOOK"),
            push_url: get("DECK_PUSH_URL"),
            email_url: get("DECK_EMAIL_URL"),
            index_url: get("DECK_INDEX_URL"),
            oauth_graph_url: or("DECK_OAUTH_GRAPH_URL", "https://graph.facebook.com"),
            oauth_client_id: or("DECK_OAUTH_CLIENT_ID", ""),
            oauth_client_secret: or("DECK_OAUTH_CLIENT_SECRET", ""),
            signups_frozen: parse(&get, "DECK_SIGNUPS_FROZEN", false)?,
            maintenance_interval: Duration::from_secs(interval_secs),
            coins,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.port, 3000);
        assert_eq!(c.db_path, PathBuf::from("deck.db"));
        assert_eq!(c.maintenance_interval, Duration::from_secs(300));
        assert!(!c.signups_frozen);
        assert!(c.slack_webhook.is_none());
        assert_eq!(c.coins.initial_balance, 50);
        assert_eq!(c.coins.channel, 20);
        assert_eq!(c.addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("DECK_PORT", "8080"),
            ("DECK_SIGNUPS_FROZEN", "true"),
            ("DECK_COINS_THREAD_ALIAS", " 7 "),
            ("DECK_SLACK_WEBHOOK", "https://hooks.test/x"),
            ("DECK_INDEX_URL", "  "),
        ])
        .unwrap();
        assert_eq!(c.port, 8080);
        assert!(c.signups_frozen);
        assert_eq!(c.coins.thread_alias, 7);
        assert_eq!(c.slack_webhook.as_deref(), Some("https://hooks.test/x"));
        assert!(c.index_url.is_none());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(config(&[("DECK_PORT", "http")]).is_err());
        assert!(config(&[("DECK_COINS_CHANNEL", "lots")]).is_err());
        assert!(config(&[("DECK_MAINTENANCE_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("DECK_UNITS_PER_COIN", "0")]).is_err());
    }
}
