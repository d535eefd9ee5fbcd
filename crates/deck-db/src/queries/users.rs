use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use deck_types::models::{OAuthAccount, ResetToken, Settings, User};

use super::{OptionalExt, id_params, placeholders};
use crate::Store;
use crate::models::{USER_COLUMNS, user_from_row};

impl Store<'_> {
    // -- Users --

    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
                 ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
                USER_COLUMNS
            ),
            params![
                user.id,
                user.username,
                user.email,
                user.display_name,
                user.first_name,
                user.last_name,
                user.password_hash,
                user.bio,
                user.profile_image_path,
                user.cover_image_path,
                user.is_admin,
                user.is_default,
                user.signups_frozen_exempt,
                user.seen_intro_cards,
                user.disable_feed,
                user.allow_email,
                user.verified_at,
                user.shadowbanned_at,
                user.blocked_at,
                user.joined_from_invite,
                user.coin_balance,
                user.temporary_coin_balance,
                serde_json::to_string(&user.devices)?,
                user.feed_last_updated_at,
                user.created_at,
                user.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the profile columns of an existing user. Balances and the
    /// feed cursor are owned by their own queries and left untouched.
    pub fn save_user(&self, user: &User) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE users SET username = ?2, email = ?3, display_name = ?4, first_name = ?5,
                last_name = ?6, password_hash = ?7, bio = ?8, profile_image_path = ?9,
                cover_image_path = ?10, is_admin = ?11, is_default = ?12,
                signups_frozen_exempt = ?13, seen_intro_cards = ?14, disable_feed = ?15,
                allow_email = ?16, verified_at = ?17, shadowbanned_at = ?18, blocked_at = ?19,
                joined_from_invite = ?20, devices = ?21, updated_at = ?22
             WHERE id = ?1",
            params![
                user.id,
                user.username,
                user.email,
                user.display_name,
                user.first_name,
                user.last_name,
                user.password_hash,
                user.bio,
                user.profile_image_path,
                user.cover_image_path,
                user.is_admin,
                user.is_default,
                user.signups_frozen_exempt,
                user.seen_intro_cards,
                user.disable_feed,
                user.allow_email,
                user.verified_at,
                user.shadowbanned_at,
                user.blocked_at,
                user.joined_from_invite,
                serde_json::to_string(&user.devices)?,
                user.updated_at,
            ],
        )?;
        if updated == 0 {
            anyhow::bail!("user {} does not exist", user.id);
        }
        Ok(())
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id],
                user_from_row,
            )
            .optional()
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                [username.to_lowercase()],
                user_from_row,
            )
            .optional()
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM users WHERE lower(email) = lower(?1) ORDER BY created_at LIMIT 1",
                    USER_COLUMNS
                ),
                [email],
                user_from_row,
            )
            .optional()
    }

    pub fn get_users_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT {} FROM users WHERE id IN ({})",
            USER_COLUMNS,
            placeholders(1, ids.len())
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map(id_params(ids).as_slice(), user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users.into_iter().map(|u| (u.id, u)).collect())
    }

    /// Users new accounts follow automatically.
    pub fn default_user_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self.conn.prepare("SELECT id FROM users WHERE is_default = 1")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// True when the name is held by a user or by an alias, ignoring case.
    pub fn username_taken(&self, username: &str) -> Result<bool> {
        let taken: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM users WHERE lower(username) = lower(?1))
                 OR EXISTS (SELECT 1 FROM anonymous_aliases WHERE lower(username) = lower(?1))",
            [username],
            |row| row.get(0),
        )?;
        Ok(taken)
    }

    pub fn set_feed_last_updated(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET feed_last_updated_at = ?2 WHERE id = ?1",
            params![user_id, at],
        )?;
        Ok(())
    }

    pub fn set_seen_intro_cards(&self, user_id: Uuid) -> Result<()> {
        self.conn
            .execute("UPDATE users SET seen_intro_cards = 1 WHERE id = ?1", [user_id])?;
        Ok(())
    }

    // -- Sessions --

    pub fn insert_session(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![id, user_id, at],
        )?;
        Ok(())
    }

    /// Owner of a live session.
    pub fn get_session_user(&self, id: Uuid) -> Result<Option<(Uuid, DateTime<Utc>)>> {
        self.conn
            .query_row(
                "SELECT user_id, created_at FROM sessions WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
    }

    pub fn delete_session(&self, id: Uuid) -> Result<()> {
        self.conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        Ok(())
    }

    // -- Reset tokens --

    pub fn save_reset_token(&self, token: &ResetToken) -> Result<()> {
        self.conn.execute(
            "INSERT INTO reset_tokens (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id) DO UPDATE SET
                token_hash = excluded.token_hash,
                expires_at = excluded.expires_at",
            params![token.user_id, token.token_hash, token.expires_at],
        )?;
        Ok(())
    }

    pub fn get_reset_token(&self, user_id: Uuid) -> Result<Option<ResetToken>> {
        self.conn
            .query_row(
                "SELECT user_id, token_hash, expires_at FROM reset_tokens WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ResetToken {
                        user_id: row.get(0)?,
                        token_hash: row.get(1)?,
                        expires_at: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn delete_reset_token(&self, user_id: Uuid) -> Result<()> {
        self.conn
            .execute("DELETE FROM reset_tokens WHERE user_id = ?1", [user_id])?;
        Ok(())
    }

    pub fn purge_expired_reset_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM reset_tokens WHERE expires_at < ?1", [now])?)
    }

    // -- OAuth accounts --

    pub fn get_oauth_account(&self, provider: &str, subject: &str) -> Result<Option<OAuthAccount>> {
        self.conn
            .query_row(
                "SELECT provider, subject, user_id FROM oauth_accounts
                 WHERE provider = ?1 AND subject = ?2",
                [provider, subject],
                |row| {
                    Ok(OAuthAccount {
                        provider: row.get(0)?,
                        subject: row.get(1)?,
                        user_id: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn save_oauth_account(&self, account: &OAuthAccount) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO oauth_accounts (provider, subject, user_id) VALUES (?1, ?2, ?3)",
            params![account.provider, account.subject, account.user_id],
        )?;
        Ok(())
    }

    // -- Waitlist --

    pub fn add_to_waitlist(&self, email: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO waitlist (email, created_at) VALUES (lower(?1), ?2)",
            params![email, at],
        )?;
        Ok(())
    }

    pub fn remove_from_waitlist(&self, email: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM waitlist WHERE email = lower(?1)", [email])?;
        Ok(())
    }

    // -- Settings --

    pub fn get_settings(&self) -> Result<Settings> {
        Ok(self.conn.query_row(
            "SELECT signups_frozen FROM settings WHERE id = 1",
            [],
            |row| Ok(Settings { signups_frozen: row.get(0)? }),
        )?)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.conn.execute(
            "UPDATE settings SET signups_frozen = ?1 WHERE id = 1",
            [settings.signups_frozen],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, read, user};

    #[test]
    fn test_user_roundtrip_keeps_devices() {
        let db = Database::open_in_memory().unwrap();
        let mut chad = user(&db, "chad");
        chad.devices.insert(
            "tok".into(),
            deck_types::models::Device { token: "tok".into(), platform: "ios".into() },
        );
        db.with_conn_mut(|s| s.save_user(&chad)).unwrap();

        let loaded = read(&db, |s| s.get_user_by_username("CHAD")).unwrap();
        assert_eq!(loaded.id, chad.id);
        assert_eq!(loaded.devices.len(), 1);
    }

    #[test]
    fn test_username_taken_checks_aliases() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "chad");
        assert!(read(&db, |s| s.username_taken("Chad")));
        // seeded alias pool
        assert!(read(&db, |s| s.username_taken("QuietOwl")));
        assert!(!read(&db, |s| s.username_taken("nobody_here")));
    }

    #[test]
    fn test_save_user_keeps_balance() {
        let db = Database::open_in_memory().unwrap();
        let mut chad = user(&db, "chad");
        db.with_conn_mut(|s| s.add_coins(chad.id, 12)).unwrap();
        chad.bio = "hi".into();
        db.with_conn_mut(|s| s.save_user(&chad)).unwrap();
        let loaded = read(&db, |s| s.get_user(chad.id)).unwrap();
        assert_eq!(loaded.coin_balance, 12);
        assert_eq!(loaded.bio, "hi");
    }

    #[test]
    fn test_reset_tokens_expire() {
        let db = Database::open_in_memory().unwrap();
        let chad = user(&db, "chad");
        let token = ResetToken { user_id: chad.id, token_hash: "h".into(), expires_at: at(10) };
        db.with_conn_mut(|s| s.save_reset_token(&token)).unwrap();
        let purged = db.with_conn_mut(|s| s.purge_expired_reset_tokens(at(20))).unwrap();
        assert_eq!(purged, 1);
        assert!(read(&db, |s| s.get_reset_token(chad.id)).is_none());
    }
}
