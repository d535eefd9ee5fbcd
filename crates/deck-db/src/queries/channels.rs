use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use deck_types::models::{Channel, ChannelInfo};

use super::{OptionalExt, id_params, placeholders};
use crate::Store;
use crate::models::{CHANNEL_COLUMNS, channel_from_row};

/// Filters for listing channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelFilter {
    pub only_subscribed: bool,
    /// Channels the user may post in: public ones and private ones they belong to.
    pub only_postable: bool,
    pub hide_empty: bool,
}

impl Store<'_> {
    // -- Channels --

    pub fn insert_channel(&self, channel: &Channel) -> Result<()> {
        self.conn.execute(
            "INSERT INTO channels (id, owner_id, handle, name, description, is_private, is_default, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                channel.id,
                channel.owner_id,
                channel.handle.to_lowercase(),
                channel.name,
                channel.description,
                channel.is_private,
                channel.is_default,
                channel.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_channel(&self, id: Uuid) -> Result<Option<Channel>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM channels WHERE channels.id = ?1", CHANNEL_COLUMNS),
                [id],
                channel_from_row,
            )
            .optional()
    }

    pub fn get_channel_by_handle(&self, handle: &str) -> Result<Option<Channel>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM channels WHERE channels.handle = ?1", CHANNEL_COLUMNS),
                [handle.to_lowercase()],
                channel_from_row,
            )
            .optional()
    }

    pub fn list_channels(&self, user_id: Uuid, filter: ChannelFilter) -> Result<Vec<Channel>> {
        let mut clauses = vec![
            "(channels.is_private = 0 OR channels.id IN
                (SELECT channel_id FROM channel_memberships WHERE user_id = ?1))"
                .to_string(),
        ];
        if filter.only_subscribed {
            clauses.push(
                "channels.id IN (SELECT channel_id FROM channel_memberships WHERE user_id = ?1)".into(),
            );
        }
        if filter.only_postable {
            clauses.push(
                "(channels.is_private = 0 OR channels.owner_id = ?1 OR channels.id IN
                    (SELECT channel_id FROM channel_memberships WHERE user_id = ?1))"
                    .into(),
            );
        }
        if filter.hide_empty {
            clauses.push("EXISTS (SELECT 1 FROM cards WHERE cards.channel_id = channels.id)".into());
        }
        let sql = format!(
            "SELECT {} FROM channels WHERE {} ORDER BY channels.is_default DESC, channels.handle",
            CHANNEL_COLUMNS,
            clauses.join(" AND ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let channels = stmt
            .query_map([user_id], channel_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    pub fn default_channel_ids(&self) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM channels WHERE is_default = 1 ORDER BY created_at")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    // -- Memberships --

    /// Returns false when the user was already a member.
    pub fn join_channel(&self, user_id: Uuid, channel_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO channel_memberships (user_id, channel_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, channel_id, at],
        )?;
        Ok(inserted > 0)
    }

    pub fn leave_channel(&self, user_id: Uuid, channel_id: Uuid) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM channel_memberships WHERE user_id = ?1 AND channel_id = ?2",
            params![user_id, channel_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn leave_all_channels(&self, user_id: Uuid) -> Result<()> {
        self.conn
            .execute("DELETE FROM channel_memberships WHERE user_id = ?1", [user_id])?;
        Ok(())
    }

    /// Returns false when the user is not a member.
    pub fn set_channel_muted(&self, user_id: Uuid, channel_id: Uuid, muted: bool) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE channel_memberships SET muted = ?3 WHERE user_id = ?1 AND channel_id = ?2",
            params![user_id, channel_id, muted],
        )?;
        Ok(updated > 0)
    }

    pub fn is_member(&self, user_id: Uuid, channel_id: Uuid) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM channel_memberships WHERE user_id = ?1 AND channel_id = ?2)",
            params![user_id, channel_id],
            |row| row.get(0),
        )?)
    }

    pub fn member_count(&self, channel_id: Uuid) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM channel_memberships WHERE channel_id = ?1",
            [channel_id],
            |row| row.get(0),
        )?)
    }

    /// Member counts and the user's own membership state per channel.
    pub fn channel_infos(&self, user_id: Uuid, channel_ids: &[Uuid]) -> Result<HashMap<Uuid, ChannelInfo>> {
        if channel_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT channels.id,
                (SELECT COUNT(*) FROM channel_memberships m WHERE m.channel_id = channels.id),
                EXISTS (SELECT 1 FROM channel_memberships m
                        WHERE m.channel_id = channels.id AND m.user_id = ?1),
                COALESCE((SELECT m.muted FROM channel_memberships m
                          WHERE m.channel_id = channels.id AND m.user_id = ?1), 0)
             FROM channels WHERE channels.id IN ({})",
            placeholders(2, channel_ids.len())
        );
        let mut params = id_params(channel_ids);
        params.insert(0, &user_id);
        let mut stmt = self.conn.prepare(&sql)?;
        let infos = stmt
            .query_map(params.as_slice(), |row| {
                Ok(ChannelInfo {
                    channel_id: row.get(0)?,
                    member_count: row.get(1)?,
                    subscribed: row.get(2)?,
                    muted: row.get(3)?,
                })
            })?
            .map(|r| r.map(|info| (info.channel_id, info)))
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::migrations::GENERAL_CHANNEL_ID;
    use crate::queries::fixtures::{at, read, user};

    fn channel(owner: Uuid, handle: &str, is_private: bool) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            owner_id: Some(owner),
            handle: handle.to_string(),
            name: handle.to_string(),
            description: String::new(),
            is_private,
            is_default: false,
            created_at: at(0),
        }
    }

    #[test]
    fn test_join_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        assert!(db.with_conn_mut(|s| s.join_channel(a.id, GENERAL_CHANNEL_ID, at(1))).unwrap());
        assert!(!db.with_conn_mut(|s| s.join_channel(a.id, GENERAL_CHANNEL_ID, at(2))).unwrap());
        assert_eq!(read(&db, |s| s.member_count(GENERAL_CHANNEL_ID)), 1);
    }

    #[test]
    fn test_handle_lookup_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let ch = channel(a.id, "Bakers", false);
        db.with_conn_mut(|s| s.insert_channel(&ch)).unwrap();
        let found = read(&db, |s| s.get_channel_by_handle("BAKERS")).unwrap();
        assert_eq!(found.id, ch.id);
        assert_eq!(found.handle, "bakers");
    }

    #[test]
    fn test_private_channels_hidden_from_outsiders() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let secret = channel(a.id, "secret", true);
        db.with_conn_mut(|s| {
            s.insert_channel(&secret)?;
            s.join_channel(a.id, secret.id, at(1))
        })
        .unwrap();

        let for_b = read(&db, |s| s.list_channels(b.id, ChannelFilter::default()));
        assert!(for_b.iter().all(|c| c.id != secret.id));
        let for_a = read(&db, |s| s.list_channels(a.id, ChannelFilter { only_subscribed: true, ..Default::default() }));
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].id, secret.id);
    }

    #[test]
    fn test_channel_infos_report_mute() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        db.with_conn_mut(|s| {
            s.join_channel(a.id, GENERAL_CHANNEL_ID, at(1))?;
            s.set_channel_muted(a.id, GENERAL_CHANNEL_ID, true)
        })
        .unwrap();
        let infos = read(&db, |s| s.channel_infos(a.id, &[GENERAL_CHANNEL_ID]));
        let info = &infos[&GENERAL_CHANNEL_ID];
        assert!(info.subscribed);
        assert!(info.muted);
        assert_eq!(info.member_count, 1);
    }
}
