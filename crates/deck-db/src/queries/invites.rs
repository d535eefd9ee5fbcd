use anyhow::Result;
use rusqlite::{ToSql, params};
use uuid::Uuid;

use deck_types::models::Invite;

use super::{OptionalExt, placeholders};
use crate::Store;
use crate::models::{INVITE_COLUMNS, invite_from_row};

impl Store<'_> {
    // -- Invites --

    pub fn insert_invite(&self, invite: &Invite) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO invites ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                INVITE_COLUMNS
            ),
            params![
                invite.id,
                invite.token.to_uppercase(),
                invite.node_id,
                invite.channel_id,
                invite.group_id,
                invite.remaining_uses,
                invite.system,
                invite.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_invite(&self, id: Uuid) -> Result<Option<Invite>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM invites WHERE id = ?1", INVITE_COLUMNS),
                [id],
                invite_from_row,
            )
            .optional()
    }

    pub fn get_invite_by_token(&self, token: &str) -> Result<Option<Invite>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM invites WHERE token = ?1", INVITE_COLUMNS),
                [token.trim().to_uppercase()],
                invite_from_row,
            )
            .optional()
    }

    pub fn invite_token_exists(&self, token: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM invites WHERE token = ?1)",
            [token.to_uppercase()],
            |row| row.get(0),
        )?)
    }

    /// Usable invites created by the user.
    pub fn invites_for_user(&self, user_id: Uuid) -> Result<Vec<Invite>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM invites
             WHERE node_id = ?1 AND remaining_uses > 0
             ORDER BY created_at, token",
            INVITE_COLUMNS
        ))?;
        let invites = stmt
            .query_map([user_id], invite_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(invites)
    }

    /// Consume one use. Returns false when none were left.
    pub fn decrement_invite_uses(&self, id: Uuid) -> Result<bool> {
        let updated = self.conn.execute(
            "UPDATE invites SET remaining_uses = remaining_uses - 1
             WHERE id = ?1 AND remaining_uses > 0",
            [id],
        )?;
        Ok(updated > 0)
    }

    pub fn group_invites(&self, tokens: &[String], group_id: Uuid) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE invites SET group_id = ?1 WHERE token IN ({})",
            placeholders(2, tokens.len())
        );
        let mut params: Vec<&dyn ToSql> = vec![&group_id];
        params.extend(tokens.iter().map(|t| t as &dyn ToSql));
        self.conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    /// Hand every other invite in `root_invite`'s group to `new_owner`.
    pub fn reassign_invite_group(&self, root_invite_id: Uuid, new_owner: Uuid) -> Result<usize> {
        let updated = self.conn.execute(
            "UPDATE invites SET node_id = ?2, group_id = NULL
             WHERE group_id = (SELECT group_id FROM invites WHERE id = ?1) AND id != ?1",
            params![root_invite_id, new_owner],
        )?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::queries::fixtures::{at, read, user};

    fn invite(node: Uuid, token: &str, uses: i64) -> Invite {
        Invite {
            id: Uuid::new_v4(),
            token: token.to_string(),
            node_id: node,
            channel_id: None,
            group_id: None,
            remaining_uses: uses,
            system: false,
            created_at: at(0),
        }
    }

    #[test]
    fn test_tokens_stored_uppercase() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        db.with_conn_mut(|s| s.insert_invite(&invite(a.id, "6xdab", 1))).unwrap();
        let found = read(&db, |s| s.get_invite_by_token("6XDab")).unwrap();
        assert_eq!(found.token, "6XDAB");
    }

    #[test]
    fn test_decrement_stops_at_zero() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let inv = invite(a.id, "ABCDE", 1);
        db.with_conn_mut(|s| s.insert_invite(&inv)).unwrap();
        assert!(db.with_conn_mut(|s| s.decrement_invite_uses(inv.id)).unwrap());
        assert!(!db.with_conn_mut(|s| s.decrement_invite_uses(inv.id)).unwrap());
        assert!(read(&db, |s| s.invites_for_user(a.id)).is_empty());
    }

    #[test]
    fn test_group_reassignment_keeps_root() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "alice");
        let b = user(&db, "bob");
        let root = invite(a.id, "AAAAA", 1);
        let other = invite(a.id, "BBBBB", 1);
        let group = Uuid::new_v4();
        db.with_conn_mut(|s| {
            s.insert_invite(&root)?;
            s.insert_invite(&other)?;
            s.group_invites(&["AAAAA".into(), "BBBBB".into()], group)?;
            s.reassign_invite_group(root.id, b.id)
        })
        .unwrap();
        assert_eq!(read(&db, |s| s.get_invite(root.id)).unwrap().node_id, a.id);
        assert_eq!(read(&db, |s| s.get_invite(other.id)).unwrap().node_id, b.id);
    }
}
