use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use deck_types::models::{CoinBalances, CoinTransaction};

use super::OptionalExt;
use crate::Store;
use crate::models::coin_type_from_str;

impl Store<'_> {
    // -- Like rewards --

    /// Record that the card owner was paid for this liker's like. Returns
    /// false when a reward was already paid for the pair.
    pub fn claim_like_reward(&self, liker_id: Uuid, card_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO like_rewards (liker_id, card_id, created_at) VALUES (?1, ?2, ?3)",
            params![liker_id, card_id, at],
        )?;
        Ok(inserted == 1)
    }

    // -- Balances --

    pub fn add_coins(&self, user_id: Uuid, amount: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET coin_balance = coin_balance + ?2 WHERE id = ?1",
            params![user_id, amount],
        )?;
        Ok(())
    }

    pub fn add_temporary_coins(&self, user_id: Uuid, amount: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE users SET temporary_coin_balance = temporary_coin_balance + ?2 WHERE id = ?1",
            params![user_id, amount],
        )?;
        Ok(())
    }

    /// Spend temporary coins first, then the regular balance. Returns false
    /// and changes nothing when the user cannot cover `amount`.
    pub fn subtract_coins(&self, user_id: Uuid, amount: i64) -> Result<bool> {
        let Some(balances) = self.get_balances(user_id)? else {
            anyhow::bail!("user {} not found", user_id);
        };
        if balances.coin_balance + balances.temporary_coin_balance < amount {
            return Ok(false);
        }
        let from_temporary = amount.min(balances.temporary_coin_balance).max(0);
        let from_regular = amount - from_temporary;
        self.conn.execute(
            "UPDATE users SET
                temporary_coin_balance = temporary_coin_balance - ?2,
                coin_balance = coin_balance - ?3
             WHERE id = ?1",
            params![user_id, from_temporary, from_regular],
        )?;
        Ok(true)
    }

    pub fn get_balances(&self, user_id: Uuid) -> Result<Option<CoinBalances>> {
        self.conn
            .query_row(
                "SELECT coin_balance, temporary_coin_balance FROM users WHERE id = ?1",
                [user_id],
                |row| {
                    Ok(CoinBalances {
                        coin_balance: row.get(0)?,
                        temporary_coin_balance: row.get(1)?,
                    })
                },
            )
            .optional()
    }

    // -- Ledger --

    pub fn insert_coin_transaction(&self, tx: &CoinTransaction) -> Result<()> {
        self.conn.execute(
            "INSERT INTO coin_transactions
                (id, source_user_id, recipient_user_id, card_id, amount, type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx.id,
                tx.source_user_id,
                tx.recipient_user_id,
                tx.card_id,
                tx.amount,
                tx.kind.as_str(),
                tx.created_at
            ],
        )?;
        Ok(())
    }

    /// Transactions touching the user, newest first.
    pub fn coin_transactions_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<CoinTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source_user_id, recipient_user_id, card_id, amount, type, created_at
             FROM coin_transactions
             WHERE source_user_id = ?1 OR recipient_user_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], |row| {
                let kind: String = row.get(5)?;
                Ok(CoinTransaction {
                    id: row.get(0)?,
                    source_user_id: row.get(1)?,
                    recipient_user_id: row.get(2)?,
                    card_id: row.get(3)?,
                    amount: row.get(4)?,
                    kind: coin_type_from_str(5, &kind)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
