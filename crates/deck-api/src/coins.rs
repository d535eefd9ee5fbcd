use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use deck_db::Store;
use deck_types::error::ApiError;
use deck_types::models::{CoinBalances, CoinTransaction, CoinTransactionType};

/// Amount paid out or charged per transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinConfig {
    pub initial_balance: i64,
    pub used_invite: i64,
    pub invite_accepted: i64,
    pub like_received: i64,
    pub reply_received: i64,
    pub first_post_activity: i64,
    pub popular_post: i64,
    pub leaderboard_first: i64,
    pub leaderboard_second: i64,
    pub leaderboard_third: i64,
    pub leaderboard_top_ten: i64,
    pub leaderboard_ranked: i64,
    pub thread_alias: i64,
    pub post_alias: i64,
    pub channel: i64,
    /// Balance units that make up one displayed coin.
    pub units_per_coin: i64,
}

impl Default for CoinConfig {
    fn default() -> Self {
        Self {
            initial_balance: 50,
            used_invite: 10,
            invite_accepted: 10,
            like_received: 1,
            reply_received: 1,
            first_post_activity: 10,
            popular_post: 20,
            leaderboard_first: 20,
            leaderboard_second: 15,
            leaderboard_third: 10,
            leaderboard_top_ten: 5,
            leaderboard_ranked: 1,
            thread_alias: 5,
            post_alias: 5,
            channel: 20,
            units_per_coin: 1,
        }
    }
}

impl CoinConfig {
    /// Configured amount, or `None` for kinds whose amount is chosen by the user.
    pub fn amount(&self, kind: CoinTransactionType) -> Option<i64> {
        use CoinTransactionType::*;
        let amount = match kind {
            InitialBalance => self.initial_balance,
            UsedInvite => self.used_invite,
            InviteAccepted => self.invite_accepted,
            LikeReceived => self.like_received,
            ReplyReceived => self.reply_received,
            FirstPostActivity => self.first_post_activity,
            PopularPost => self.popular_post,
            LeaderboardFirst => self.leaderboard_first,
            LeaderboardSecond => self.leaderboard_second,
            LeaderboardThird => self.leaderboard_third,
            LeaderboardTopTen => self.leaderboard_top_ten,
            LeaderboardRanked => self.leaderboard_ranked,
            BoughtThreadAlias => self.thread_alias,
            BoughtPostAlias => self.post_alias,
            BoughtChannel => self.channel,
            TipGiven => return None,
        };
        Some(amount)
    }
}

/// One balance movement. A missing source means the system pays; a
/// missing recipient means the coins are spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub kind: CoinTransactionType,
    pub source: Option<Uuid>,
    pub recipient: Option<Uuid>,
    /// Card credited with the coins it earned.
    pub card_id: Option<Uuid>,
    pub amount: Option<i64>,
}

impl Transfer {
    pub fn reward(kind: CoinTransactionType, recipient: Uuid) -> Self {
        Self {
            kind,
            source: None,
            recipient: Some(recipient),
            card_id: None,
            amount: None,
        }
    }

    pub fn purchase(kind: CoinTransactionType, buyer: Uuid) -> Self {
        Self {
            kind,
            source: Some(buyer),
            recipient: None,
            card_id: None,
            amount: None,
        }
    }

    pub fn tip(from: Uuid, to: Uuid, card_id: Uuid, amount: i64) -> Self {
        Self {
            kind: CoinTransactionType::TipGiven,
            source: Some(from),
            recipient: Some(to),
            card_id: Some(card_id),
            amount: Some(amount),
        }
    }

    pub fn for_card(mut self, card_id: Uuid) -> Self {
        self.card_id = Some(card_id);
        self
    }
}

/// Validates and commits balance changes. Runs inside the caller's
/// transaction so a failed step leaves balances untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinLedger {
    pub config: CoinConfig,
}

impl CoinLedger {
    pub fn new(config: CoinConfig) -> Self {
        Self { config }
    }

    fn amount_of(&self, t: &Transfer) -> Result<i64> {
        t.amount
            .or_else(|| self.config.amount(t.kind))
            .ok_or_else(|| anyhow::anyhow!("{} transfer has no amount", t.kind.as_str()))
    }

    /// Whether the source can cover the transfer. Changes nothing.
    pub fn validate(&self, s: &Store, t: &Transfer) -> Result<bool> {
        let Some(source) = t.source else {
            return Ok(true);
        };
        let amount = self.amount_of(t)?;
        let balances = s.get_balances(source)?.unwrap_or_default();
        Ok(balances.coin_balance + balances.temporary_coin_balance >= amount)
    }

    /// Debit, credit and record the transfer. Fails with
    /// `INSUFFICIENT_BALANCE` when the source cannot pay.
    pub fn process(&self, s: &Store, t: &Transfer, id: Uuid, at: DateTime<Utc>) -> Result<CoinTransaction> {
        let amount = self.amount_of(t)?;
        if let Some(source) = t.source {
            if !s.subtract_coins(source, amount)? {
                return Err(ApiError::insufficient_balance().into());
            }
        }
        if let Some(recipient) = t.recipient {
            s.add_coins(recipient, amount)?;
        }
        if let Some(card_id) = t.card_id {
            s.add_coins_earned(card_id, amount)?;
        }
        let tx = CoinTransaction {
            id,
            source_user_id: t.source,
            recipient_user_id: t.recipient,
            card_id: t.card_id,
            amount,
            kind: t.kind,
            created_at: at,
        };
        s.insert_coin_transaction(&tx)?;
        Ok(tx)
    }

    pub fn balances(&self, s: &Store, user_id: Uuid) -> Result<CoinBalances> {
        Ok(s.get_balances(user_id)?.unwrap_or_default())
    }
}
