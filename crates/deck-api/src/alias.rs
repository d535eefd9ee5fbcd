//! Per-thread pseudonyms.
//!
//! A thread root's `author_to_alias` map binds each anonymous participant
//! to one alias for the life of the thread. The planner decides what an
//! anonymous post costs; `bind` resolves the alias inside the same
//! transaction that saves the card.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use deck_db::Store;
use deck_types::error::ApiError;
use deck_types::models::{AnonymousAlias, Card, CoinTransactionType};

/// What an anonymous post by a user in a thread requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasPlan {
    /// The user already posted under this alias in the thread.
    Reuse(Uuid),
    /// Bound earlier (e.g. through an anonymous like) but never posted under.
    Activate(Uuid),
    /// Nothing bound yet; take one from the pool.
    Allocate,
}

impl AliasPlan {
    /// The purchase this plan costs, given whether the post is a reply.
    pub fn charge(&self, is_reply: bool) -> Option<CoinTransactionType> {
        match self {
            AliasPlan::Reuse(_) => None,
            AliasPlan::Activate(_) => Some(CoinTransactionType::BoughtThreadAlias),
            AliasPlan::Allocate if is_reply => Some(CoinTransactionType::BoughtThreadAlias),
            AliasPlan::Allocate => Some(CoinTransactionType::BoughtPostAlias),
        }
    }

    pub fn bound(&self) -> Option<Uuid> {
        match self {
            AliasPlan::Reuse(id) | AliasPlan::Activate(id) => Some(*id),
            AliasPlan::Allocate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AliasAllocator;

impl AliasAllocator {
    /// Decide how `user_id` would post anonymously under `root`. `None`
    /// means a new top-level post, which always gets a fresh alias.
    pub fn plan(&self, s: &Store, user_id: Uuid, root: Option<&Card>) -> Result<AliasPlan> {
        let Some(root) = root else {
            return Ok(AliasPlan::Allocate);
        };
        match root.author_to_alias.get(&user_id) {
            Some(&alias_id) => {
                if s.count_posts_by_alias_in_thread(alias_id, root.id)? > 0 {
                    Ok(AliasPlan::Reuse(alias_id))
                } else {
                    Ok(AliasPlan::Activate(alias_id))
                }
            }
            None => Ok(AliasPlan::Allocate),
        }
    }

    /// The alias `user_id` holds in `root`, binding a fresh one when there
    /// is none. A fresh binding is persisted on the root and the user's
    /// earlier anonymous tips in the thread move onto it.
    pub fn bind(&self, s: &Store, user_id: Uuid, root: &mut Card) -> Result<AnonymousAlias> {
        if let Some(&alias_id) = root.author_to_alias.get(&user_id) {
            return s
                .get_alias(alias_id)?
                .ok_or_else(|| ApiError::not_found("alias").into());
        }

        let alias = self.unbound(s, root)?;
        root.author_to_alias.insert(user_id, alias.id);
        s.set_author_to_alias(root.id, &root.author_to_alias)?;
        s.assign_alias_for_tips_in_thread(user_id, root.id, alias.id)?;
        Ok(alias)
    }

    /// Bind a fresh alias on a top-level card that has not been saved yet.
    pub fn bind_new_root(&self, s: &Store, card: &mut Card) -> Result<AnonymousAlias> {
        let alias = self.unbound(s, card)?;
        card.author_to_alias.insert(card.owner_id, alias.id);
        card.alias_id = Some(alias.id);
        Ok(alias)
    }

    /// A pool alias nobody in `root` is bound to. Does not bind it.
    pub fn unbound(&self, s: &Store, root: &Card) -> Result<AnonymousAlias> {
        let taken: HashSet<Uuid> = root.author_to_alias.values().copied().collect();
        s.unused_alias(&taken)?
            .ok_or_else(|| ApiError::conflict("no anonymous handles left in this thread").into())
    }
}
