mod cards;
mod channels;
mod coins;
mod feeds;
mod invites;
mod notifications;
mod ranks;
mod social;
mod users;

pub use channels::ChannelFilter;
pub use notifications::EventRow;

use anyhow::Result;
use rusqlite::ToSql;
use uuid::Uuid;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `?N, ?N+1, ...` for an IN list starting at parameter `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn id_params(ids: &[Uuid]) -> Vec<&dyn ToSql> {
    ids.iter().map(|id| id as &dyn ToSql).collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, Utc};
    use deck_types::models::{Card, Notification, NotificationType, User};
    use uuid::Uuid;

    use crate::{Database, Store};

    pub fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + secs, 0).unwrap()
    }

    pub fn user(db: &Database, username: &str) -> User {
        let user = User::new(Uuid::new_v4(), username, &format!("{}@example.com", username), at(0));
        db.with_conn_mut(|s| s.insert_user(&user)).unwrap();
        user
    }

    pub fn post(db: &Database, owner: &User, secs: i64) -> Card {
        let mut card = Card::new(Uuid::new_v4(), owner.id, at(secs));
        card.content = format!("post by {}", owner.username);
        db.with_conn_mut(|s| s.save_card(&card)).unwrap();
        card
    }

    pub fn reply(db: &Database, owner: &User, parent: &Card, secs: i64) -> Card {
        let mut card = Card::new(Uuid::new_v4(), owner.id, at(secs));
        card.content = format!("reply by {}", owner.username);
        card.reply_to(parent);
        db.with_conn_mut(|s| s.save_card(&card)).unwrap();
        card
    }

    pub fn notification(user_id: Uuid, target: Option<Uuid>, kind: NotificationType, secs: i64) -> Notification {
        Notification::new(Uuid::new_v4(), user_id, target, kind, at(secs))
    }

    pub fn read<T>(db: &Database, f: impl FnOnce(&Store) -> anyhow::Result<T>) -> T {
        db.with_conn(f).unwrap()
    }
}
