use anyhow::Result;
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

/// Id of the channel every new user joins unless an invite says otherwise.
pub const GENERAL_CHANNEL_ID: Uuid = Uuid::from_u128(1);

const ALIAS_ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dusky", "eager", "fuzzy", "gentle", "hazy", "icy", "jolly",
    "keen", "lucky", "misty", "nimble", "odd", "plucky", "quiet", "rusty", "sly", "tidy",
];

const ALIAS_ANIMALS: &[&str] = &[
    "otter", "heron", "lynx", "marmot", "newt", "owl", "puffin", "quokka", "raven", "stoat",
];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Database: running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      BLOB PRIMARY KEY,
                username                TEXT NOT NULL UNIQUE,
                email                   TEXT NOT NULL,
                display_name            TEXT NOT NULL DEFAULT '',
                first_name              TEXT NOT NULL DEFAULT '',
                last_name               TEXT NOT NULL DEFAULT '',
                password_hash           TEXT NOT NULL DEFAULT '',
                bio                     TEXT NOT NULL DEFAULT '',
                profile_image_path      TEXT NOT NULL DEFAULT '',
                cover_image_path        TEXT NOT NULL DEFAULT '',
                is_admin                INTEGER NOT NULL DEFAULT 0,
                is_default              INTEGER NOT NULL DEFAULT 0,
                signups_frozen_exempt   INTEGER NOT NULL DEFAULT 0,
                seen_intro_cards        INTEGER NOT NULL DEFAULT 0,
                disable_feed            INTEGER NOT NULL DEFAULT 0,
                allow_email             INTEGER NOT NULL DEFAULT 1,
                verified_at             TEXT,
                shadowbanned_at         TEXT,
                blocked_at              TEXT,
                joined_from_invite      BLOB,
                coin_balance            INTEGER NOT NULL DEFAULT 0,
                temporary_coin_balance  INTEGER NOT NULL DEFAULT 0,
                devices                 TEXT NOT NULL DEFAULT '{}',
                feed_last_updated_at    TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_users_email ON users(email);

            CREATE TABLE oauth_accounts (
                provider    TEXT NOT NULL,
                subject     TEXT NOT NULL,
                user_id     BLOB NOT NULL REFERENCES users(id),
                PRIMARY KEY (provider, subject)
            );

            CREATE TABLE sessions (
                id          BLOB PRIMARY KEY,
                user_id     BLOB NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE reset_tokens (
                user_id     BLOB PRIMARY KEY REFERENCES users(id),
                token_hash  TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );

            CREATE TABLE waitlist (
                email       TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE settings (
                id              INTEGER PRIMARY KEY CHECK (id = 1),
                signups_frozen  INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO settings (id, signups_frozen) VALUES (1, 0);

            CREATE TABLE user_follows (
                follower_id  BLOB NOT NULL REFERENCES users(id),
                followee_id  BLOB NOT NULL REFERENCES users(id),
                created_at   TEXT NOT NULL,
                PRIMARY KEY (follower_id, followee_id)
            );

            CREATE TABLE user_mutes (
                user_id        BLOB NOT NULL,
                muted_user_id  BLOB NOT NULL,
                PRIMARY KEY (user_id, muted_user_id)
            );

            CREATE TABLE user_blocks (
                user_id        BLOB NOT NULL,
                blocked_user   BLOB,
                blocked_alias  BLOB,
                for_thread     BLOB
            );

            CREATE INDEX idx_user_blocks_user ON user_blocks(user_id);

            CREATE TABLE anonymous_aliases (
                id                  BLOB PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                display_name        TEXT NOT NULL,
                profile_image_path  TEXT NOT NULL DEFAULT '',
                inactive            INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE channels (
                id           BLOB PRIMARY KEY,
                owner_id     BLOB,
                handle       TEXT NOT NULL UNIQUE,
                name         TEXT NOT NULL,
                description  TEXT NOT NULL DEFAULT '',
                is_private   INTEGER NOT NULL DEFAULT 0,
                is_default   INTEGER NOT NULL DEFAULT 0,
                created_at   TEXT NOT NULL
            );

            CREATE TABLE channel_memberships (
                user_id     BLOB NOT NULL,
                channel_id  BLOB NOT NULL REFERENCES channels(id),
                muted       INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, channel_id)
            );

            CREATE TABLE invites (
                id              BLOB PRIMARY KEY,
                token           TEXT NOT NULL UNIQUE,
                node_id         BLOB NOT NULL,
                channel_id      BLOB,
                group_id        BLOB,
                remaining_uses  INTEGER NOT NULL DEFAULT 1,
                system          INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_invites_node ON invites(node_id);

            CREATE TABLE cards (
                id                     BLOB PRIMARY KEY,
                owner_id               BLOB NOT NULL REFERENCES users(id),
                alias_id               BLOB,
                channel_id             BLOB,
                thread_root_id         BLOB,
                thread_reply_id        BLOB,
                content                TEXT NOT NULL,
                url                    TEXT NOT NULL DEFAULT '',
                background_color       TEXT NOT NULL DEFAULT '',
                background_image_path  TEXT NOT NULL DEFAULT '',
                author_to_alias        TEXT NOT NULL DEFAULT '{}',
                is_intro_card          INTEGER NOT NULL DEFAULT 0,
                coins_earned           INTEGER NOT NULL DEFAULT 0,
                shadowbanned_at        TEXT,
                created_at             TEXT NOT NULL,
                updated_at             TEXT NOT NULL
            );

            CREATE INDEX idx_cards_thread_root ON cards(thread_root_id, created_at);
            CREATE INDEX idx_cards_thread_reply ON cards(thread_reply_id);
            CREATE INDEX idx_cards_owner ON cards(owner_id, created_at);
            CREATE INDEX idx_cards_channel ON cards(channel_id, created_at);

            CREATE TABLE thread_mutes (
                user_id         BLOB NOT NULL,
                thread_root_id  BLOB NOT NULL,
                PRIMARY KEY (user_id, thread_root_id)
            );

            CREATE TABLE subscriptions (
                user_id     BLOB NOT NULL,
                card_id     BLOB NOT NULL,
                type        TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, card_id, type)
            );

            CREATE INDEX idx_subscriptions_card ON subscriptions(card_id, type);

            CREATE TABLE user_reactions (
                user_id     BLOB NOT NULL,
                card_id     BLOB NOT NULL,
                type        TEXT NOT NULL,
                alias_id    BLOB,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, card_id)
            );

            CREATE INDEX idx_user_reactions_card ON user_reactions(card_id, type);

            CREATE TABLE user_tips (
                id          BLOB PRIMARY KEY,
                user_id     BLOB NOT NULL,
                card_id     BLOB NOT NULL,
                amount      INTEGER NOT NULL,
                anonymous   INTEGER NOT NULL DEFAULT 0,
                alias_id    BLOB,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_user_tips_card ON user_tips(card_id);

            CREATE TABLE mentions (
                id                  BLOB PRIMARY KEY,
                in_card             BLOB NOT NULL,
                mentioner_id        BLOB NOT NULL,
                mentioner_alias_id  BLOB,
                mentioned_user_id   BLOB NOT NULL,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_mentions_card ON mentions(in_card);

            CREATE TABLE popular_ranks (
                card_id                  BLOB PRIMARY KEY,
                views                    INTEGER NOT NULL DEFAULT 0,
                upvote_count             INTEGER NOT NULL DEFAULT 0,
                downvote_count           INTEGER NOT NULL DEFAULT 0,
                comment_count            INTEGER NOT NULL DEFAULT 0,
                unique_commenters_count  INTEGER NOT NULL DEFAULT 0,
                score_mod                REAL NOT NULL DEFAULT 0,
                created_at_timestamp     INTEGER NOT NULL,
                updated_at               TEXT NOT NULL
            );

            CREATE TABLE score_modifications (
                id          BLOB PRIMARY KEY,
                card_id     BLOB NOT NULL,
                user_id     BLOB NOT NULL,
                strength    REAL NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE user_feeds (
                user_id          BLOB NOT NULL,
                card_id          BLOB NOT NULL,
                position         INTEGER NOT NULL,
                current_top      INTEGER NOT NULL DEFAULT 0,
                last_visited_at  TEXT,
                updated_at       TEXT NOT NULL,
                PRIMARY KEY (user_id, card_id)
            );

            CREATE INDEX idx_user_feeds_position ON user_feeds(user_id, position);

            CREATE TABLE user_card_ranks (
                user_id  BLOB NOT NULL,
                card_id  BLOB NOT NULL,
                PRIMARY KEY (user_id, card_id)
            );

            CREATE TABLE user_popular_feeds (
                user_id   BLOB NOT NULL,
                card_id   BLOB NOT NULL,
                position  INTEGER NOT NULL,
                PRIMARY KEY (user_id, card_id)
            );

            CREATE TABLE notifications (
                id          BLOB PRIMARY KEY,
                user_id     BLOB NOT NULL,
                target_id   BLOB,
                type        TEXT NOT NULL,
                payload     TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                seen_at     TEXT,
                opened_at   TEXT
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, type, updated_at);

            CREATE TABLE notifications_reactions (
                notification_id  BLOB NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
                user_id          BLOB NOT NULL,
                card_id          BLOB NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (notification_id, user_id, card_id)
            );

            CREATE TABLE notifications_comments (
                notification_id  BLOB NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
                card_id          BLOB NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (notification_id, card_id)
            );

            CREATE TABLE notifications_follows (
                notification_id  BLOB NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
                follower_id      BLOB NOT NULL,
                followee_id      BLOB NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (notification_id, follower_id, followee_id)
            );

            CREATE TABLE notifications_mentions (
                notification_id  BLOB NOT NULL REFERENCES notifications(id) ON DELETE CASCADE,
                mention_id       BLOB NOT NULL,
                created_at       TEXT NOT NULL,
                PRIMARY KEY (notification_id, mention_id)
            );

            CREATE TABLE coin_transactions (
                id                 BLOB PRIMARY KEY,
                source_user_id     BLOB,
                recipient_user_id  BLOB,
                card_id            BLOB,
                amount             INTEGER NOT NULL,
                type               TEXT NOT NULL,
                created_at         TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;

        seed_defaults(conn)?;
    }

    if version < 2 {
        info!("Database: running migration v2 (like rewards)");
        conn.execute_batch(
            "
            CREATE TABLE like_rewards (
                liker_id    BLOB NOT NULL,
                card_id     BLOB NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (liker_id, card_id)
            );

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

/// Default channel and alias pool.
fn seed_defaults(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now();
    conn.execute(
        "INSERT OR IGNORE INTO channels (id, handle, name, description, is_default, created_at)
         VALUES (?1, 'general', 'General', 'Everything else', 1, ?2)",
        rusqlite::params![GENERAL_CHANNEL_ID, now],
    )?;

    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO anonymous_aliases (id, username, display_name) VALUES (?1, ?2, ?3)",
    )?;
    for adjective in ALIAS_ADJECTIVES {
        for animal in ALIAS_ANIMALS {
            let username = format!("{}{}", adjective, animal);
            let display_name = format!("{} {}", capitalize(adjective), capitalize(animal));
            stmt.execute(rusqlite::params![Uuid::new_v4(), username, display_name])?;
        }
    }

    info!(
        "Seeded {} anonymous aliases",
        ALIAS_ADJECTIVES.len() * ALIAS_ANIMALS.len()
    );
    Ok(())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let aliases: i64 = conn
            .query_row("SELECT COUNT(*) FROM anonymous_aliases", [], |r| r.get(0))
            .unwrap();
        assert_eq!(aliases as usize, ALIAS_ADJECTIVES.len() * ALIAS_ANIMALS.len());
    }
}
