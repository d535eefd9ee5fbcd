use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::Duration;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use deck_types::api::{
    AuthParams, AuthResponse, EmailParams, InviteTokenParams, UsernameParams, ValidResponse,
};
use deck_types::error::{ApiError, ApiResult};
use deck_types::models::{
    CoinTransactionType, Invite, NotificationType, OAuthAccount, ResetToken, Session, User,
};

use super::{ActionService, required};
use crate::coins::Transfer;
use crate::collaborators::OAuthProfile;
use crate::content::is_valid_username;
use crate::notifications::Recorded;
use crate::views::export_user;

const RESET_TOKEN_TTL_HOURS: i64 = 4;
const MIN_PASSWORD_LEN: usize = 6;
const OAUTH_PROVIDER: &str = "facebook";

/// Argon2id hash in PHC string format.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Everything a signup needs once the inputs have been checked.
struct NewAccount {
    user: User,
    invite: Option<Invite>,
    oauth: Option<OAuthAccount>,
}

/// Committed result of a signup.
struct SignedUp {
    user: User,
    session: Session,
    recorded: Vec<Recorded>,
    inviter: Option<Uuid>,
}

impl ActionService {
    /// Log in by password, reset token or OAuth token. Unknown users with
    /// an invite or the signup flag are signed up instead.
    pub async fn auth(&self, params: AuthParams, cancel: &CancellationToken) -> ApiResult<(AuthResponse, Session)> {
        if let Some(token) = params.access_token.clone() {
            return self.auth_oauth(params, &token, cancel).await;
        }

        let username = params.username.clone().unwrap_or_default().to_lowercase();
        let email = params.email.clone().unwrap_or_default();
        let existing = self
            .read(cancel, move |s| match s.get_user_by_username(&username)? {
                Some(u) => Ok(Some(u)),
                None if email.contains('@') => s.get_user_by_email(&email),
                None => Ok(None),
            })
            .await?;

        let Some(user) = existing else {
            if params.invite_token.is_some() || params.is_signup {
                return self.signup(params, None, cancel).await;
            }
            return Err(ApiError::wrong_password());
        };
        if user.blocked_at.is_some() {
            return Err(ApiError::user_blocked());
        }

        if let Some(token) = params.reset_token.as_deref() {
            self.consume_reset_token(&user, token, cancel).await?;
        } else {
            let password = params
                .password
                .as_deref()
                .ok_or_else(|| ApiError::invalid_input("password required"))?;
            if !verify_password(&user.password_hash, password) {
                return Err(ApiError::wrong_password());
            }
        }
        self.start_session(user, cancel).await
    }

    async fn auth_oauth(
        &self,
        params: AuthParams,
        token: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<(AuthResponse, Session)> {
        let oauth = self.deps.oauth.clone();
        let long_lived = self.call(cancel, "oauth", oauth.extend_token(token)).await?;
        let profile = self.call(cancel, "oauth", oauth.profile(&long_lived)).await?;

        let subject = profile.subject.clone();
        let email = profile.email.clone();
        let known = self
            .write(cancel, move |s| {
                if let Some(account) = s.get_oauth_account(OAUTH_PROVIDER, &subject)? {
                    return s.get_user(account.user_id);
                }
                // same person signed up by email before: link the accounts
                if email.is_empty() {
                    return Ok(None);
                }
                let Some(user) = s.get_user_by_email(&email)? else {
                    return Ok(None);
                };
                s.save_oauth_account(&OAuthAccount {
                    provider: OAUTH_PROVIDER.to_string(),
                    subject,
                    user_id: user.id,
                })?;
                Ok(Some(user))
            })
            .await?;

        match known {
            Some(user) if user.blocked_at.is_some() => Err(ApiError::user_blocked()),
            Some(user) => self.start_session(user, cancel).await,
            None => self.signup(params, Some(profile), cancel).await,
        }
    }

    async fn consume_reset_token(&self, user: &User, token: &str, cancel: &CancellationToken) -> ApiResult<()> {
        let user_id = user.id;
        let hashed = hash_token(token);
        let now = self.now();
        self.write(cancel, move |s| {
            let Some(stored) = s.get_reset_token(user_id)? else {
                return Err(ApiError::expired_token().into());
            };
            if stored.token_hash != hashed || stored.expires_at < now {
                return Err(ApiError::expired_token().into());
            }
            s.delete_reset_token(user_id)
        })
        .await
    }

    async fn start_session(&self, user: User, cancel: &CancellationToken) -> ApiResult<(AuthResponse, Session)> {
        let session = Session {
            id: self.new_id(),
            user_id: user.id,
            user,
            created_at: self.now(),
        };
        let (id, user_id, at) = (session.id, session.user_id, session.created_at);
        self.write(cancel, move |s| s.insert_session(id, user_id, at)).await?;
        info!("session {} started for {}", session.id, session.user_id);
        let response = AuthResponse {
            session_id: session.id,
            user: export_user(&session.user, session.user_id, false),
        };
        Ok((response, session))
    }

    /// Resolve a session id into a live session with a fresh user snapshot.
    pub async fn session_for(&self, session_id: Uuid, cancel: &CancellationToken) -> ApiResult<Session> {
        let found = self
            .read(cancel, move |s| match s.get_session_user(session_id)? {
                Some((user_id, created_at)) => Ok(s.get_user(user_id)?.map(|u| (u, created_at))),
                None => Ok(None),
            })
            .await?;
        let Some((user, created_at)) = found else {
            return Err(ApiError::unauthenticated());
        };
        if user.blocked_at.is_some() {
            return Err(ApiError::user_blocked());
        }
        Ok(Session {
            id: session_id,
            user_id: user.id,
            user,
            created_at,
        })
    }

    pub async fn resume_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> ApiResult<(AuthResponse, Session)> {
        let session = self.session_for(session_id, cancel).await?;
        let response = AuthResponse {
            session_id: session.id,
            user: export_user(&session.user, session.user_id, false),
        };
        Ok((response, session))
    }

    pub async fn logout(&self, session: &Session, cancel: &CancellationToken) -> ApiResult<()> {
        let id = session.id;
        self.write(cancel, move |s| s.delete_session(id)).await?;
        info!("session {} ended for {}", session.id, session.user_id);
        Ok(())
    }

    /// Always succeeds so the response does not reveal whether the email
    /// belongs to an account.
    pub async fn reset_password(&self, params: EmailParams, cancel: &CancellationToken) -> ApiResult<()> {
        let email = params.email.clone();
        let Some(user) = self.read(cancel, move |s| s.get_user_by_email(&email)).await? else {
            return Ok(());
        };
        let token = hex::encode(rand::rng().random::<[u8; 16]>());
        let stored = ResetToken {
            user_id: user.id,
            token_hash: hash_token(&token),
            expires_at: self.now() + Duration::hours(RESET_TOKEN_TTL_HOURS),
        };
        self.write(cancel, move |s| s.save_reset_token(&stored)).await?;

        let body = format!(
            "Use this code to sign in and choose a new password: {}\nIt expires in {} hours.",
            token, RESET_TOKEN_TTL_HOURS
        );
        if let Err(e) = self
            .deps
            .notifier
            .send_email(&user.email, "Reset your password", &body)
            .await
        {
            warn!("reset email to {} failed: {:#}", user.id, e);
        }
        Ok(())
    }

    pub async fn validate_invite_code(
        &self,
        params: InviteTokenParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ValidResponse> {
        let token = params.invite_token;
        let invite = self.read(cancel, move |s| s.get_invite_by_token(&token)).await?;
        Ok(ValidResponse {
            valid: invite.is_some_and(|i| i.is_usable()),
        })
    }

    pub async fn add_to_waitlist(&self, params: EmailParams, cancel: &CancellationToken) -> ApiResult<()> {
        let now = self.now();
        let email = params.email.trim().to_lowercase();
        self.write(cancel, move |s| s.add_to_waitlist(&email, now)).await
    }

    pub async fn validate_username(&self, params: UsernameParams, cancel: &CancellationToken) -> ApiResult<ValidResponse> {
        if !is_valid_username(&params.username) {
            return Ok(ValidResponse { valid: false });
        }
        let username = params.username;
        let taken = self.read(cancel, move |s| s.username_taken(&username)).await?;
        Ok(ValidResponse { valid: !taken })
    }

    // -- Signup --

    async fn signup(
        &self,
        params: AuthParams,
        oauth: Option<OAuthProfile>,
        cancel: &CancellationToken,
    ) -> ApiResult<(AuthResponse, Session)> {
        if self.settings().signups_frozen {
            return Err(ApiError::forbidden());
        }
        let account = self.prepare_account(&params, oauth.as_ref(), cancel).await?;
        let signed_up = self.commit_signup(account, cancel).await?;

        let SignedUp {
            user,
            session,
            recorded,
            inviter,
        } = signed_up;
        self.deliver(recorded).await;
        if let Some(inviter) = inviter {
            self.push_balance(inviter, cancel).await;
        }
        self.index_user(user.clone());
        self.slack(format!("New signup: {} ({})", user.username, user.id));
        info!("user {} signed up as {}", user.id, user.username);

        let response = AuthResponse {
            session_id: session.id,
            user: export_user(&user, user.id, false),
        };
        Ok((response, session))
    }

    /// Check the signup inputs and build the user, uploading images on the way.
    async fn prepare_account(
        &self,
        params: &AuthParams,
        oauth: Option<&OAuthProfile>,
        cancel: &CancellationToken,
    ) -> ApiResult<NewAccount> {
        let invite = match params.invite_token.clone() {
            Some(token) => {
                let invite = self.read(cancel, move |s| s.get_invite_by_token(&token)).await?;
                match invite {
                    Some(invite) if invite.is_usable() => Some(invite),
                    _ => return Err(ApiError::invalid_invite_code()),
                }
            }
            None if params.is_signup || oauth.is_some() => None,
            None => return Err(ApiError::invalid_invite_code()),
        };

        let username = params
            .username
            .clone()
            .ok_or_else(|| ApiError::invalid_input("username required"))?
            .to_lowercase();
        if !is_valid_username(&username) {
            return Err(ApiError::invalid_input("invalid username"));
        }
        let email = oauth
            .map(|p| p.email.clone())
            .filter(|e| !e.is_empty())
            .or_else(|| params.email.clone())
            .ok_or_else(|| ApiError::invalid_input("email required"))?;

        let (name, mail) = (username.clone(), email.clone());
        let (name_taken, email_taken) = self
            .read(cancel, move |s| {
                Ok((s.username_taken(&name)?, s.get_user_by_email(&mail)?.is_some()))
            })
            .await?;
        if name_taken {
            return Err(ApiError::conflict("username is taken"));
        }
        if email_taken {
            return Err(ApiError::conflict("email is already registered"));
        }

        let mut user = User::new(self.new_id(), &username, &email, self.now());
        match (oauth, params.password.as_deref()) {
            (Some(_), _) => {}
            (None, Some(password)) if password.len() >= MIN_PASSWORD_LEN => {
                user.password_hash = hash_password(password)?;
            }
            (None, Some(_)) => return Err(ApiError::invalid_input("password is too short")),
            (None, None) => return Err(ApiError::invalid_input("password required")),
        }
        user.first_name = params
            .first_name
            .clone()
            .or_else(|| oauth.map(|p| p.first_name.clone()))
            .unwrap_or_default();
        user.last_name = params
            .last_name
            .clone()
            .or_else(|| oauth.map(|p| p.last_name.clone()))
            .unwrap_or_default();
        user.display_name = format!("{} {}", user.first_name, user.last_name).trim().to_string();
        if oauth.is_some() {
            user.verified_at = Some(user.created_at);
        }
        if let Some(invite) = invite.as_ref().filter(|i| !i.system) {
            user.joined_from_invite = Some(invite.node_id);
        }

        let images = self.deps.images.clone();
        user.profile_image_path = match (params.profile_picture.as_deref(), oauth.and_then(|p| p.picture_url.as_deref())) {
            (Some(data), _) => self.call(cancel, "image store", images.save_base64(data)).await?,
            (None, Some(url)) => self.call(cancel, "image store", images.save_from_url(url)).await?,
            (None, None) => self.call(cancel, "image store", images.identicon(&user.username)).await?,
        };
        if let Some(data) = params.cover_picture.as_deref() {
            user.cover_image_path = self.call(cancel, "image store", images.save_base64(data)).await?;
        }

        let oauth = oauth.map(|p| OAuthAccount {
            provider: OAUTH_PROVIDER.to_string(),
            subject: p.subject.clone(),
            user_id: user.id,
        });
        Ok(NewAccount { user, invite, oauth })
    }

    /// Everything a signup writes, in one transaction.
    async fn commit_signup(&self, account: NewAccount, cancel: &CancellationToken) -> ApiResult<SignedUp> {
        let ledger = self.ledger;
        let agg = self.notifications.clone();
        let now = self.now();
        let session_id = self.new_id();
        let (initial_tx, inviter_tx) = (self.new_id(), self.new_id());

        self.write(cancel, move |s| {
            let NewAccount { user, invite, oauth } = account;
            s.insert_user(&user)?;
            if let Some(oauth) = &oauth {
                s.save_oauth_account(oauth)?;
            }
            s.remove_from_waitlist(&user.email)?;

            let inviter = invite.as_ref().filter(|i| !i.system).map(|i| i.node_id);
            let mut recorded = vec![agg.record_single(
                s,
                user.id,
                inviter,
                NotificationType::Introduction,
                None,
                now,
            )?];

            let mut follows = s.default_user_ids()?;
            follows.extend(inviter);
            for followee in follows.into_iter().filter(|id| *id != user.id) {
                s.follow(user.id, followee, now)?;
            }

            let channels = match invite.as_ref().and_then(|i| i.channel_id) {
                Some(channel_id) => vec![channel_id],
                None => s.default_channel_ids()?,
            };
            for channel_id in channels {
                s.join_channel(user.id, channel_id, now)?;
            }

            ledger.process(
                s,
                &Transfer::reward(CoinTransactionType::InitialBalance, user.id),
                initial_tx,
                now,
            )?;

            if let Some(invite) = &invite {
                if !s.decrement_invite_uses(invite.id)? {
                    return Err(ApiError::invalid_invite_code().into());
                }
                if invite.group_id.is_some() {
                    s.reassign_invite_group(invite.id, user.id)?;
                }
            }
            if let Some(inviter) = inviter {
                ledger.process(
                    s,
                    &Transfer::reward(CoinTransactionType::InviteAccepted, inviter),
                    inviter_tx,
                    now,
                )?;
                recorded.push(agg.record_single(
                    s,
                    inviter,
                    Some(user.id),
                    NotificationType::InviteAccepted,
                    None,
                    now,
                )?);
            }

            s.insert_session(session_id, user.id, now)?;
            let user = required(s.get_user(user.id)?, "user")?;
            let session = Session {
                id: session_id,
                user_id: user.id,
                user: user.clone(),
                created_at: now,
            };
            Ok(SignedUp {
                user,
                session,
                recorded,
                inviter,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("secret").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "secret"));
        assert!(!verify_password(&hash, "Secret"));
        assert!(!verify_password("not a hash", "secret"));
    }

    #[test]
    fn test_token_hash_is_hex_sha256() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(h, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }
}
