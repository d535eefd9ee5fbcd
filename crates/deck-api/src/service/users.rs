use tokio_util::sync::CancellationToken;
use tracing::info;

use deck_types::api::{
    ExportedUser, GetFollowingUsersParams, GetUserParams, RegisterDeviceParams,
    UnregisterDeviceParams, UpdateSettingsParams, UsersResponse,
};
use deck_types::error::{ApiError, ApiResult};
use deck_types::events::PushEvent;
use deck_types::models::{Device, Session};

use super::auth::hash_password;
use super::{ActionService, required};
use crate::content::is_valid_username;
use crate::views::{export_user, export_users};

impl ActionService {
    /// A user by id or username; the session's own user when neither is given.
    pub async fn get_user(
        &self,
        session: &Session,
        params: GetUserParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ExportedUser> {
        let viewer = session.user_id;
        let found = self
            .read(cancel, move |s| {
                let user = match (params.user_id, params.username.as_deref()) {
                    (Some(id), _) => s.get_user(id)?,
                    (None, Some(name)) => s.get_user_by_username(name)?,
                    (None, None) => s.get_user(viewer)?,
                };
                match user {
                    Some(u) => {
                        let following = s.is_following(viewer, u.id)?;
                        Ok(Some(export_user(&u, viewer, following)))
                    }
                    None => Ok(None),
                }
            })
            .await?;
        found.ok_or_else(|| ApiError::not_found("user"))
    }

    pub async fn update_settings(
        &self,
        session: &Session,
        params: UpdateSettingsParams,
        cancel: &CancellationToken,
    ) -> ApiResult<ExportedUser> {
        let mut user = self.load_user(cancel, session.user_id).await?;

        if let Some(username) = params.username.as_deref().map(str::to_lowercase) {
            if username != user.username {
                if !is_valid_username(&username) {
                    return Err(ApiError::invalid_input("invalid username"));
                }
                let name = username.clone();
                if self.read(cancel, move |s| s.username_taken(&name)).await? {
                    return Err(ApiError::conflict("username is taken"));
                }
                user.username = username;
            }
        }
        if let Some(email) = params.email.as_deref().map(str::trim) {
            if !email.eq_ignore_ascii_case(&user.email) {
                if !email.contains('@') {
                    return Err(ApiError::invalid_input("invalid email"));
                }
                let mail = email.to_string();
                if self.read(cancel, move |s| s.get_user_by_email(&mail)).await?.is_some() {
                    return Err(ApiError::conflict("email is already registered"));
                }
                user.email = email.to_string();
            }
        }
        if let Some(password) = params.password.as_deref() {
            user.password_hash = hash_password(password)?;
        }
        if let Some(first) = params.first_name {
            user.first_name = first;
        }
        if let Some(last) = params.last_name {
            user.last_name = last;
        }
        user.display_name = format!("{} {}", user.first_name, user.last_name).trim().to_string();
        if let Some(bio) = params.bio {
            user.bio = bio;
        }
        if let Some(allow) = params.allow_email {
            user.allow_email = allow;
        }
        if let Some(disable) = params.disable_feed {
            user.disable_feed = disable;
        }

        let images = self.deps.images.clone();
        if let Some(data) = params.profile_picture.as_deref() {
            user.profile_image_path = self.call(cancel, "image store", images.save_base64(data)).await?;
        } else if params.remove_profile_picture {
            user.profile_image_path = self.call(cancel, "image store", images.identicon(&user.username)).await?;
        }
        if let Some(data) = params.cover_picture.as_deref() {
            user.cover_image_path = self.call(cancel, "image store", images.save_base64(data)).await?;
        } else if params.remove_cover_picture {
            user.cover_image_path.clear();
        }

        user.updated_at = self.now();
        let saved = user.clone();
        self.write(cancel, move |s| s.save_user(&saved)).await?;
        info!("user {} updated their settings", user.id);

        let exported = export_user(&user, user.id, false);
        self.push(user.id, PushEvent::UpdateUser(Box::new(exported.clone()))).await;
        self.index_user(user);
        Ok(exported)
    }

    pub async fn register_device(
        &self,
        session: &Session,
        params: RegisterDeviceParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            let mut user = required(s.get_user(user_id)?, "user")?;
            let device = Device {
                token: params.token.clone(),
                platform: params.platform,
            };
            if user.devices.get(&params.token) == Some(&device) {
                return Ok(());
            }
            user.devices.insert(params.token, device);
            user.updated_at = now;
            s.save_user(&user)
        })
        .await
    }

    pub async fn unregister_device(
        &self,
        session: &Session,
        params: UnregisterDeviceParams,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let (user_id, now) = (session.user_id, self.now());
        self.write(cancel, move |s| {
            let mut user = required(s.get_user(user_id)?, "user")?;
            if user.devices.remove(&params.token).is_none() {
                return Ok(());
            }
            user.updated_at = now;
            s.save_user(&user)
        })
        .await
    }

    pub async fn get_following_users(
        &self,
        session: &Session,
        params: GetFollowingUsersParams,
        cancel: &CancellationToken,
    ) -> ApiResult<UsersResponse> {
        let viewer = session.user_id;
        let user_id = params.user_id.unwrap_or(viewer);
        let users = self
            .read(cancel, move |s| {
                let following = s.get_following(user_id)?;
                export_users(s, &following, viewer)
            })
            .await?;
        Ok(UsersResponse { users })
    }
}
