use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{AnonymousAlias, Channel, CoinBalances, Invite, NotificationType, ReactionType};

/// Replacement text for secrets and payloads in logged parameters.
pub const FILTERED: &str = "[FILTERED]";

/// Contract every RPC input record satisfies: it can be logged safely and
/// checked for shape errors before any state is touched.
pub trait RpcParams: DeserializeOwned + Serialize + Clone + Send + 'static {
    /// Blank out credentials and large payloads.
    fn sanitize(&mut self) {}

    fn validate(&self) -> ApiResult<()> {
        Ok(())
    }

    fn sanitized(&self) -> Self {
        let mut copy = self.clone();
        copy.sanitize();
        copy
    }
}

fn filter(field: &mut Option<String>) {
    if field.is_some() {
        *field = Some(FILTERED.to_string());
    }
}

fn check_page(page: i64) -> ApiResult<()> {
    if page < 0 {
        return Err(ApiError::invalid_input("page must not be negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}

impl RpcParams for NoParams {}

// -- Auth --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthParams {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub reset_token: Option<String>,
    pub invite_token: Option<String>,
    #[serde(default)]
    pub is_signup: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_picture: Option<String>,
    pub cover_picture: Option<String>,
}

impl RpcParams for AuthParams {
    fn sanitize(&mut self) {
        filter(&mut self.password);
        filter(&mut self.access_token);
        filter(&mut self.reset_token);
        filter(&mut self.profile_picture);
        filter(&mut self.cover_picture);
    }

    fn validate(&self) -> ApiResult<()> {
        if self.access_token.is_none() && self.username.is_none() && self.email.is_none() {
            return Err(ApiError::invalid_input("username, email or access token required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub session_id: Uuid,
    pub user: ExportedUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResumeSessionParams {
    pub session_id: Uuid,
}

impl RpcParams for ResumeSessionParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmailParams {
    pub email: String,
}

impl RpcParams for EmailParams {
    fn validate(&self) -> ApiResult<()> {
        if !self.email.contains('@') {
            return Err(ApiError::invalid_input("invalid email"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InviteTokenParams {
    pub invite_token: String,
}

impl RpcParams for InviteTokenParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UsernameParams {
    pub username: String,
}

impl RpcParams for UsernameParams {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidResponse {
    pub valid: bool,
}

// -- Users --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetUserParams {
    pub user_id: Option<Uuid>,
    pub username: Option<String>,
}

impl RpcParams for GetUserParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateSettingsParams {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub cover_picture: Option<String>,
    #[serde(default)]
    pub remove_profile_picture: bool,
    #[serde(default)]
    pub remove_cover_picture: bool,
    pub allow_email: Option<bool>,
    pub disable_feed: Option<bool>,
}

impl RpcParams for UpdateSettingsParams {
    fn sanitize(&mut self) {
        filter(&mut self.password);
        filter(&mut self.profile_picture);
        filter(&mut self.cover_picture);
    }

    fn validate(&self) -> ApiResult<()> {
        if let Some(password) = &self.password {
            if password.len() < 6 {
                return Err(ApiError::invalid_input("password is too short"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterDeviceParams {
    pub token: String,
    pub platform: String,
}

impl RpcParams for RegisterDeviceParams {
    fn validate(&self) -> ApiResult<()> {
        if self.token.is_empty() {
            return Err(ApiError::invalid_input("device token required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnregisterDeviceParams {
    pub token: String,
}

impl RpcParams for UnregisterDeviceParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserParams {
    pub user_id: Uuid,
}

impl RpcParams for UserParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetFollowingUsersParams {
    pub user_id: Option<Uuid>,
}

impl RpcParams for GetFollowingUsersParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockUserParams {
    pub user_id: Option<Uuid>,
    pub alias_id: Option<Uuid>,
    /// Thread in which `alias_id` was seen.
    pub card_id: Option<Uuid>,
}

impl RpcParams for BlockUserParams {
    fn validate(&self) -> ApiResult<()> {
        match (self.user_id, self.alias_id, self.card_id) {
            (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
            _ => Err(ApiError::invalid_input("user id, or alias id with card id, required")),
        }
    }
}

/// A user as seen by a viewer. Private fields are only filled for the
/// viewer's own record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub profile_image_url: String,
    pub cover_image_url: String,
    pub is_verified: bool,
    pub is_following: bool,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coin_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_coin_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_intro_cards: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub users: Vec<ExportedUser>,
}

// -- Invites --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewInviteParams {
    pub channel_id: Option<Uuid>,
    pub remaining_uses: Option<i64>,
}

impl RpcParams for NewInviteParams {
    fn validate(&self) -> ApiResult<()> {
        if matches!(self.remaining_uses, Some(n) if n <= 0) {
            return Err(ApiError::invalid_input("remaining uses must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitesResponse {
    pub invites: Vec<Invite>,
}

// -- Cards --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetCardsParams {
    #[serde(default)]
    pub page: i64,
    pub search: Option<String>,
}

impl RpcParams for GetCardsParams {
    fn validate(&self) -> ApiResult<()> {
        check_page(self.page)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PageParams {
    #[serde(default)]
    pub page: i64,
}

impl RpcParams for PageParams {
    fn validate(&self) -> ApiResult<()> {
        check_page(self.page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardsResponse {
    pub cards: Vec<CardView>,
    pub has_next_page: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_card_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardParams {
    pub card_id: Uuid,
}

impl RpcParams for CardParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetThreadParams {
    pub card_id: Uuid,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub nested: bool,
}

impl RpcParams for GetThreadParams {
    fn validate(&self) -> ApiResult<()> {
        check_page(self.page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadResponse {
    pub card: CardView,
    pub replies: Vec<CardView>,
    pub has_next_page: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetPostsForUserParams {
    pub user_id: Uuid,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub include_replies: bool,
}

impl RpcParams for GetPostsForUserParams {
    fn validate(&self) -> ApiResult<()> {
        check_page(self.page)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostCardParams {
    pub content: String,
    pub url: Option<String>,
    pub reply_card_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    #[serde(default)]
    pub anonymous: bool,
    pub background_color: Option<String>,
    /// Base64 image data.
    pub background_image: Option<String>,
    pub background_image_url: Option<String>,
    /// Admins may post on behalf of another user.
    pub author_id: Option<Uuid>,
    #[serde(default)]
    pub is_intro_card: bool,
}

impl RpcParams for PostCardParams {
    fn sanitize(&mut self) {
        filter(&mut self.background_image);
    }

    fn validate(&self) -> ApiResult<()> {
        if self.content.trim().is_empty() {
            return Err(ApiError::invalid_input("content must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCardResponse {
    pub card: CardView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balances: Option<CoinBalances>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReactToCardParams {
    pub card_id: Uuid,
    /// `like`, `dislike`, or the legacy `boost`.
    pub reaction: String,
    #[serde(default)]
    pub undo: bool,
    /// Like under the user's alias in the card's thread.
    #[serde(default)]
    pub anonymous: bool,
}

impl RpcParams for ReactToCardParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactToCardResponse {
    /// Alias the like was recorded under, when anonymous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<AnonymousAlias>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VoteOnCardParams {
    pub card_id: Uuid,
    pub upvote: bool,
    #[serde(default)]
    pub undo: bool,
}

impl RpcParams for VoteOnCardParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TipCardParams {
    pub card_id: Uuid,
    pub amount: i64,
    #[serde(default)]
    pub anonymous: bool,
}

impl RpcParams for TipCardParams {
    fn validate(&self) -> ApiResult<()> {
        if self.amount <= 0 {
            return Err(ApiError::invalid_input("amount must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TipCardResponse {
    pub new_balances: CoinBalances,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ModifyCardScoreParams {
    pub card_id: Uuid,
    pub strength: f64,
}

impl RpcParams for ModifyCardScoreParams {
    fn validate(&self) -> ApiResult<()> {
        if !self.strength.is_finite() {
            return Err(ApiError::invalid_input("strength must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReplyTargetParams {
    pub reply_card_id: Option<Uuid>,
}

impl RpcParams for ReplyTargetParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousHandleResponse {
    pub alias: AnonymousAlias,
    pub was_last_used: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanAffordResponse {
    pub can_afford: bool,
    pub cost: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCosts {
    pub thread_alias: i64,
    pub post_alias: i64,
    pub channel: i64,
    pub units_per_coin: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadImageParams {
    pub image_data: String,
}

impl RpcParams for UploadImageParams {
    fn sanitize(&mut self) {
        self.image_data = FILTERED.to_string();
    }

    fn validate(&self) -> ApiResult<()> {
        if self.image_data.is_empty() {
            return Err(ApiError::invalid_input("image data required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReportCardParams {
    pub card_id: Uuid,
    #[serde(default)]
    pub reason: String,
}

impl RpcParams for ReportCardParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitFeedbackParams {
    pub feedback: String,
}

impl RpcParams for SubmitFeedbackParams {
    fn validate(&self) -> ApiResult<()> {
        if self.feedback.trim().is_empty() {
            return Err(ApiError::invalid_input("feedback must not be empty"));
        }
        Ok(())
    }
}

/// Who a card appears to be written by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub profile_image_url: String,
    pub is_anonymous: bool,
    pub is_following: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub card_id: Uuid,
    pub likes: i64,
    pub dislikes: i64,
    pub comments: i64,
    pub unique_commenters: i64,
    pub coins_earned: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardView {
    pub id: Uuid,
    pub content: String,
    pub url: String,
    pub background_color: String,
    pub background_image_url: String,
    pub channel_id: Option<Uuid>,
    pub thread_root_id: Option<Uuid>,
    pub thread_reply_id: Option<Uuid>,
    pub is_intro_card: bool,
    pub created_at: DateTime<Utc>,
    pub author: Author,
    pub viewer_reaction: Option<ReactionType>,
    pub subscribed: bool,
    pub engagement: Engagement,
}

// -- Channels --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChannelParams {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_private: bool,
}

impl RpcParams for CreateChannelParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelResponse {
    pub channel: ChannelView,
    pub new_balances: CoinBalances,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelNameParams {
    pub name: String,
}

impl RpcParams for ChannelNameParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetChannelParams {
    pub channel_id: Option<Uuid>,
    pub handle: Option<String>,
}

impl RpcParams for GetChannelParams {
    fn validate(&self) -> ApiResult<()> {
        if self.channel_id.is_none() && self.handle.is_none() {
            return Err(ApiError::invalid_input("channel id or handle required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetChannelsParams {
    #[serde(default)]
    pub only_subscribed: bool,
    #[serde(default)]
    pub only_postable: bool,
    #[serde(default)]
    pub hide_empty: bool,
}

impl RpcParams for GetChannelsParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChannelParams {
    pub channel_id: Uuid,
}

impl RpcParams for ChannelParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetCardsForChannelParams {
    pub channel_id: Uuid,
    #[serde(default)]
    pub page: i64,
}

impl RpcParams for GetCardsForChannelParams {
    fn validate(&self) -> ApiResult<()> {
        check_page(self.page)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateChannelSubscriptionParams {
    pub channel_id: Uuid,
    pub subscribed: bool,
    pub muted: Option<bool>,
}

impl RpcParams for UpdateChannelSubscriptionParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    #[serde(flatten)]
    pub channel: Channel,
    pub member_count: i64,
    pub subscribed: bool,
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelView>,
}

// -- Notifications --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateNotificationsParams {
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub opened: bool,
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

impl RpcParams for UpdateNotificationsParams {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationAction {
    OpenThread,
    OpenUserProfile,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub image_path: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub action: NotificationAction,
    pub action_data: serde_json::Map<String, serde_json::Value>,
    pub seen: bool,
    pub opened: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsResponse {
    pub notifications: Vec<ExportedNotification>,
    pub has_next_page: bool,
    pub unseen_count: i64,
}
