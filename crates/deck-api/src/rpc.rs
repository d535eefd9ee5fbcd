//! Method routing shared by the WebSocket gateway and the HTTP endpoint.
//!
//! Every call goes through the same steps: decode the params, log them
//! with secrets filtered, check their shape, resolve the session (unless
//! the method is public) and hand off to the [`ActionService`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use deck_gateway::FrameHandler;
use deck_gateway::connection::{FrameReply, SessionChange};
use deck_types::api::{NoParams, ResumeSessionParams, RpcParams};
use deck_types::error::{ApiError, ApiResult, ErrorKind};
use deck_types::events::{RequestFrame, ResponseFrame};
use deck_types::models::Session;

use crate::service::ActionService;

/// Methods callable without a session.
pub const PUBLIC_METHODS: &[&str] = &[
    "auth",
    "resumeSession",
    "resetPassword",
    "validateInviteCode",
    "addToWaitlist",
    "validateUsername",
];

pub fn is_public(method: &str) -> bool {
    PUBLIC_METHODS.contains(&method)
}

type Reply = (Value, SessionChange);

/// Decode, log and check one call's params. A missing payload reads as `{}`.
pub fn parse<P: RpcParams>(method: &str, data: Value) -> ApiResult<P> {
    let data = if data.is_null() { json!({}) } else { data };
    let params: P = serde_json::from_value(data)
        .map_err(|e| ApiError::invalid_input(format!("bad params for {}: {}", method, e)))?;
    debug!(
        "rpc {} {}",
        method,
        serde_json::to_string(&params.sanitized()).unwrap_or_default()
    );
    params.validate()?;
    Ok(params)
}

fn reply<T: Serialize>(result: ApiResult<T>) -> ApiResult<Reply> {
    let value = serde_json::to_value(result?).map_err(|e| {
        error!("failed to encode rpc result: {}", e);
        ApiError::internal()
    })?;
    Ok((value, SessionChange::Unchanged))
}

fn ack(result: ApiResult<()>) -> ApiResult<Reply> {
    result.map(|()| (json!({}), SessionChange::Unchanged))
}

fn started<T: Serialize>(result: ApiResult<(T, Session)>) -> ApiResult<Reply> {
    let (response, session) = result?;
    let (value, _) = reply(Ok(response))?;
    Ok((value, SessionChange::Started(session)))
}

pub struct RpcHandler {
    service: Arc<ActionService>,
}

impl RpcHandler {
    pub fn new(service: Arc<ActionService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ActionService> {
        &self.service
    }

    /// Run one method. `session_id` is re-resolved on every call so a
    /// blocked user or an ended session stops working immediately.
    pub async fn dispatch(
        &self,
        session_id: Option<Uuid>,
        method: &str,
        data: Value,
        cancel: &CancellationToken,
    ) -> ApiResult<(Value, SessionChange)> {
        let svc = &self.service;
        if is_public(method) {
            return match method {
                "auth" => started(svc.auth(parse(method, data)?, cancel).await),
                "resumeSession" => {
                    let params: ResumeSessionParams = parse(method, data)?;
                    started(svc.resume_session(params.session_id, cancel).await)
                }
                "resetPassword" => ack(svc.reset_password(parse(method, data)?, cancel).await),
                "validateInviteCode" => reply(svc.validate_invite_code(parse(method, data)?, cancel).await),
                "addToWaitlist" => ack(svc.add_to_waitlist(parse(method, data)?, cancel).await),
                "validateUsername" => reply(svc.validate_username(parse(method, data)?, cancel).await),
                _ => Err(ApiError::invalid_input(format!("unknown method {}", method))),
            };
        }

        let session_id = session_id.ok_or_else(ApiError::unauthenticated)?;
        let session = svc.session_for(session_id, cancel).await?;
        let s = &session;
        match method {
            "logout" => {
                parse::<NoParams>(method, data)?;
                svc.logout(s, cancel).await?;
                Ok((json!({}), SessionChange::Ended))
            }

            // Users
            "getUser" => reply(svc.get_user(s, parse(method, data)?, cancel).await),
            "updateSettings" => reply(svc.update_settings(s, parse(method, data)?, cancel).await),
            "registerDevice" => ack(svc.register_device(s, parse(method, data)?, cancel).await),
            "unregisterDevice" => ack(svc.unregister_device(s, parse(method, data)?, cancel).await),
            "getFollowingUsers" => reply(svc.get_following_users(s, parse(method, data)?, cancel).await),

            // Invites
            "newInvite" => reply(svc.new_invite(s, parse(method, data)?, cancel).await),
            "getInvites" => {
                parse::<NoParams>(method, data)?;
                reply(svc.get_invites(s, cancel).await)
            }
            "useInviteCode" => ack(svc.use_invite_code(s, parse(method, data)?, cancel).await),

            // Cards
            "getCards" => reply(svc.get_cards(s, parse(method, data)?, cancel).await),
            "getPopularCards" => reply(svc.get_popular_cards(s, parse(method, data)?, cancel).await),
            "getCard" => reply(svc.get_card(s, parse(method, data)?, cancel).await),
            "getThread" => reply(svc.get_thread(s, parse(method, data)?, cancel).await),
            "getPostsForUser" => reply(svc.get_posts_for_user(s, parse(method, data)?, cancel).await),
            "postCard" => reply(svc.post_card(s, parse(method, data)?, cancel).await),
            "deleteCard" => ack(svc.delete_card(s, parse(method, data)?, cancel).await),
            "reactToCard" => reply(svc.react_to_card(s, parse(method, data)?, cancel).await),
            "voteOnCard" => ack(svc.vote_on_card(s, parse(method, data)?, cancel).await),
            "tipCard" => reply(svc.tip_card(s, parse(method, data)?, cancel).await),
            "modifyCardScore" => ack(svc.modify_card_score(s, parse(method, data)?, cancel).await),
            "subscribeToCard" => ack(svc.subscribe_to_card(s, parse(method, data)?, cancel).await),
            "unsubscribeFromCard" => ack(svc.unsubscribe_from_card(s, parse(method, data)?, cancel).await),
            "getAnonymousHandle" => reply(svc.get_anonymous_handle(s, parse(method, data)?, cancel).await),
            "canAffordAnonymousPost" => {
                reply(svc.can_afford_anonymous_post(s, parse(method, data)?, cancel).await)
            }
            "getActionCosts" => {
                parse::<NoParams>(method, data)?;
                reply(Ok(svc.get_action_costs()))
            }
            "uploadImage" => reply(svc.upload_image(s, parse(method, data)?, cancel).await),
            "reportCard" => ack(svc.report_card(s, parse(method, data)?, cancel).await),
            "submitFeedback" => ack(svc.submit_feedback(s, parse(method, data)?).await),

            // Social graph
            "followUser" => ack(svc.follow_user(s, parse(method, data)?, cancel).await),
            "unfollowUser" => ack(svc.unfollow_user(s, parse(method, data)?, cancel).await),
            "muteUser" => ack(svc.mute_user(s, parse(method, data)?, cancel).await),
            "unmuteUser" => ack(svc.unmute_user(s, parse(method, data)?, cancel).await),
            "muteThread" => ack(svc.mute_thread(s, parse(method, data)?, cancel).await),
            "unmuteThread" => ack(svc.unmute_thread(s, parse(method, data)?, cancel).await),
            "blockUser" => ack(svc.block_user(s, parse(method, data)?, cancel).await),

            // Channels
            "createChannel" => reply(svc.create_channel(s, parse(method, data)?, cancel).await),
            "validateChannelName" => reply(svc.validate_channel_name(parse(method, data)?, cancel).await),
            "getChannel" => reply(svc.get_channel(s, parse(method, data)?, cancel).await),
            "getChannels" => reply(svc.get_channels(s, parse(method, data)?, cancel).await),
            "getCardsForChannel" => reply(svc.get_cards_for_channel(s, parse(method, data)?, cancel).await),
            "joinChannel" => ack(svc.join_channel(s, parse(method, data)?, cancel).await),
            "leaveChannel" => ack(svc.leave_channel(s, parse(method, data)?, cancel).await),
            "muteChannel" => ack(svc.mute_channel(s, parse(method, data)?, cancel).await),
            "unmuteChannel" => ack(svc.unmute_channel(s, parse(method, data)?, cancel).await),
            "updateChannelSubscription" => {
                ack(svc.update_channel_subscription(s, parse(method, data)?, cancel).await)
            }

            // Notifications
            "getNotifications" => reply(svc.get_notifications(s, parse(method, data)?, cancel).await),
            "updateNotifications" => ack(svc.update_notifications(s, parse(method, data)?, cancel).await),

            _ => Err(ApiError::invalid_input(format!("unknown method {}", method))),
        }
    }
}

fn log_failure(method: &str, e: &ApiError) {
    if e.code.is_client_error() {
        debug!("rpc {} rejected: {}", method, e);
    } else {
        warn!("rpc {} failed: {}", method, e);
    }
}

#[async_trait]
impl FrameHandler for RpcHandler {
    async fn handle_frame(
        &self,
        session: Option<Session>,
        frame: RequestFrame,
        cancel: CancellationToken,
    ) -> FrameReply {
        let session_id = session.map(|s| s.id);
        match self.dispatch(session_id, &frame.rpc, frame.data.clone(), &cancel).await {
            Ok((data, change)) => FrameReply {
                frame: ResponseFrame::ok(&frame, data),
                session: change,
            },
            Err(e) => {
                log_failure(&frame.rpc, &e);
                FrameReply::new(ResponseFrame::err(&frame, e))
            }
        }
    }
}

// -- HTTP --

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::InvalidInviteCode => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated | ErrorKind::WrongPassword | ErrorKind::ExpiredToken => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::Forbidden | ErrorKind::UserBlocked => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::DependencyFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: ApiError) -> Response {
    (status_for(e.code), Json(json!({ "error": e }))).into_response()
}

/// `POST /rpc/{method}` with the session id as a bearer token.
pub fn router(handler: Arc<RpcHandler>) -> Router {
    Router::new()
        .route("/rpc/{method}", post(http_rpc))
        .with_state(handler)
}

async fn http_rpc(
    State(handler): State<Arc<RpcHandler>>,
    Path(method): Path<String>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    body: Bytes,
) -> Response {
    let data = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v) => v,
            Err(e) => return error_response(ApiError::invalid_input(format!("body is not JSON: {}", e))),
        }
    };
    let session_id = match bearer {
        Some(TypedHeader(auth)) => match Uuid::parse_str(auth.token()) {
            Ok(id) => Some(id),
            Err(_) => return error_response(ApiError::unauthenticated()),
        },
        None => None,
    };

    // Dropping the request future (client went away) cancels the call.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match handler.dispatch(session_id, &method, data, &cancel).await {
        Ok((value, _)) => Json(value).into_response(),
        Err(e) => {
            log_failure(&method, &e);
            error_response(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deck_types::api::{AuthParams, CardParams, GetCardsParams};

    #[test]
    fn test_public_methods() {
        assert!(is_public("auth"));
        assert!(is_public("validateUsername"));
        assert!(!is_public("logout"));
        assert!(!is_public("getCards"));
    }

    #[test]
    fn test_parse_treats_null_as_empty() {
        let params: GetCardsParams = parse("getCards", Value::Null).unwrap();
        assert_eq!(params.page, 0);
        assert!(params.search.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_fields_and_bad_shapes() {
        let err = parse::<CardParams>("getCard", json!({ "cardId": "nope" })).unwrap_err();
        assert_eq!(err.code, ErrorKind::InvalidInput);
        let err = parse::<NoParams>("logout", json!({ "extra": 1 })).unwrap_err();
        assert_eq!(err.code, ErrorKind::InvalidInput);
    }

    #[test]
    fn test_parse_runs_validation() {
        let err = parse::<GetCardsParams>("getCards", json!({ "page": -1 })).unwrap_err();
        assert_eq!(err.code, ErrorKind::InvalidInput);
        let ok: AuthParams = parse("auth", json!({ "username": "chad", "password": "pw" })).unwrap();
        assert_eq!(ok.username.as_deref(), Some("chad"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InsufficientBalance), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::DependencyFailed), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unit_results_are_empty_objects() {
        let (value, change) = ack(Ok(())).unwrap();
        assert_eq!(value, json!({}));
        assert!(matches!(change, SessionChange::Unchanged));
    }
}
