//! Follow graph, channels, notifications and the RPC router.

mod common;

use serde_json::json;

use common::Harness;
use deck_api::RpcHandler;
use deck_db::migrations::GENERAL_CHANNEL_ID;
use deck_gateway::connection::SessionChange;
use deck_types::api::{
    BlockUserParams, CardParams, ChannelNameParams, ChannelParams, CreateChannelParams,
    GetChannelParams, GetChannelsParams, PageParams, PostCardParams, UpdateChannelSubscriptionParams,
    UpdateNotificationsParams, UserParams,
};
use deck_types::error::ErrorKind;
use deck_types::models::NotificationType;

#[tokio::test]
async fn follow_then_unfollow_leaves_nothing_behind() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let b = h.signup("bob").await;

    let params = UserParams { user_id: b.user_id };
    h.service.follow_user(&a, params.clone(), &h.cancel).await.unwrap();
    // following twice is a no-op
    h.service.follow_user(&a, params.clone(), &h.cancel).await.unwrap();
    assert!(h.store(|s| s.is_following(a.user_id, b.user_id)));
    let n = h
        .store(|s| s.latest_for_type(b.user_id, None, NotificationType::Follow, false))
        .expect("followee is notified");
    assert_eq!(h.store(|s| s.event_row_count(n.id)), 1);

    h.service.unfollow_user(&a, params, &h.cancel).await.unwrap();
    assert!(!h.store(|s| s.is_following(a.user_id, b.user_id)));
    assert!(
        h.store(|s| s.latest_for_type(b.user_id, None, NotificationType::Follow, false))
            .is_none()
    );
}

#[tokio::test]
async fn cannot_follow_yourself() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let err = h
        .service
        .follow_user(&a, UserParams { user_id: a.user_id }, &h.cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::InvalidInput);
}

#[tokio::test]
async fn blocking_unfollows() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let b = h.signup("bob").await;
    h.service
        .follow_user(&a, UserParams { user_id: b.user_id }, &h.cancel)
        .await
        .unwrap();
    let block = BlockUserParams {
        user_id: Some(b.user_id),
        alias_id: None,
        card_id: None,
    };
    h.service.block_user(&a, block, &h.cancel).await.unwrap();
    assert!(!h.store(|s| s.is_following(a.user_id, b.user_id)));
}

#[tokio::test]
async fn muted_thread_gets_no_reply_notifications() {
    let h = Harness::new();
    let owner = h.signup("owner").await;
    let chatty = h.signup("chatty").await;
    let root = h.post_text(&owner, "quiet please").await;

    h.service
        .mute_thread(&owner, CardParams { card_id: root }, &h.cancel)
        .await
        .unwrap();
    h.reply(&chatty, root, "hello", false).await;
    assert!(
        h.store(|s| s.latest_for_type(owner.user_id, Some(root), NotificationType::Reply, false))
            .is_none()
    );

    h.service
        .unmute_thread(&owner, CardParams { card_id: root }, &h.cancel)
        .await
        .unwrap();
    h.reply(&chatty, root, "hello again", false).await;
    assert!(
        h.store(|s| s.latest_for_type(owner.user_id, Some(root), NotificationType::Reply, false))
            .is_some()
    );
}

#[tokio::test]
async fn create_channel_charges_and_joins() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let params = CreateChannelParams {
        name: "RustFans".into(),
        description: "crabs".into(),
        is_private: false,
    };
    let created = h.service.create_channel(&a, params.clone(), &h.cancel).await.unwrap();
    assert_eq!(created.channel.channel.handle, "rustfans");
    assert!(created.channel.subscribed);
    assert_eq!(created.channel.member_count, 1);
    assert_eq!(created.new_balances.coin_balance, h.coins.initial_balance - h.coins.channel);

    h.settle().await;
    assert_eq!(*h.indexer.channels.lock().unwrap(), vec![created.channel.channel.id]);

    // same handle in another case is taken
    let again = CreateChannelParams {
        name: "rustfans".into(),
        ..params
    };
    let err = h.service.create_channel(&a, again, &h.cancel).await.unwrap_err();
    assert_eq!(err.code, ErrorKind::Conflict);
    let valid = h
        .service
        .validate_channel_name(ChannelNameParams { name: "RUSTFANS".into() }, &h.cancel)
        .await
        .unwrap();
    assert!(!valid.valid);
}

#[tokio::test]
async fn channel_costs_more_than_a_drained_balance() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    h.drain_coins(a.user_id);
    let params = CreateChannelParams {
        name: "broke".into(),
        ..CreateChannelParams::default()
    };
    let err = h.service.create_channel(&a, params, &h.cancel).await.unwrap_err();
    assert_eq!(err.code, ErrorKind::InsufficientBalance);
    assert!(h.store(|s| s.get_channel_by_handle("broke")).is_none());
}

#[tokio::test]
async fn join_is_idempotent() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let general = ChannelParams { channel_id: GENERAL_CHANNEL_ID };

    let before = h.store(|s| s.member_count(GENERAL_CHANNEL_ID));
    h.service.join_channel(&a, general.clone(), &h.cancel).await.unwrap();
    h.service.join_channel(&a, general.clone(), &h.cancel).await.unwrap();
    assert_eq!(h.store(|s| s.member_count(GENERAL_CHANNEL_ID)), before);

    h.service.mute_channel(&a, general.clone(), &h.cancel).await.unwrap();
    let view = h
        .service
        .get_channel(
            &a,
            GetChannelParams {
                channel_id: None,
                handle: Some("General".into()),
            },
            &h.cancel,
        )
        .await
        .unwrap();
    assert!(view.muted && view.subscribed);

    h.service.leave_channel(&a, general.clone(), &h.cancel).await.unwrap();
    h.service.leave_channel(&a, general, &h.cancel).await.unwrap();
    assert!(!h.store(|s| s.is_member(a.user_id, GENERAL_CHANNEL_ID)));
}

#[tokio::test]
async fn private_channels_stay_hidden() {
    let h = Harness::new();
    let owner = h.signup("owner").await;
    let outsider = h.signup("outsider").await;
    let created = h
        .service
        .create_channel(
            &owner,
            CreateChannelParams {
                name: "secret".into(),
                description: String::new(),
                is_private: true,
            },
            &h.cancel,
        )
        .await
        .unwrap();
    let channel_id = created.channel.channel.id;

    let err = h
        .service
        .get_channel(
            &outsider,
            GetChannelParams {
                channel_id: Some(channel_id),
                handle: None,
            },
            &h.cancel,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::NotFound);

    let post = PostCardParams {
        content: "let me in".into(),
        channel_id: Some(channel_id),
        ..PostCardParams::default()
    };
    let err = h.service.post_card(&outsider, post, &h.cancel).await.unwrap_err();
    assert_eq!(err.code, ErrorKind::Forbidden);

    let listed = h
        .service
        .get_channels(
            &owner,
            GetChannelsParams {
                only_subscribed: true,
                ..GetChannelsParams::default()
            },
            &h.cancel,
        )
        .await
        .unwrap();
    assert!(listed.channels.iter().any(|c| c.channel.id == channel_id));
}

#[tokio::test]
async fn update_channel_subscription_joins_and_mutes() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    h.service
        .leave_channel(&a, ChannelParams { channel_id: GENERAL_CHANNEL_ID }, &h.cancel)
        .await
        .unwrap();
    let params = UpdateChannelSubscriptionParams {
        channel_id: GENERAL_CHANNEL_ID,
        subscribed: true,
        muted: Some(true),
    };
    h.service.update_channel_subscription(&a, params, &h.cancel).await.unwrap();
    let infos = h.store(|s| s.channel_infos(a.user_id, &[GENERAL_CHANNEL_ID]));
    let info = &infos[&GENERAL_CHANNEL_ID];
    assert!(info.subscribed && info.muted);
}

#[tokio::test]
async fn notifications_page_and_seen() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    let b = h.signup("bob").await;
    h.service
        .follow_user(&b, UserParams { user_id: a.user_id }, &h.cancel)
        .await
        .unwrap();

    let page = h
        .service
        .get_notifications(&a, PageParams::default(), &h.cancel)
        .await
        .unwrap();
    assert!(!page.has_next_page);
    assert!(page.unseen_count >= 1);
    let follow = page
        .notifications
        .iter()
        .find(|n| n.kind == NotificationType::Follow)
        .expect("follow notification is listed");
    assert!(follow.message.contains("bob"));

    let mark = UpdateNotificationsParams {
        seen: true,
        opened: false,
        ids: Vec::new(),
    };
    h.service.update_notifications(&a, mark, &h.cancel).await.unwrap();
    let page = h
        .service
        .get_notifications(&a, PageParams::default(), &h.cancel)
        .await
        .unwrap();
    assert_eq!(page.unseen_count, 0);
    assert!(page.notifications.iter().all(|n| n.seen));
}

#[tokio::test]
async fn rpc_requires_a_session() {
    let h = Harness::new();
    let rpc = RpcHandler::new(h.service.clone());
    let err = rpc
        .dispatch(None, "getCards", json!({}), &h.cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthenticated);

    let err = rpc
        .dispatch(None, "noSuchMethod", json!({}), &h.cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn rpc_session_lifecycle() {
    let h = Harness::new();
    let rpc = RpcHandler::new(h.service.clone());
    let signup = json!({
        "username": "alice",
        "email": "alice@x",
        "password": "secret",
        "isSignup": true,
    });
    let (data, change) = rpc.dispatch(None, "auth", signup, &h.cancel).await.unwrap();
    let SessionChange::Started(session) = change else {
        panic!("auth should start a session");
    };
    assert_eq!(data["user"]["username"], "alice");
    assert_eq!(data["sessionId"], json!(session.id));

    let (costs, _) = rpc
        .dispatch(Some(session.id), "getActionCosts", serde_json::Value::Null, &h.cancel)
        .await
        .unwrap();
    assert_eq!(costs["channel"], json!(h.coins.channel));

    let (data, change) = rpc
        .dispatch(Some(session.id), "logout", json!({}), &h.cancel)
        .await
        .unwrap();
    assert_eq!(data, json!({}));
    assert!(matches!(change, SessionChange::Ended));

    let err = rpc
        .dispatch(Some(session.id), "getCards", json!({}), &h.cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn cancelled_reads_stop_early() {
    let h = Harness::new();
    let a = h.signup("alice").await;
    h.cancel.cancel();
    let err = h
        .service
        .get_notifications(&a, PageParams::default(), &h.cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorKind::Cancelled);
}
