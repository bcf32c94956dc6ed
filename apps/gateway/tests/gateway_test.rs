mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::{self, Message};

use common::*;

async fn rejected_status(url: String) -> u16 {
    match tokio_tungstenite::connect_async(url).await {
        Err(tungstenite::Error::Http(resp)) => resp.status().as_u16(),
        Err(other) => panic!("expected HTTP rejection, got {other:?}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upgrade_without_token_is_refused() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    assert_eq!(rejected_status(format!("ws://{addr}/gateway")).await, 401);
}

#[tokio::test]
async fn upgrade_with_expired_or_forged_token_is_refused() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;

    let expired = mint_expired_token("usr_alice");
    assert_eq!(rejected_status(format!("ws://{addr}/gateway?token={expired}")).await, 401);

    let forged = mint_token_with_secret("usr_alice", "some-other-secret");
    assert_eq!(rejected_status(format!("ws://{addr}/gateway?token={forged}")).await, 401);

    assert!(!ctx.state.hub.is_online("usr_alice"));
}

#[tokio::test]
async fn ready_carries_connection_and_identity() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;

    let token = mint_token("usr_alice", "alice");
    let url = format!("ws://{addr}/gateway?token={token}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let ready = read_dispatch(&mut ws).await;

    assert_eq!(ready["op"], 0);
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["s"], 1);
    assert!(ready["d"]["connection_id"].as_str().unwrap().starts_with("conn_"));
    assert_eq!(ready["d"]["user"]["user_id"], "usr_alice");
    assert_eq!(ready["d"]["user"]["username"], "alice");
    assert_eq!(ready["d"]["user"]["display_name"], "ALICE");
    assert_eq!(ready["d"]["heartbeat_interval"], 41250);

    assert!(eventually(|| ctx.state.hub.is_online("usr_alice")).await);
}

#[tokio::test]
async fn authorization_header_is_accepted() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;

    let token = mint_token("usr_alice", "alice");
    let (_ws, ready) = connect_with_header(addr, &token).await;
    assert_eq!(ready["user"]["user_id"], "usr_alice");
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_heartbeat(&mut ws, 5).await;
    let ack = read_dispatch(&mut ws).await;
    assert_eq!(ack["op"], 6);
    assert_eq!(ack["d"]["ack"], 5);
}

#[tokio::test]
async fn unknown_opcode_closes_with_4001() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    ws.send(Message::Text(json!({ "op": 99, "d": {} }).to_string().into()))
        .await
        .unwrap();
    assert_eq!(expect_close(&mut ws).await, 4001);
    assert!(eventually(|| !ctx.state.hub.is_online("usr_alice")).await);
}

#[tokio::test]
async fn invalid_json_closes_with_4000() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(expect_close(&mut ws).await, 4000);
}

#[tokio::test]
async fn silent_connection_is_closed_with_4009() {
    let mut config = test_config();
    config.heartbeat_interval_ms = 200;
    let ctx = test_context_with(config);
    let addr = start_server(&ctx).await;

    let token = mint_token("usr_alice", "alice");
    let url = format!("ws://{addr}/gateway?token={token}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    // Stop polling so pings go unanswered.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(expect_close(&mut ws).await, 4009);
    assert!(eventually(|| !ctx.state.hub.is_online("usr_alice")).await);
}

// ---------------------------------------------------------------------------
// Errors on dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_event_reports_error_and_keeps_connection() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "send_message", json!({ "recipient_id": "usr_bob" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "BAD_REQUEST");
    assert_eq!(err["event"], "send_message");

    // Still usable.
    send_heartbeat(&mut ws, 1).await;
    let ack = read_dispatch(&mut ws).await;
    assert_eq!(ack["op"], 6);
}

#[tokio::test]
async fn blank_recipient_is_refused() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "send_message", json!({ "recipient_id": "   ", "content": "hi" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "BAD_REQUEST");
    assert!(ctx.store.messages().is_empty());
}

#[tokio::test]
async fn chat_events_over_the_limit_are_refused() {
    let mut config = test_config();
    config.rate_limit_max_events = 2;
    let ctx = test_context_with(config);
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    for _ in 0..3 {
        send_event(&mut ws, "typing_start", json!({ "recipient_id": "usr_bob" })).await;
    }
    let limited = expect_event(&mut ws, "rate_limit_exceeded").await;
    assert_eq!(limited["event"], "typing_start");
    assert!(limited["retry_after_ms"].as_u64().unwrap() > 0);

    // Heartbeats are not chat events.
    send_heartbeat(&mut ws, 9).await;
    let ack = read_dispatch(&mut ws).await;
    assert_eq!(ack["d"]["ack"], 9);
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_reaches_live_recipient() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    send_event(
        &mut alice,
        "send_message",
        json!({ "recipient_id": "usr_bob", "content": "hello bob", "client_ref": "tmp-1" }),
    )
    .await;

    let incoming = expect_event(&mut bob, "new_message").await;
    assert_eq!(incoming["content"], "hello bob");
    assert_eq!(incoming["sender_id"], "usr_alice");
    assert_eq!(incoming["sender"]["username"], "alice");
    assert_eq!(incoming["conversation_id"], "usr_alice_usr_bob");

    let sent = expect_event(&mut alice, "message_sent").await;
    assert_eq!(sent["client_ref"], "tmp-1");
    assert_eq!(sent["message"]["id"], incoming["id"]);
    assert_eq!(sent["message"]["delivered"], true);

    // Bob was live, so no push for the default preference.
    let id: i64 = incoming["id"].as_str().unwrap().parse().unwrap();
    assert!(ctx.store.message(id).unwrap().delivered);
    assert_eq!(ctx.push.pushed_to("usr_bob"), 0);
}

#[tokio::test]
async fn offline_recipient_reads_message_later() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;

    send_event(
        &mut alice,
        "send_message",
        json!({ "recipient_id": "usr_carol", "content": "are you there?" }),
    )
    .await;
    let sent = expect_event(&mut alice, "message_sent").await;
    assert_eq!(sent["message"]["delivered"], false);
    let message_id = sent["message"]["id"].as_str().unwrap().to_string();

    assert!(eventually(|| ctx.push.pushed_to("usr_carol") == 1).await);
    assert!(eventually(|| ctx.store.notifications_for("usr_carol").len() == 1).await);
    let notifications = ctx.store.notifications_for("usr_carol");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].payload["preview"], "are you there?");

    let (mut carol, _) = connect(addr, "usr_carol").await;
    send_event(&mut carol, "message_read", json!({ "message_id": message_id })).await;

    let receipt = expect_event(&mut alice, "message_read").await;
    assert_eq!(receipt["message_ids"], json!([message_id]));
    assert_eq!(receipt["reader_id"], "usr_carol");
    assert_eq!(receipt["conversation_id"], "usr_alice_usr_carol");
}

#[tokio::test]
async fn typing_indicator_is_relayed() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    send_event(&mut alice, "typing_start", json!({ "recipient_id": "usr_bob" })).await;
    let typing = expect_event(&mut bob, "user_typing").await;
    assert_eq!(typing["user_id"], "usr_alice");
    assert_eq!(typing["typing"], true);

    send_event(&mut alice, "typing_stop", json!({ "recipient_id": "usr_bob" })).await;
    let typing = expect_event(&mut bob, "user_typing").await;
    assert_eq!(typing["typing"], false);
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn call_flow_between_live_users() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    send_event(&mut alice, "call_user", json!({ "callee_id": "usr_bob", "kind": "video" })).await;
    let initiated = expect_event(&mut alice, "call_initiated").await;
    let call_id = initiated["call"]["id"].as_str().unwrap().to_string();
    assert_eq!(initiated["call"]["status"], "calling");

    let ring = expect_event(&mut bob, "incoming_call").await;
    assert_eq!(ring["call_id"], call_id.as_str());
    assert_eq!(ring["kind"], "video");
    assert_eq!(ring["caller"]["user_id"], "usr_alice");

    send_event(&mut bob, "call_accepted", json!({ "call_id": call_id })).await;
    let accepted = expect_event(&mut alice, "call_accepted").await;
    assert_eq!(accepted["call_id"], call_id.as_str());

    let sdp = json!({ "type": "offer", "sdp": "v=0" });
    send_event(&mut alice, "offer", json!({ "call_id": call_id, "payload": sdp.clone() })).await;
    let offer = expect_event(&mut bob, "offer").await;
    assert_eq!(offer["payload"], sdp);
    assert_eq!(offer["from_user_id"], "usr_alice");

    send_event(&mut alice, "call_ended", json!({ "call_id": call_id })).await;
    let ended = expect_event(&mut bob, "call_ended").await;
    assert_eq!(ended["status"], "ended");
    assert_eq!(ended["ended_by"], "usr_alice");

    assert!(eventually(|| ctx
        .store
        .call(&call_id)
        .is_some_and(|c| c.status.as_str() == "ended"))
    .await);
}

#[tokio::test]
async fn calling_offline_user_is_missed() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;

    send_event(&mut alice, "call_user", json!({ "callee_id": "usr_bob" })).await;
    let ended = expect_event(&mut alice, "call_ended").await;
    assert_eq!(ended["status"], "missed");
    assert_eq!(ended["reason"], "unavailable");

    assert!(eventually(|| ctx.store.notifications_for("usr_bob").len() == 1).await);
    let missed = ctx.store.notifications_for("usr_bob");
    assert_eq!(missed[0].kind.as_str(), "missed_call");
    assert_eq!(missed[0].payload["caller_username"], "alice");
}

#[tokio::test]
async fn calling_busy_user_reports_invalid_state() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;
    let (mut carol, _) = connect(addr, "usr_carol").await;

    send_event(&mut alice, "call_user", json!({ "callee_id": "usr_bob" })).await;
    expect_event(&mut bob, "incoming_call").await;

    send_event(&mut carol, "call_user", json!({ "callee_id": "usr_bob" })).await;
    let err = expect_event(&mut carol, "error").await;
    assert_eq!(err["code"], "INVALID_STATE");
    assert_eq!(err["event"], "call_user");
}

#[tokio::test]
async fn caller_dropping_ends_ringing_call() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    send_event(&mut alice, "call_user", json!({ "callee_id": "usr_bob" })).await;
    let ring = expect_event(&mut bob, "incoming_call").await;

    alice.close(None).await.unwrap();
    let ended = expect_event(&mut bob, "call_ended").await;
    assert_eq!(ended["call_id"], ring["call_id"]);
    assert_eq!(ended["reason"], "disconnected");
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn joining_unknown_stream_is_not_found() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "join_stream_room", json!({ "stream_id": "str_nope" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "NOT_FOUND");
}

#[tokio::test]
async fn leaving_unjoined_rooms_is_not_found() {
    let ctx = test_context();
    add_live_stream(&ctx.store, "str_live");
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "leave_stream_room", json!({ "stream_id": "str_never" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "NOT_FOUND");
    assert_eq!(err["event"], "leave_stream_room");

    send_event(&mut ws, "leave_stream_room", json!({ "stream_id": "str_live" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "NOT_FOUND");

    send_event(&mut ws, "leave_conversation", json!({ "user_id": "usr_bob" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "NOT_FOUND");
    assert_eq!(err["event"], "leave_conversation");
}

#[tokio::test]
async fn joined_rooms_can_be_left() {
    let ctx = test_context();
    add_live_stream(&ctx.store, "str_live");
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "join_stream_room", json!({ "stream_id": "str_live" })).await;
    expect_event(&mut ws, "viewer_count_changed").await;
    send_event(&mut ws, "join_conversation", json!({ "user_id": "usr_bob" })).await;
    send_event(&mut ws, "leave_conversation", json!({ "user_id": "usr_bob" })).await;
    send_event(&mut ws, "leave_stream_room", json!({ "stream_id": "str_live" })).await;

    assert_no_event(&mut ws, "error", Duration::from_millis(300)).await;
    assert_eq!(ctx.state.streams.viewer_count("str_live"), 0);
}

#[tokio::test]
async fn stream_chat_requires_membership() {
    let ctx = test_context();
    add_live_stream(&ctx.store, "str_live");
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "stream_chat_message", json!({ "stream_id": "str_live", "content": "hi" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "INVALID_STATE");
}

#[tokio::test]
async fn stream_chat_reaches_other_viewers() {
    let ctx = test_context();
    add_live_stream(&ctx.store, "str_live");
    let addr = start_server(&ctx).await;
    let (mut alice, _) = connect(addr, "usr_alice").await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    send_event(&mut alice, "join_stream_room", json!({ "stream_id": "str_live" })).await;
    expect_event(&mut alice, "viewer_count_changed").await;
    send_event(&mut bob, "join_stream_room", json!({ "stream_id": "str_live" })).await;
    let count = expect_event(&mut bob, "viewer_count_changed").await;
    assert_eq!(count["viewer_count"], 2);

    send_event(
        &mut alice,
        "stream_chat_message",
        json!({ "stream_id": "str_live", "content": "great stream", "kind": "comment" }),
    )
    .await;
    let chat = expect_event(&mut bob, "stream_chat_message").await;
    assert_eq!(chat["content"], "great stream");
    assert_eq!(chat["user"]["user_id"], "usr_alice");
    assert_eq!(chat["persisted"], true);
    assert_eq!(ctx.store.comments("str_live").len(), 1);

    send_event(
        &mut bob,
        "stream_reaction",
        json!({ "stream_id": "str_live", "reaction": "heart", "client_id": "r-1" }),
    )
    .await;
    let reaction = expect_event(&mut alice, "stream_reaction").await;
    assert_eq!(reaction["reaction"], "heart");
    assert_eq!(reaction["client_id"], "r-1");
}

#[tokio::test]
async fn viewer_lost_to_heartbeat_timeout_updates_count() {
    let mut config = test_config();
    config.heartbeat_interval_ms = 300;
    let ctx = test_context_with(config);
    add_live_stream(&ctx.store, "str_live");
    let addr = start_server(&ctx).await;

    let (mut silent, _) = connect(addr, "usr_silent").await;
    send_event(&mut silent, "join_stream_room", json!({ "stream_id": "str_live" })).await;
    let count = expect_event(&mut silent, "viewer_count_changed").await;
    assert_eq!(count["viewer_count"], 1);

    let (mut viewer, _) = connect(addr, "usr_viewer").await;
    send_event(&mut viewer, "join_stream_room", json!({ "stream_id": "str_live" })).await;
    let count = expect_event(&mut viewer, "viewer_count_changed").await;
    assert_eq!(count["viewer_count"], 2);

    // `viewer` keeps reading, and so keeps answering pings; `silent` does not.
    let count = expect_event(&mut viewer, "viewer_count_changed").await;
    assert_eq!(count["viewer_count"], 1);
    assert_eq!(expect_close(&mut silent).await, 4009);
    assert_eq!(ctx.state.streams.viewer_count("str_live"), 1);
    assert!(eventually(|| ctx.store.stream("str_live").is_some_and(|s| s.peak_viewers >= 2)).await);
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn followers_see_status_changes() {
    let ctx = test_context();
    ctx.store.add_follower("usr_alice", "usr_bob");
    let addr = start_server(&ctx).await;
    let (mut bob, _) = connect(addr, "usr_bob").await;

    let (mut alice, _) = connect(addr, "usr_alice").await;
    let online = expect_event(&mut bob, "user_status_changed").await;
    assert_eq!(online["user_id"], "usr_alice");
    assert_eq!(online["status"], "online");

    send_event(&mut alice, "user_status_update", json!({ "status": "away" })).await;
    let away = expect_event(&mut bob, "user_status_changed").await;
    assert_eq!(away["status"], "away");

    alice.close(None).await.unwrap();
    let offline = expect_event(&mut bob, "user_status_changed").await;
    assert_eq!(offline["status"], "offline");
    assert!(eventually(|| ctx.store.presence("usr_alice").is_some_and(|(online, _)| !online)).await);
}

#[tokio::test]
async fn second_connection_keeps_user_online() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut first, _) = connect(addr, "usr_alice").await;
    let (_second, _) = connect(addr, "usr_alice").await;
    assert!(eventually(|| ctx.state.hub.connections_for("usr_alice").len() == 2).await);

    first.close(None).await.unwrap();
    while let Some(Ok(_)) = first.next().await {}
    assert!(eventually(|| ctx.state.hub.connections_for("usr_alice").len() == 1).await);
    assert!(ctx.state.hub.is_online("usr_alice"));
}

#[tokio::test]
async fn explicit_offline_status_is_rejected() {
    let ctx = test_context();
    let addr = start_server(&ctx).await;
    let (mut ws, _) = connect(addr, "usr_alice").await;

    send_event(&mut ws, "user_status_update", json!({ "status": "offline" })).await;
    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["code"], "BAD_REQUEST");
    assert!(ctx.state.hub.is_online("usr_alice"));
}
