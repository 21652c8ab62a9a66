//! Cross-crate flows: real dispatcher, authenticator, session store, and
//! HTTP clients, with both remote services mocked at the wire level.

use std::path::Path;
use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use notegram_accounts::AccountRegistry;
use notegram_bridge::{
    CommandDispatcher, DispatcherConfig, RelayRuntime, TelegramClient, TelegramConfig,
};
use notegram_instagram::{
    Authenticator, DeviceProfile, InstagramConfig, InstagramHttpClient, SessionState,
};
use notegram_session::SessionStore;

const OPERATOR: i64 = 42;

fn dispatcher_over(
    platform_server: &MockServer,
    state_dir: &Path,
    accounts: &str,
) -> CommandDispatcher {
    let registry = AccountRegistry::parse(accounts).expect("registry");
    let store = SessionStore::new(state_dir);
    let platform = Arc::new(
        InstagramHttpClient::new(InstagramConfig {
            api_base: platform_server.base_url(),
            request_timeout_ms: 2_000,
        })
        .expect("platform client"),
    );
    let authenticator = Arc::new(Authenticator::new(platform.clone(), store, 90));
    CommandDispatcher::new(registry, platform, authenticator, DispatcherConfig::default())
}

fn warm_session(
    state_dir: &Path,
    account_name: &str,
    username: &str,
    user_id: u64,
    authorization: &str,
) {
    let device = DeviceProfile::for_username(username);
    let session = SessionState::new(username, user_id, authorization, &device, 0);
    SessionStore::new(state_dir)
        .save(account_name, &session.to_serialized().expect("serialize"))
        .expect("seed session");
}

#[tokio::test]
async fn account_choice_flow_posts_over_the_wire() {
    let platform = MockServer::start();
    let state = tempfile::tempdir().expect("tempdir");
    warm_session(state.path(), "work", "work_ig", 42, "Bearer IGT:2:warm");

    let probe = platform.mock(|when, then| {
        when.method(GET)
            .path("/feed/timeline/")
            .header("authorization", "Bearer IGT:2:warm");
        then.status(200).json_body(json!({"status": "ok"}));
    });
    let create = platform.mock(|when, then| {
        when.method(POST)
            .path("/notes/create_note/")
            .header("authorization", "Bearer IGT:2:warm")
            .body_includes("text=Hello")
            .body_includes("audience=0");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let mut dispatcher = dispatcher_over(
        &platform,
        state.path(),
        "personal=personal_ig:pw1|work=work_ig:pw2",
    );

    let prompt = dispatcher.handle_message(OPERATOR, "/note Hello").await;
    assert!(prompt.contains("Which account"), "{prompt}");
    assert!(prompt.contains("2. work (@work_ig)"), "{prompt}");

    let reply = dispatcher.handle_message(OPERATOR, "2").await;
    assert_eq!(
        reply,
        "Posted the note to work (@work_ig) for mutual followers."
    );
    probe.assert_calls(1);
    create.assert_calls(1);
}

#[tokio::test]
async fn cold_two_factor_flow_persists_a_reusable_session() {
    let platform = MockServer::start();
    let state = tempfile::tempdir().expect("tempdir");

    let login = platform.mock(|when, then| {
        when.method(POST)
            .path("/accounts/login/")
            .body_includes("username=personal_ig");
        then.status(400).json_body(json!({
            "two_factor_required": true,
            "two_factor_info": {"two_factor_identifier": "tfid-9"}
        }));
    });
    let verify = platform.mock(|when, then| {
        when.method(POST)
            .path("/accounts/two_factor_login/")
            .body_includes("verification_code=123456")
            .body_includes("two_factor_identifier=tfid-9");
        then.status(200)
            .header("ig-set-authorization", "Bearer IGT:2:fresh")
            .json_body(json!({
                "status": "ok",
                "logged_in_user": {"pk": 7, "username": "personal_ig"}
            }));
    });
    let probe = platform.mock(|when, then| {
        when.method(GET)
            .path("/feed/timeline/")
            .header("authorization", "Bearer IGT:2:fresh");
        then.status(200).json_body(json!({"status": "ok"}));
    });
    let first_note = platform.mock(|when, then| {
        when.method(POST)
            .path("/notes/create_note/")
            .body_includes("text=Hello");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let mut dispatcher = dispatcher_over(&platform, state.path(), "personal=personal_ig:pw1");

    let prompt = dispatcher.handle_message(OPERATOR, "/note Hello").await;
    assert!(prompt.contains("verification code"), "{prompt}");

    let reply = dispatcher.handle_message(OPERATOR, "123456").await;
    assert_eq!(
        reply,
        "Posted the note to personal (@personal_ig) for mutual followers."
    );
    login.assert_calls(1);
    verify.assert_calls(1);
    first_note.assert_calls(1);

    let stored = SessionStore::new(state.path())
        .load("personal")
        .expect("load")
        .expect("session persisted");
    let session = SessionState::from_serialized(&stored).expect("parse");
    assert_eq!(session.username, "personal_ig");
    assert_eq!(session.authorization, "Bearer IGT:2:fresh");

    // A process restart reuses the stored session without another login.
    let second_note = platform.mock(|when, then| {
        when.method(POST)
            .path("/notes/create_note/")
            .body_includes("text=Again");
        then.status(200).json_body(json!({"status": "ok"}));
    });
    let mut restarted = dispatcher_over(&platform, state.path(), "personal=personal_ig:pw1");
    let reply = restarted.handle_message(OPERATOR, "/note Again").await;
    assert!(reply.contains("Posted the note"), "{reply}");
    login.assert_calls(1);
    second_note.assert_calls(1);
    probe.assert_calls(2);
}

#[tokio::test]
async fn rejected_session_is_renewed_once_mid_command() {
    let platform = MockServer::start();
    let state = tempfile::tempdir().expect("tempdir");
    warm_session(state.path(), "work", "work_ig", 42, "Bearer IGT:2:stale");

    platform.mock(|when, then| {
        when.method(GET)
            .path("/feed/timeline/")
            .header("authorization", "Bearer IGT:2:stale");
        then.status(200).json_body(json!({"status": "ok"}));
    });
    let rejected_post = platform.mock(|when, then| {
        when.method(POST)
            .path("/notes/create_note/")
            .header("authorization", "Bearer IGT:2:stale");
        then.status(400)
            .json_body(json!({"status": "fail", "message": "login_required"}));
    });
    let relogin = platform.mock(|when, then| {
        when.method(POST)
            .path("/accounts/login/")
            .body_includes("username=work_ig");
        then.status(200)
            .header("ig-set-authorization", "Bearer IGT:2:renewed")
            .json_body(json!({
                "status": "ok",
                "logged_in_user": {"pk": 42, "username": "work_ig"}
            }));
    });
    let retried_post = platform.mock(|when, then| {
        when.method(POST)
            .path("/notes/create_note/")
            .header("authorization", "Bearer IGT:2:renewed");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let mut dispatcher = dispatcher_over(&platform, state.path(), "work=work_ig:pw2");
    let reply = dispatcher.handle_message(OPERATOR, "/note Hello").await;

    assert_eq!(
        reply,
        "Posted the note to work (@work_ig) for mutual followers."
    );
    rejected_post.assert_calls(1);
    relogin.assert_calls(1);
    retried_post.assert_calls(1);

    let stored = SessionStore::new(state.path())
        .load("work")
        .expect("load")
        .expect("session present");
    let session = SessionState::from_serialized(&stored).expect("parse");
    assert_eq!(session.authorization, "Bearer IGT:2:renewed");
}

#[tokio::test]
async fn rate_limited_account_is_reported_without_relogin() {
    let platform = MockServer::start();
    let state = tempfile::tempdir().expect("tempdir");
    warm_session(state.path(), "work", "work_ig", 42, "Bearer IGT:2:warm");

    platform.mock(|when, then| {
        when.method(GET).path("/feed/timeline/");
        then.status(429).json_body(json!({"message": "rate_limited"}));
    });
    let login = platform.mock(|when, then| {
        when.method(POST).path("/accounts/login/");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let mut dispatcher = dispatcher_over(&platform, state.path(), "work=work_ig:pw2");
    let reply = dispatcher.handle_message(OPERATOR, "/note Hello").await;

    assert!(reply.contains("rate limiting"), "{reply}");
    login.assert_calls(0);
}

#[tokio::test]
async fn relay_round_trip_aggregates_current_notes() {
    let platform = MockServer::start();
    let telegram = MockServer::start();
    let state = tempfile::tempdir().expect("tempdir");
    warm_session(state.path(), "alpha", "alpha_ig", 42, "Bearer IGT:2:alpha");
    warm_session(state.path(), "beta", "beta_ig", 77, "Bearer IGT:2:beta");

    for token in ["Bearer IGT:2:alpha", "Bearer IGT:2:beta"] {
        platform.mock(|when, then| {
            when.method(GET)
                .path("/feed/timeline/")
                .header("authorization", token);
            then.status(200).json_body(json!({"status": "ok"}));
        });
    }
    platform.mock(|when, then| {
        when.method(GET)
            .path("/notes/get_notes/")
            .header("authorization", "Bearer IGT:2:alpha");
        then.status(200).json_body(json!({
            "status": "ok",
            "items": [{"id": 11, "text": "Morning", "user": {"pk": 42}}]
        }));
    });
    platform.mock(|when, then| {
        when.method(GET)
            .path("/notes/get_notes/")
            .header("authorization", "Bearer IGT:2:beta");
        then.status(200).json_body(json!({
            "status": "ok",
            "items": [{"id": 12, "text": "Someone else", "user": {"pk": 999}}]
        }));
    });
    telegram.mock(|when, then| {
        when.method(GET).path("/bottest-token/getUpdates");
        then.status(200).json_body(json!({
            "ok": true,
            "result": [{
                "update_id": 3,
                "message": {"chat": {"id": OPERATOR}, "text": "/current_note"}
            }]
        }));
    });
    let sent = telegram.mock(|when, then| {
        when.method(POST)
            .path("/bottest-token/sendMessage")
            .body_includes("1. alpha (@alpha_ig):")
            .body_includes("Morning")
            .body_includes("2. beta (@beta_ig): no active note");
        then.status(200).json_body(json!({"ok": true, "result": {}}));
    });

    let dispatcher = dispatcher_over(
        &platform,
        state.path(),
        "alpha=alpha_ig:pw|beta=beta_ig:pw",
    );
    let client = TelegramClient::new(TelegramConfig {
        api_base: telegram.base_url(),
        bot_token: "test-token".to_string(),
        poll_timeout_seconds: 0,
        request_timeout_ms: 2_000,
    })
    .expect("telegram client");
    let mut runtime = RelayRuntime::new(client, dispatcher, OPERATOR);

    runtime.run_once().await.expect("poll");
    sent.assert_calls(1);
}
