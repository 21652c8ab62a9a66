use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::device::DeviceProfile;
use crate::types::{
    AuthError, Audience, LoginOutcome, Note, NoteReply, NotesPlatform, PendingTwoFactor,
    PlatformError, SessionState,
};
use notegram_core::current_unix_timestamp;

pub const PRODUCTION_API_BASE: &str = "https://i.instagram.com/api/v1";

/// Device fingerprint presented on every call. Pixel 8 profile.
const ANDROID_USER_AGENT: &str = "Instagram 361.0.0.46.88 Android (33/13; 420dpi; 1080x2400; \
     Google/google; Pixel 8; shiba; shiba; en_US; 674675155)";

const BODY_SNIPPET_MAX_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct InstagramConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            api_base: PRODUCTION_API_BASE.to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// HTTP implementation of [`NotesPlatform`] against the Instagram-shaped
/// private web API. The base URL is overridable so tests can point it at a
/// local mock server.
#[derive(Debug, Clone)]
pub struct InstagramHttpClient {
    client: reqwest::Client,
    config: InstagramConfig,
}

impl InstagramHttpClient {
    pub fn new(config: InstagramConfig) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(ANDROID_USER_AGENT));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Shared login/2FA response handling: classifies the typed auth
    /// outcomes, otherwise builds a session from `logged_in_user` plus the
    /// `ig-set-authorization` response header.
    fn classify_login_response(
        &self,
        status: u16,
        authorization_header: Option<String>,
        body: &str,
        device: &DeviceProfile,
    ) -> Result<LoginOutcome, AuthError> {
        if status == 429 {
            return Err(AuthError::RateLimited);
        }

        let parsed: LoginResponseBody = serde_json::from_str(body).unwrap_or_default();
        if let Some(message) = parsed.message.as_deref() {
            match message {
                "rate_limited" | "please_wait_few_minutes" => return Err(AuthError::RateLimited),
                "bad_password" | "invalid_user" => return Err(AuthError::InvalidCredentials),
                "invalid_code" | "verification_code_expired" => {
                    return Err(AuthError::InvalidCode)
                }
                _ => {}
            }
        }
        if parsed.error_type.as_deref() == Some("bad_password") {
            return Err(AuthError::InvalidCredentials);
        }
        if parsed.error_type.as_deref() == Some("invalid_verification_code") {
            return Err(AuthError::InvalidCode);
        }
        if parsed.two_factor_required == Some(true) {
            let info = parsed
                .two_factor_info
                .filter(|info| !info.two_factor_identifier.is_empty())
                .ok_or_else(|| {
                    PlatformError::InvalidResponse(
                        "challenge response is missing two_factor_identifier".to_string(),
                    )
                })?;
            return Ok(LoginOutcome::TwoFactorRequired(PendingTwoFactor {
                username: info.username.unwrap_or_default(),
                two_factor_identifier: info.two_factor_identifier,
                device: device.clone(),
            }));
        }
        if !(200..300).contains(&status) {
            return Err(AuthError::Platform(PlatformError::HttpStatus {
                status,
                body: body_snippet(body),
            }));
        }

        let Some(user) = parsed.logged_in_user else {
            return Err(AuthError::Platform(PlatformError::InvalidResponse(
                "login response is missing logged_in_user".to_string(),
            )));
        };
        let Some(authorization) = authorization_header.filter(|value| !value.is_empty()) else {
            return Err(AuthError::Platform(PlatformError::InvalidResponse(
                "login response is missing the ig-set-authorization header".to_string(),
            )));
        };

        Ok(LoginOutcome::Session(SessionState::new(
            user.username,
            user.pk,
            authorization,
            device,
            current_unix_timestamp(),
        )))
    }

    /// Reads an authenticated-call response, mapping the session and
    /// rate-limit rejections to their typed errors.
    async fn read_authed_response(
        &self,
        response: reqwest::Response,
    ) -> Result<String, AuthError> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(PlatformError::from)?;

        if status == 429 {
            return Err(AuthError::RateLimited);
        }
        let message = body_message(&body);
        if matches!(
            message.as_deref(),
            Some("rate_limited") | Some("please_wait_few_minutes")
        ) {
            return Err(AuthError::RateLimited);
        }
        if status == 401 || status == 403 || message.as_deref() == Some("login_required") {
            return Err(AuthError::SessionRejected);
        }
        if !(200..300).contains(&status) {
            return Err(AuthError::Platform(PlatformError::HttpStatus {
                status,
                body: body_snippet(&body),
            }));
        }
        Ok(body)
    }
}

#[async_trait]
impl NotesPlatform for InstagramHttpClient {
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let device = DeviceProfile::for_username(username);
        let response = self
            .client
            .post(self.endpoint("accounts/login/"))
            .form(&[
                ("username", username),
                ("password", password),
                ("device_id", device.device_id.as_str()),
                ("phone_id", device.phone_id.as_str()),
                ("login_attempt_count", "0"),
            ])
            .send()
            .await
            .map_err(PlatformError::from)?;

        let status = response.status().as_u16();
        let authorization = header_value(&response, "ig-set-authorization");
        let body = response.text().await.map_err(PlatformError::from)?;
        let outcome = self.classify_login_response(status, authorization, &body, &device)?;

        // The challenge payload does not echo the username; carry ours so
        // the completion call can present it.
        Ok(match outcome {
            LoginOutcome::TwoFactorRequired(mut challenge) => {
                if challenge.username.is_empty() {
                    challenge.username = username.to_string();
                }
                LoginOutcome::TwoFactorRequired(challenge)
            }
            other => other,
        })
    }

    async fn complete_two_factor(
        &self,
        challenge: &PendingTwoFactor,
        code: &str,
    ) -> Result<SessionState, AuthError> {
        let response = self
            .client
            .post(self.endpoint("accounts/two_factor_login/"))
            .form(&[
                ("username", challenge.username.as_str()),
                ("verification_code", code),
                (
                    "two_factor_identifier",
                    challenge.two_factor_identifier.as_str(),
                ),
                ("device_id", challenge.device.device_id.as_str()),
            ])
            .send()
            .await
            .map_err(PlatformError::from)?;

        let status = response.status().as_u16();
        let authorization = header_value(&response, "ig-set-authorization");
        let body = response.text().await.map_err(PlatformError::from)?;
        match self.classify_login_response(status, authorization, &body, &challenge.device)? {
            LoginOutcome::Session(session) => Ok(session),
            LoginOutcome::TwoFactorRequired(_) => Err(AuthError::Platform(
                PlatformError::InvalidResponse(
                    "platform raised a second challenge during code verification".to_string(),
                ),
            )),
        }
    }

    async fn probe(&self, session: &SessionState) -> Result<(), AuthError> {
        let response = self
            .client
            .get(self.endpoint("feed/timeline/"))
            .header(AUTHORIZATION, &session.authorization)
            .send()
            .await
            .map_err(PlatformError::from)?;
        self.read_authed_response(response).await?;
        Ok(())
    }

    async fn post_note(
        &self,
        session: &SessionState,
        audience: Audience,
        text: &str,
    ) -> Result<(), AuthError> {
        let audience_value = audience.wire_value().to_string();
        let response = self
            .client
            .post(self.endpoint("notes/create_note/"))
            .header(AUTHORIZATION, &session.authorization)
            .form(&[("text", text), ("audience", audience_value.as_str())])
            .send()
            .await
            .map_err(PlatformError::from)?;
        let body = self.read_authed_response(response).await?;
        ensure_status_ok(&body)?;
        Ok(())
    }

    async fn get_current_note(&self, session: &SessionState) -> Result<Option<Note>, AuthError> {
        let response = self
            .client
            .get(self.endpoint("notes/get_notes/"))
            .header(AUTHORIZATION, &session.authorization)
            .send()
            .await
            .map_err(PlatformError::from)?;
        let body = self.read_authed_response(response).await?;

        let envelope: NotesEnvelope = serde_json::from_str(&body).map_err(PlatformError::from)?;
        let own_note = envelope
            .items
            .into_iter()
            .find(|item| item.user.pk == session.user_id)
            .map(|item| Note {
                id: item.id,
                text: item.text,
            });
        Ok(own_note)
    }

    async fn delete_note(&self, session: &SessionState) -> Result<bool, AuthError> {
        let Some(note) = self.get_current_note(session).await? else {
            return Ok(false);
        };

        let response = self
            .client
            .post(self.endpoint("notes/delete_note/"))
            .header(AUTHORIZATION, &session.authorization)
            .form(&[("id", note.id.to_string().as_str())])
            .send()
            .await
            .map_err(PlatformError::from)?;
        let body = self.read_authed_response(response).await?;
        ensure_status_ok(&body)?;
        Ok(true)
    }

    async fn recent_replies(
        &self,
        session: &SessionState,
        since_unix: u64,
    ) -> Result<Vec<NoteReply>, AuthError> {
        let response = self
            .client
            .get(self.endpoint("direct_v2/inbox/"))
            .header(AUTHORIZATION, &session.authorization)
            .send()
            .await
            .map_err(PlatformError::from)?;
        let body = self.read_authed_response(response).await?;

        let envelope: InboxEnvelope = serde_json::from_str(&body).map_err(PlatformError::from)?;
        let mut replies = Vec::new();
        for thread in envelope.inbox.threads {
            let usernames: HashMap<u64, String> = thread
                .users
                .into_iter()
                .map(|user| (user.pk, user.username))
                .collect();
            for item in thread.items {
                if item.replied_to_note_id.is_none() {
                    continue;
                }
                if item.user_id == session.user_id {
                    continue;
                }
                let created_at_unix = item.timestamp / 1_000_000;
                if created_at_unix < since_unix {
                    continue;
                }
                let text = if item.item_type == "text" {
                    item.text.unwrap_or_else(|| "[media]".to_string())
                } else {
                    "[media]".to_string()
                };
                replies.push(NoteReply {
                    sender_username: usernames
                        .get(&item.user_id)
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                    text,
                    created_at_unix,
                });
            }
        }
        replies.sort_by_key(|reply| reply.created_at_unix);
        Ok(replies)
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn body_message(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

fn body_snippet(body: &str) -> String {
    if body.chars().count() <= BODY_SNIPPET_MAX_CHARS {
        return body.to_string();
    }
    body.chars().take(BODY_SNIPPET_MAX_CHARS).collect()
}

fn ensure_status_ok(body: &str) -> Result<(), AuthError> {
    let status = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
    match status.as_deref() {
        Some("ok") => Ok(()),
        other => Err(AuthError::Platform(PlatformError::InvalidResponse(format!(
            "platform reported status {:?}",
            other.unwrap_or("missing")
        )))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponseBody {
    message: Option<String>,
    error_type: Option<String>,
    two_factor_required: Option<bool>,
    two_factor_info: Option<TwoFactorInfo>,
    logged_in_user: Option<LoggedInUser>,
}

#[derive(Debug, Deserialize)]
struct TwoFactorInfo {
    two_factor_identifier: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoggedInUser {
    pk: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct NotesEnvelope {
    #[serde(default)]
    items: Vec<NoteItem>,
}

#[derive(Debug, Deserialize)]
struct NoteItem {
    id: u64,
    text: String,
    user: NoteUser,
}

#[derive(Debug, Deserialize)]
struct NoteUser {
    pk: u64,
}

#[derive(Debug, Deserialize)]
struct InboxEnvelope {
    inbox: Inbox,
}

#[derive(Debug, Default, Deserialize)]
struct Inbox {
    #[serde(default)]
    threads: Vec<InboxThread>,
}

#[derive(Debug, Deserialize)]
struct InboxThread {
    #[serde(default)]
    users: Vec<ThreadUser>,
    #[serde(default)]
    items: Vec<ThreadItem>,
}

#[derive(Debug, Deserialize)]
struct ThreadUser {
    pk: u64,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ThreadItem {
    item_type: String,
    text: Option<String>,
    timestamp: u64,
    user_id: u64,
    replied_to_note_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn test_client(base_url: &str) -> InstagramHttpClient {
        InstagramHttpClient::new(InstagramConfig {
            api_base: base_url.to_string(),
            request_timeout_ms: 3_000,
        })
        .expect("client")
    }

    fn test_session() -> SessionState {
        let device = DeviceProfile::for_username("alice_ig");
        SessionState::new("alice_ig", 42, "Bearer IGT:2:token", &device, 1_700_000_000)
    }

    #[tokio::test]
    async fn login_success_builds_session_from_header_and_body() {
        let server = MockServer::start();
        let login = server.mock(|when, then| {
            when.method(POST)
                .path("/accounts/login/")
                .body_includes("username=alice_ig");
            then.status(200)
                .header("ig-set-authorization", "Bearer IGT:2:fresh")
                .json_body(json!({
                    "status": "ok",
                    "logged_in_user": { "pk": 42, "username": "alice_ig" }
                }));
        });

        let client = test_client(&server.base_url());
        let outcome = client.login("alice_ig", "pw").await.expect("login");
        let LoginOutcome::Session(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.username, "alice_ig");
        assert_eq!(session.user_id, 42);
        assert_eq!(session.authorization, "Bearer IGT:2:fresh");
        login.assert_calls(1);
    }

    #[tokio::test]
    async fn login_bad_password_maps_to_invalid_credentials() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/accounts/login/");
            then.status(400)
                .json_body(json!({ "status": "fail", "message": "bad_password" }));
        });

        let client = test_client(&server.base_url());
        let error = client.login("alice_ig", "wrong").await.expect_err("fail");
        assert!(matches!(error, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_challenge_carries_identifier_and_username() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/accounts/login/");
            then.status(400).json_body(json!({
                "status": "fail",
                "two_factor_required": true,
                "two_factor_info": { "two_factor_identifier": "tfid-123" }
            }));
        });

        let client = test_client(&server.base_url());
        let outcome = client.login("alice_ig", "pw").await.expect("login");
        let LoginOutcome::TwoFactorRequired(challenge) = outcome else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.two_factor_identifier, "tfid-123");
        assert_eq!(challenge.username, "alice_ig");
    }

    #[tokio::test]
    async fn login_http_429_maps_to_rate_limited() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/accounts/login/");
            then.status(429).body("slow down");
        });

        let client = test_client(&server.base_url());
        let error = client.login("alice_ig", "pw").await.expect_err("fail");
        assert!(matches!(error, AuthError::RateLimited));
    }

    #[tokio::test]
    async fn two_factor_completion_returns_session() {
        let server = MockServer::start();
        let verify = server.mock(|when, then| {
            when.method(POST)
                .path("/accounts/two_factor_login/")
                .body_includes("verification_code=123456")
                .body_includes("two_factor_identifier=tfid-123");
            then.status(200)
                .header("ig-set-authorization", "Bearer IGT:2:post2fa")
                .json_body(json!({
                    "status": "ok",
                    "logged_in_user": { "pk": 42, "username": "alice_ig" }
                }));
        });

        let client = test_client(&server.base_url());
        let challenge = PendingTwoFactor {
            username: "alice_ig".to_string(),
            two_factor_identifier: "tfid-123".to_string(),
            device: DeviceProfile::for_username("alice_ig"),
        };
        let session = client
            .complete_two_factor(&challenge, "123456")
            .await
            .expect("verification");
        assert_eq!(session.authorization, "Bearer IGT:2:post2fa");
        verify.assert_calls(1);
    }

    #[tokio::test]
    async fn two_factor_wrong_code_maps_to_invalid_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/accounts/two_factor_login/");
            then.status(400).json_body(json!({
                "status": "fail",
                "error_type": "invalid_verification_code"
            }));
        });

        let client = test_client(&server.base_url());
        let challenge = PendingTwoFactor {
            username: "alice_ig".to_string(),
            two_factor_identifier: "tfid-123".to_string(),
            device: DeviceProfile::for_username("alice_ig"),
        };
        let error = client
            .complete_two_factor(&challenge, "000000")
            .await
            .expect_err("fail");
        assert!(matches!(error, AuthError::InvalidCode));
    }

    #[tokio::test]
    async fn probe_rejection_maps_to_session_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/feed/timeline/");
            then.status(401)
                .json_body(json!({ "status": "fail", "message": "login_required" }));
        });

        let client = test_client(&server.base_url());
        let error = client.probe(&test_session()).await.expect_err("fail");
        assert!(matches!(error, AuthError::SessionRejected));
    }

    #[tokio::test]
    async fn probe_accepts_healthy_session() {
        let server = MockServer::start();
        let feed = server.mock(|when, then| {
            when.method(GET)
                .path("/feed/timeline/")
                .header("authorization", "Bearer IGT:2:token");
            then.status(200).json_body(json!({ "status": "ok" }));
        });

        let client = test_client(&server.base_url());
        client.probe(&test_session()).await.expect("probe");
        feed.assert_calls(1);
    }

    #[tokio::test]
    async fn post_note_sends_text_and_audience_selector() {
        let server = MockServer::start();
        let create = server.mock(|when, then| {
            when.method(POST)
                .path("/notes/create_note/")
                .body_includes("text=hello")
                .body_includes("audience=1");
            then.status(200).json_body(json!({ "status": "ok" }));
        });

        let client = test_client(&server.base_url());
        client
            .post_note(&test_session(), Audience::CloseFriends, "hello")
            .await
            .expect("post note");
        create.assert_calls(1);
    }

    #[tokio::test]
    async fn get_current_note_picks_own_entry() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notes/get_notes/");
            then.status(200).json_body(json!({
                "status": "ok",
                "items": [
                    { "id": 7, "text": "friend note", "user": { "pk": 9 } },
                    { "id": 8, "text": "my note", "user": { "pk": 42 } }
                ]
            }));
        });

        let client = test_client(&server.base_url());
        let note = client
            .get_current_note(&test_session())
            .await
            .expect("get note");
        assert_eq!(
            note,
            Some(Note {
                id: 8,
                text: "my note".to_string()
            })
        );
    }

    #[tokio::test]
    async fn get_current_note_none_when_absent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notes/get_notes/");
            then.status(200)
                .json_body(json!({ "status": "ok", "items": [] }));
        });

        let client = test_client(&server.base_url());
        let note = client
            .get_current_note(&test_session())
            .await
            .expect("get note");
        assert!(note.is_none());
    }

    #[tokio::test]
    async fn delete_note_without_active_note_skips_delete_call() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notes/get_notes/");
            then.status(200)
                .json_body(json!({ "status": "ok", "items": [] }));
        });
        let delete = server.mock(|when, then| {
            when.method(POST).path("/notes/delete_note/");
            then.status(200).json_body(json!({ "status": "ok" }));
        });

        let client = test_client(&server.base_url());
        let deleted = client.delete_note(&test_session()).await.expect("delete");
        assert!(!deleted);
        delete.assert_calls(0);
    }

    #[tokio::test]
    async fn delete_note_removes_active_note_by_id() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notes/get_notes/");
            then.status(200).json_body(json!({
                "status": "ok",
                "items": [ { "id": 8, "text": "my note", "user": { "pk": 42 } } ]
            }));
        });
        let delete = server.mock(|when, then| {
            when.method(POST)
                .path("/notes/delete_note/")
                .body_includes("id=8");
            then.status(200).json_body(json!({ "status": "ok" }));
        });

        let client = test_client(&server.base_url());
        let deleted = client.delete_note(&test_session()).await.expect("delete");
        assert!(deleted);
        delete.assert_calls(1);
    }

    #[tokio::test]
    async fn recent_replies_filters_window_and_own_messages() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/direct_v2/inbox/");
            then.status(200).json_body(json!({
                "status": "ok",
                "inbox": {
                    "threads": [{
                        "users": [ { "pk": 9, "username": "friend" } ],
                        "items": [
                            {
                                "item_type": "text",
                                "text": "nice note!",
                                "timestamp": 2_000_000_000_000_000u64,
                                "user_id": 9,
                                "replied_to_note_id": 8
                            },
                            {
                                "item_type": "text",
                                "text": "too old",
                                "timestamp": 1_000_000_000_000_000u64,
                                "user_id": 9,
                                "replied_to_note_id": 8
                            },
                            {
                                "item_type": "text",
                                "text": "my own reply",
                                "timestamp": 2_000_000_100_000_000u64,
                                "user_id": 42,
                                "replied_to_note_id": 8
                            },
                            {
                                "item_type": "media",
                                "text": null,
                                "timestamp": 2_000_000_200_000_000u64,
                                "user_id": 9,
                                "replied_to_note_id": 8
                            },
                            {
                                "item_type": "text",
                                "text": "unrelated dm",
                                "timestamp": 2_000_000_300_000_000u64,
                                "user_id": 9,
                                "replied_to_note_id": null
                            }
                        ]
                    }]
                }
            }));
        });

        let client = test_client(&server.base_url());
        let replies = client
            .recent_replies(&test_session(), 1_500_000_000)
            .await
            .expect("replies");
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].sender_username, "friend");
        assert_eq!(replies[0].text, "nice note!");
        assert_eq!(replies[1].text, "[media]");
    }
}
