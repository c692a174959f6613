//! Session handling against a mock backend

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use querious_client::{ClientConfig, QueriousClient};
use querious_core::{Error, QueriousApi, Scope};

fn user_body() -> String {
    json!({
        "user": {
            "id": "user_1",
            "email": "ada@querious.app",
            "name": "Ada",
            "plan": "pro",
            "tokens_used": 1200,
            "token_limit": 500000,
            "active_documents_count": 4,
            "created_at": "2025-03-01T10:00:00.000000",
        },
        "providers": ["email"],
    })
    .to_string()
}

fn client_for(server: &ServerGuard) -> QueriousClient {
    QueriousClient::new(ClientConfig::new(server.url())).unwrap()
}

#[tokio::test]
async fn test_login_sets_session() {
    let mut server = Server::new_async().await;
    let login = server
        .mock("POST", "/api/auth/login")
        .match_body(Matcher::Json(json!({"email": "ada@querious.app", "password": "Secret123"})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "access_token=abc; Path=/; HttpOnly")
        .with_body(user_body())
        .create_async()
        .await;
    let me = server
        .mock("GET", "/api/auth/me")
        .match_header("cookie", Matcher::Regex("access_token=abc".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(user_body())
        .create_async()
        .await;

    let client = client_for(&server);
    let envelope = client.login("ada@querious.app", "Secret123").await.unwrap();
    assert_eq!(envelope.user.name, "Ada");

    let user = client.current_user().await.unwrap();
    assert_eq!(user.active_documents_count, 4);

    login.assert_async().await;
    me.assert_async().await;
}

#[tokio::test]
async fn test_login_rejected() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("POST", "/api/auth/login")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Invalid email or password"}"#)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.login("ada@querious.app", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m == "Invalid email or password"));

    refresh.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mut server = Server::new_async().await;
    let _expired = server
        .mock("GET", "/api/auth/me")
        .match_header("cookie", Matcher::Missing)
        .with_status(401)
        .with_body(r#"{"detail":"Token expired"}"#)
        .expect(2)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "access_token=fresh; Path=/; HttpOnly")
        .with_body(r#"{"message":"Tokens refreshed"}"#)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/api/auth/me")
        .match_header("cookie", Matcher::Regex("access_token=fresh".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(user_body())
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    let (first, second) = tokio::join!(client.me(), client.me());

    assert_eq!(first.unwrap().user.id, "user_1");
    assert_eq!(second.unwrap().user.id, "user_1");
    refresh.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn test_failed_refresh_expires_session() {
    let mut server = Server::new_async().await;
    let _me = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .with_status(401)
        .with_body(r#"{"detail":"Invalid refresh token"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.me().await.unwrap_err();
    assert!(matches!(err, Error::SessionExpired));
    assert!(err.requires_login());
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_retry_happens_only_once() {
    let mut server = Server::new_async().await;
    let me = server
        .mock("GET", "/api/auth/me")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;
    let _refresh = server
        .mock("POST", "/api/auth/refresh")
        .with_status(200)
        .with_body(r#"{"message":"Tokens refreshed"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    assert!(matches!(client.me().await, Err(Error::SessionExpired)));
    me.assert_async().await;
}

#[tokio::test]
async fn test_limit_refusal_maps_to_quota_error() {
    let mut server = Server::new_async().await;
    let _limits = server
        .mock("GET", "/api/upload-limits")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("scope_type".into(), "chat".into()),
            Matcher::UrlEncoded("scope_id".into(), "chat_1".into()),
        ]))
        .with_status(403)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"detail": {"error": "limit_reached", "resource": "documents", "limit": 3, "used": 3}})
                .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.upload_limits(&Scope::chat("chat_1")).await.unwrap_err();
    let limit = err.limit_reached().expect("quota error");
    assert_eq!(limit.resource, "documents");
    assert_eq!(limit.used, Some(3));
}

#[tokio::test]
async fn test_other_errors_carry_detail() {
    let mut server = Server::new_async().await;
    let _chat = server
        .mock("GET", "/api/chats/missing")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Chat not found"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.get_chat("missing").await.unwrap_err();
    assert_eq!(err.to_string(), "API error (404): Chat not found");
}

#[tokio::test]
async fn test_register_and_duplicate_email() {
    let mut server = Server::new_async().await;
    let created = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::Json(json!({
            "email": "grace@querious.app",
            "password": "Secret123",
            "name": "Grace",
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"Registration successful. Please check your email to verify your account."}"#)
        .create_async()
        .await;
    let _taken = server
        .mock("POST", "/api/auth/register")
        .match_body(Matcher::PartialJson(json!({"email": "ada@querious.app"})))
        .with_status(409)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Email already registered"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let outcome = client
        .register("grace@querious.app", "Secret123", "Grace")
        .await
        .unwrap();
    assert!(!outcome.restored);
    assert!(outcome.message.starts_with("Registration successful"));

    let err = client
        .register("ada@querious.app", "Secret123", "Ada")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status: 409, ref message } if message == "Email already registered"));

    created.assert_async().await;
}

#[tokio::test]
async fn test_resend_verification_sends_email_as_query() {
    let mut server = Server::new_async().await;
    let resend = server
        .mock("POST", "/api/auth/resend-verification")
        .match_query(Matcher::UrlEncoded("email".to_string(), "grace@querious.app".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"If the email exists and is unverified, a new verification link has been sent."}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let message = client.resend_verification("grace@querious.app").await.unwrap();
    assert!(message.starts_with("If the email exists"));

    resend.assert_async().await;
}

#[tokio::test]
async fn test_list_and_revoke_sessions() {
    let mut server = Server::new_async().await;
    let _list = server
        .mock("GET", "/api/auth/sessions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "sessions": [
                    {"id": "sess_1", "device_info": "querious-cli", "created_at": "2025-03-01T08:00:00", "expires_at": "2025-03-08T08:00:00", "is_current": true},
                    {"id": "sess_2", "device_info": null, "created_at": "2025-02-27T19:30:00", "expires_at": "2025-03-06T19:30:00", "is_current": false},
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let revoke = server
        .mock("DELETE", "/api/auth/sessions/sess_2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"Session revoked"}"#)
        .create_async()
        .await;
    let _gone = server
        .mock("DELETE", "/api/auth/sessions/sess_9")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Session not found"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let sessions = client.sessions().await.unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["sess_1", "sess_2"]);
    assert!(sessions[0].is_current);
    assert_eq!(sessions[1].device_info, None);

    client.revoke_session("sess_2").await.unwrap();
    let err = client.revoke_session("sess_9").await.unwrap_err();
    assert!(matches!(err, Error::Api { status: 404, ref message } if message == "Session not found"));

    revoke.assert_async().await;
}

#[tokio::test]
async fn test_logout_all() {
    let mut server = Server::new_async().await;
    let logout_all = server
        .mock("POST", "/api/auth/logout-all")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "access_token=; Path=/; Max-Age=0")
        .with_body(r#"{"message":"Logged out from all devices"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    client.logout_all().await.unwrap();

    logout_all.assert_async().await;
}

#[tokio::test]
async fn test_wrong_current_password_is_not_an_expired_session() {
    let mut server = Server::new_async().await;
    let _me = server
        .mock("GET", "/api/auth/me")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(user_body())
        .create_async()
        .await;
    let change = server
        .mock("PATCH", "/api/auth/password")
        .match_body(Matcher::Json(json!({
            "current_password": "wrong",
            "new_password": "Better456",
        })))
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"detail":"Current password is incorrect"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/api/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.change_password("wrong", "Better456").await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m == "Current password is incorrect"));

    change.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_change_password() {
    let mut server = Server::new_async().await;
    let _me = server
        .mock("GET", "/api/auth/me")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(user_body())
        .create_async()
        .await;
    let change = server
        .mock("PATCH", "/api/auth/password")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"message":"Password changed successfully"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    client.change_password("Secret123", "Better456").await.unwrap();

    change.assert_async().await;
}
