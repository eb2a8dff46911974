//! Router-level tests over the in-memory backends.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use sso_api::{AppState, router};
use sso_core::auth::password::{BcryptHasher, PasswordHasher};
use sso_core::cache::Cache;
use sso_core::cache::memory::MemoryCache;
use sso_core::config::{
    ACCESS_TOKEN_TTL, AuthConfig, JwtConfig, ProvidersConfig, REFRESH_TOKEN_TTL, WebAuthnConfig,
};
use sso_core::email::LogMailer;
use sso_core::models::auth::{NewUser, User};
use sso_core::orchestrator::Authenticator;
use sso_core::store::UserStore;
use sso_core::store::memory::MemoryStore;
use tower::ServiceExt;

const PASSWORD: &str = "hunter2hunter2";
const UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0";

fn config() -> AuthConfig {
    AuthConfig {
        service_name: "sso-test".into(),
        jwt: JwtConfig {
            secret: "api-test-secret".into(),
            issuer: "sso-test".into(),
            access_ttl: ACCESS_TOKEN_TTL,
            refresh_ttl: REFRESH_TOKEN_TTL,
        },
        state_secret: "api-state-secret".into(),
        state_max_age: Duration::from_secs(300),
        success_url: "http://localhost/".into(),
        webauthn: WebAuthnConfig {
            rp_id: "localhost".into(),
            rp_name: "SSO".into(),
            origin: "http://localhost".into(),
            extra_origins: vec![],
            ceremony_ttl: Duration::from_secs(300),
        },
        providers: ProvidersConfig::default(),
        captcha_secret: None,
        code_ttl: Duration::from_secs(900),
        read_cache_ttl: Duration::from_secs(600),
        io_timeout: Duration::from_secs(1),
        bcrypt_cost: 4,
    }
}

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
}

async fn test_app() -> (TestApp, User) {
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let auth = Authenticator::from_config(
        config(),
        store.clone(),
        cache.clone(),
        Arc::new(LogMailer::new("sso-test")),
        reqwest::Client::new(),
    )
    .unwrap();
    let user = store
        .create_user(NewUser {
            email: "ada@example.com".into(),
            name: "Ada".into(),
            avatar: None,
            password_hash: Some(BcryptHasher::new(4).hash(PASSWORD).unwrap()),
        })
        .await
        .unwrap();
    let app = router(AppState::new(auth));
    (TestApp { app, store, cache }, user)
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn login(&self) -> Value {
        let (status, body) = self
            .send(post_json(
                "/auth/login",
                json!({ "email": "ada@example.com", "password": PASSWORD }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn client(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder
        .header("x-forwarded-for", "203.0.113.7")
        .header(header::USER_AGENT, UA)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    client(Request::post(uri))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    client(Request::builder().method(method).uri(uri))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn login_then_me() {
    let (t, user) = test_app().await;
    let tokens = t.login().await;
    assert_eq!(tokens["tokenType"], "Bearer");

    let access = tokens["accessToken"].as_str().unwrap();
    let (status, me) = t.send(authed("GET", "/auth/me", access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "ada@example.com");
    assert_eq!(me["id"], user.id.to_string());
    assert!(me.get("password_hash").is_none());
}

#[tokio::test]
async fn bad_credentials_share_one_response() {
    let (t, _) = test_app().await;
    let (s1, b1) = t
        .send(post_json(
            "/auth/login",
            json!({ "email": "ada@example.com", "password": "nope" }),
        ))
        .await;
    let (s2, b2) = t
        .send(post_json(
            "/auth/login",
            json!({ "email": "ghost@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2);
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let (t, _) = test_app().await;
    let req = client(Request::get("/auth/devices"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = t.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = t.send(authed("GET", "/auth/devices", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_rotates_over_http() {
    let (t, _) = test_app().await;
    let tokens = t.login().await;
    let old = tokens["refreshToken"].as_str().unwrap();

    let (status, rotated) = t
        .send(post_json("/auth/refresh", json!({ "refreshToken": old })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refreshToken"], tokens["refreshToken"]);

    let (status, _) = t
        .send(post_json("/auth/refresh", json!({ "refreshToken": old })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn deleting_the_device_kills_its_refresh_token() {
    let (t, _) = test_app().await;
    let tokens = t.login().await;
    let access = tokens["accessToken"].as_str().unwrap();

    let (status, devices) = t.send(authed("GET", "/auth/devices", access)).await;
    assert_eq!(status, StatusCode::OK);
    let id = devices[0]["id"].as_str().unwrap().to_string();
    assert_eq!(devices[0]["ip"], "203.0.113.7");

    let (status, _) = t
        .send(authed("DELETE", &format!("/auth/devices/{id}"), access))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t
        .send(post_json(
            "/auth/refresh",
            json!({ "refreshToken": tokens["refreshToken"] }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t
        .send(authed("GET", &format!("/auth/devices/{id}"), access))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_code_round_trip() {
    let (t, _) = test_app().await;
    let (status, body) = t
        .send(post_json(
            "/auth/code/send",
            json!({ "email": "ada@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "code_sent");
    assert!(body.get("accessToken").is_none());

    let code: u32 = t
        .cache
        .get("code:ada@example.com")
        .await
        .unwrap()
        .parse()
        .unwrap();
    let wrong = if code == 9999 { 1000 } else { code + 1 };
    let (status, _) = t
        .send(post_json(
            "/auth/code/check",
            json!({ "email": "ada@example.com", "code": wrong }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, tokens) = t
        .send(post_json(
            "/auth/code/check",
            json!({ "email": "ada@example.com", "code": code }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(tokens["accessToken"].is_string());

    // The device now holds a session, so the next request skips the code.
    let (_, body) = t
        .send(post_json(
            "/auth/code/send",
            json!({ "email": "ada@example.com", "password": PASSWORD }),
        ))
        .await;
    assert_eq!(body["status"], "issued");
    assert!(body["refreshToken"].is_string());
}

#[tokio::test]
async fn password_reset_over_http() {
    let (t, user) = test_app().await;
    let (status, _) = t
        .send(post_json(
            "/auth/password/forgot",
            json!({ "email": "ada@example.com" }),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let code: u32 = t
        .cache
        .get(&format!("recovery:{}", user.id))
        .await
        .unwrap()
        .parse()
        .unwrap();
    let (status, _) = t
        .send(post_json(
            "/auth/password/reset",
            json!({ "userId": user.id, "code": code, "password": "brand new secret" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let stored = t.store.get_user_by_id(user.id).await.unwrap().unwrap();
    BcryptHasher::default()
        .verify(stored.password_hash.as_deref().unwrap(), "brand new secret")
        .unwrap();
}

#[tokio::test]
async fn federation_routes_reject_unknown_input() {
    let (t, _) = test_app().await;
    let get = |uri: &str| client(Request::get(uri)).body(Body::empty()).unwrap();

    let (status, _) = t.send(get("/auth/oauth2/google/start")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.send(get("/auth/saml/google/start")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .send(get("/auth/oauth2/google/callback?code=abc&state=forged.state"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn passkey_endpoints() {
    let (t, _) = test_app().await;
    let (status, _) = t
        .send(post_json(
            "/auth/webauthn/login/begin",
            json!({ "email": "ada@example.com" }),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let tokens = t.login().await;
    let access = tokens["accessToken"].as_str().unwrap();
    let (status, challenge) = t
        .send(authed("POST", "/auth/webauthn/register/begin", access))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(challenge["publicKey"]["rp"]["id"], "localhost");

    let req = client(Request::post("/auth/webauthn/register/finish"))
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::from("{}"))
        .unwrap();
    let (status, _) = t.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, list) = t
        .send(authed("GET", "/auth/webauthn/credentials", access))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));
}
