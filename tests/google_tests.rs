//! Google provider against a mocked Google
//!
//! Covers the authorization decision end to end:
//! - construction requires a domain or a whitelist
//! - audience, domain and whitelist checks
//! - single-use codes, cancellation and revocation

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{CLIENT_ID, metrics, mount_token_endpoint, provider_config};
use idp_gate::metrics::{AuthMetrics, NoopMetrics};
use idp_gate::provider::{GoogleEndpoints, GoogleProvider, Provider};
use idp_gate::{Context, Token};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(
    server: &MockServer,
    domain: Option<&str>,
    whitelist: &[&str],
    metrics: Arc<dyn AuthMetrics>,
) -> GoogleProvider {
    let opts: Vec<(&str, &str)> = domain.map(|d| ("domain", d)).into_iter().collect();
    GoogleProvider::with_endpoints(
        &provider_config("google", &opts, whitelist),
        metrics,
        GoogleEndpoints::with_base(&server.uri()),
    )
    .unwrap()
}

async fn mount_tokeninfo(server: &MockServer, audience: &str) {
    Mock::given(method("POST"))
        .and(path("/tokeninfo"))
        .and(body_string_contains("access_token=at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issued_to": audience,
            "audience": audience,
            "scope": "https://www.googleapis.com/auth/userinfo.email",
            "expires_in": 3500
        })))
        .mount(server)
        .await;
}

async fn mount_userinfo(server: &MockServer, email: &str, hd: Option<&str>) {
    let mut body = json!({ "id": "1", "email": email, "verified_email": true });
    if let Some(hd) = hd {
        body["hd"] = json!(hd);
    }
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// No domain and no whitelist is a configuration error
#[test]
fn test_unconstrained_config_rejected() {
    let err = GoogleProvider::new(&provider_config("google", &[], &[]), Arc::new(NoopMetrics))
        .err()
        .unwrap();
    assert!(err.is_config());
}

/// Domain-restricted: example.com passes, other.com does not
#[tokio::test]
async fn test_domain_restriction() {
    let server = MockServer::start().await;
    mount_tokeninfo(&server, CLIENT_ID).await;
    mount_userinfo(&server, "alice@example.com", Some("example.com")).await;
    let (counts, sink) = metrics();

    let p = provider(&server, Some("example.com"), &[], sink);
    let ctx = Context::background();
    let token = Token::bearer("at-1");

    assert!(p.valid(&ctx, &token).await);
    assert_eq!(counts.valid_count("google"), 1);
    assert_eq!(p.email(&ctx, &token).await, "alice@example.com");
    assert_eq!(p.username(&ctx, &token).await, "alice");

    let other = MockServer::start().await;
    mount_tokeninfo(&other, CLIENT_ID).await;
    mount_userinfo(&other, "bob@other.com", Some("other.com")).await;
    let (counts, sink) = metrics();
    let p = provider(&other, Some("example.com"), &[], sink);

    assert!(!p.valid(&ctx, &token).await);
    assert_eq!(counts.valid_count("google"), 0);
}

/// A consumer account (no `hd`) never satisfies a domain restriction
#[tokio::test]
async fn test_missing_hosted_domain_rejected() {
    let server = MockServer::start().await;
    mount_tokeninfo(&server, CLIENT_ID).await;
    mount_userinfo(&server, "alice@example.com", None).await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    assert!(!p.valid(&Context::background(), &Token::bearer("at-1")).await);
}

/// A token minted for another client is rejected even if everything else
/// matches
#[tokio::test]
async fn test_audience_mismatch() {
    let server = MockServer::start().await;
    mount_tokeninfo(&server, "another-app.apps.googleusercontent.com").await;
    mount_userinfo(&server, "alice@example.com", Some("example.com")).await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    assert!(!p.valid(&Context::background(), &Token::bearer("at-1")).await);
}

/// Whitelist takes precedence over the domain
#[tokio::test]
async fn test_whitelist_precedence() {
    let server = MockServer::start().await;
    mount_tokeninfo(&server, CLIENT_ID).await;
    mount_userinfo(&server, "contractor@gmail.com", None).await;

    let ctx = Context::background();
    let token = Token::bearer("at-1");

    let listed = provider(&server, Some("example.com"), &["contractor@gmail.com"], Arc::new(NoopMetrics));
    assert!(listed.valid(&ctx, &token).await);

    let unlisted = provider(&server, Some("gmail.com"), &["someone@example.com"], Arc::new(NoopMetrics));
    assert!(!unlisted.valid(&ctx, &token).await);
}

/// An unverified address never matches the whitelist
#[tokio::test]
async fn test_unverified_email_not_whitelisted() {
    let server = MockServer::start().await;
    mount_tokeninfo(&server, CLIENT_ID).await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "2",
            "email": "ceo@example.com",
            "verified_email": false
        })))
        .mount(&server)
        .await;
    let (counts, sink) = metrics();

    let p = provider(&server, None, &["ceo@example.com"], sink);
    let ctx = Context::background();
    let token = Token::bearer("at-1");
    assert!(!p.valid(&ctx, &token).await);
    assert_eq!(p.email(&ctx, &token).await, "");
    assert_eq!(counts.valid_count("google"), 0);
}

/// Expired tokens are rejected without asking Google
#[tokio::test]
async fn test_expired_token_skips_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tokeninfo"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let token = Token::from_response("at-1".into(), None, None, Some(5), None);
    assert!(!p.valid(&Context::background(), &token).await);
}

/// tokeninfo errors fail closed
#[tokio::test]
async fn test_backend_error_fails_closed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tokeninfo"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_token",
            "error_description": "Invalid Value"
        })))
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    assert!(!p.valid(&Context::background(), &Token::bearer("at-1")).await);
}

/// Exchange succeeds once; replaying the code fails
#[tokio::test]
async fn test_exchange_code_is_single_use() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=4%2Fabc"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Bad Request"
        })))
        .mount(&server)
        .await;

    let (counts, sink) = metrics();
    let p = provider(&server, Some("example.com"), &[], sink);
    let ctx = Context::background();

    let token = p.exchange(&ctx, "4/abc").await.unwrap();
    assert_eq!(token.access_token, "at-1");
    assert!(token.is_valid());
    assert!(token.expires_at.is_some());

    let err = p.exchange(&ctx, "4/abc").await.unwrap_err();
    assert!(err.is_exchange());
    assert!(err.to_string().contains("invalid_grant"));
    assert_eq!(counts.exchange_count("google"), 1);
}

/// A token response without an access token is an exchange error
#[tokio::test]
async fn test_exchange_malformed_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token_type": "Bearer" })))
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let err = p.exchange(&Context::background(), "code").await.unwrap_err();
    assert!(err.is_exchange());
}

/// Cancelling the context during a slow tokeninfo call returns false
/// promptly
#[tokio::test]
async fn test_cancellation_during_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tokeninfo"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "audience": CLIENT_ID }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    mount_userinfo(&server, "alice@example.com", Some("example.com")).await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    assert!(!p.valid(&ctx, &Token::bearer("at-1")).await);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// A context deadline bounds the exchange too
#[tokio::test]
async fn test_deadline_during_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "at-1" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let ctx = Context::with_timeout(Duration::from_millis(100));
    let err = p.exchange(&ctx, "code").await.unwrap_err();
    assert!(err.is_context_done());
}

/// Revocation: success, already-invalid, and backend failure
#[tokio::test]
async fn test_revoke() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=at-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=at-gone"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_token" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=at-boom"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let ctx = Context::background();

    p.revoke(&ctx, &Token::bearer("at-1")).await.unwrap();
    p.revoke(&ctx, &Token::bearer("at-gone")).await.unwrap();
    let err = p.revoke(&ctx, &Token::bearer("at-boom")).await.unwrap_err();
    assert!(err.is_revoke());
}

/// Email degrades to empty when userinfo fails
#[tokio::test]
async fn test_email_empty_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let p = provider(&server, Some("example.com"), &[], Arc::new(NoopMetrics));
    let ctx = Context::background();
    let token = Token::bearer("at-1");
    assert_eq!(p.email(&ctx, &token).await, "");
    assert_eq!(p.username(&ctx, &token).await, "");
}

/// Full exchange-then-validate run against the mock
#[tokio::test]
async fn test_exchange_then_validate() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "/token", "at-1").await;
    mount_tokeninfo(&server, CLIENT_ID).await;
    mount_userinfo(&server, "alice@example.com", Some("example.com")).await;
    let (counts, sink) = metrics();

    let p = provider(&server, Some("example.com"), &[], sink);
    let ctx = Context::background();
    let token = p.exchange(&ctx, "code").await.unwrap();
    assert!(p.valid(&ctx, &token).await);
    assert!(p.valid(&ctx, &token).await);

    assert_eq!(counts.exchange_count("google"), 1);
    assert_eq!(counts.valid_count("google"), 2);
}
