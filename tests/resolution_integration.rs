//! End-to-end credential resolution against a mock host
//!
//! Tests the full flow: router -> secret store -> assertion -> host exchange
//! -> token cache

use chrono::{Duration, Utc};
use gh_app_auth::clock::SystemClock;
use gh_app_auth::engine::Engine;
use gh_app_auth::host::{GitHubClient, HostConfig};
use gh_app_auth::storage::{Backend, MemoryBackend, SecretKind, SecretStore};
use gh_app_auth::{Identity, KeySource, Secret, DEFAULT_USERNAME};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_KEY: &str = include_str!("fixtures/app_key_pkcs1.pem");
const APP_PUBLIC_KEY: &str = include_str!("fixtures/app_key_public.pem");

fn token_response(token: &str) -> ResponseTemplate {
    let expires_at = (Utc::now() + Duration::hours(1)).to_rfc3339();
    ResponseTemplate::new(201).set_body_json(json!({
        "token": token,
        "expires_at": expires_at,
    }))
}

async fn engine_for(server: &MockServer, identities: Vec<Identity>) -> Engine {
    let secrets = Arc::new(SecretStore::new(
        Arc::new(MemoryBackend::new(Backend::Encrypted)),
        Arc::new(MemoryBackend::new(Backend::File)),
    ));
    for identity in &identities {
        if identity.as_app().is_some() {
            secrets
                .store(&identity.name, SecretKind::PrivateKey, &Secret::new(APP_KEY))
                .await
                .unwrap();
        }
    }

    let host = GitHubClient::new(&HostConfig {
        api_url: Some(server.uri().parse().unwrap()),
        request_timeout: Some(std::time::Duration::from_secs(5)),
    })
    .unwrap();

    Engine::new(identities, secrets, Arc::new(host), Arc::new(SystemClock)).unwrap()
}

fn org_app() -> Identity {
    Identity::app("org-bot", 4242, KeySource::Store)
        .with_pattern("example.com/org/*")
        .unwrap()
        .with_installation(99)
}

/// Test that the first resolution exchanges once and the second is served
/// from the cache without touching the network
#[tokio::test]
async fn test_second_resolution_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(token_response("ghs_org_token"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![org_app()]).await;

    let first = engine
        .resolve("https://example.com/org/repo.git")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.identity, "org-bot");
    assert_eq!(first.credential.username, DEFAULT_USERNAME);
    assert_eq!(first.credential.secret.expose(), "ghs_org_token");

    let second = engine
        .resolve("https://example.com/org/repo.git")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, second);

    let stats = engine.stats();
    assert_eq!(stats.assertions_signed, 1);
    assert_eq!(stats.exchanges, 1);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[derive(Debug, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

/// Test that the host receives a verifiable RS256 assertion
#[tokio::test]
async fn test_exchange_carries_signed_assertion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(token_response("ghs_org_token"))
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![org_app()]).await;
    let before = Utc::now().timestamp();
    engine.resolve("example.com/org/repo").await.unwrap().unwrap();

    let requests = server.received_requests().await.unwrap();
    let authorization = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let assertion = authorization.strip_prefix("Bearer ").unwrap();

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_required_spec_claims(&["exp", "iss"]);
    let key = DecodingKey::from_rsa_pem(APP_PUBLIC_KEY.as_bytes()).unwrap();
    let claims = jsonwebtoken::decode::<Claims>(assertion, &key, &validation)
        .unwrap()
        .claims;

    assert_eq!(claims.iss, "4242");
    assert_eq!(claims.exp - claims.iat, 600);
    assert!(claims.iat >= before && claims.iat <= Utc::now().timestamp());
}

/// Test that a failed exchange is not cached
#[tokio::test]
async fn test_failed_exchange_is_retried_next_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(token_response("ghs_after_retry"))
        .mount(&server)
        .await;

    let engine = engine_for(&server, vec![org_app()]).await;

    let err = engine.resolve("example.com/org/repo").await.unwrap_err();
    assert_eq!(err.identity(), "org-bot");
    assert!(err.to_string().contains("boom"));
    assert!(engine.cache().is_empty());

    let resolved = engine.resolve("example.com/org/repo").await.unwrap().unwrap();
    assert_eq!(resolved.credential.secret.expose(), "ghs_after_retry");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

/// Test installation discovery and token reuse across repositories of one
/// installation
#[tokio::test]
async fn test_discovered_installation_shares_token() {
    let server = MockServer::start().await;
    for repo in ["widgets", "gadgets"] {
        Mock::given(method("GET"))
            .and(path(format!("/repos/acme/{}/installation", repo)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 555})))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/app/installations/555/access_tokens"))
        .respond_with(token_response("ghs_acme"))
        .expect(1)
        .mount(&server)
        .await;

    let app = Identity::app("acme-bot", 7, KeySource::Store)
        .with_pattern("github.com/acme/*")
        .unwrap();
    let engine = engine_for(&server, vec![app]).await;

    let widgets = engine
        .resolve("git@github.com:acme/widgets.git")
        .await
        .unwrap()
        .unwrap();
    let gadgets = engine
        .resolve("https://github.com/acme/gadgets")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(widgets.credential, gadgets.credential);
    assert_eq!(engine.stats().discoveries, 2);
    assert_eq!(engine.stats().exchanges, 1);

    // Both repositories are now memoized and cached
    engine.resolve("github.com/acme/widgets").await.unwrap().unwrap();
    assert_eq!(engine.stats().discoveries, 2);
}

/// Test that an uninstalled App reports the discovery stage
#[tokio::test]
async fn test_app_not_installed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/private/installation"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&server)
        .await;

    let app = Identity::app("acme-bot", 7, KeySource::Store)
        .with_pattern("github.com/acme/*")
        .unwrap();
    let engine = engine_for(&server, vec![app]).await;

    let err = engine
        .resolve("https://github.com/acme/private")
        .await
        .unwrap_err();
    assert_eq!(err.stage().to_string(), "discover");
    assert!(engine.cache().is_empty());
}

/// Test that unmatched and malformed URLs abstain without network calls
#[tokio::test]
async fn test_abstains_without_network() {
    let server = MockServer::start().await;
    let engine = engine_for(&server, vec![org_app()]).await;

    assert!(engine.resolve("https://example.com/other/repo").await.unwrap().is_none());
    assert!(engine.resolve("https://example.com/org").await.unwrap().is_none());
    assert!(engine.resolve("::::").await.unwrap().is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// Test that the most specific identity wins and removal invalidates its
/// cached tokens
#[tokio::test]
async fn test_remove_identity_invalidates_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(token_response("ghs_org_token"))
        .mount(&server)
        .await;

    let fallback = Identity::static_token("fallback-pat", Some("ci-user".to_string()))
        .with_pattern("example.com/*")
        .unwrap();
    let engine = engine_for(&server, vec![org_app(), fallback]).await;
    engine
        .secrets()
        .store("fallback-pat", SecretKind::AccessToken, &Secret::new("ghp_fallback"))
        .await
        .unwrap();

    let resolved = engine.resolve("example.com/org/repo").await.unwrap().unwrap();
    assert_eq!(resolved.identity, "org-bot");
    assert_eq!(engine.cache().len(), 1);

    engine.remove_identity("org-bot").unwrap();
    assert!(engine.cache().is_empty());

    let resolved = engine.resolve("example.com/org/repo").await.unwrap().unwrap();
    assert_eq!(resolved.identity, "fallback-pat");
    assert_eq!(resolved.credential.username, "ci-user");
    assert_eq!(resolved.credential.secret.expose(), "ghp_fallback");
}

/// Test that many concurrent resolutions all succeed and agree
#[tokio::test]
async fn test_concurrent_resolutions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/app/installations/99/access_tokens"))
        .respond_with(token_response("ghs_org_token"))
        .mount(&server)
        .await;

    let engine = Arc::new(engine_for(&server, vec![org_app()]).await);
    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .resolve(&format!("https://example.com/org/repo-{}", i))
                .await
        }));
    }

    for handle in handles {
        let resolved = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(resolved.credential.secret.expose(), "ghs_org_token");
    }
    assert_eq!(engine.cache().len(), 1);
}
