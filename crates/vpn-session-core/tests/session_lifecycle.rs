//! Login, restore, refresh and logout of an `ApiSession`.

mod common;

use common::{logged_in, remote, Harness, AUTH, LOGOUT, PRIMARY};
use serde_json::json;
use vpn_session_core::{ApiError, SecretStore, SessionState};

const VPN_INFO: &str = "/vpn";

fn vpn_info() -> serde_json::Value {
    json!({
        "Code": 1000,
        "VPN": { "Name": "vpn-alice", "Password": "vpn-secret", "MaxTier": 2 }
    })
}

#[tokio::test]
async fn authenticate_persists_and_restores() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    assert_eq!(session.state(), &SessionState::Unauthenticated);

    assert!(session.authenticate("alice", "secret").await.expect("login"));
    assert!(session.is_valid());
    assert_eq!(session.username().expect("logged in"), "alice");

    let material = harness.secrets.get("session-material").expect("material stored");
    assert!(material.contains("token-alice"));
    assert!(material.contains(PRIMARY));
    assert!(harness.secrets.get("identity").expect("identity stored").contains("alice"));
    drop(session);

    let restored = harness.session();
    assert!(restored.is_valid());
    assert_eq!(restored.username().expect("restored"), "alice");
    assert_eq!(restored.transport().token(), Some("token-alice"));
}

#[tokio::test]
async fn rejected_login_persists_nothing() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    harness.mock.push_remote(AUTH, remote(401));

    assert!(!session.authenticate("alice", "wrong").await.expect("soft failure"));
    assert!(!session.is_valid());
    assert!(!harness.secrets.contains("identity"));
    assert!(!harness.secrets.contains("session-material"));
}

#[tokio::test]
async fn incorrect_credentials_are_an_error() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    harness.mock.push_remote(AUTH, remote(8002));

    let err = session.authenticate("alice", "wrong").await.expect_err("bad password");
    assert!(matches!(err, ApiError::IncorrectCredentials(_)));
    assert!(!harness.secrets.contains("identity"));
}

#[tokio::test]
async fn second_login_is_refused() {
    let mut harness = Harness::new();
    let mut session = logged_in(&mut harness).await;

    let err = session.authenticate("bob", "secret").await.expect_err("already active");
    assert!(matches!(err, ApiError::SessionAlreadyActive));
    assert_eq!(session.username().expect("still alice"), "alice");
    assert!(harness.mock.attempts_of(AUTH).is_empty());
}

#[tokio::test]
async fn failed_cache_warm_up_does_not_fail_login() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    harness.mock.push_remote("/vpn/logicals", remote(422));
    harness.mock.push_remote("/vpn/clientconfig", remote(422));

    assert!(session.authenticate("alice", "secret").await.expect("login"));
    assert!(session.is_valid());
}

#[tokio::test]
async fn login_caches_vpn_credentials() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    harness.mock.push_ok(VPN_INFO, vpn_info());

    session.authenticate("alice", "secret").await.expect("login");
    assert!(harness.secrets.contains("vpn-material"));

    harness.mock.clear_log();
    let credentials = session.vpn_credentials().await.expect("cached");
    assert_eq!(credentials.username, "vpn-alice");
    assert_eq!(credentials.tier, 2);
    assert!(harness.mock.attempts_of(VPN_INFO).is_empty());
}

#[tokio::test]
async fn vpn_credentials_survive_without_api_session() {
    let mut harness = Harness::new();
    {
        let mut session = harness.session();
        harness.mock.push_ok(VPN_INFO, vpn_info());
        session.authenticate("alice", "secret").await.expect("login");
    }
    harness.secrets.delete("identity").expect("drop identity");

    let mut session = harness.session();
    assert!(!session.is_valid());
    let credentials = session.vpn_credentials().await.expect("from keyring");
    assert_eq!(credentials.password, "vpn-secret");
    assert!(harness.mock.attempts_of(VPN_INFO).is_empty());
}

#[tokio::test]
async fn vpn_credentials_need_a_session_when_not_stored() {
    let mut harness = Harness::new();
    let mut session = harness.session();

    let err = session.vpn_credentials().await.expect_err("nothing stored");
    assert!(matches!(err, ApiError::SessionInvalid));
}

#[tokio::test]
async fn refresh_requires_a_session() {
    let mut harness = Harness::new();
    let mut session = harness.session();

    let err = session.refresh().await.expect_err("not logged in");
    assert!(matches!(err, ApiError::SessionInvalid));
}

#[tokio::test]
async fn refresh_rewrites_session_material_only() {
    let mut harness = Harness::new();
    let mut session = logged_in(&mut harness).await;
    let identity_before = harness.secrets.get("identity").expect("identity");

    session.refresh().await.expect("refresh");

    let material = harness.secrets.get("session-material").expect("material");
    assert!(material.contains("refreshed-1"));
    assert_eq!(harness.secrets.get("identity").expect("identity"), identity_before);
}

#[tokio::test]
async fn half_written_session_is_cleared_on_load() {
    let mut harness = Harness::new();
    harness
        .secrets
        .set("identity", r#"{"username":"alice"}"#)
        .expect("seed identity");

    let session = harness.session();
    assert!(!session.is_valid());
    assert!(!harness.secrets.contains("identity"));
}

#[tokio::test]
async fn session_for_other_endpoint_is_left_alone() {
    let mut harness = Harness::new();
    let material = json!({ "api_url": "https://other.example", "state": { "token": "t" } });
    harness
        .secrets
        .set("session-material", &material.to_string())
        .expect("seed material");
    harness
        .secrets
        .set("identity", r#"{"username":"alice"}"#)
        .expect("seed identity");

    let session = harness.session();
    assert!(!session.is_valid());
    assert!(harness.secrets.contains("identity"));
    assert!(harness.secrets.contains("session-material"));
}

#[tokio::test]
async fn logout_is_idempotent() {
    let mut harness = Harness::new();
    let mut session = harness.session();
    harness.mock.push_ok(VPN_INFO, vpn_info());
    harness.mock.push_ok("/vpn/logicals", common::logicals(&["CH#1"]));
    session.authenticate("alice", "secret").await.expect("login");
    assert!(harness.dir.path().join("cached_serverlist.json").exists());

    session.logout().await;
    assert!(!session.is_valid());
    assert_eq!(harness.mock.attempts_of(LOGOUT).len(), 1);
    for key in ["identity", "session-material", "vpn-material"] {
        assert!(!harness.secrets.contains(key), "{key} left behind");
    }
    assert!(!harness.dir.path().join("cached_serverlist.json").exists());
    assert_eq!(session.current_url(), PRIMARY);
    assert_eq!(session.transport().token(), None);
    assert!(harness.remembered_alternate().is_none());

    session.logout().await;
    assert!(!session.is_valid());
    assert_eq!(harness.mock.attempts_of(LOGOUT).len(), 1);
}

#[tokio::test]
async fn logout_forgets_the_alternate_route() {
    let mut harness = Harness::new();
    let mut session = logged_in(&mut harness).await;
    harness.settings.set_routing(true);
    harness.mock.block(PRIMARY);
    harness.mock.set_routes(Ok(vec!["b.example".to_string()]));
    session.call("/vpn/location").await.expect("b.example answers");
    assert_eq!(harness.remembered_alternate().as_deref(), Some("https://b.example"));

    session.logout().await;
    assert!(harness.remembered_alternate().is_none());
    assert_eq!(session.current_url(), PRIMARY);

    harness.mock.clear_log();
    session.authenticate("alice", "secret").await.expect("login via fallback");
    let attempts = harness.mock.attempts_of(AUTH);
    assert_eq!(attempts[0].url, PRIMARY);
    assert!(attempts[0].verify);
}

#[tokio::test]
async fn logout_swallows_remote_errors() {
    let mut harness = Harness::new();
    let mut session = logged_in(&mut harness).await;
    harness.mock.push_remote(LOGOUT, remote(500));

    session.logout().await;
    assert!(!session.is_valid());
    assert!(!harness.secrets.contains("identity"));
}
