#![allow(clippy::unwrap_used)]
// Integration tests for `HubClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bondlink_api::{Error, HubClient, Session, TokenState};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup_authed() -> (MockServer, HubClient) {
    let server = MockServer::start().await;
    let host = Url::parse(&server.uri()).unwrap();
    let session = Session::with_token(host, "test-token".to_string().into());
    let client = HubClient::with_client(reqwest::Client::new(), session);
    (server, client)
}

async fn setup_unauthed() -> (MockServer, HubClient) {
    let server = MockServer::start().await;
    let host = Url::parse(&server.uri()).unwrap();
    let client = HubClient::with_client(reqwest::Client::new(), Session::new(host));
    (server, client)
}

// ── Unlock flow ─────────────────────────────────────────────────────

#[tokio::test]
async fn unlock_success_stores_token() {
    let (server, client) = setup_unauthed().await;

    Mock::given(method("PATCH"))
        .and(path("/v2/token"))
        .and(body_json(json!({ "locked": 0, "pin": "1234" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/token"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "locked": 0, "token": "abc123" })),
        )
        .mount(&server)
        .await;

    let pin: secrecy::SecretString = "1234".to_string().into();
    client.unlock(&pin).await.unwrap();

    assert_eq!(client.session().state(), TokenState::Authenticated);
    assert!(client.session().token().is_some());
}

#[tokio::test]
async fn unlock_wrong_pin() {
    let (server, client) = setup_unauthed().await;

    Mock::given(method("PATCH"))
        .and(path("/v2/token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let pin: secrecy::SecretString = "0000".to_string().into();
    let result = client.unlock(&pin).await;

    assert!(matches!(result, Err(Error::InvalidPin)), "got: {result:?}");
    assert_eq!(client.session().state(), TokenState::Unauthenticated);
}

#[tokio::test]
async fn unlock_against_locked_bridge() {
    let (server, client) = setup_unauthed().await;

    Mock::given(method("PATCH"))
        .and(path("/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    // Bridge still reports locked after the PIN exchange.
    Mock::given(method("GET"))
        .and(path("/v2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "locked": 1, "unlock_window_secs": 420 })),
        )
        .mount(&server)
        .await;

    // No device endpoint is mounted: any device call reaching the
    // bridge after the lockout would fail the test via the 404 path.
    let pin: secrecy::SecretString = "1234".to_string().into();
    let result = client.unlock(&pin).await;

    match result {
        Err(Error::Locked { retry_window_secs }) => {
            assert_eq!(retry_window_secs, Some(420));
        }
        other => panic!("expected Locked, got: {other:?}"),
    }
    assert_eq!(client.session().state(), TokenState::Locked);

    // Locked session fails fast without touching the bridge.
    let listing = client.list_devices().await;
    assert!(matches!(listing, Err(Error::AuthExpired)), "got: {listing:?}");
}

// ── Device endpoints ────────────────────────────────────────────────

#[tokio::test]
async fn list_devices_assembles_detail_records() {
    let (server, client) = setup_authed().await;

    Mock::given(method("GET"))
        .and(path("/v2/devices"))
        .and(header("BOND-Token", "test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_": "7fc1e84b",
            "dev-1": { "_": "9a5c" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/devices/dev-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Den Fan",
            "type": "CF",
            "actions": ["TurnOn", "TurnOff", "SetSpeed", "SetDirection"],
            "location": "Den"
        })))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, "dev-1");
    assert_eq!(devices[0].name, "Den Fan");
    assert_eq!(devices[0].type_code, "CF");
    assert_eq!(devices[0].actions.len(), 4);
}

#[tokio::test]
async fn get_device_state_parses_fields() {
    let (server, client) = setup_authed().await;

    Mock::given(method("GET"))
        .and(path("/v2/devices/dev-1/state"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "power": 1, "speed": 3, "light": 0 })),
        )
        .mount(&server)
        .await;

    let state = client.get_device_state("dev-1").await.unwrap();

    assert_eq!(state.power, Some(1));
    assert_eq!(state.speed, Some(3));
    assert_eq!(state.light, Some(0));
}

// ── Actions ─────────────────────────────────────────────────────────

#[tokio::test]
async fn send_action_with_argument() {
    let (server, client) = setup_authed().await;

    Mock::given(method("PUT"))
        .and(path("/v2/devices/dev-1/actions/SetSpeed"))
        .and(body_json(json!({ "argument": 3 })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.send_action("dev-1", "SetSpeed", Some(3)).await.unwrap();
}

#[tokio::test]
async fn send_action_rejected_by_bridge() {
    let (server, client) = setup_authed().await;

    Mock::given(method("PUT"))
        .and(path("/v2/devices/dev-1/actions/SetFlame"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such action"))
        .mount(&server)
        .await;

    let result = client.send_action("dev-1", "SetFlame", Some(50)).await;

    match result {
        Err(Error::Rejected { ref device_id, ref message }) => {
            assert_eq!(device_id, "dev-1");
            assert!(message.contains("404"), "got message: {message}");
        }
        other => panic!("expected Rejected, got: {other:?}"),
    }
}

// ── Token lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn rejected_token_expires_session() {
    let (server, client) = setup_authed().await;

    Mock::given(method("GET"))
        .and(path("/v2/devices"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_devices().await;
    assert!(matches!(result, Err(Error::AuthExpired)), "got: {result:?}");
    assert_eq!(client.session().state(), TokenState::Unauthenticated);

    // The next call must fail fast without another wire round trip
    // (the mock's expect(1) would flag a second request).
    let result = client.list_devices().await;
    assert!(matches!(result, Err(Error::AuthExpired)), "got: {result:?}");
}

#[tokio::test]
async fn unauthenticated_calls_never_reach_the_bridge() {
    let (_server, client) = setup_unauthed().await;

    let result = client.get_device_state("dev-1").await;
    assert!(matches!(result, Err(Error::AuthExpired)), "got: {result:?}");
}

// ── Probe ───────────────────────────────────────────────────────────

#[tokio::test]
async fn probe_works_without_a_token() {
    let (server, client) = setup_unauthed().await;

    Mock::given(method("GET"))
        .and(path("/v2/sys/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "target": "zermatt",
            "fw_ver": "v3.19.13",
            "make": "Olibra"
        })))
        .mount(&server)
        .await;

    let info = client.probe().await.unwrap();
    assert_eq!(info.make.as_deref(), Some("Olibra"));
    assert_eq!(info.fw_ver.as_deref(), Some("v3.19.13"));
}
