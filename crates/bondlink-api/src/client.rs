// Bridge Local API HTTP client
//
// Wraps `reqwest::Client` with token-header auth, the PIN unlock
// exchange, and a single internal retry for transport faults. The auth
// state machine lives in `Session`; this module drives its transitions.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::{BridgeInfo, RawDeviceRecord, RawStateRecord, TokenInfo};
use crate::session::{Session, TokenState};
use crate::transport::TransportConfig;

/// Header the bridge expects the session token in.
const TOKEN_HEADER: &str = "BOND-Token";

/// Raw HTTP client for the bridge's Local API.
///
/// Owns nothing but transport mechanics and the auth handshake; device
/// normalization, caching, and throttling live in `bondlink-core`.
/// Cloneable -- all clones share the same [`Session`].
#[derive(Clone)]
pub struct HubClient {
    http: reqwest::Client,
    session: Session,
    timeout_secs: u64,
    retry_backoff: Duration,
}

impl HubClient {
    /// Create a client from a session and transport config.
    pub fn new(session: Session, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            session,
            timeout_secs: transport.timeout.as_secs(),
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Create a client with a pre-built `reqwest::Client` (tests).
    pub fn with_client(http: reqwest::Client, session: Session) -> Self {
        Self {
            http,
            session,
            timeout_secs: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }

    /// The shared session handle.
    pub fn session(&self) -> &Session {
        &self.session
    }

    // ── Unauthenticated surface ──────────────────────────────────────

    /// Probe the bridge: `GET /v2/sys/version`, no token required.
    ///
    /// Distinguishes "bridge reachable" from "auth broken" during setup
    /// and reconnects.
    pub async fn probe(&self) -> Result<BridgeInfo, Error> {
        let resp = self
            .send_with_retry(Method::GET, self.url("v2/sys/version")?, None, false)
            .await?;
        parse_json(resp).await
    }

    /// Exchange the PIN for a session token.
    ///
    /// `PATCH /v2/token` presents the PIN, then `GET /v2/token` reads
    /// the token back. A bridge still reporting `locked == 1` afterward
    /// is in its lockout state: the operator must power cycle it and
    /// retry within the unlock window, which the firmware reports when
    /// it can (never assumed or hardcoded here).
    ///
    /// On success the token is stored and the session transitions to
    /// [`Authenticated`](TokenState::Authenticated). The PIN is not
    /// retained.
    pub async fn unlock(&self, pin: &SecretString) -> Result<(), Error> {
        self.session.mark_unlocking();
        debug!("presenting PIN to bridge");

        let body = json!({ "locked": 0, "pin": pin.expose_secret() });
        let resp = self
            .send_with_retry(Method::PATCH, self.url("v2/token")?, Some(body), false)
            .await?;

        match resp.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                self.session.mark_expired();
                return Err(Error::InvalidPin);
            }
            s => {
                self.session.mark_expired();
                return Err(Error::Api {
                    status: s.as_u16(),
                    message: "unlock exchange failed".into(),
                });
            }
        }

        let resp = self
            .send_with_retry(Method::GET, self.url("v2/token")?, None, false)
            .await?;
        let info: TokenInfo = parse_json(resp).await?;

        if info.locked == 1 {
            warn!("bridge reports lockout -- unlock window closed");
            self.session.mark_locked();
            return Err(Error::Locked {
                retry_window_secs: info.unlock_window_secs,
            });
        }

        match info.token {
            Some(token) => {
                self.session.set_authenticated(token.into());
                debug!("unlock successful, token stored");
                Ok(())
            }
            None => {
                self.session.mark_expired();
                Err(Error::Api {
                    status: 200,
                    message: "bridge accepted PIN but returned no token".into(),
                })
            }
        }
    }

    // ── Authenticated surface ────────────────────────────────────────

    /// List all devices the bridge knows, with their detail records.
    ///
    /// `GET /v2/devices` returns a map keyed by device id (plus
    /// `_`-prefixed bookkeeping entries, which are skipped); the detail
    /// records are fetched concurrently. Any failure fails the whole
    /// listing so callers can keep their previous snapshot.
    pub async fn list_devices(&self) -> Result<Vec<RawDeviceRecord>, Error> {
        let resp = self
            .send_with_retry(Method::GET, self.url("v2/devices")?, None, true)
            .await?;
        let index: serde_json::Map<String, serde_json::Value> =
            parse_json(self.check_app_status(resp, None).await?).await?;

        let ids: Vec<String> = index
            .keys()
            .filter(|k| !k.starts_with('_'))
            .cloned()
            .collect();
        debug!(device_count = ids.len(), "bridge device index fetched");

        let fetches = ids.iter().map(|id| self.get_device(id));
        futures_util::future::try_join_all(fetches).await
    }

    /// Fetch one device's detail record: `GET /v2/devices/{id}`.
    pub async fn get_device(&self, device_id: &str) -> Result<RawDeviceRecord, Error> {
        let url = self.url(&format!("v2/devices/{device_id}"))?;
        let resp = self.send_with_retry(Method::GET, url, None, true).await?;
        let mut record: RawDeviceRecord =
            parse_json(self.check_app_status(resp, Some(device_id)).await?).await?;
        record.id = device_id.to_owned();
        Ok(record)
    }

    /// Fetch one device's live state: `GET /v2/devices/{id}/state`.
    pub async fn get_device_state(&self, device_id: &str) -> Result<RawStateRecord, Error> {
        let url = self.url(&format!("v2/devices/{device_id}/state"))?;
        let resp = self.send_with_retry(Method::GET, url, None, true).await?;
        parse_json(self.check_app_status(resp, Some(device_id)).await?).await
    }

    /// Execute an action: `PUT /v2/devices/{id}/actions/{action}`.
    ///
    /// An application-level refusal (unknown action, device offline at
    /// the RF layer) surfaces as [`Error::Rejected`] and is never
    /// retried here; transport faults get the usual single retry.
    pub async fn send_action(
        &self,
        device_id: &str,
        action: &str,
        argument: Option<i64>,
    ) -> Result<(), Error> {
        let url = self.url(&format!("v2/devices/{device_id}/actions/{action}"))?;
        let body = match argument {
            Some(v) => json!({ "argument": v }),
            None => json!({}),
        };
        debug!(device_id, action, ?argument, "dispatching action");

        let resp = self
            .send_with_retry(Method::PUT, url, Some(body), true)
            .await?;
        self.check_app_status(resp, Some(device_id)).await?;
        Ok(())
    }

    // ── Request plumbing ─────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.session.host().join(path)?)
    }

    /// Send a request, retrying transport faults exactly once after a
    /// short backoff. Auth failures are never retried: the token check
    /// happens before the wire, and a 401 marks the session expired and
    /// surfaces immediately.
    async fn send_with_retry(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
        authed: bool,
    ) -> Result<reqwest::Response, Error> {
        let token = if authed {
            if self.session.state() != TokenState::Authenticated {
                return Err(Error::AuthExpired);
            }
            self.session.token()
        } else {
            None
        };

        let mut attempt = 0u8;
        loop {
            let mut builder = self.http.request(method.clone(), url.clone());
            if let Some(ref token) = token {
                builder = builder.header(TOKEN_HEADER, token.expose_secret());
            }
            if let Some(ref body) = body {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    if authed && resp.status() == StatusCode::UNAUTHORIZED {
                        warn!("bridge rejected token (401) -- session expired");
                        self.session.mark_expired();
                        return Err(Error::AuthExpired);
                    }
                    return Ok(resp);
                }
                Err(e) if attempt == 0 && (e.is_timeout() || e.is_connect()) => {
                    attempt = 1;
                    debug!(error = %e, backoff = ?self.retry_backoff, "transport fault, retrying once");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) if e.is_timeout() => {
                    return Err(Error::Timeout {
                        timeout_secs: self.timeout_secs,
                    });
                }
                Err(e) if e.is_connect() => {
                    return Err(Error::Unreachable {
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(Error::Transport(e)),
            }
        }
    }

    /// Map non-2xx statuses on authenticated calls to the error
    /// taxonomy: 4xx is an application-level rejection (distinct from
    /// transport, not worth retrying), anything else is an API fault.
    async fn check_app_status(
        &self,
        resp: reqwest::Response,
        device_id: Option<&str>,
    ) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", preview(&body))
        };

        if status.is_client_error() {
            if let Some(device_id) = device_id {
                return Err(Error::Rejected {
                    device_id: device_id.to_owned(),
                    message,
                });
            }
        }
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Deserialize a JSON body, keeping a preview of the raw text for
/// debugging when the shape is off.
async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let body = resp.text().await.map_err(Error::Transport)?;
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body: body.clone(),
    })
}

/// First ~200 bytes of a body, backing off to the whole string rather
/// than splitting a UTF-8 sequence.
fn preview(body: &str) -> &str {
    if body.len() <= 200 {
        body
    } else {
        body.get(..200).unwrap_or(body)
    }
}
