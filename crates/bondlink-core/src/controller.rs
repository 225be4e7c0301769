// ── Controller abstraction ──
//
// Full lifecycle management for one bridge connection. Wires the
// session, registry, synchronizer, and dispatcher together, runs the
// unlock flow when needed, and owns the background tasks.

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bondlink_api::{Error as ApiError, HubClient, RawDeviceRecord, Session, TokenState};

use crate::config::{HubConfig, PersistedState};
use crate::dispatch::{CommandDispatcher, CommandRequest};
use crate::error::CoreError;
use crate::model::{DeviceDescriptor, DeviceState};
use crate::registry::DeviceRegistry;
use crate::sync::{HubHealth, StateSynchronizer, StateUpdate};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The stored token was rejected or the PIN was wrong; a new unlock
    /// (with a valid PIN) is required.
    AuthRequired,
    /// The bridge is in its lockout state; the operator must power
    /// cycle it before another unlock can succeed.
    Locked,
}

// ── HubController ────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<Inner>`. Manages the full connection
/// lifecycle: the PIN unlock flow, discovery, state polling, and
/// command dispatch.
#[derive(Clone)]
pub struct HubController {
    inner: Arc<Inner>,
}

struct Inner {
    config: HubConfig,
    client: Arc<HubClient>,
    registry: Arc<DeviceRegistry>,
    sync: Arc<StateSynchronizer>,
    dispatcher: Arc<CommandDispatcher>,
    connection_state: watch::Sender<ConnectionState>,
    /// Child token for the tasks of the current connection; replaced on
    /// every `connect()` so the controller survives reconnect cycles.
    task_cancel: Mutex<Option<CancellationToken>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HubController {
    /// Create a controller from configuration. Does NOT connect -- call
    /// [`connect()`](Self::connect) to authenticate and start the
    /// background tasks.
    ///
    /// The registry is seeded from any persisted device records right
    /// away, so lookups work before the first discovery pass.
    pub fn new(config: HubConfig) -> Result<Self, CoreError> {
        let session = match &config.token {
            Some(token) => Session::with_token(config.host.clone(), token.clone()),
            None => Session::new(config.host.clone()),
        };
        let client = Arc::new(HubClient::new(session, &config.transport())?);

        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&client)));
        registry.seed(config.devices.clone());

        let sync = Arc::new(StateSynchronizer::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            &config,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            Arc::clone(&sync),
            &config,
        ));
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                client,
                registry,
                sync,
                dispatcher,
                connection_state,
                task_cancel: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the bridge.
    ///
    /// Runs the unlock flow if no valid token is held, probes the
    /// bridge, refreshes the registry, and spawns the background tasks
    /// (state polling, dispatch drain, session watching).
    ///
    /// Reconnecting over a live connection is safe: the previous
    /// connection's tasks are cancelled and joined first.
    pub async fn connect(&self) -> Result<(), CoreError> {
        // A dropped CancellationToken never fires, so stale tasks must
        // be torn down before their token handle is replaced.
        self.teardown_tasks().await;
        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        if let Err(e) = self.authenticate().await {
            let state = match &e {
                CoreError::Hub(ApiError::Locked { .. }) => ConnectionState::Locked,
                CoreError::Hub(ApiError::InvalidPin) | CoreError::CredentialsRequired => {
                    ConnectionState::AuthRequired
                }
                _ => ConnectionState::Disconnected,
            };
            self.inner.connection_state.send_replace(state);
            return Err(e);
        }

        match self.inner.client.probe().await {
            Ok(bridge) => {
                debug!(
                    bondid = bridge.bondid.as_deref().unwrap_or("?"),
                    fw_ver = bridge.fw_ver.as_deref().unwrap_or("?"),
                    "bridge probe ok"
                );
            }
            Err(e) => {
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Disconnected);
                return Err(e.into());
            }
        }

        // Discovery. A failed pass is fatal only when nothing was
        // seeded; otherwise the persisted records carry us until the
        // next refresh.
        if let Err(e) = self.inner.registry.refresh().await {
            if self.inner.registry.is_empty() {
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
            warn!(error = %e, "discovery failed, serving seeded device records");
        }

        self.spawn_tasks().await;

        self.inner
            .connection_state
            .send_replace(ConnectionState::Connected);
        info!(
            device_count = self.inner.registry.len(),
            "connected to bridge"
        );
        Ok(())
    }

    /// Disconnect from the bridge.
    ///
    /// Cancels and joins the background tasks. The token, registry, and
    /// state cache survive for a later reconnect.
    pub async fn disconnect(&self) {
        self.teardown_tasks().await;
        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Cancel and join the current connection's background tasks, if
    /// any. Idempotent.
    async fn teardown_tasks(&self) {
        if let Some(cancel) = self.inner.task_cancel.lock().await.take() {
            cancel.cancel();
        }
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    /// Ensure a valid token, running the PIN unlock flow when needed.
    async fn authenticate(&self) -> Result<(), CoreError> {
        if self.inner.client.session().state() == TokenState::Authenticated {
            return Ok(());
        }
        let Some(pin) = self.inner.config.pin.clone() else {
            return Err(CoreError::CredentialsRequired);
        };
        self.inner.client.unlock(&pin).await?;
        Ok(())
    }

    async fn spawn_tasks(&self) {
        let cancel = CancellationToken::new();
        let mut handles = self.inner.task_handles.lock().await;

        handles.push(tokio::spawn(
            Arc::clone(&self.inner.sync).run(self.inner.config.poll_interval(), cancel.clone()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.inner.dispatcher).run_drain(cancel.clone()),
        ));
        handles.push(tokio::spawn(session_watch_task(
            self.inner.client.session().subscribe(),
            self.inner.connection_state.clone(),
            cancel.clone(),
        )));

        *self.inner.task_cancel.lock().await = Some(cancel);
    }

    // ── Command dispatch ─────────────────────────────────────────

    /// Validate and dispatch one command.
    ///
    /// Refused without touching the dispatcher while disconnected, and
    /// fails fast when the synchronizer has the bridge marked
    /// unreachable instead of burning a wire attempt per command.
    pub async fn submit(&self, request: CommandRequest) -> Result<(), CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::Disconnected);
        }
        if let HubHealth::Unreachable { consecutive_cycles } =
            *self.inner.sync.subscribe_health().borrow()
        {
            return Err(CoreError::HubUnreachable { consecutive_cycles });
        }
        self.inner.dispatcher.submit(request).await
    }

    // ── State observation ────────────────────────────────────────

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to device state-change notifications.
    pub fn updates(&self) -> tokio::sync::broadcast::Receiver<StateUpdate> {
        self.inner.sync.subscribe()
    }

    /// Subscribe to bridge-level liveness.
    pub fn health(&self) -> watch::Receiver<HubHealth> {
        self.inner.sync.subscribe_health()
    }

    /// The current cached state for a device.
    pub fn current_state(&self, device_id: &str) -> DeviceState {
        self.inner.sync.current_state(device_id)
    }

    // ── Registry accessors ───────────────────────────────────────

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceDescriptor>> {
        self.inner.registry.get(device_id)
    }

    pub fn devices(&self) -> Vec<Arc<DeviceDescriptor>> {
        self.inner.registry.snapshot().values().cloned().collect()
    }

    /// Re-run discovery on demand.
    pub async fn refresh_devices(&self) -> Result<(), CoreError> {
        self.inner.registry.refresh().await
    }

    // ── Persistence ──────────────────────────────────────────────

    /// The state the embedding application should write back to disk:
    /// host, current token, and the discovered device records. The PIN
    /// is never part of this.
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            host: self.inner.config.host.clone(),
            token: self
                .inner
                .client
                .session()
                .token()
                .map(|t| t.expose_secret().to_owned()),
            devices: self
                .inner
                .registry
                .snapshot()
                .values()
                .map(|d| RawDeviceRecord::from(d.as_ref()))
                .collect(),
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Mirror token-state transitions (expiry, lockout) into the
/// consumer-facing connection state.
async fn session_watch_task(
    mut rx: watch::Receiver<TokenState>,
    connection_state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let token_state = *rx.borrow_and_update();
                match token_state {
                    TokenState::Unauthenticated => {
                        warn!("session token rejected, operator re-unlock required");
                        connection_state.send_replace(ConnectionState::AuthRequired);
                    }
                    TokenState::Locked => {
                        warn!("bridge reported lockout");
                        connection_state.send_replace(ConnectionState::Locked);
                    }
                    TokenState::Unlocking | TokenState::Authenticated => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    fn config() -> HubConfig {
        HubConfig::new(Url::parse("http://127.0.0.1:9").unwrap())
    }

    #[test]
    fn starts_disconnected() {
        let controller = HubController::new(config()).unwrap();
        assert_eq!(
            *controller.connection_state().borrow(),
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn connect_without_credentials_requires_setup() {
        let controller = HubController::new(config()).unwrap();

        let result = controller.connect().await;

        assert!(matches!(result, Err(CoreError::CredentialsRequired)));
        assert_eq!(
            *controller.connection_state().borrow(),
            ConnectionState::AuthRequired
        );
    }

    #[tokio::test]
    async fn submit_while_disconnected_is_refused() {
        let controller = HubController::new(config()).unwrap();

        let result = controller
            .submit(CommandRequest::new(
                "dev-1",
                crate::model::Capability::TurnOn,
                None,
            ))
            .await;

        assert!(matches!(result, Err(CoreError::Disconnected)));
    }

    #[test]
    fn persisted_state_omits_the_pin() {
        let mut cfg = config();
        cfg.pin = Some("1234".to_string().into());
        let controller = HubController::new(cfg).unwrap();

        let persisted = controller.persisted_state();
        let rendered = serde_json::to_string(&persisted).unwrap();
        assert!(!rendered.contains("1234"));
    }
}
