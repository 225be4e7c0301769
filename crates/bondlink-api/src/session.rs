// ── Shared authentication state ──
//
// One Session is created per bridge and handed to every component that
// makes authenticated calls. The token is re-assignable in place: when
// re-authentication swaps it, in-flight callers that observe a
// non-Authenticated state fail fast with `Error::AuthExpired` instead
// of silently using a stale token.

use std::sync::{Arc, RwLock};

use secrecy::SecretString;
use tokio::sync::watch;
use url::Url;

/// Where the session is in the bridge's PIN-unlock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token held; unlock has not run (or the token was rejected).
    Unauthenticated,
    /// An unlock exchange is in progress.
    Unlocking,
    /// A token is held and believed valid.
    Authenticated,
    /// The bridge reported its lockout state; no further calls are
    /// useful until the operator power cycles it and unlocks again.
    Locked,
}

/// Cheaply cloneable handle over the shared auth state for one bridge.
///
/// The PIN itself is never stored here -- it passes through
/// [`unlock`](crate::HubClient::unlock) once and is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    host: Url,
    token: RwLock<Option<SecretString>>,
    state: watch::Sender<TokenState>,
}

impl Session {
    /// Create an unauthenticated session for the bridge at `host`.
    pub fn new(host: Url) -> Self {
        let (state, _) = watch::channel(TokenState::Unauthenticated);
        Self {
            inner: Arc::new(SessionInner {
                host,
                token: RwLock::new(None),
                state,
            }),
        }
    }

    /// Create a session pre-seeded with a persisted token.
    ///
    /// The token is trusted until the bridge rejects it; a 401 on any
    /// call flips the session back to
    /// [`Unauthenticated`](TokenState::Unauthenticated).
    pub fn with_token(host: Url, token: SecretString) -> Self {
        let session = Self::new(host);
        session.set_authenticated(token);
        session
    }

    /// The bridge base URL.
    pub fn host(&self) -> &Url {
        &self.inner.host
    }

    /// The current token, if the session is authenticated.
    pub fn token(&self) -> Option<SecretString> {
        self.inner.token.read().expect("token lock poisoned").clone()
    }

    /// The current token state.
    pub fn state(&self) -> TokenState {
        *self.inner.state.borrow()
    }

    /// Subscribe to token state transitions (expiry, lockout).
    pub fn subscribe(&self) -> watch::Receiver<TokenState> {
        self.inner.state.subscribe()
    }

    // ── Transitions ──────────────────────────────────────────────────
    //
    // All transitions swap token and state together so observers never
    // see an Authenticated state without a token. `send_replace` stores
    // the new state even when nobody is subscribed; `send` would drop
    // it on the floor once the initial receiver is gone.

    pub(crate) fn mark_unlocking(&self) {
        *self.inner.token.write().expect("token lock poisoned") = None;
        self.inner.state.send_replace(TokenState::Unlocking);
    }

    pub(crate) fn set_authenticated(&self, token: SecretString) {
        *self.inner.token.write().expect("token lock poisoned") = Some(token);
        self.inner.state.send_replace(TokenState::Authenticated);
    }

    /// Record that the bridge rejected the token (401).
    pub(crate) fn mark_expired(&self) {
        *self.inner.token.write().expect("token lock poisoned") = None;
        self.inner.state.send_replace(TokenState::Unauthenticated);
    }

    /// Record that the bridge reported its lockout state.
    pub(crate) fn mark_locked(&self) {
        *self.inner.token.write().expect("token lock poisoned") = None;
        self.inner.state.send_replace(TokenState::Locked);
    }

    /// Drop the token and reset to unauthenticated (integration removal).
    pub fn clear(&self) {
        self.mark_expired();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the token.
        f.debug_struct("Session")
            .field("host", &self.inner.host.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn host() -> Url {
        Url::parse("http://192.168.1.50").unwrap()
    }

    #[test]
    fn new_session_is_unauthenticated() {
        let session = Session::new(host());
        assert_eq!(session.state(), TokenState::Unauthenticated);
        assert!(session.token().is_none());
    }

    #[test]
    fn seeded_token_is_authenticated() {
        let session = Session::with_token(host(), "tok".to_string().into());
        assert_eq!(session.state(), TokenState::Authenticated);
        assert!(session.token().is_some());
    }

    #[test]
    fn transitions_stick_without_any_subscriber() {
        // The construction-time receiver is dropped immediately; every
        // transition must still land in the stored state.
        let session = Session::new(host());
        session.set_authenticated("tok".to_string().into());
        assert_eq!(session.state(), TokenState::Authenticated);

        session.mark_locked();
        assert_eq!(session.state(), TokenState::Locked);
    }

    #[test]
    fn expiry_drops_token_and_notifies() {
        let session = Session::with_token(host(), "tok".to_string().into());
        let rx = session.subscribe();

        session.mark_expired();

        assert_eq!(session.state(), TokenState::Unauthenticated);
        assert!(session.token().is_none());
        assert_eq!(*rx.borrow(), TokenState::Unauthenticated);
    }

    #[test]
    fn lockout_clears_token() {
        let session = Session::with_token(host(), "tok".to_string().into());
        session.mark_locked();
        assert_eq!(session.state(), TokenState::Locked);
        assert!(session.token().is_none());
    }

    #[test]
    fn debug_never_leaks_token() {
        let session = Session::with_token(host(), "super-secret".to_string().into());
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
