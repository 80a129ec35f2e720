//! Identity provider seam
//!
//! The core never authenticates anyone; it consumes an externally supplied
//! identity and token. Identity is passed explicitly (there is no ambient
//! "current user" global) and the whole store/sync subsystem is built
//! fresh on sign-in and dropped on sign-out.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::ids::UserId;

/// Opaque auth token handed to the cloud store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// External identity collaborator.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, if any.
    fn current_user(&self) -> Option<UserId>;

    /// Refresh the auth token. `force` bypasses any provider-side cache.
    /// A permanent failure means the session is gone.
    async fn refresh_token(&self, force: bool) -> Result<AuthToken>;

    /// Tear down local session state.
    fn sign_out(&self);

    /// Stream of auth-state changes; fires with `None` on sign-out.
    fn auth_state(&self) -> watch::Receiver<Option<UserId>>;
}

/// Fixed-identity provider for tests and the CLI, where the "identity
/// provider" is the local OS user.
pub struct StaticIdentity {
    token: AuthToken,
    /// Next refresh outcome; tests flip this to simulate revocation.
    refresh_failure: Mutex<Option<Error>>,
    state_tx: watch::Sender<Option<UserId>>,
    state_rx: watch::Receiver<Option<UserId>>,
}

impl StaticIdentity {
    pub fn new(user: UserId) -> Self {
        let (state_tx, state_rx) = watch::channel(Some(user));
        Self {
            token: AuthToken::new("local-session"),
            refresh_failure: Mutex::new(None),
            state_tx,
            state_rx,
        }
    }

    /// Make the next token refreshes fail as a revoked session.
    pub fn revoke(&self) {
        *self.refresh_failure.lock().expect("auth lock poisoned") =
            Some(Error::AuthExpired("token revoked".into()));
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.state_rx.borrow().clone()
    }

    async fn refresh_token(&self, _force: bool) -> Result<AuthToken> {
        let failure = self.refresh_failure.lock().expect("auth lock poisoned");
        match &*failure {
            Some(Error::AuthExpired(reason)) => Err(Error::AuthExpired(reason.clone())),
            Some(_) => Err(Error::AuthExpired("session invalid".into())),
            None => Ok(self.token.clone()),
        }
    }

    fn sign_out(&self) {
        let _ = self.state_tx.send(None);
    }

    fn auth_state(&self) -> watch::Receiver<Option<UserId>> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_round() {
        let identity = StaticIdentity::new(UserId::from("u1"));
        assert_eq!(identity.current_user(), Some(UserId::from("u1")));
        assert_eq!(
            identity.refresh_token(true).await.unwrap().as_str(),
            "local-session"
        );
    }

    #[tokio::test]
    async fn revoke_fails_refresh_permanently() {
        let identity = StaticIdentity::new(UserId::from("u1"));
        identity.revoke();
        let err = identity.refresh_token(true).await.unwrap_err();
        assert!(err.is_auth_permanent());
    }

    #[tokio::test]
    async fn sign_out_clears_user_and_notifies() {
        let identity = StaticIdentity::new(UserId::from("u1"));
        let mut state = identity.auth_state();
        identity.sign_out();
        state.changed().await.unwrap();
        assert_eq!(*state.borrow(), None);
        assert_eq!(identity.current_user(), None);
    }
}
