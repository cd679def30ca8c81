use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::auth::session::AuthSession;
use crate::auth::store::AuthStore;
use crate::bridge::SessionBridge;
use crate::error::AppError;

/// Guards every authenticated call: hands out a session only when it is
/// structurally valid and not within the expiry buffer, refreshing first
/// when needed.
///
/// Concurrent callers hitting an expired session coalesce onto a single
/// host refresh via `refresh_lock`; the double-check after acquiring the
/// lock means late arrivals just read the freshly installed session.
pub struct TokenGuard {
    store: Arc<AuthStore>,
    bridge: Arc<dyn SessionBridge>,
    refresh_lock: Mutex<()>,
}

impl TokenGuard {
    pub fn new(store: Arc<AuthStore>, bridge: Arc<dyn SessionBridge>) -> Self {
        Self {
            store,
            bridge,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a usable session, refreshing if expired.
    ///
    /// `Ok(None)` means the user is no longer authenticated (never was, or
    /// the refresh token was rejected and a forced logout just happened).
    /// `Err` is reserved for infrastructure failures where retrying later
    /// could still succeed; auth state is left untouched in that case.
    pub async fn ensure_valid(&self) -> Result<Option<AuthSession>, AppError> {
        let Some(session) = self.store.session_snapshot().await else {
            return Ok(None);
        };
        if !session.is_valid() {
            return Ok(None);
        }
        if !session.is_expired() {
            return Ok(Some(session));
        }

        let _permit = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Non-blocking variant: if another task already holds the refresh lock,
    /// fails fast instead of queueing behind it.
    pub async fn try_ensure_valid(&self) -> Result<Option<AuthSession>, AppError> {
        let Some(session) = self.store.session_snapshot().await else {
            return Ok(None);
        };
        if !session.is_valid() {
            return Ok(None);
        }
        if !session.is_expired() {
            return Ok(Some(session));
        }

        match self.refresh_lock.try_lock() {
            Ok(_permit) => self.refresh_locked().await,
            Err(_) => Err(AppError::RefreshInProgress),
        }
    }

    /// The refresh itself. Caller must hold `refresh_lock`.
    async fn refresh_locked(&self) -> Result<Option<AuthSession>, AppError> {
        // Double-check: another task may have refreshed while we waited.
        let Some(session) = self.store.session_snapshot().await else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session));
        }

        info!("[AUTH] Session expired, refreshing");
        let outcome = self
            .bridge
            .refresh_session(
                session.refresh_token.expose_secret(),
                &session.instance_url,
            )
            .await?;

        if outcome.success {
            let Some(tokens) = outcome.session else {
                return Err(AppError::Internal(
                    "Refresh reported success without a session".into(),
                ));
            };
            self.store.install_session(tokens).await?;
            info!("[AUTH] Session refreshed");
            return Ok(self.store.session_snapshot().await);
        }

        // The refresh token itself was rejected. Nothing left to retry with.
        let reason = outcome.error.unwrap_or_else(|| "Session refresh failed".into());
        warn!("[AUTH] Refresh rejected: {}", reason);
        self.store.force_logout(&reason).await;
        Ok(None)
    }
}
