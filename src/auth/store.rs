use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::auth::session::{unix_now, AuthSession};
use crate::bridge::{SessionBridge, SessionTokens, UserProfile};
use crate::error::AppError;

/// Host-store key for the persisted session tokens.
const STORE_KEY_SESSION: &str = "auth.session";
/// Host-store key for the persisted user profile.
const STORE_KEY_PROFILE: &str = "auth.profile";

/// Authentication state shared across the app.
///
/// All mutation goes through this store so views and controllers always see
/// one coherent picture of "who is logged in". Fields are snapshot-read;
/// nothing holds a lock across an await of the bridge.
pub struct AuthStore {
    bridge: Arc<dyn SessionBridge>,
    session: RwLock<Option<AuthSession>>,
    profile: RwLock<Option<UserProfile>>,
    /// Last auth failure surfaced to the user, e.g. "invalid_grant".
    last_error: RwLock<Option<String>>,
    /// Unix timestamp of the last completed Salesforce upload.
    last_upload_at: RwLock<Option<u64>>,
}

impl AuthStore {
    pub fn new(bridge: Arc<dyn SessionBridge>) -> Self {
        Self {
            bridge,
            session: RwLock::new(None),
            profile: RwLock::new(None),
            last_error: RwLock::new(None),
            last_upload_at: RwLock::new(None),
        }
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    pub async fn session_snapshot(&self) -> Option<AuthSession> {
        self.session.read().await.clone()
    }

    pub async fn profile_snapshot(&self) -> Option<UserProfile> {
        self.profile.read().await.clone()
    }

    /// Structurally authenticated. Expiry is the guard's concern, not this one.
    pub async fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.is_valid())
            .unwrap_or(false)
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn last_upload_at(&self) -> Option<u64> {
        *self.last_upload_at.read().await
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Exchanges an OAuth code via the host and installs the resulting session.
    pub async fn login(&self, code: &str) -> Result<UserProfile, AppError> {
        let payload = self.bridge.exchange_code(code).await?;
        info!("[AUTH] Login succeeded for {}", payload.profile.username);

        self.install_session(payload.session).await?;
        *self.profile.write().await = Some(payload.profile.clone());
        *self.last_error.write().await = None;

        self.persist_profile(Some(&payload.profile)).await;
        Ok(payload.profile)
    }

    /// Installs new tokens (login or refresh) and persists them host-side.
    pub async fn install_session(&self, tokens: SessionTokens) -> Result<(), AppError> {
        let session = AuthSession::from(tokens);
        if !session.is_valid() {
            return Err(AppError::Internal(
                "Host returned a structurally invalid session".into(),
            ));
        }
        // Persist the plain wire form; secrets only exist in memory wrapped.
        let value = serde_json::to_value(session.to_tokens())
            .map_err(|e| AppError::Internal(format!("Session serialization failed: {}", e)))?;
        if let Err(e) = self
            .bridge
            .set_store_value(STORE_KEY_SESSION, Some(value))
            .await
        {
            warn!("[AUTH] Failed to persist session: {}", e);
        }
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// Clears all auth state after an unrecoverable failure, recording why.
    /// The user sees the error and is routed back to login.
    pub async fn force_logout(&self, reason: &str) {
        warn!("[AUTH] Forced logout: {}", reason);
        *self.session.write().await = None;
        *self.profile.write().await = None;
        *self.last_error.write().await = Some(reason.to_string());
        self.clear_persisted().await;
    }

    /// User-initiated logout. Revokes host-side first, then clears locally.
    pub async fn logout(&self) {
        if let Err(e) = self.bridge.logout().await {
            // Revocation failure must not keep the user logged in locally.
            warn!("[AUTH] Host logout failed, clearing local state anyway: {}", e);
        }
        *self.session.write().await = None;
        *self.profile.write().await = None;
        *self.last_error.write().await = None;
        self.clear_persisted().await;
        info!("[AUTH] Logged out");
    }

    /// Restores session and profile from the host store, if present.
    /// Malformed persisted data is discarded, not fatal.
    pub async fn load_persisted(&self) -> Result<bool, AppError> {
        let raw = self.bridge.get_store_value(STORE_KEY_SESSION).await?;
        let Some(value) = raw else {
            return Ok(false);
        };
        let tokens: SessionTokens = match serde_json::from_value(value) {
            Ok(t) => t,
            Err(e) => {
                warn!("[AUTH] Discarding malformed persisted session: {}", e);
                self.clear_persisted().await;
                return Ok(false);
            }
        };
        let session = AuthSession::from(tokens);
        if !session.is_valid() {
            warn!("[AUTH] Discarding structurally invalid persisted session");
            self.clear_persisted().await;
            return Ok(false);
        }

        if let Ok(Some(value)) = self.bridge.get_store_value(STORE_KEY_PROFILE).await {
            if let Ok(profile) = serde_json::from_value::<UserProfile>(value) {
                *self.profile.write().await = Some(profile);
            }
        }
        *self.session.write().await = Some(session);
        info!("[AUTH] Restored persisted session");
        Ok(true)
    }

    /// Marks a successful Salesforce upload for activity display.
    pub async fn record_upload_completed(&self) {
        *self.last_upload_at.write().await = Some(unix_now());
    }

    // ─── Persistence helpers ─────────────────────────────────────────────────

    async fn persist_profile(&self, profile: Option<&UserProfile>) {
        let value = profile.map(|p| serde_json::to_value(p).unwrap_or_else(|_| json!(null)));
        if let Err(e) = self.bridge.set_store_value(STORE_KEY_PROFILE, value).await {
            warn!("[AUTH] Failed to persist profile: {}", e);
        }
    }

    async fn clear_persisted(&self) {
        for key in [STORE_KEY_SESSION, STORE_KEY_PROFILE] {
            if let Err(e) = self.bridge.set_store_value(key, None).await {
                warn!("[AUTH] Failed to clear persisted key {}: {}", key, e);
            }
        }
    }
}
