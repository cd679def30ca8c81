use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the frontend.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ─── Auth ────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("Token refresh already in progress")]
    RefreshInProgress,

    #[error("Authentication validation failed: {0}")]
    AuthValidationFailed(String),

    // ─── Backend API ─────────────────────────────────────────────────────────
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    // ─── Salesforce bridge ───────────────────────────────────────────────────
    #[error("Salesforce bridge failure: {0}")]
    BridgeUnavailable(String),

    #[error("Salesforce upload failed: {0}")]
    SalesforceUpload(String),

    // ─── Generic ─────────────────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when no response reached the caller at all (connection refused,
    /// timeout, other transport failures).
    pub fn is_network_error(&self) -> bool {
        matches!(self, AppError::Network { .. })
    }

    /// The user-displayable message for this error. Every failed operation
    /// in the app ends with one of these on screen.
    pub fn user_message(&self) -> String {
        self.to_presentation().message
    }

    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ─── Auth ────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Logged In".into(),
                message: "You need to log in to Salesforce to continue.".into(),
                action: Some("Log in to Salesforce".into()),
            },

            AppError::SessionExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "Your Salesforce session has expired.".into(),
                action: Some("Log in again".into()),
            },

            AppError::RefreshInProgress => ErrorPresentation {
                title: "Refreshing Session".into(),
                message: "A session refresh is already in progress. Please wait a moment.".into(),
                action: Some("Wait and retry".into()),
            },

            AppError::AuthValidationFailed(msg) => ErrorPresentation {
                title: "Authentication Check Failed".into(),
                message: sanitize_message(msg, "Could not verify your Salesforce connection."),
                action: Some("Log in again".into()),
            },

            // ─── Backend API ─────────────────────────────────────────────────
            AppError::Server { status, message } => ErrorPresentation {
                title: "Server Error".into(),
                message: sanitize_message(message, &format!("Server error: {}", status)),
                action: None,
            },

            AppError::Network { message } => ErrorPresentation {
                title: "Connection Failed".into(),
                message: sanitize_message(
                    message,
                    "Could not reach the server. Please check your connection.",
                ),
                action: Some("Check network and retry".into()),
            },

            // ─── Salesforce bridge ───────────────────────────────────────────
            AppError::BridgeUnavailable(msg) => ErrorPresentation {
                title: "Salesforce Upload Failed".into(),
                message: sanitize_message(msg, "The Salesforce upload could not be started."),
                action: Some("Try again".into()),
            },

            AppError::SalesforceUpload(msg) => ErrorPresentation {
                title: "Salesforce Upload Failed".into(),
                message: sanitize_message(msg, "The Salesforce upload failed."),
                action: Some("Review the error and try again".into()),
            },

            // ─── Generic ─────────────────────────────────────────────────────
            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}
