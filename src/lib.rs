//! Leadlift core: orchestration layer for the desktop lead importer.
//!
//! The desktop shell owns the windows and the IPC plumbing; this crate owns
//! everything in between: session lifetime ([`auth`]), backend HTTP traffic
//! ([`api`]), the upload/poll state machine ([`upload`]), completion fan-out
//! ([`events`]) and the Salesforce import flow ([`salesforce`]). The shell
//! plugs in through the two traits in [`bridge`].

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod salesforce;
pub mod upload;

pub use api::ApiClient;
pub use auth::{AuthSession, AuthStore, TokenGuard};
pub use config::ApiConfig;
pub use error::{AppError, ErrorPresentation};
pub use events::{ProcessingCompleted, ProcessingEventBus};
pub use salesforce::{DuplicateResolution, SalesforceOutcome, SalesforceUploadController};
pub use upload::{UploadController, UploadPhase, UploadSnapshot};
