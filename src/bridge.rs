//! Host bridge seams.
//!
//! The desktop shell exposes two IPC surfaces to this core: one for session
//! management (OAuth exchange, refresh, persisted store access) and one for
//! the Salesforce import pipeline. Both are modeled as object-safe traits so
//! production wires them to IPC while tests swap in fakes.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Boxed future alias used by the object-safe bridge traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ─── Session bridge ──────────────────────────────────────────────────────────

/// Raw session tokens as delivered by the host shell. Plain strings here;
/// they are wrapped in `SecretString` the moment they enter [`AuthSession`].
///
/// [`AuthSession`]: crate::auth::AuthSession
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub instance_url: String,
    /// Unix timestamp (seconds) when the tokens were issued.
    pub issued_at: u64,
    /// Lifetime in seconds. Hosts that omit it get the 2-hour default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Identity claims returned alongside the tokens on login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub zoneinfo: Option<String>,
    /// Unix timestamp (seconds) of the login that produced this profile.
    #[serde(default)]
    pub login_timestamp: Option<u64>,
}

/// Result of an OAuth code exchange performed by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub session: SessionTokens,
    pub profile: UserProfile,
}

/// Outcome of a refresh attempt performed by the host.
///
/// `success == false` means the refresh token itself was rejected
/// (e.g. `invalid_grant`); the caller must force a logout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub success: bool,
    #[serde(default)]
    pub session: Option<SessionTokens>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Session-side host surface: OAuth flows and the persisted key/value store.
pub trait SessionBridge: Send + Sync {
    /// Exchanges an OAuth authorization code for tokens and a profile.
    fn exchange_code<'a>(&'a self, code: &'a str) -> BoxFuture<'a, Result<AuthPayload, AppError>>;

    /// Asks the host to refresh the session using the given refresh token.
    fn refresh_session<'a>(
        &'a self,
        refresh_token: &'a str,
        instance_url: &'a str,
    ) -> BoxFuture<'a, Result<RefreshOutcome, AppError>>;

    /// Revokes tokens host-side. Best effort; local state is cleared regardless.
    fn logout<'a>(&'a self) -> BoxFuture<'a, Result<(), AppError>>;

    /// Reads a value from the host's persisted store.
    fn get_store_value<'a>(&'a self, key: &'a str)
        -> BoxFuture<'a, Result<Option<Value>, AppError>>;

    /// Writes a value to the host's persisted store. `None` deletes the key.
    fn set_store_value<'a>(
        &'a self,
        key: &'a str,
        value: Option<Value>,
    ) -> BoxFuture<'a, Result<(), AppError>>;
}

// ─── Salesforce bridge ───────────────────────────────────────────────────────

/// Failure class reported by the import pipeline. Drives which diagnostic
/// the user sees; see [`classify_failure`].
///
/// [`classify_failure`]: crate::salesforce::classify_failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeErrorType {
    FileNotFound,
    CsvReadError,
    EmptyFile,
    MissingRequiredFields,
    FieldMappingError,
    PythonExecutionError,
    ParseError,
}

/// One per-record Salesforce API failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedError {
    /// Salesforce status code, e.g. `DUPLICATES_DETECTED` or `INVALID_FIELD`.
    pub status_code: String,
    pub message: String,
    #[serde(default)]
    pub row: Option<u64>,
}

/// A record the pipeline flagged as a potential duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateRecord {
    /// The incoming record as mapped for Salesforce.
    pub record: Value,
    /// Id of the existing Salesforce record it matched.
    pub matched_id: String,
    #[serde(default)]
    pub matched_fields: Vec<String>,
}

/// One CSV column resolved to a Salesforce field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedField {
    pub original: String,
    pub mapped: String,
}

/// How the pipeline mapped (or failed to map) CSV columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingReport {
    #[serde(default)]
    pub mapped: Vec<MappedField>,
    #[serde(default)]
    pub unmapped: Vec<String>,
}

/// Parameters for a Salesforce import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesforceUploadRequest {
    pub file_path: String,
    pub file_name: String,
    pub salesforce_object: String,
    /// Backend processing id the file came from, for audit trails.
    pub processing_id: String,
}

/// Full result envelope from one import run. A single call can simultaneously
/// carry successes, per-record failures, and pending duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesforceUploadResult {
    pub success: bool,
    #[serde(default)]
    pub records_processed: u64,
    #[serde(default)]
    pub records_successful: u64,
    #[serde(default)]
    pub records_failed: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub detailed_errors: Vec<DetailedError>,
    #[serde(default)]
    pub has_duplicates: bool,
    #[serde(default)]
    pub duplicates_detected: Vec<DuplicateRecord>,
    #[serde(default)]
    pub error_type: Option<BridgeErrorType>,
    #[serde(default)]
    pub field_mapping: Option<FieldMappingReport>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A Salesforce object available as an import target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesforceObject {
    /// API name, e.g. `Lead`.
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub custom: bool,
}

/// One field on a Salesforce object, as the pipeline maps onto it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesforceField {
    pub name: String,
    pub label: String,
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Instruction for re-running flagged duplicates as updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateUpdateRequest {
    pub processing_id: String,
    pub duplicates: Vec<DuplicateRecord>,
    /// Fields to overwrite on the matched records.
    pub overwrite_fields: Vec<String>,
}

/// Salesforce-side host surface: connection checks and the import pipeline.
pub trait SalesforceBridge: Send + Sync {
    /// Verifies the stored connection actually works (a live API call host-side).
    fn validate_connection<'a>(&'a self) -> BoxFuture<'a, Result<bool, AppError>>;

    /// Runs one import. Infrastructure failures (pipeline unreachable) come
    /// back as `Err`; domain failures come back inside the result envelope.
    fn upload<'a>(
        &'a self,
        request: &'a SalesforceUploadRequest,
    ) -> BoxFuture<'a, Result<SalesforceUploadResult, AppError>>;

    /// Re-submits flagged duplicates as record updates.
    fn resolve_duplicates<'a>(
        &'a self,
        request: &'a DuplicateUpdateRequest,
    ) -> BoxFuture<'a, Result<SalesforceUploadResult, AppError>>;

    /// Objects the connected org exposes as import targets.
    fn list_objects<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SalesforceObject>, AppError>>;

    /// Mappable fields on one object.
    fn field_mapping<'a>(
        &'a self,
        object: &'a str,
    ) -> BoxFuture<'a, Result<Vec<SalesforceField>, AppError>>;
}

// ─── Test fakes ──────────────────────────────────────────────────────────────
