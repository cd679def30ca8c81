//! Salesforce upload orchestration.
//!
//! Sits between the app and the host's import pipeline: verifies the
//! connection actually works before sending anything, interprets the result
//! envelope, and walks the user through duplicate resolution when the
//! pipeline flags matches against existing records.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::auth::AuthStore;
use crate::bridge::{
    DuplicateRecord, DuplicateUpdateRequest, SalesforceBridge, SalesforceField, SalesforceObject,
    SalesforceUploadRequest, SalesforceUploadResult,
};
use crate::error::AppError;
use crate::salesforce::outcome::{classify_failure, DuplicateResolution, ResolutionOutcome};

/// How one import call ended. `Failed` keeps the full result envelope so a
/// debug view can show every per-record error even though the summary
/// message truncates.
#[derive(Debug, Clone)]
pub enum SalesforceOutcome {
    Succeeded(SalesforceUploadResult),
    /// Non-duplicates were imported; these records await a user decision.
    DuplicatesPending {
        result: SalesforceUploadResult,
        duplicates: Vec<DuplicateRecord>,
    },
    Failed {
        result: SalesforceUploadResult,
        message: String,
    },
}

impl SalesforceOutcome {
    /// The failure as an [`AppError`], ready for the host error banner.
    pub fn as_error(&self) -> Option<AppError> {
        match self {
            SalesforceOutcome::Failed { message, .. } => {
                Some(AppError::SalesforceUpload(message.clone()))
            }
            _ => None,
        }
    }
}

struct PendingDuplicates {
    processing_id: String,
    duplicates: Vec<DuplicateRecord>,
    /// The partial result that produced the duplicates, kept so `Skip`
    /// can return it as the final outcome.
    partial: SalesforceUploadResult,
}

pub struct SalesforceUploadController {
    bridge: Arc<dyn SalesforceBridge>,
    auth: Arc<AuthStore>,
    pending: Mutex<Option<PendingDuplicates>>,
}

impl SalesforceUploadController {
    pub fn new(bridge: Arc<dyn SalesforceBridge>, auth: Arc<AuthStore>) -> Self {
        Self {
            bridge,
            auth,
            pending: Mutex::new(None),
        }
    }

    pub fn has_pending_duplicates(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    /// Objects the user can pick as import targets.
    pub async fn available_objects(&self) -> Result<Vec<SalesforceObject>, AppError> {
        self.bridge.list_objects().await
    }

    /// Mappable fields on the chosen object, for the mapping UI.
    pub async fn object_fields(&self, object: &str) -> Result<Vec<SalesforceField>, AppError> {
        self.bridge.field_mapping(object).await
    }

    /// Runs one import: connection check, single pipeline call, result
    /// interpretation. A previous unresolved duplicate set is discarded.
    pub async fn upload(
        &self,
        request: &SalesforceUploadRequest,
    ) -> Result<SalesforceOutcome, AppError> {
        *self.pending.lock().unwrap() = None;

        // Stored tokens can look fine and still be revoked org-side, so the
        // check is a live call, not a local inspection.
        if !self.auth.is_authenticated().await {
            return Err(AppError::AuthValidationFailed(
                "You are not logged in to Salesforce.".into(),
            ));
        }
        match self.bridge.validate_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(AppError::AuthValidationFailed(
                    "Your Salesforce connection is no longer valid.".into(),
                ));
            }
            Err(e) => {
                warn!("[SFDC] Connection validation failed: {}", e);
                return Err(AppError::AuthValidationFailed(e.user_message()));
            }
        }

        info!(
            "[SFDC] Uploading {} to {}",
            request.file_name, request.salesforce_object
        );
        let result = self.bridge.upload(request).await?;
        self.interpret(&request.processing_id, result).await
    }

    /// Applies the user's duplicate decision. Errors if no duplicates are
    /// pending; a second call after a decision is a bug in the caller.
    pub async fn resolve(
        &self,
        resolution: DuplicateResolution,
    ) -> Result<ResolutionOutcome, AppError> {
        let pending = self
            .pending
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::Internal("No duplicate resolution is pending".into()))?;

        match resolution {
            DuplicateResolution::Cancel => {
                info!("[SFDC] Duplicate resolution cancelled");
                Ok(ResolutionOutcome::Cancelled)
            }
            DuplicateResolution::Skip => {
                info!(
                    "[SFDC] Skipping {} duplicates, keeping partial import",
                    pending.duplicates.len()
                );
                if pending.partial.records_successful > 0 {
                    self.auth.record_upload_completed().await;
                }
                Ok(ResolutionOutcome::Skipped(pending.partial))
            }
            DuplicateResolution::Update { overwrite_fields } => {
                info!(
                    "[SFDC] Updating {} duplicate records",
                    pending.duplicates.len()
                );
                let request = DuplicateUpdateRequest {
                    processing_id: pending.processing_id,
                    duplicates: pending.duplicates,
                    overwrite_fields,
                };
                let result = self.bridge.resolve_duplicates(&request).await?;
                if !result.success {
                    let message = classify_failure(&result);
                    warn!("[SFDC] Duplicate update failed: {}", message);
                    return Ok(ResolutionOutcome::Failed { result, message });
                }
                self.auth.record_upload_completed().await;
                Ok(ResolutionOutcome::Updated(result))
            }
        }
    }

    /// Turns a result envelope into an outcome. Branches are checked in
    /// order of severity, first match wins: a structured `error_type` is
    /// fatal even when the same result also flags duplicates.
    async fn interpret(
        &self,
        processing_id: &str,
        result: SalesforceUploadResult,
    ) -> Result<SalesforceOutcome, AppError> {
        if result.error_type.is_some() {
            let message = classify_failure(&result);
            warn!("[SFDC] Import failed structurally: {}", message);
            return Ok(SalesforceOutcome::Failed { result, message });
        }

        if result.has_duplicates && !result.duplicates_detected.is_empty() {
            let duplicates = result.duplicates_detected.clone();
            info!(
                "[SFDC] {} records flagged as duplicates, awaiting decision",
                duplicates.len()
            );
            *self.pending.lock().unwrap() = Some(PendingDuplicates {
                processing_id: processing_id.to_string(),
                duplicates: duplicates.clone(),
                partial: result.clone(),
            });
            return Ok(SalesforceOutcome::DuplicatesPending { result, duplicates });
        }

        if result.success {
            info!(
                "[SFDC] Import done: {}/{} records succeeded",
                result.records_successful, result.records_processed
            );
            self.auth.record_upload_completed().await;
            return Ok(SalesforceOutcome::Succeeded(result));
        }

        let message = classify_failure(&result);
        warn!("[SFDC] Import failed: {}", message);
        Ok(SalesforceOutcome::Failed { result, message })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::auth::session::unix_now;
    use crate::bridge::testing::{FakeSalesforceBridge, FakeSessionBridge};
    use crate::bridge::{BridgeErrorType, SessionTokens};

    async fn authed_store() -> Arc<AuthStore> {
        let session_bridge = Arc::new(FakeSessionBridge::default());
        let store = Arc::new(AuthStore::new(session_bridge));
        store
            .install_session(SessionTokens {
                access_token: "t".into(),
                refresh_token: "r".into(),
                instance_url: "https://example.my.salesforce.com".into(),
                issued_at: unix_now(),
                expires_in: Some(7200),
            })
            .await
            .unwrap();
        store
    }

    fn request() -> SalesforceUploadRequest {
        SalesforceUploadRequest {
            file_path: "/tmp/leads-enriched.csv".into(),
            file_name: "leads-enriched.csv".into(),
            salesforce_object: "Lead".into(),
            processing_id: "proc-1".into(),
        }
    }

    fn success_result(successful: u64) -> SalesforceUploadResult {
        SalesforceUploadResult {
            success: true,
            records_processed: successful,
            records_successful: successful,
            success_rate: 100.0,
            ..SalesforceUploadResult::default()
        }
    }

    fn duplicate(matched_id: &str) -> DuplicateRecord {
        DuplicateRecord {
            record: json!({"Email": "jane@example.com"}),
            matched_id: matched_id.into(),
            matched_fields: vec!["Email".into()],
        }
    }

    #[tokio::test]
    async fn clean_upload_succeeds_and_records_activity() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.push_upload(Ok(success_result(5)));
        let auth = authed_store().await;
        let controller = SalesforceUploadController::new(bridge.clone(), auth.clone());

        let outcome = controller.upload(&request()).await.unwrap();
        assert!(matches!(outcome, SalesforceOutcome::Succeeded(_)));
        assert_eq!(bridge.upload_calls(), 1);
        assert!(auth.last_upload_at().await.is_some());
    }

    #[tokio::test]
    async fn failed_validation_blocks_the_upload_entirely() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.push_validate(Ok(false));
        bridge.push_upload(Ok(success_result(5)));
        let controller = SalesforceUploadController::new(bridge.clone(), authed_store().await);

        let err = controller.upload(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::AuthValidationFailed(_)));
        assert_eq!(bridge.upload_calls(), 0, "no upload after failed validation");
    }

    #[tokio::test]
    async fn unauthenticated_user_blocks_before_validation() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let session_bridge = Arc::new(FakeSessionBridge::default());
        let auth = Arc::new(AuthStore::new(session_bridge));
        let controller = SalesforceUploadController::new(bridge.clone(), auth);

        let err = controller.upload(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::AuthValidationFailed(_)));
        assert_eq!(bridge.upload_calls(), 0);
    }

    #[tokio::test]
    async fn pipeline_failure_is_classified() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.push_upload(Ok(SalesforceUploadResult {
            success: false,
            error_type: Some(BridgeErrorType::EmptyFile),
            ..SalesforceUploadResult::default()
        }));
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        let outcome = controller.upload(&request()).await.unwrap();
        let SalesforceOutcome::Failed { message, .. } = &outcome else {
            panic!("expected Failed, got {:?}", outcome);
        };
        assert!(message.contains("no data rows"));

        let err = outcome.as_error().expect("failed outcome converts to error");
        assert!(matches!(err, AppError::SalesforceUpload(_)));
    }

    #[tokio::test]
    async fn structured_error_type_beats_duplicate_routing() {
        // A result can carry both; the structural failure is the severe one
        // and must win, never the duplicate dialog.
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.push_upload(Ok(SalesforceUploadResult {
            success: false,
            error_type: Some(BridgeErrorType::EmptyFile),
            has_duplicates: true,
            duplicates_detected: vec![duplicate("00Q1")],
            ..SalesforceUploadResult::default()
        }));
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        let outcome = controller.upload(&request()).await.unwrap();
        let SalesforceOutcome::Failed { message, .. } = outcome else {
            panic!("expected Failed, got {:?}", outcome);
        };
        assert!(message.contains("no data rows"));
        assert!(!controller.has_pending_duplicates());
    }

    #[tokio::test]
    async fn failed_outcome_keeps_every_detailed_error() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let detailed: Vec<_> = (1..=5)
            .map(|i| crate::bridge::DetailedError {
                status_code: "INVALID_EMAIL_ADDRESS".into(),
                message: format!("row {} rejected", i),
                row: Some(i),
            })
            .collect();
        bridge.push_upload(Ok(SalesforceUploadResult {
            success: false,
            detailed_errors: detailed,
            ..SalesforceUploadResult::default()
        }));
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        let outcome = controller.upload(&request()).await.unwrap();
        let SalesforceOutcome::Failed { result, message } = outcome else {
            panic!("expected Failed");
        };
        // Summary truncates; the envelope keeps all 5 for the debug view.
        assert!(message.contains("row 3 rejected"));
        assert!(message.contains("+2 more"));
        assert!(!message.contains("row 4 rejected"));
        assert_eq!(result.detailed_errors.len(), 5);
    }

    #[tokio::test]
    async fn exposes_objects_and_field_mappings() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.set_objects(vec![crate::bridge::SalesforceObject {
            name: "Lead".into(),
            label: "Lead".into(),
            custom: false,
        }]);
        bridge.set_fields(
            "Lead",
            vec![crate::bridge::SalesforceField {
                name: "Company".into(),
                label: "Company".into(),
                field_type: Some("string".into()),
                required: true,
            }],
        );
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        let objects = controller.available_objects().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].name, "Lead");

        let fields = controller.object_fields("Lead").await.unwrap();
        assert_eq!(fields[0].name, "Company");
        assert!(fields[0].required);

        let err = controller.object_fields("Bogus__c").await.unwrap_err();
        assert!(matches!(err, AppError::BridgeUnavailable(_)));
    }

    #[tokio::test]
    async fn bridge_outage_propagates_as_infrastructure_error() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        bridge.push_upload(Err("pipeline process not running".into()));
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        let err = controller.upload(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::BridgeUnavailable(_)));
    }

    #[tokio::test]
    async fn duplicates_pause_for_a_decision_then_update() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let mut partial = success_result(3);
        partial.has_duplicates = true;
        partial.duplicates_detected = vec![duplicate("00Q1"), duplicate("00Q2")];
        bridge.push_upload(Ok(partial));
        bridge.push_resolve(Ok(success_result(2)));
        let auth = authed_store().await;
        let controller = SalesforceUploadController::new(bridge.clone(), auth.clone());

        let outcome = controller.upload(&request()).await.unwrap();
        let SalesforceOutcome::DuplicatesPending { duplicates, .. } = outcome else {
            panic!("expected pending duplicates");
        };
        assert_eq!(duplicates.len(), 2);
        assert!(controller.has_pending_duplicates());
        // No completion recorded while the decision is pending.
        assert!(auth.last_upload_at().await.is_none());

        let outcome = controller
            .resolve(DuplicateResolution::Update {
                overwrite_fields: vec!["Phone".into()],
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ResolutionOutcome::Updated(_)));
        assert!(!controller.has_pending_duplicates());
        assert!(auth.last_upload_at().await.is_some());

        let resolve_requests = bridge.resolve_requests.lock().unwrap();
        assert_eq!(resolve_requests.len(), 1);
        assert_eq!(resolve_requests[0].processing_id, "proc-1");
        assert_eq!(resolve_requests[0].overwrite_fields, vec!["Phone"]);
        assert_eq!(resolve_requests[0].duplicates.len(), 2);
    }

    #[tokio::test]
    async fn skip_keeps_the_partial_import() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let mut partial = success_result(3);
        partial.has_duplicates = true;
        partial.duplicates_detected = vec![duplicate("00Q1")];
        bridge.push_upload(Ok(partial));
        let auth = authed_store().await;
        let controller = SalesforceUploadController::new(bridge.clone(), auth.clone());

        controller.upload(&request()).await.unwrap();
        let outcome = controller.resolve(DuplicateResolution::Skip).await.unwrap();

        let ResolutionOutcome::Skipped(result) = outcome else {
            panic!("expected Skipped");
        };
        assert_eq!(result.records_successful, 3);
        assert!(auth.last_upload_at().await.is_some());
        // Skip never re-enters the pipeline.
        assert!(bridge.resolve_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_discards_the_pending_set() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let mut partial = success_result(0);
        partial.has_duplicates = true;
        partial.duplicates_detected = vec![duplicate("00Q1")];
        bridge.push_upload(Ok(partial));
        let controller = SalesforceUploadController::new(bridge.clone(), authed_store().await);

        controller.upload(&request()).await.unwrap();
        let outcome = controller.resolve(DuplicateResolution::Cancel).await.unwrap();
        assert!(matches!(outcome, ResolutionOutcome::Cancelled));
        assert!(!controller.has_pending_duplicates());

        // A second decision with nothing pending is a caller bug.
        let err = controller.resolve(DuplicateResolution::Cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn failed_update_round_is_classified() {
        let bridge = Arc::new(FakeSalesforceBridge::default());
        let mut partial = success_result(1);
        partial.has_duplicates = true;
        partial.duplicates_detected = vec![duplicate("00Q1")];
        bridge.push_upload(Ok(partial));
        bridge.push_resolve(Ok(SalesforceUploadResult {
            success: false,
            detailed_errors: vec![crate::bridge::DetailedError {
                status_code: "ENTITY_IS_LOCKED".into(),
                message: "record locked by approval process".into(),
                row: None,
            }],
            ..SalesforceUploadResult::default()
        }));
        let controller = SalesforceUploadController::new(bridge, authed_store().await);

        controller.upload(&request()).await.unwrap();
        let outcome = controller
            .resolve(DuplicateResolution::Update {
                overwrite_fields: vec![],
            })
            .await
            .unwrap();
        let ResolutionOutcome::Failed { result, message } = outcome else {
            panic!("expected Failed resolution");
        };
        assert!(message.contains("ENTITY_IS_LOCKED"));
        assert_eq!(result.detailed_errors.len(), 1);
    }
}
