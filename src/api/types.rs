//! Wire types for the lead-processing backend. All JSON is camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Upload ──────────────────────────────────────────────────────────────────

/// Options accompanying a CSV upload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    pub use_ai_enhancement: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_model_preference: Option<String>,
    /// Owner assigned to leads the AI cannot place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_owner_id: Option<String>,
}

/// 202 response to a file upload: the job exists, processing has begun.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub processing_id: String,
    pub file_name: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ─── Processing status ───────────────────────────────────────────────────────

/// Backend job lifecycle. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// One snapshot of a processing job, as returned by the status endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub status: JobStatus,
    /// 0..=100 while processing.
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub current_stage: Option<String>,
    /// Failure reason when `status == failed`. Shown to the user verbatim.
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub ai_stats: Option<Value>,
    #[serde(default)]
    pub api_usage: Option<Value>,
    #[serde(default)]
    pub fallback_assignment_info: Option<Value>,
}

// ─── Mapping preview / confirmation ──────────────────────────────────────────

/// Proposed field mapping awaiting user confirmation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingPreview {
    /// Column headers exactly as they appear in the uploaded CSV.
    #[serde(default)]
    pub original_headers: Vec<String>,
    /// Original header to Salesforce field descriptor. The descriptor is a
    /// plain field name or an object with confidence details, depending on
    /// the AI model.
    #[serde(default)]
    pub mapped_fields: serde_json::Map<String, Value>,
    /// First few rows of the file for the preview table.
    #[serde(default)]
    pub data_preview: Vec<Value>,
    #[serde(default)]
    pub validation_issues: Vec<Value>,
    /// Fields the user may remap onto.
    #[serde(default)]
    pub available_salesforce_fields: Vec<String>,
}

/// User's answer to a mapping preview. Entries are the mapping objects the
/// preview handed out, adjusted by the user where needed.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub confirmed_mappings: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
}

// ─── History & housekeeping ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub processing_id: String,
    pub file_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub record_count: Option<u64>,
    #[serde(default)]
    pub result_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
    pub pagination: Pagination,
}

/// Response to the history/files clear endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedCount {
    #[serde(default)]
    pub cleared_count: u64,
    #[serde(default)]
    pub message: Option<String>,
}

// ─── AI configuration ────────────────────────────────────────────────────────

/// Backend AI enrichment settings. Extra backend-private keys are preserved
/// through the read-modify-write cycle via `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub use_ai_enhancement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model_preference: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

// ─── Downloads ───────────────────────────────────────────────────────────────

/// A downloaded result file held in memory.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
