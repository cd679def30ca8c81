//! Interpreting Salesforce import results.
//!
//! The pipeline reports failures several ways at once: a structured
//! `errorType`, per-record detailed errors, a flat error list, and free-form
//! `message`/`error` strings. [`classify_failure`] picks the single most
//! specific diagnostic to show the user.

use crate::bridge::{BridgeErrorType, DetailedError, FieldMappingReport, SalesforceUploadResult};

/// How many per-record errors to spell out before collapsing the rest.
const DETAILED_ERROR_PREVIEW: usize = 3;

/// The user's decision when duplicates were flagged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateResolution {
    /// Abort; nothing further happens.
    Cancel,
    /// Leave duplicates out; the already-imported records stand.
    Skip,
    /// Re-submit duplicates as updates to the matched records.
    Update { overwrite_fields: Vec<String> },
}

/// What a resolution round produced. `Failed` keeps the result envelope
/// alongside the summary, like the initial upload does.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    Cancelled,
    Skipped(SalesforceUploadResult),
    Updated(SalesforceUploadResult),
    Failed {
        result: SalesforceUploadResult,
        message: String,
    },
}

/// Builds the failure message for an unsuccessful import result.
///
/// Sources are consulted in order of specificity:
/// 1. `error_type` — a structured pipeline failure with a tailored diagnostic
/// 2. `detailed_errors` — per-record Salesforce API errors, summarized
/// 3. `errors` — flat error strings from the pipeline
/// 4. `message` — free-form pipeline message
/// 5. `error` — last-resort error string, else a generic fallback
pub fn classify_failure(result: &SalesforceUploadResult) -> String {
    if let Some(error_type) = result.error_type {
        return error_type_diagnostic(error_type, result.field_mapping.as_ref());
    }
    if !result.detailed_errors.is_empty() {
        return detailed_error_summary(&result.detailed_errors);
    }
    if !result.errors.is_empty() {
        return result.errors.join("; ");
    }
    if let Some(message) = result.message.as_deref().filter(|m| !m.trim().is_empty()) {
        return message.to_string();
    }
    result
        .error
        .as_deref()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or("The Salesforce upload failed for an unknown reason.")
        .to_string()
}

/// Tailored diagnostic per structured failure class.
fn error_type_diagnostic(
    error_type: BridgeErrorType,
    mapping: Option<&FieldMappingReport>,
) -> String {
    match error_type {
        BridgeErrorType::FileNotFound => {
            "The processed file could not be found on disk. It may have been moved or deleted; \
             try downloading it again."
                .into()
        }
        BridgeErrorType::CsvReadError => {
            "The CSV file could not be read. Check that it is a valid, uncorrupted CSV.".into()
        }
        BridgeErrorType::EmptyFile => "The file contains no data rows to import.".into(),
        BridgeErrorType::MissingRequiredFields => {
            "Required Salesforce fields are missing from the file. Leads need at minimum \
             Last Name and Company."
                .into()
        }
        BridgeErrorType::FieldMappingError => field_mapping_diagnostic(mapping),
        BridgeErrorType::PythonExecutionError => {
            "The import pipeline failed to run. Restart the app and try again.".into()
        }
        BridgeErrorType::ParseError => {
            "The import pipeline returned an unreadable result. The upload may or may not \
             have gone through; check Salesforce before retrying."
                .into()
        }
    }
}

/// Spells out what did and did not map, so the user can fix column headers.
fn field_mapping_diagnostic(mapping: Option<&FieldMappingReport>) -> String {
    let Some(report) = mapping else {
        return "The file's columns could not be mapped to Salesforce fields.".into();
    };
    let mut parts = vec!["The file's columns could not be mapped to Salesforce fields.".to_string()];
    if !report.mapped.is_empty() {
        let mapped: Vec<String> = report
            .mapped
            .iter()
            .map(|m| format!("{} -> {}", m.original, m.mapped))
            .collect();
        parts.push(format!("Mapped: {}.", mapped.join(", ")));
    }
    if !report.unmapped.is_empty() {
        parts.push(format!("Unmapped: {}.", report.unmapped.join(", ")));
    }
    parts.join(" ")
}

/// First few per-record errors verbatim, with a count for the rest.
fn detailed_error_summary(errors: &[DetailedError]) -> String {
    let mut lines: Vec<String> = errors
        .iter()
        .take(DETAILED_ERROR_PREVIEW)
        .map(|e| format!("{}: {}", e.status_code, e.message))
        .collect();
    if errors.len() > DETAILED_ERROR_PREVIEW {
        lines.push(format!("+{} more", errors.len() - DETAILED_ERROR_PREVIEW));
    }
    lines.join("\n")
}
