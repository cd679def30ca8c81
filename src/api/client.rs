//! HTTP client for the lead-processing backend.
//!
//! Every call acquires its bearer token through [`TokenGuard`], so callers
//! never see a mid-request expiry. Transport and server failures are
//! normalized into [`AppError`] with messages fit for direct display.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::api::types::{
    AiSettings, ClearedCount, ConfirmRequest, ConfirmResponse, DownloadedFile, HistoryPage,
    MappingPreview, ProcessingStatus, UploadAccepted, UploadOptions,
};
use crate::auth::TokenGuard;
use crate::config::ApiConfig;
use crate::error::AppError;

/// Upload progress callback, called with a monotonically increasing 0..=100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    guard: Arc<TokenGuard>,
}

impl ApiClient {
    pub fn new(config: ApiConfig, guard: Arc<TokenGuard>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            http,
            // Normalized without trailing slash by ApiConfig.
            base_url: config.base_url.to_string(),
            guard,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Current bearer token, refreshing the session first if needed.
    /// `None` when no session exists; requests go out without the header
    /// and the server enforces authorization.
    async fn bearer(&self) -> Result<Option<String>, AppError> {
        Ok(self
            .guard
            .ensure_valid()
            .await?
            .map(|session| session.access_token.expose_secret().to_owned()))
    }

    fn with_bearer(rb: RequestBuilder, token: Option<String>) -> RequestBuilder {
        match token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    // ─── Core send / normalization ───────────────────────────────────────────

    /// Sends a prepared request, normalizing transport and HTTP failures.
    /// Logs method, path (never the full URL) and timing.
    async fn send(&self, rb: RequestBuilder, method: &str, path: &str) -> Result<Response, AppError> {
        let started = Instant::now();
        let response = rb.send().await.map_err(Self::normalize_transport)?;
        let status = response.status();
        let elapsed = started.elapsed().as_millis();

        if status.is_success() {
            info!("[API] {} {} -> {} in {}ms", method, path, status.as_u16(), elapsed);
            return Ok(response);
        }

        warn!("[API] {} {} -> {} in {}ms", method, path, status.as_u16(), elapsed);
        Err(Self::server_error(status, response).await)
    }

    fn normalize_transport(e: reqwest::Error) -> AppError {
        let message = if e.is_timeout() {
            "Request timed out. The server may be overloaded.".to_string()
        } else if e.is_connect() {
            "Could not connect to the server. Is the backend running?".to_string()
        } else {
            format!("Network request failed: {}", e.without_url())
        };
        AppError::Network { message }
    }

    /// Builds an [`AppError`] from a non-2xx response, preferring the
    /// backend's own `message`/`error` JSON fields.
    async fn server_error(status: StatusCode, response: Response) -> AppError {
        if status == StatusCode::UNAUTHORIZED {
            return AppError::SessionExpired;
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("Server error: {}", status.as_u16()));
        AppError::Server {
            status: status.as_u16(),
            message,
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, AppError> {
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Internal(format!("Invalid response body: {}", e.without_url())))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.get(self.endpoint(path)), token);
        Self::parse_json(self.send(rb, "GET", path).await?).await
    }

    async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.delete(self.endpoint(path)), token);
        Self::parse_json(self.send(rb, "DELETE", path).await?).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.post(self.endpoint(path)), token).json(body);
        Self::parse_json(self.send(rb, "POST", path).await?).await
    }

    async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.put(self.endpoint(path)), token).json(body);
        Self::parse_json(self.send(rb, "PUT", path).await?).await
    }

    // ─── Uploads ─────────────────────────────────────────────────────────────

    /// Streams a CSV to the backend as multipart form data.
    ///
    /// `progress` receives percentages as bytes leave the process; values are
    /// monotonic and the final 100 fires only after the server has answered.
    pub async fn upload_lead_file(
        &self,
        file_path: &Path,
        options: &UploadOptions,
        progress: Option<ProgressFn>,
    ) -> Result<UploadAccepted, AppError> {
        let file = tokio::fs::File::open(file_path)
            .await
            .map_err(|e| AppError::Internal(format!("Cannot open {}: {}", file_path.display(), e)))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| AppError::Internal(format!("Cannot stat {}: {}", file_path.display(), e)))?
            .len();
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.csv")
            .to_string();

        let sent = Arc::new(AtomicU64::new(0));
        let reported = Arc::new(AtomicU64::new(0));
        let callback = progress.clone();
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let (Ok(bytes), Some(cb)) = (&chunk, &callback) {
                let done = sent.fetch_add(bytes.len() as u64, Ordering::SeqCst) + bytes.len() as u64;
                // Cap at 99 mid-flight; 100 is reserved for server acceptance.
                let pct = if total == 0 {
                    99
                } else {
                    (done * 100 / total).min(99)
                };
                let prev = reported.fetch_max(pct, Ordering::SeqCst);
                if pct > prev {
                    cb(pct as u8);
                }
            }
            chunk
        });

        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), total)
            .file_name(file_name.clone())
            .mime_str("text/csv")
            .map_err(|e| AppError::Internal(format!("Multipart build failed: {}", e)))?;
        let mut form = Form::new()
            .part("file", part)
            .text("useAiEnhancement", options.use_ai_enhancement.to_string());
        if let Some(model) = &options.ai_model_preference {
            form = form.text("aiModelPreference", model.clone());
        }
        if let Some(owner) = &options.fallback_owner_id {
            form = form.text("fallbackOwnerId", owner.clone());
        }

        info!("[API] Uploading {} ({} bytes)", file_name, total);
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.post(self.endpoint("/leads/upload")), token)
            .multipart(form);
        let accepted: UploadAccepted =
            Self::parse_json(self.send(rb, "POST", "/leads/upload").await?).await?;

        if let Some(cb) = &progress {
            cb(100);
        }
        Ok(accepted)
    }

    // ─── Processing lifecycle ────────────────────────────────────────────────

    pub async fn status(&self, processing_id: &str) -> Result<ProcessingStatus, AppError> {
        self.get_json(&format!("/leads/status/{}", processing_id)).await
    }

    pub async fn mapping_preview(&self, processing_id: &str) -> Result<MappingPreview, AppError> {
        self.get_json(&format!("/leads/preview/{}", processing_id)).await
    }

    pub async fn confirm_processing(
        &self,
        processing_id: &str,
        request: &ConfirmRequest,
    ) -> Result<ConfirmResponse, AppError> {
        self.post_json(&format!("/leads/process/{}/confirm", processing_id), request)
            .await
    }

    /// Downloads a completed result file. The name comes from the
    /// `Content-Disposition` header when the backend provides one.
    pub async fn download_result(&self, processing_id: &str) -> Result<DownloadedFile, AppError> {
        let path = format!("/leads/download/{}", processing_id);
        let token = self.bearer().await?;
        let rb = Self::with_bearer(self.http.get(self.endpoint(&path)), token);
        let response = self.send(rb, "GET", &path).await?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_attachment_filename)
            .unwrap_or_else(|| format!("leads-{}.csv", processing_id));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Internal(format!("Download read failed: {}", e.without_url())))?
            .to_vec();
        Ok(DownloadedFile { file_name, bytes })
    }

    // ─── History & housekeeping ──────────────────────────────────────────────

    pub async fn history(&self, page: u32, limit: u32) -> Result<HistoryPage, AppError> {
        self.get_json(&format!("/leads/history?page={}&limit={}", page, limit))
            .await
    }

    pub async fn clear_history(&self) -> Result<ClearedCount, AppError> {
        self.delete_json("/leads/history/clear").await
    }

    pub async fn clear_files(&self) -> Result<ClearedCount, AppError> {
        self.delete_json("/leads/files/clear").await
    }

    // ─── AI configuration ────────────────────────────────────────────────────

    pub async fn ai_settings(&self) -> Result<AiSettings, AppError> {
        self.get_json("/config/ai").await
    }

    pub async fn update_ai_settings(&self, settings: &AiSettings) -> Result<AiSettings, AppError> {
        self.put_json("/config/ai", settings).await
    }
}

/// Extracts the filename from a `Content-Disposition: attachment` header.
fn parse_attachment_filename(header: &str) -> Option<String> {
    let marker = "filename=";
    let idx = header.find(marker)?;
    let raw = header[idx + marker.len()..].trim();
    let raw = raw.split(';').next()?.trim();
    let name = raw.trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
