//! HTTP implementation of the upload client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{LocalId, PhotoRef, SubmissionPayload};
use crate::util::{compact_text, is_http_url, normalize_text_option};

use super::{CreatedRecord, UploadClient, UploadError, UploadResult, UploadedPhoto};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const FILE_NAME_HEADER: &str = "X-File-Name";

/// Upload client for the infringement API.
#[derive(Debug, Clone)]
pub struct HttpUploadClient {
    base_url: Url,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpUploadClient {
    /// Builds a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self> {
        let base_url = normalize_base_url(&base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            api_token: normalize_text_option(api_token),
            client,
        })
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, segments: &[&str]) -> UploadResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| UploadError::Rejected(format!("invalid API base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl UploadClient for HttpUploadClient {
    async fn create_record(
        &self,
        local_id: &LocalId,
        payload: &SubmissionPayload,
    ) -> UploadResult<CreatedRecord> {
        let url = self.endpoint(&["v1", "infringements"])?;
        let idempotency_key = local_id.as_str();

        let response = self
            .authorized(self.client.post(url))
            .header(IDEMPOTENCY_HEADER, &idempotency_key)
            .header(ACCEPT, "application/json")
            .json(&CreateRecordRequest {
                local_id: &idempotency_key,
                payload,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<CreateRecordResponse>().await.map_err(|error| {
                UploadError::Network(format!("Failed to parse create response: {error}"))
            })?;
            return Ok(CreatedRecord {
                server_id: body.server_id,
                record_number: body.record_number,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT {
            return Err(parse_conflict(&body));
        }
        Err(classify_status(status, &body))
    }

    async fn upload_photo(&self, server_id: &str, photo: &PhotoRef) -> UploadResult<UploadedPhoto> {
        let bytes = tokio::fs::read(photo.as_str())
            .await
            .map_err(|error| UploadError::Asset(format!("{photo}: {error}")))?;
        let content_type = mime_guess::from_path(photo.as_str()).first_or_octet_stream();
        let file_name = Path::new(photo.as_str())
            .file_name()
            .map_or_else(|| photo.to_string(), |name| name.to_string_lossy().to_string());

        let url = self.endpoint(&["v1", "infringements", server_id, "photos"])?;
        let response = self
            .authorized(self.client.post(url))
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, content_type.essence_str())
            .header(FILE_NAME_HEADER, file_name)
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let body = response.json::<UploadPhotoResponse>().await.map_err(|error| {
                UploadError::Network(format!("Failed to parse photo upload response: {error}"))
            })?;
            return Ok(UploadedPhoto {
                remote_url: body.remote_url,
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    local_id: &'a str,
    #[serde(flatten)]
    payload: &'a SubmissionPayload,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    #[serde(alias = "id")]
    server_id: String,
    #[serde(default)]
    record_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadPhotoResponse {
    #[serde(alias = "url")]
    remote_url: String,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(default, alias = "id")]
    server_id: Option<String>,
    #[serde(default)]
    record_number: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn transport_error(error: reqwest::Error) -> UploadError {
    UploadError::Network(format!("request failed: {error}"))
}

/// Map a non-success, non-conflict response onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> UploadError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::GONE
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => UploadError::Rejected(message),
        _ => UploadError::Network(message),
    }
}

fn parse_conflict(body: &str) -> UploadError {
    let Ok(conflict) = serde_json::from_str::<ConflictBody>(body) else {
        return UploadError::Rejected(parse_api_error(StatusCode::CONFLICT, body));
    };

    match normalize_text_option(conflict.server_id) {
        Some(server_id) => UploadError::Conflict {
            server_id,
            record_number: conflict.record_number,
            idempotency_key: normalize_text_option(conflict.idempotency_key),
        },
        None => UploadError::Rejected(parse_api_error(StatusCode::CONFLICT, body)),
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} (HTTP {})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} (HTTP {})", trimmed, status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> Result<Url> {
    let base_url = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::Config("API base URL must not be empty".to_string()))?;
    if !is_http_url(&base_url) {
        return Err(Error::Config(
            "API base URL must include http:// or https://".to_string(),
        ));
    }
    Url::parse(base_url.trim_end_matches('/'))
        .map_err(|error| Error::Config(format!("Invalid API base URL: {error}")))
}
