//! reqwest-backed implementation of [`Backend`].
//!
//! Three hosts: the JSON gateway, the ingest endpoint (raw chunk PUT), and
//! the egest endpoint (raw chunk GET). Idempotent operations and chunk
//! transfers retry with jittered exponential backoff; state-changing gateway
//! calls retry only when the connection failed before any response arrived.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use filen_core::config::Config;
use filen_core::{FilenError, FilenResult, ItemId};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{Backend, DirSelector, ItemKind};
use crate::retry::{delay_for, MAX_ATTEMPTS};
use crate::types::*;

pub struct HttpBackend {
    http: reqwest::Client,
    gateway_url: String,
    ingest_url: String,
    egest_url: String,
    /// Total budget for one chunk across all retry attempts.
    chunk_deadline: Duration,
}

impl HttpBackend {
    /// Build a client. `api_key` is absent only for the pre-login calls
    /// (`auth_info`, `login`).
    pub fn new(config: &Config, api_key: Option<&str>) -> FilenResult<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| FilenError::Auth("API key contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FilenError::Fatal(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            gateway_url: config.gateway_url.clone(),
            ingest_url: config.ingest_url.clone(),
            egest_url: config.egest_url.clone(),
            chunk_deadline: config.chunk_deadline,
        })
    }

    /// POST a JSON gateway endpoint and return the decoded `data` payload.
    async fn gateway_post<T, B>(&self, endpoint: &str, body: &B, idempotent: bool) -> FilenResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.gateway_url, endpoint);
        self.gateway_request(endpoint, idempotent, || self.http.post(&url).json(body))
            .await
    }

    /// GET a JSON gateway endpoint and return the decoded `data` payload.
    async fn gateway_get<T>(&self, endpoint: &str) -> FilenResult<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.gateway_url, endpoint);
        self.gateway_request(endpoint, true, || self.http.get(&url))
            .await
    }

    /// POST a gateway endpoint whose response carries no `data`.
    async fn gateway_post_ok<B>(&self, endpoint: &str, body: &B, idempotent: bool) -> FilenResult<()>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.gateway_url, endpoint);
        let _: Option<serde_json::Value> = self
            .gateway_request_opt(endpoint, idempotent, || self.http.post(&url).json(body))
            .await?;
        Ok(())
    }

    async fn gateway_request<T>(
        &self,
        endpoint: &str,
        idempotent: bool,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> FilenResult<T>
    where
        T: DeserializeOwned,
    {
        self.gateway_request_opt(endpoint, idempotent, build)
            .await?
            .ok_or_else(|| FilenError::Fatal(format!("{endpoint}: response carried no data")))
    }

    /// Send one gateway request with the retry policy; returns the optional
    /// `data` payload of the response frame.
    async fn gateway_request_opt<T>(
        &self,
        endpoint: &str,
        idempotent: bool,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> FilenResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 0u32;
        loop {
            let (err, connection_level) = match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let frame: ApiResponse<T> = resp.json().await.map_err(|e| {
                            FilenError::Transient(format!("{endpoint}: decoding response: {e}"))
                        })?;
                        if !frame.status {
                            return Err(classify_api_failure(frame.code, frame.message));
                        }
                        return Ok(frame.data);
                    }
                    let retry_after = parse_retry_after(resp.headers());
                    let body = resp.text().await.unwrap_or_default();
                    (classify_http(status, &body, retry_after), false)
                }
                Err(e) => (
                    FilenError::Transient(format!("{endpoint}: {e}")),
                    true,
                ),
            };

            attempt += 1;
            let may_retry = if idempotent {
                err.is_retryable()
            } else {
                connection_level
            };
            if !may_retry || attempt >= MAX_ATTEMPTS {
                return Err(err);
            }
            let delay = delay_for(&err, attempt - 1);
            warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Map an HTTP-level failure to an error kind.
fn classify_http(status: StatusCode, body: &str, retry_after: Option<Duration>) -> FilenError {
    let brief: String = body.chars().take(200).collect();
    match status.as_u16() {
        401 | 403 => FilenError::Auth(format!("{status}: {brief}")),
        404 => FilenError::NotFound(format!("{status}: {brief}")),
        409 => FilenError::Conflict(format!("{status}: {brief}")),
        429 => FilenError::RateLimited { retry_after },
        500..=599 => FilenError::Transient(format!("{status}: {brief}")),
        _ => FilenError::Fatal(format!("{status}: {brief}")),
    }
}

/// Map a `status: false` gateway frame to an error kind.
fn classify_api_failure(code: Option<String>, message: Option<String>) -> FilenError {
    let message = message.unwrap_or_else(|| "unknown error".into());
    match code.as_deref() {
        Some(c) if c.starts_with("auth") || c == "invalid_api_key" || c == "api_key_not_found" => {
            FilenError::Auth(message)
        }
        Some(c) if c.ends_with("_not_found") => FilenError::NotFound(message),
        Some(c) if c.ends_with("_exists") => FilenError::Conflict(message),
        Some("internal_error") => FilenError::Transient(message),
        _ => FilenError::Fatal(message),
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ── Request/response helper DTOs used only by the HTTP layer ─────────────────

#[derive(Serialize)]
struct UuidPayload {
    uuid: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DirContentPayload {
    uuid: String,
    folders_only: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExistsPayload {
    parent: ItemId,
    name_hashed: String,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Deserialize)]
struct BaseFolderResponse {
    uuid: ItemId,
}

#[derive(Serialize)]
struct MovePayload {
    uuid: ItemId,
    to: ItemId,
}

#[derive(Serialize)]
struct EmailPayload {
    email: String,
}

fn item_endpoint(kind: ItemKind, op: &str) -> String {
    match kind {
        ItemKind::File => format!("/v3/file/{op}"),
        ItemKind::Folder => format!("/v3/dir/{op}"),
    }
}

// ── Backend implementation ────────────────────────────────────────────────────

#[async_trait]
impl Backend for HttpBackend {
    async fn auth_info(&self, email: &str) -> FilenResult<AuthInfo> {
        self.gateway_post(
            "/v3/auth/info",
            &EmailPayload {
                email: email.to_lowercase(),
            },
            true,
        )
        .await
    }

    async fn login(&self, req: &LoginRequest) -> FilenResult<LoginResponse> {
        self.gateway_post("/v3/login", req, false).await
    }

    async fn user_info(&self) -> FilenResult<UserInfo> {
        self.gateway_get("/v3/user/info").await
    }

    async fn base_folder(&self) -> FilenResult<ItemId> {
        let resp: BaseFolderResponse = self.gateway_get("/v3/user/baseFolder").await?;
        Ok(resp.uuid)
    }

    async fn dir_content(&self, dir: DirSelector) -> FilenResult<DirContent> {
        let uuid = match dir {
            DirSelector::Folder(id) => id.to_string(),
            DirSelector::Trash => "trash".into(),
        };
        self.gateway_post(
            "/v3/dir/content",
            &DirContentPayload {
                uuid,
                folders_only: false,
            },
            true,
        )
        .await
    }

    async fn file_info(&self, uuid: ItemId) -> FilenResult<FileEntry> {
        self.gateway_post(
            "/v3/file",
            &UuidPayload {
                uuid: uuid.to_string(),
            },
            true,
        )
        .await
    }

    async fn file_exists(&self, parent: ItemId, name_hashed: &str) -> FilenResult<bool> {
        let resp: ExistsResponse = self
            .gateway_post(
                "/v3/file/exists",
                &ExistsPayload {
                    parent,
                    name_hashed: name_hashed.to_string(),
                },
                true,
            )
            .await?;
        Ok(resp.exists)
    }

    async fn create_folder(&self, req: &CreateFolderRequest) -> FilenResult<()> {
        self.gateway_post_ok("/v3/dir/create", req, false).await
    }

    async fn move_item(&self, kind: ItemKind, uuid: ItemId, to: ItemId) -> FilenResult<()> {
        self.gateway_post_ok(&item_endpoint(kind, "move"), &MovePayload { uuid, to }, false)
            .await
    }

    async fn rename_file(&self, req: &RenameFileRequest) -> FilenResult<()> {
        self.gateway_post_ok("/v3/file/rename", req, false).await
    }

    async fn rename_folder(&self, req: &RenameFolderRequest) -> FilenResult<()> {
        self.gateway_post_ok("/v3/dir/rename", req, false).await
    }

    async fn trash_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        self.gateway_post_ok(
            &item_endpoint(kind, "trash"),
            &UuidPayload {
                uuid: uuid.to_string(),
            },
            false,
        )
        .await
    }

    async fn restore_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        self.gateway_post_ok(
            &item_endpoint(kind, "restore"),
            &UuidPayload {
                uuid: uuid.to_string(),
            },
            false,
        )
        .await
    }

    async fn delete_item(&self, kind: ItemKind, uuid: ItemId) -> FilenResult<()> {
        self.gateway_post_ok(
            &item_endpoint(kind, "delete/permanent"),
            &UuidPayload {
                uuid: uuid.to_string(),
            },
            false,
        )
        .await
    }

    async fn upload_chunk(&self, req: &ChunkUpload) -> FilenResult<()> {
        let url = format!(
            "{}/v3/upload?uuid={}&index={}&parent={}&uploadKey={}&hash={}",
            self.ingest_url, req.uuid, req.index, req.parent, req.upload_key, req.ciphertext_hash
        );

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let err = match self.http.post(&url).body(req.body.clone()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!(uuid = %req.uuid, index = req.index, bytes = req.body.len(), "chunk stored");
                        return Ok(());
                    }
                    let retry_after = parse_retry_after(resp.headers());
                    let body = resp.text().await.unwrap_or_default();
                    classify_http(status, &body, retry_after)
                }
                Err(e) => FilenError::Transient(format!("chunk {}: {e}", req.index)),
            };

            attempt += 1;
            if !err.is_retryable()
                || attempt >= MAX_ATTEMPTS
                || started.elapsed() >= self.chunk_deadline
            {
                return Err(err);
            }
            let delay = delay_for(&err, attempt - 1);
            warn!(index = req.index, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying chunk PUT");
            tokio::time::sleep(delay).await;
        }
    }

    async fn upload_done(&self, req: &UploadDoneRequest) -> FilenResult<()> {
        self.gateway_post_ok("/v3/upload/done", req, false).await
    }

    async fn upload_empty(&self, req: &UploadEmptyRequest) -> FilenResult<()> {
        self.gateway_post_ok("/v3/upload/empty", req, false).await
    }

    async fn download_chunk(&self, loc: &ChunkLocation, index: u64) -> FilenResult<Vec<u8>> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.egest_url, loc.region, loc.bucket, loc.uuid, index
        );

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            let err = match self.http.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| FilenError::Transient(format!("chunk {index}: {e}")));
                    }
                    let retry_after = parse_retry_after(resp.headers());
                    let body = resp.text().await.unwrap_or_default();
                    classify_http(status, &body, retry_after)
                }
                Err(e) => FilenError::Transient(format!("chunk {index}: {e}")),
            };

            attempt += 1;
            if !err.is_retryable()
                || attempt >= MAX_ATTEMPTS
                || started.elapsed() >= self.chunk_deadline
            {
                return Err(err);
            }
            let delay = delay_for(&err, attempt - 1);
            warn!(index, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying chunk GET");
            tokio::time::sleep(delay).await;
        }
    }
}
