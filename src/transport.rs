//! Typed wrapper around the LapCompare control plane HTTP contract.
//!
//! Five operations, each a single request/response round trip. Looping,
//! retrying and state tracking live in the orchestrator; this module only
//! issues calls and normalizes failures into typed errors.

use crate::config::{Config, ConfigError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors surfaced by control plane calls
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sign failed: {status} {body}")]
    Signing { status: u16, body: String },

    #[error("upload failed: {status}")]
    Upload { status: u16 },

    #[error("start failed: {status} {body}")]
    Submission { status: u16, body: String },

    #[error("poll failed: {status} {body}")]
    Poll { status: u16, body: String },

    #[error("detect failed: {status} {body}")]
    Detection { status: u16, body: String },

    #[error("failed to decode {call} response: {source}")]
    Decode {
        call: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("request to control plane failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Remote storage coordinates returned by the signing step.
/// Immutable once obtained; reusable across multiple job submissions
/// for the same physical file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub bucket: String,
    pub key: String,
}

/// A signed upload slot: where to PUT the bytes and where they can be read back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUpload {
    pub bucket: String,
    pub key: String,
    /// PUT destination; the upload must declare the exact content type
    /// given at signing time
    pub put_url: String,
    /// Stable read locator, surfaced later inside result artifacts
    pub get_url: String,
}

impl SignedUpload {
    /// The durable storage reference for this upload
    pub fn target(&self) -> UploadTarget {
        UploadTarget {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
        }
    }
}

/// A time window inside a video, in seconds.
///
/// `end_s == 0` is the wire sentinel for "to end of video" and is always
/// transmitted verbatim; the client never substitutes a computed duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_s: f64,
    pub end_s: f64,
}

impl TimeRange {
    pub fn new(start_s: f64, end_s: f64) -> Self {
        Self { start_s, end_s }
    }
}

/// Job submission payload, tagged by mode. Exactly one mode is active
/// per submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum JobRequest {
    /// Two separate video files, one lap each
    Pair {
        #[serde(rename = "lapA")]
        lap_a: UploadTarget,
        #[serde(rename = "lapB")]
        lap_b: UploadTarget,
    },
    /// Two time ranges inside one shared video
    Segments {
        video: UploadTarget,
        #[serde(rename = "segA")]
        seg_a: TimeRange,
        #[serde(rename = "segB")]
        seg_b: TimeRange,
    },
}

/// Identifiers for a started job. `call_id` is the only token needed to
/// poll; the rest is pass-through for display and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    pub call_id: String,
    pub results_prefix: String,
}

/// Remote job state as reported by the poll endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
}

/// One poll response: the current state plus the result manifest once finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Manifest>,
}

/// Finished-job result payload from the remote service.
///
/// The known fields are validated structurally at the deserialization
/// boundary; anything else the service includes is retained via `extra` so
/// the manifest passes through to the display layer unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: String,
    pub summary: String,
    pub artifacts: HashMap<String, Artifact>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A named downloadable artifact inside a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One candidate lap proposed by the detection service.
/// Candidates arrive best-first; the client uses at most the first two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedLap {
    pub start_s: f64,
    pub end_s: f64,
    pub score: f64,
}

#[derive(Serialize)]
struct SignUploadRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
}

#[derive(Serialize)]
struct DetectLapsRequest<'a> {
    video: &'a UploadTarget,
    min_lap_s: f64,
    max_lap_s: f64,
    top_k: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct DetectLapsResponse {
    #[serde(default)]
    laps: Vec<DetectedLap>,
}

/// The control plane contract as seen by the rest of the client.
///
/// Every operation is idempotent from the caller's point of view and
/// surfaces a typed failure instead of a raw transport error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Request a signed upload slot for a local file
    async fn sign_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<SignedUpload, TransportError>;

    /// PUT file bytes to a signed URL. The content type must match the one
    /// declared during signing.
    async fn put_to_storage(
        &self,
        put_url: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), TransportError>;

    /// Submit a job and receive its handle
    async fn start_job(&self, request: &JobRequest) -> Result<JobHandle, TransportError>;

    /// Fetch the current status of a job. Never blocks beyond the single
    /// request; the poll loop belongs to the orchestrator.
    async fn poll_job(&self, call_id: &str) -> Result<JobStatus, TransportError>;

    /// Ask the service to propose lap segments inside an uploaded video
    async fn detect_laps(
        &self,
        video: &UploadTarget,
        min_lap_s: f64,
        max_lap_s: f64,
        top_k: u32,
    ) -> Result<Vec<DetectedLap>, TransportError>;
}

/// reqwest-backed control plane client
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    /// Applied to control plane calls only. Storage PUTs are left unbounded
    /// since upload time scales with video size.
    request_timeout: Duration,
}

impl ControlPlaneClient {
    /// Create a new client. The endpoint is validated here, once, so a
    /// missing or placeholder URL fails before any call is attempted.
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        config.control_plane.validate()?;

        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            base_url: config.control_plane.base_url(),
            request_timeout: config.request_timeout(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn decode<T: serde::de::DeserializeOwned>(
        call: &'static str,
        body: &str,
    ) -> Result<T, TransportError> {
        serde_json::from_str(body).map_err(|source| TransportError::Decode { call, source })
    }
}

/// Read the status and raw body text of a failed response for diagnostics
async fn failure_parts(response: reqwest::Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    (status, body)
}

#[async_trait]
impl ControlPlane for ControlPlaneClient {
    #[instrument(skip(self))]
    async fn sign_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<SignedUpload, TransportError> {
        let response = self
            .http
            .post(self.endpoint("sign-upload"))
            .timeout(self.request_timeout)
            .json(&SignUploadRequest {
                filename,
                content_type,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(TransportError::Signing { status, body });
        }

        let body = response.text().await?;
        let signed: SignedUpload = Self::decode("sign-upload", &body)?;

        debug!(bucket = %signed.bucket, key = %signed.key, "Upload slot signed");
        Ok(signed)
    }

    #[instrument(skip(self, put_url, body), fields(size_bytes = body.len()))]
    async fn put_to_storage(
        &self,
        put_url: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), TransportError> {
        let response = self
            .http
            .put(put_url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Upload {
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn start_job(&self, request: &JobRequest) -> Result<JobHandle, TransportError> {
        let response = self
            .http
            .post(self.endpoint("start-job"))
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(TransportError::Submission { status, body });
        }

        let body = response.text().await?;
        let handle: JobHandle = Self::decode("start-job", &body)?;

        debug!(job_id = %handle.job_id, call_id = %handle.call_id, "Job started");
        Ok(handle)
    }

    #[instrument(skip(self))]
    async fn poll_job(&self, call_id: &str) -> Result<JobStatus, TransportError> {
        let response = self
            .http
            .get(self.endpoint(&format!("jobs/{call_id}")))
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(TransportError::Poll { status, body });
        }

        let body = response.text().await?;
        Self::decode("poll", &body)
    }

    #[instrument(skip(self, video), fields(bucket = %video.bucket, key = %video.key))]
    async fn detect_laps(
        &self,
        video: &UploadTarget,
        min_lap_s: f64,
        max_lap_s: f64,
        top_k: u32,
    ) -> Result<Vec<DetectedLap>, TransportError> {
        let response = self
            .http
            .post(self.endpoint("detect-laps"))
            .timeout(self.request_timeout)
            .json(&DetectLapsRequest {
                video,
                min_lap_s,
                max_lap_s,
                top_k,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = failure_parts(response).await;
            return Err(TransportError::Detection { status, body });
        }

        let body = response.text().await?;
        let detected: DetectLapsResponse = Self::decode("detect-laps", &body)?;
        Ok(detected.laps)
    }
}
