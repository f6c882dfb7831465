//! HTTP client for the remote classification service.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::error::{ScanError, ScanResult};
use crate::sensor::MeasurementKind;

/// Request header carrying the hex HMAC-SHA256 of the request time string.
pub const SIGNATURE_HEADER: &str = "X-Hmac-Sig";

/// Why a remote delivery failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// The service answered with something other than 200
    Status(u16),
    /// Connection error or timeout
    Transport(String),
}

impl RemoteFailure {
    /// Text reported in place of a label.
    pub fn sentinel(&self) -> &'static str {
        match self {
            RemoteFailure::Status(_) => "HTTP Error",
            RemoteFailure::Transport(_) => "HTTP Timeout",
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteFailure::Status(code) => write!(f, "service returned HTTP {code}"),
            RemoteFailure::Transport(e) => write!(f, "request failed: {e}"),
        }
    }
}

impl From<RemoteFailure> for ScanError {
    fn from(failure: RemoteFailure) -> Self {
        ScanError::Network(failure.to_string())
    }
}

#[derive(Serialize)]
struct NotifyBody {
    id: u64,
    time: i64,
}

#[derive(Serialize)]
struct UploadPacket<'a> {
    data: &'a [f32],
    time: i64,
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Hex HMAC-SHA256 of `message` under `key`.
pub fn sign(key: &[u8], message: &str) -> ScanResult<String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|e| ScanError::Crypto(format!("invalid shared key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub struct RemoteClient {
    client: reqwest::Client,
    base_url: String,
    shared_key: String,
    device_id: u64,
    notify_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &ApiConfig, device_id: u64) -> ScanResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ScanError::Network(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            shared_key: config.shared_key.clone(),
            device_id,
            notify_timeout: config.notify_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signed_now(&self) -> ScanResult<(i64, String)> {
        let time = chrono::Utc::now().timestamp();
        let signature = sign(self.shared_key.as_bytes(), &time.to_string())?;
        Ok((time, signature))
    }

    /// Startup handshake. True only for an HTTP 200 answer.
    pub async fn notify(&self) -> bool {
        let (time, signature) = match self.signed_now() {
            Ok(signed) => signed,
            Err(e) => {
                warn!(error = %e, "cannot sign notify request");
                return false;
            }
        };
        let url = format!("{}/notify", self.base_url);
        let result = self
            .client
            .post(&url)
            .header(SIGNATURE_HEADER, signature)
            .json(&NotifyBody {
                id: self.device_id,
                time,
            })
            .timeout(self.notify_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                info!(device_id = self.device_id, %url, "remote service acknowledged device");
                true
            }
            Ok(response) => {
                warn!(status = %response.status(), %url, "remote service rejected notify");
                false
            }
            Err(e) => {
                warn!(error = %e, %url, "remote service unreachable");
                false
            }
        }
    }

    /// Upload one spectrum and return the response body.
    pub async fn upload(
        &self,
        samples: &[f32],
        kind: MeasurementKind,
    ) -> Result<String, RemoteFailure> {
        let (time, signature) = self
            .signed_now()
            .map_err(|e| RemoteFailure::Transport(e.to_string()))?;
        let packet = UploadPacket {
            data: samples,
            time,
            id: self.device_id,
            kind: kind.code(),
        };
        debug!(%kind, samples = samples.len(), "uploading spectrum");

        let response = self
            .client
            .post(&self.base_url)
            .header(SIGNATURE_HEADER, signature)
            .json(&packet)
            .send()
            .await
            .map_err(|e| RemoteFailure::Transport(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(RemoteFailure::Status(response.status().as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| RemoteFailure::Transport(e.to_string()))
    }
}
