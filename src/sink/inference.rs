//! Local inference over a Unix stream socket.
//!
//! The model process listens on a Unix socket, takes a JSON array of features
//! and answers with a JSON array of probabilities, either flat (`[p...]`) or
//! wrapped in a batch dimension (`[[p...]]`).

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::InferenceConfig;
use crate::error::{ScanError, ScanResult};

/// Opaque classifier: features in, one probability per material out.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn predict(&self, features: &[f32]) -> ScanResult<Vec<f64>>;
}

/// Classifier reached through the model's IPC socket. One connection per
/// prediction.
#[derive(Debug, Clone)]
pub struct IpcClassifier {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClassifier {
    pub fn new(config: &InferenceConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            timeout: config.timeout(),
        }
    }

    async fn exchange(&self, features: &[f32]) -> ScanResult<Value> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        let request = serde_json::to_vec(features)
            .map_err(|e| ScanError::Processing(format!("feature encode failed: {e}")))?;
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut response = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ScanError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("model closed the socket after {} bytes", response.len()),
                )));
            }
            response.extend_from_slice(&chunk[..n]);
            match serde_json::from_slice::<Value>(&response) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_eof() => continue,
                Err(e) => {
                    return Err(ScanError::Processing(format!(
                        "model returned invalid JSON: {e}"
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Classifier for IpcClassifier {
    async fn predict(&self, features: &[f32]) -> ScanResult<Vec<f64>> {
        debug!(path = %self.socket_path.display(), features = features.len(), "local inference");
        let value = tokio::time::timeout(self.timeout, self.exchange(features))
            .await
            .map_err(|_| {
                ScanError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no prediction within {:?}", self.timeout),
                ))
            })??;
        parse_prediction(&value)
    }
}

/// Accept `[p...]` or `[[p...]]`.
pub fn parse_prediction(value: &Value) -> ScanResult<Vec<f64>> {
    let invalid = || ScanError::Processing(format!("unexpected prediction shape: {value}"));
    let outer = value.as_array().ok_or_else(invalid)?;
    let row = match outer.first() {
        Some(Value::Array(inner)) => inner,
        _ => outer,
    };
    row.iter()
        .map(|p| p.as_f64().ok_or_else(invalid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::UnixListener;

    #[test]
    fn test_parse_flat_and_nested() {
        assert_eq!(parse_prediction(&json!([0.2, 0.5, 0.3])).unwrap(), vec![0.2, 0.5, 0.3]);
        assert_eq!(parse_prediction(&json!([[0.2, 0.5, 0.3]])).unwrap(), vec![0.2, 0.5, 0.3]);
        assert!(parse_prediction(&json!({"p": 1})).is_err());
        assert!(parse_prediction(&json!(["a"])).is_err());
    }

    #[tokio::test]
    async fn test_predict_over_socket_with_split_reply() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("model.socket");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let n = conn.read(&mut buf).await.unwrap();
            let features: Vec<f32> = serde_json::from_slice(&buf[..n]).unwrap();
            // reply in two pieces
            conn.write_all(b"[[0.1, 0.7,").await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            conn.write_all(b" 0.2]]").await.unwrap();
            features.len()
        });

        let classifier = IpcClassifier::new(&InferenceConfig {
            socket_path: socket_path.clone(),
            timeout_ms: 2000,
        });
        let probabilities = classifier.predict(&[0.0, 0.5, 1.0]).await.unwrap();
        assert_eq!(probabilities, vec![0.1, 0.7, 0.2]);
        assert_eq!(server.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_socket_is_io_error() {
        let classifier = IpcClassifier::new(&InferenceConfig {
            socket_path: "/nonexistent/model.socket".into(),
            timeout_ms: 200,
        });
        let err = classifier.predict(&[1.0]).await.unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }
}
