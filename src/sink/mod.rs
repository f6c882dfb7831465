//! Classification result delivery.
//!
//! [`ResultSink`] decides once, at startup, whether the remote classification
//! service is usable. While it is, every measurement is uploaded and the
//! service's answer becomes the label; otherwise the spectrum is turned into
//! normalized reflectance and classified by the local model.
//!
//! A failed upload does not change the mode. The single delivery falls back
//! to local inference, and the remote failure sentinel is only used as the
//! label when the local path fails too.

pub mod api;
pub mod inference;
pub mod labels;
pub mod reflectance;

use std::sync::Arc;
use tracing::{info, warn};

pub use api::{RemoteClient, RemoteFailure};
pub use inference::{Classifier, IpcClassifier};

use crate::error::ScanResult;
use crate::sensor::{MeasurementKind, Spectrum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    Remote,
    Local,
}

/// Outcome of publishing one measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub label: String,
    pub route: DeliveryRoute,
    /// Sentinel of a failed upload that preceded this delivery
    pub remote_error: Option<&'static str>,
}

pub struct ResultSink {
    remote: RemoteClient,
    remote_active: bool,
    classifier: Arc<dyn Classifier>,
}

impl ResultSink {
    /// Notify the remote service and latch the result for the process lifetime.
    pub async fn connect(remote: RemoteClient, classifier: Arc<dyn Classifier>) -> Self {
        let remote_active = remote.notify().await;
        info!(
            remote_active,
            url = remote.base_url(),
            "result delivery mode latched"
        );
        Self::with_mode(remote, classifier, remote_active)
    }

    /// Build a sink with a known mode, skipping the handshake.
    pub fn with_mode(
        remote: RemoteClient,
        classifier: Arc<dyn Classifier>,
        remote_active: bool,
    ) -> Self {
        Self {
            remote,
            remote_active,
            classifier,
        }
    }

    pub fn remote_active(&self) -> bool {
        self.remote_active
    }

    /// Publish a normal measurement and produce its label.
    ///
    /// Fails only when the local path is the sole route and it fails.
    pub async fn deliver(
        &self,
        measured: &Spectrum,
        white: &Spectrum,
        background: &Spectrum,
    ) -> ScanResult<Delivery> {
        if !self.remote_active {
            let label = self.classify_locally(measured, white, background).await?;
            return Ok(Delivery {
                label,
                route: DeliveryRoute::Local,
                remote_error: None,
            });
        }

        let failure = match self
            .remote
            .upload(measured.samples(), MeasurementKind::Normal)
            .await
        {
            Ok(body) => {
                return Ok(Delivery {
                    label: labels::decode_remote(&body),
                    route: DeliveryRoute::Remote,
                    remote_error: None,
                })
            }
            Err(failure) => failure,
        };

        warn!(error = %failure, "upload failed; falling back to local inference");
        let sentinel = failure.sentinel();
        match self.classify_locally(measured, white, background).await {
            Ok(label) => Ok(Delivery {
                label,
                route: DeliveryRoute::Local,
                remote_error: Some(sentinel),
            }),
            Err(e) => {
                warn!(error = %e, "local fallback failed too");
                Ok(Delivery {
                    label: sentinel.to_string(),
                    route: DeliveryRoute::Remote,
                    remote_error: Some(sentinel),
                })
            }
        }
    }

    /// Upload a calibration spectrum when remote mode is active. Best-effort.
    pub async fn upload_reference(&self, spectrum: &Spectrum, kind: MeasurementKind) {
        if !self.remote_active {
            return;
        }
        if let Err(e) = self.remote.upload(spectrum.samples(), kind).await {
            warn!(%kind, error = %e, "reference upload failed");
        }
    }

    async fn classify_locally(
        &self,
        measured: &Spectrum,
        white: &Spectrum,
        background: &Spectrum,
    ) -> ScanResult<String> {
        let features = reflectance::features(measured, white, background)?;
        let probabilities = self.classifier.predict(&features).await?;
        Ok(labels::format_local(&probabilities))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::error::ScanError;
    use crate::sensor::SPECTRUM_LEN;
    use async_trait::async_trait;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedClassifier(Option<Vec<f64>>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn predict(&self, features: &[f32]) -> ScanResult<Vec<f64>> {
            assert_eq!(features.len(), SPECTRUM_LEN);
            self.0
                .clone()
                .ok_or_else(|| ScanError::Processing("model offline".into()))
        }
    }

    fn spectra() -> (Spectrum, Spectrum, Spectrum) {
        let s = |f: &dyn Fn(usize) -> f32| {
            Spectrum::try_from((0..SPECTRUM_LEN).map(f).collect::<Vec<_>>()).unwrap()
        };
        (
            s(&|i| 100.0 + (i % 10) as f32 * 50.0),
            s(&|_| 1000.0),
            s(&|_| 100.0),
        )
    }

    fn remote(server: &MockServer) -> RemoteClient {
        let config = ApiConfig {
            base_url: server.uri(),
            shared_key: "k".into(),
            timeout_ms: 300,
            notify_timeout_ms: 300,
        };
        RemoteClient::new(&config, 1).unwrap()
    }

    #[tokio::test]
    async fn test_local_mode_uses_classifier() {
        let server = MockServer::start().await;
        let sink = ResultSink::with_mode(
            remote(&server),
            Arc::new(FixedClassifier(Some(vec![0.2, 0.3, 0.5]))),
            false,
        );
        let (m, w, b) = spectra();

        let delivery = sink.deliver(&m, &w, &b).await.unwrap();
        assert_eq!(delivery.route, DeliveryRoute::Local);
        assert_eq!(delivery.label, "Wool: 50.0%\nCotton: 30.0%\nPolyester: 20.0%\n");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(serde_json::json!({"type": "m", "id": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"outputs": [[0.9, 0.05, 0.05]]}"#))
            .mount(&server)
            .await;
        let sink = ResultSink::with_mode(remote(&server), Arc::new(FixedClassifier(None)), true);
        let (m, w, b) = spectra();

        let delivery = sink.deliver(&m, &w, &b).await.unwrap();
        assert_eq!(delivery.route, DeliveryRoute::Remote);
        assert!(delivery.label.starts_with("Polyester: 90%\n"));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let sink = ResultSink::with_mode(
            remote(&server),
            Arc::new(FixedClassifier(Some(vec![0.6, 0.3, 0.1]))),
            true,
        );
        let (m, w, b) = spectra();

        let delivery = sink.deliver(&m, &w, &b).await.unwrap();
        assert_eq!(delivery.route, DeliveryRoute::Local);
        assert_eq!(delivery.remote_error, Some("HTTP Error"));
        assert!(delivery.label.starts_with("Polyester: 60.0%"));
        assert!(sink.remote_active());
    }

    #[tokio::test]
    async fn test_sentinel_when_both_paths_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        let sink = ResultSink::with_mode(remote(&server), Arc::new(FixedClassifier(None)), true);
        let (m, w, b) = spectra();

        let delivery = sink.deliver(&m, &w, &b).await.unwrap();
        assert_eq!(delivery.label, "HTTP Error");
    }

    #[tokio::test]
    async fn test_local_only_failure_is_error() {
        let server = MockServer::start().await;
        let sink = ResultSink::with_mode(remote(&server), Arc::new(FixedClassifier(None)), false);
        let (m, w, b) = spectra();

        assert!(sink.deliver(&m, &w, &b).await.is_err());
    }
}
