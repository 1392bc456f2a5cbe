//! Mail-composition collaborator client.
//!
//! Grounded in `original_source/.../infrastructure/http/mail_writer_client.py`:
//! a single "generate the next followup" POST, treating a 200 response
//! with `success: false` as an error even though the HTTP layer succeeded.
//! Wrapped by the resilience envelope — composer retry policy (2 retries,
//! 1.0s backoff, retry on {502,503,504}) and a dedicated circuit breaker
//! (spec §4.5/§6.4).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FollowupError, Result};
use crate::metrics::Metrics;
use crate::models::EmailHistoryEntry;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOutcome};
use crate::resilience::retry::{retry_with_backoff, RetryPolicy};

/// Everything the composer needs to write and send the next followup in
/// the thread (spec §4.4.e / §6.4).
#[derive(Debug, Clone, Serialize)]
pub struct ComposerRequest {
    pub x_external_id: String,
    pub followup_number: i32,
    pub version_group_id: String,
    pub recipient_email: String,
    pub first_name: String,
    pub last_name: String,
    pub partner_name: String,
    pub website: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
    pub original_subject: Option<String>,
    pub email_history: Vec<EmailHistoryEntry>,
}

#[derive(Debug, Deserialize)]
struct ComposerResponseBody {
    success: bool,
    draft_id: Option<String>,
    error: Option<String>,
}

#[async_trait]
pub trait ComposerClient: Send + Sync {
    /// Returns the id of the newly created followup draft.
    async fn generate_followup(&self, request: &ComposerRequest) -> Result<String>;
}

pub struct HttpComposerClient {
    http: reqwest::Client,
    base_url: Option<String>,
    circuit: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl HttpComposerClient {
    /// `base_url = None` means `MAIL_WRITER_URL` was unset at startup (spec
    /// §6.5): every call fails immediately with a configuration error
    /// rather than attempting a request against an empty URL.
    pub fn new(base_url: Option<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client with a fixed timeout always builds"),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            circuit: CircuitBreaker::new(
                "composer",
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    success_threshold: 2,
                    open_timeout: Duration::from_secs(60),
                },
            ),
            metrics,
        }
    }

    async fn post_generate_followup(&self, request: &ComposerRequest) -> Result<String> {
        let base_url = self.base_url.as_deref().ok_or_else(|| FollowupError::ExternalService {
            service: "composer".to_string(),
            detail: "configuration error: MAIL_WRITER_URL is not set".to_string(),
        })?;
        let url = format!("{base_url}/generate-followup");

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| external_error(&e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(external_error(&status.as_u16().to_string()));
        }

        let body: ComposerResponseBody = response.json().await.map_err(|e| external_error(&e.to_string()))?;

        if !body.success {
            return Err(FollowupError::ExternalService {
                service: "composer".to_string(),
                detail: body.error.unwrap_or_else(|| "composer returned success=false".to_string()),
            });
        }

        body.draft_id
            .ok_or_else(|| external_error("composer reported success but returned no draft_id"))
    }
}

fn external_error(detail: &str) -> FollowupError {
    FollowupError::ExternalService {
        service: "composer".to_string(),
        detail: detail.to_string(),
    }
}

fn is_retryable(err: &FollowupError) -> bool {
    const RETRYABLE: [&str; 3] = ["502", "503", "504"];
    matches!(err, FollowupError::ExternalService { detail, .. } if RETRYABLE.contains(&detail.as_str()))
}

#[async_trait]
impl ComposerClient for HttpComposerClient {
    async fn generate_followup(&self, request: &ComposerRequest) -> Result<String> {
        let start = Instant::now();
        let outcome = self
            .circuit
            .call(|| retry_with_backoff(RetryPolicy::COMPOSER, || self.post_generate_followup(request), is_retryable))
            .await;
        self.metrics.set_circuit_state(self.circuit.name(), self.circuit.state().into());

        match outcome {
            Ok(draft_id) => {
                self.metrics.record_external_request("composer", "success", start.elapsed().as_secs_f64());
                Ok(draft_id)
            }
            Err(CircuitBreakerOutcome::Open(e)) => Err(FollowupError::CircuitOpen(e.0)),
            Err(CircuitBreakerOutcome::Failed(e)) => {
                self.metrics.record_external_request("composer", "error", start.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ComposerRequest {
        ComposerRequest {
            x_external_id: "lead-1".to_string(),
            followup_number: 1,
            version_group_id: "vg-1".to_string(),
            recipient_email: "prospect@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            partner_name: "Acme".to_string(),
            website: "https://acme.test".to_string(),
            thread_id: None,
            message_id: None,
            original_subject: None,
            email_history: vec![],
        }
    }

    #[tokio::test]
    async fn missing_base_url_fails_without_a_network_call() {
        let client = HttpComposerClient::new(None, Arc::new(Metrics::new()));
        let err = client.generate_followup(&request()).await.unwrap_err();
        match err {
            FollowupError::ExternalService { service, detail } => {
                assert_eq!(service, "composer");
                assert!(detail.contains("MAIL_WRITER_URL"));
            }
            other => panic!("expected ExternalService configuration error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_call_records_external_request_and_circuit_metrics() {
        let metrics = Arc::new(Metrics::new());
        let client = HttpComposerClient::new(None, metrics.clone());
        let _ = client.generate_followup(&request()).await;

        let rendered = metrics.render();
        assert!(rendered.contains(r#"external_requests_total{service="composer",status="error"}"#));
        assert!(rendered.contains(r#"circuit_breaker_state{name="composer"}"#));
    }
}
