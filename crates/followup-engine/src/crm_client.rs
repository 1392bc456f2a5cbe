//! CRM (lead directory) collaborator client.
//!
//! Grounded in `original_source/.../infrastructure/http/odoo_client.py`:
//! a single search-by-`x_external_id` operation against the CRM's
//! `search_read`-style endpoint, Bearer-authenticated, `contact_name`
//! split on the first whitespace into first/last name. Wrapped by the
//! resilience envelope (retry + circuit breaker) — spec §4.5/§6.3.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{FollowupError, Result};
use crate::metrics::Metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerOutcome};
use crate::resilience::retry::{retry_with_backoff, RetryPolicy};

/// The prospect's current CRM record, fetched fresh at processing time
/// because it may have changed since the initial email was sent.
#[derive(Debug, Clone, Default)]
pub struct CrmLead {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub partner_name: String,
    pub website: String,
}

impl CrmLead {
    /// Required-field validation the processor applies before invoking
    /// the composer (spec §4.4.c): `email` must contain `@`, and the
    /// remaining fields must be present.
    pub fn is_valid(&self) -> bool {
        self.email.contains('@')
            && !self.first_name.is_empty()
            && !self.last_name.is_empty()
            && !self.partner_name.is_empty()
            && !self.website.is_empty()
    }
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn find_by_external_id(&self, x_external_id: &str) -> Result<Option<CrmLead>>;
}

#[derive(Debug, Deserialize, Default)]
struct CrmSearchRow {
    #[serde(default)]
    email_normalized: String,
    #[serde(default)]
    website: String,
    #[serde(default)]
    contact_name: String,
    #[serde(default)]
    partner_name: String,
}

impl From<CrmSearchRow> for CrmLead {
    fn from(row: CrmSearchRow) -> Self {
        let (first_name, last_name) = split_contact_name(&row.contact_name);
        CrmLead {
            email: row.email_normalized,
            first_name,
            last_name,
            partner_name: row.partner_name,
            website: row.website,
        }
    }
}

/// Splits `"First Last"` into `("First", "Last")` on the first whitespace,
/// exactly as `OdooLead.from_api_response` does.
fn split_contact_name(contact_name: &str) -> (String, String) {
    match contact_name.split_once(' ') {
        Some((first, last)) => (first.to_string(), last.to_string()),
        None => (contact_name.to_string(), String::new()),
    }
}

/// `reqwest`-backed [`CrmClient`], wrapped by a dedicated circuit breaker
/// and the CRM retry policy (3 retries, 0.5s backoff, retry on
/// {429,500,502,503,504}).
pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
    circuit: CircuitBreaker,
    metrics: Arc<Metrics>,
}

impl HttpCrmClient {
    pub fn new(base_url: String, secret: String, metrics: Arc<Metrics>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client with a fixed timeout always builds"),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            circuit: CircuitBreaker::new(
                "crm",
                CircuitBreakerConfig {
                    failure_threshold: 3,
                    success_threshold: 2,
                    open_timeout: Duration::from_secs(60),
                },
            ),
            metrics,
        }
    }

    async fn search(&self, x_external_id: &str) -> Result<Vec<CrmSearchRow>> {
        let url = format!("{}/json/2/crm.lead/search_read", self.base_url);
        let payload = serde_json::json!({
            "domain": [["x_external_id", "ilike", x_external_id]],
            "fields": ["id", "email_normalized", "website", "contact_name", "partner_name", "function", "description", "x_external_id"],
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret)
            .json(&payload)
            .send()
            .await
            .map_err(|e| external_error(&e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(external_error(&status.as_u16().to_string()));
        }

        response.json().await.map_err(|e| external_error(&e.to_string()))
    }
}

fn external_error(detail: &str) -> FollowupError {
    FollowupError::ExternalService {
        service: "crm".to_string(),
        detail: detail.to_string(),
    }
}

fn is_retryable(err: &FollowupError) -> bool {
    const RETRYABLE: [&str; 5] = ["429", "500", "502", "503", "504"];
    matches!(err, FollowupError::ExternalService { detail, .. } if RETRYABLE.contains(&detail.as_str()))
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn find_by_external_id(&self, x_external_id: &str) -> Result<Option<CrmLead>> {
        let start = Instant::now();
        let outcome = self
            .circuit
            .call(|| retry_with_backoff(RetryPolicy::CRM, || self.search(x_external_id), is_retryable))
            .await;
        self.metrics.set_circuit_state(self.circuit.name(), self.circuit.state().into());

        let rows = match outcome {
            Ok(rows) => {
                let status = if rows.is_empty() { "not_found" } else { "success" };
                self.metrics.record_external_request("crm", status, start.elapsed().as_secs_f64());
                rows
            }
            Err(CircuitBreakerOutcome::Open(e)) => return Err(FollowupError::CircuitOpen(e.0)),
            Err(CircuitBreakerOutcome::Failed(e)) => {
                self.metrics.record_external_request("crm", "error", start.elapsed().as_secs_f64());
                return Err(e);
            }
        };

        Ok(rows.into_iter().next().map(CrmLead::from))
    }
}
