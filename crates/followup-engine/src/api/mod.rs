//! Control API surface.
//!
//! Grounded in `original_source/.../api/routes.py`'s `_success_response`
//! (`{"success": true, **data}`) / `_error_response` envelope shape and in
//! `app.py`'s handler bodies for the steady-state endpoints; the teacher's
//! own `main.rs` shows the same composition-root pattern (build a `Router`,
//! mount `/health`, wrap with `tower_http::trace::TraceLayer`). Repair
//! operations are mounted under `/admin/*` per the Non-goal carve-out
//! (DESIGN.md records this decision).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::composer_client::ComposerClient;
use crate::crm_client::CrmClient;
use crate::error::Result;
use crate::metrics::Metrics;
use crate::processor::{BatchOutcome, Processor};
use crate::repair;
use crate::resilience::rate_limit::{InboundRateLimiter, RateLimitConfig};
use crate::scheduler;
use crate::store::FollowupStore;

pub struct AppState {
    pub store: Arc<dyn FollowupStore>,
    pub crm: Arc<dyn CrmClient>,
    pub composer: Arc<dyn ComposerClient>,
    pub rate_limiter: InboundRateLimiter,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn FollowupStore>,
        crm: Arc<dyn CrmClient>,
        composer: Arc<dyn ComposerClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            crm,
            composer,
            rate_limiter: InboundRateLimiter::new(RateLimitConfig::default()),
            metrics,
        }
    }

    fn processor(&self) -> Processor<'_> {
        Processor::new(self.store.as_ref(), self.crm.as_ref(), self.composer.as_ref())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let control = Router::new()
        .route("/schedule-followups", post(schedule_followups))
        .route("/cancel-followups", post(cancel_followups))
        .route("/process-pending-followups", post(process_pending_followups))
        .route("/retry-failed-followups", post(retry_failed_followups))
        .route("/schedule-missing-followups", post(schedule_missing_followups))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    let admin = Router::new()
        .route("/admin/sync-task-ids", post(admin_sync_task_ids))
        .route("/admin/mark-followups-scheduled", post(admin_mark_followups_scheduled))
        .route("/admin/shift-followups", post(admin_shift_followups))
        .route("/admin/mark-followups-done", post(admin_mark_followups_done))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(control)
        .merge(admin)
        .layer(middleware::from_fn_with_state(state.clone(), http_metrics_middleware))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Records `http_requests_total`/`http_request_duration_seconds`/
/// `http_requests_in_progress`, mirroring the original's Flask
/// `before_request`/`after_request` metrics hooks (spec §9 ambient stack).
async fn http_metrics_middleware(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    state.metrics.http_requests_in_progress.with_label_values(&[&method, &path]).inc();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, &path])
        .observe(duration);
    state
        .metrics
        .http_requests_total
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();
    state.metrics.http_requests_in_progress.with_label_values(&[&method, &path]).dec();

    response
}

fn ok_response<T: Serialize>(data: T) -> Response {
    let mut value = serde_json::to_value(data).unwrap_or(Value::Null);
    if let Value::Object(ref mut map) = value {
        map.insert("success".to_string(), Value::Bool(true));
    }
    Json(value).into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "healthy"}))
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

fn client_id(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    connect_info.map(|ci| ci.0.to_string()).unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit_middleware(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let connect_info = request.extensions().get::<ConnectInfo<SocketAddr>>().cloned();
    let client = client_id(request.headers(), connect_info.as_ref());

    if let Err(err) = state.rate_limiter.check(&client) {
        return err.into_response();
    }

    next.run(request).await
}

/// Turns a batch outcome that reports an abort (circuit-open mid-tick)
/// into a 503, and a clean run into a 200 — both carrying the same body
/// shape (spec §6.1).
fn batch_response(outcome: BatchOutcome) -> Response {
    let aborted = outcome.aborted;
    let mut response = ok_response(outcome);
    if aborted {
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    }
    response
}

#[derive(Debug, Deserialize)]
struct ScheduleFollowupsRequest {
    draft_id: String,
}

async fn schedule_followups(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleFollowupsRequest>,
) -> Result<Response> {
    let outcome = scheduler::schedule_for_draft(state.store.as_ref(), &body.draft_id).await?;
    Ok(ok_response(outcome))
}

#[derive(Debug, Deserialize)]
struct CancelFollowupsRequest {
    draft_id: String,
}

async fn cancel_followups(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CancelFollowupsRequest>,
) -> Result<Response> {
    let outcome = crate::cancellation::cancel_for_draft(state.store.as_ref(), &body.draft_id).await?;
    Ok(ok_response(outcome))
}

async fn process_pending_followups(State(state): State<Arc<AppState>>) -> Result<Response> {
    let outcome = state.processor().process_due_followups(None).await?;
    Ok(batch_response(outcome))
}

async fn retry_failed_followups(State(state): State<Arc<AppState>>) -> Result<Response> {
    let outcome = state.processor().retry_all_failed().await?;
    Ok(batch_response(outcome))
}

async fn schedule_missing_followups(State(state): State<Arc<AppState>>) -> Result<Response> {
    let summary = scheduler::schedule_all_sent_drafts(state.store.as_ref()).await?;
    Ok(ok_response(summary))
}

async fn admin_sync_task_ids(State(state): State<Arc<AppState>>) -> Result<Response> {
    let summary = repair::sync_task_ids_to_draft(state.store.as_ref()).await?;
    Ok(ok_response(summary))
}

async fn admin_mark_followups_scheduled(State(state): State<Arc<AppState>>) -> Result<Response> {
    let summary = repair::set_missing_followups_scheduled_flag(state.store.as_ref()).await?;
    Ok(ok_response(summary))
}

async fn admin_shift_followups(
    State(state): State<Arc<AppState>>,
    Json(body): Json<repair::ShiftFollowupsRequest>,
) -> Result<Response> {
    let summary = repair::shift_followups(state.store.as_ref(), body).await?;
    Ok(ok_response(summary))
}

async fn admin_mark_followups_done(
    State(state): State<Arc<AppState>>,
    Json(body): Json<repair::MarkFollowupsDoneRequest>,
) -> Result<Response> {
    let summary = repair::mark_followups_done(state.store.as_ref(), body).await?;
    Ok(ok_response(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer_client::ComposerRequest;
    use crate::crm_client::CrmLead;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    struct NoopCrm;
    #[async_trait]
    impl CrmClient for NoopCrm {
        async fn find_by_external_id(&self, _x_external_id: &str) -> Result<Option<CrmLead>> {
            Ok(None)
        }
    }

    struct NoopComposer;
    #[async_trait]
    impl ComposerClient for NoopComposer {
        async fn generate_followup(&self, _request: &ComposerRequest) -> Result<String> {
            Ok("unused".to_string())
        }
    }

    fn test_app() -> Router {
        let state = Arc::new(AppState::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(NoopCrm),
            Arc::new(NoopComposer),
            Arc::new(Metrics::new()),
        ));
        router(state)
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let app = test_app();
        let response = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn schedule_followups_reports_draft_not_found() {
        let app = test_app();
        let body = serde_json::to_vec(&json!({"draft_id": "missing"})).unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/schedule-followups")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_exposition() {
        let app = test_app();
        let response = app
            .oneshot(HttpRequest::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
