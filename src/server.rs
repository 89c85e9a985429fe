//! HTTP surface and process bootstrap.
//!
//! Route table mirrors the original `Start()`'s `http.HandleFunc` table
//! (`/run/`, `/status`, `/admin/workers/add`, `/admin/workers/remove`,
//! `/destroySandbox/`), plus `/healthz` and `/metrics`, which the original
//! never had — this router's own liveness and observability, not the
//! worker health-checking the spec explicitly puts out of scope. State is
//! threaded through axum's `State` extractor instead of the original's
//! package-level `myScheduler`/`myConfig` globals.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

use crate::balancer::{BalancerFactory, SelectionContext};
use crate::config::RouterConfig;
use crate::error::SchedulerError;
use crate::logging::{self, LoggingGuard};
use crate::metrics;
use crate::proxy::HttpReverseProxy;
use crate::scheduler::Scheduler;
use crate::worker::{Lambda, WorkerUrl};

pub struct AppState {
    scheduler: Scheduler,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

fn selection_context(uri: &Uri) -> SelectionContext {
    SelectionContext {
        path_and_query: uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
    }
}

/// Mirrors the original `Get2ndPathSegment`: trims the leading and a single
/// trailing slash, splits on `/`, and requires exactly two non-empty
/// components with `first_segment` as the first — so `/run`, `/run/`, and
/// `/run/a/b` all fail the same way the Go source's length-2 check does,
/// rather than 404ing before the handler ever runs.
fn lambda_name_from_path(path: &str, first_segment: &str) -> Result<String, SchedulerError> {
    let trimmed = path.trim_start_matches('/');
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    let components: Vec<&str> = trimmed.split('/').collect();
    if components.len() == 2 && components[0] == first_segment && !components[1].is_empty() {
        Ok(components[1].to_string())
    } else {
        Err(SchedulerError::MissingLambdaName(path.to_string()))
    }
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let lambda_name = match lambda_name_from_path(uri.path(), "run") {
        Ok(name) => name,
        Err(err) => return err.into_response(),
    };
    let lambda = Lambda::new(lambda_name);
    let ctx = selection_context(&uri);
    info!(path = %uri, "received request");
    let response = state
        .scheduler
        .run(&lambda, &ctx, method, headers, body)
        .await;
    let status = response.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR || status == StatusCode::BAD_GATEWAY {
        tracing::warn!(%status, path = %uri, "request failed");
    }
    response
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    state
        .scheduler
        .status_check_all_workers(method, headers)
        .await
}

#[derive(Debug, Deserialize)]
struct WorkersQuery {
    #[serde(default)]
    workers: Vec<String>,
}

fn parse_worker_urls(raw: &[String]) -> Result<Vec<WorkerUrl>, SchedulerError> {
    if raw.is_empty() {
        return Err(SchedulerError::EmptyWorkerList);
    }
    raw.iter()
        .map(|s| WorkerUrl::parse(s).map_err(|_| SchedulerError::MalformedWorkerUrl(s.clone())))
        .collect()
}

async fn add_worker_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkersQuery>,
) -> Response {
    match parse_worker_urls(&query.workers) {
        Ok(urls) => {
            state.scheduler.add_workers(urls);
            StatusCode::OK.into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn remove_worker_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WorkersQuery>,
) -> Response {
    match parse_worker_urls(&query.workers) {
        Ok(urls) => {
            state.scheduler.remove_workers(urls);
            StatusCode::OK.into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DestroySandboxPayload {
    host: String,
}

/// Parses a `destroySandbox` payload's `host` field the way the original's
/// `json.Decode(&url.URL)` does: `url.URL`'s JSON unmarshal has no custom
/// hook, so it lands straight in the `Host` field as a bare `host:port`, not
/// a full `scheme://host` URL. A full URL is accepted too, for callers that
/// send one anyway.
fn worker_url_from_destroy_payload(host: &str) -> Result<WorkerUrl, url::ParseError> {
    WorkerUrl::parse(host).or_else(|_| WorkerUrl::parse(&format!("http://{host}")))
}

/// Mirrors the original's fire-and-forget `destroySandboxHandler`: a bad
/// path segment or worker host is logged and swallowed rather than
/// surfaced to the caller, the handler always answers 200.
async fn destroy_sandbox_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(payload): Json<DestroySandboxPayload>,
) -> Response {
    let lambda_name = match lambda_name_from_path(uri.path(), "destroySandbox") {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(%err, "error destroying sandbox");
            return StatusCode::OK.into_response();
        }
    };
    match worker_url_from_destroy_payload(&payload.host) {
        Ok(worker) => state
            .scheduler
            .destroy_sandbox(&worker, &Lambda::new(lambda_name)),
        Err(err) => tracing::warn!(host = %payload.host, %err, "bad worker URL in destroySandbox"),
    }
    StatusCode::OK.into_response()
}

async fn healthz_handler() -> Response {
    (StatusCode::OK, "ok").into_response()
}

/// `/metrics` is served by the Prometheus exporter's own listener
/// (`metrics::start`), bound separately from the router's main listener.
/// This route exists so a client pointed only at the router's host:port
/// still gets a documented answer instead of a 404.
async fn metrics_handler() -> Response {
    (
        StatusCode::OK,
        "metrics are served on the dedicated Prometheus exporter listener",
    )
        .into_response()
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/run", post(run_handler).get(run_handler))
        .route("/run/{*rest}", post(run_handler).get(run_handler))
        .route("/status", get(status_handler))
        .route("/admin/workers/add", post(add_worker_handler))
        .route("/admin/workers/remove", post(remove_worker_handler))
        .route("/destroySandbox", post(destroy_sandbox_handler))
        .route("/destroySandbox/{*rest}", post(destroy_sandbox_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Builds the client, balancer, scheduler, and router from `config`, binds
/// the listener, and serves until a shutdown signal arrives.
pub async fn startup(config: RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard: LoggingGuard = logging::init(&config.log_level, config.log_json);

    if let Some(prometheus_config) = &config.prometheus {
        if let Err(err) = metrics::start(prometheus_config) {
            error!(%err, "failed to start metrics exporter, continuing without it");
        }
    }

    info!(
        host = %config.host,
        port = config.port,
        policy = ?config.policy,
        workers = config.workers.len(),
        "starting hiku router",
    );

    let client = Client::builder()
        .pool_idle_timeout(Some(Duration::from_secs(50)))
        .pool_max_idle_per_host(500)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(30)))
        .build()?;

    let balancer = BalancerFactory::create(config.policy, config.workers.clone());
    metrics::set_pool_size(balancer.name(), config.workers.len());
    let proxy = Arc::new(HttpReverseProxy::new(client));
    let scheduler = Scheduler::new(balancer, proxy);

    let state = Arc::new(AppState { scheduler });
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(workers: Vec<WorkerUrl>) -> Arc<AppState> {
        let balancer = BalancerFactory::create(crate::config::PolicyKind::Random, workers);
        let proxy = Arc::new(HttpReverseProxy::new(Client::new()));
        Arc::new(AppState {
            scheduler: Scheduler::new(balancer, proxy),
        })
    }

    #[tokio::test]
    async fn run_with_empty_pool_returns_server_error() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/run/myfn")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn add_worker_with_empty_query_is_bad_request() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/admin/workers/add")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn add_worker_then_status_reaches_every_worker() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/admin/workers/add?workers=http://127.0.0.1:1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/status")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let _body = response.into_body().collect().await.unwrap().to_bytes();
    }

    #[tokio::test]
    async fn run_with_no_lambda_segment_is_bad_request() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/run")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_with_extra_path_segments_is_bad_request() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/run/a/b")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn destroy_sandbox_with_no_lambda_segment_is_swallowed() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/destroySandbox")
            .header("content-type", "application/json")
            .body(Body::from("{\"host\":\"worker1:8000\"}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn destroy_sandbox_accepts_bare_host_payload() {
        let workers = vec![WorkerUrl::parse("http://worker1:8000").unwrap()];
        let app = build_app(test_state(workers));
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/destroySandbox/myfn")
            .header("content-type", "application/json")
            .body(Body::from("{\"host\":\"worker1:8000\"}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let app = build_app(test_state(vec![]));
        let request = axum::http::Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
