//! Error taxonomy for the scheduling/routing core.
//!
//! Mirrors the categories in the original `httputil.HttpError` (400/500),
//! with 502s handled separately by the reverse proxy since those never
//! need to propagate as a Rust `Error` — the proxy always produces a
//! `Response` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("could not find lambda name in path {0}")]
    MissingLambdaName(String),

    #[error("malformed worker URL: {0}")]
    MalformedWorkerUrl(String),

    #[error("workers query parameter must not be empty")]
    EmptyWorkerList,

    #[error("can't select worker, workers empty")]
    PoolEmpty,
}

impl SchedulerError {
    fn status(&self) -> StatusCode {
        match self {
            SchedulerError::MissingLambdaName(_)
            | SchedulerError::MalformedWorkerUrl(_)
            | SchedulerError::EmptyWorkerList => StatusCode::BAD_REQUEST,
            SchedulerError::PoolEmpty => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "error": self.to_string(), "status": status.as_u16() });
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file '{path}' is ill-formed: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown balancer policy: {0}")]
    UnknownPolicy(String),

    #[error("malformed worker URL '{0}': {1}")]
    MalformedWorkerUrl(String, url::ParseError),
}
