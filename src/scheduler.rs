//! Ties a [`Balancer`] to a [`ReverseProxy`]: select a worker, forward the
//! request, always release the worker afterward.
//!
//! Grounded on the original `Scheduler.Run`/`AddWorkers`/`RemoveWorkers`/
//! `DestroySandbox`/`StatusCheckAllWorkers`. The HTTP-specific parsing those
//! methods did directly on `*http.Request` (pulling the lambda name out of
//! the path, decoding the destroy-sandbox body) is done by the axum
//! handlers in `server.rs` instead — this module only knows about
//! [`crate::worker::Lambda`] and [`crate::worker::WorkerUrl`], not routes.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use futures_util::future::join_all;
use tracing::info;

use crate::balancer::{Balancer, SelectionContext};
use crate::error::SchedulerError;
use crate::metrics;
use crate::proxy::ReverseProxy;
use crate::worker::{Lambda, WorkerUrl};

pub struct Scheduler {
    balancer: Arc<dyn Balancer>,
    proxy: Arc<dyn ReverseProxy>,
}

impl Scheduler {
    pub fn new(balancer: Arc<dyn Balancer>, proxy: Arc<dyn ReverseProxy>) -> Self {
        Self { balancer, proxy }
    }

    /// Selects a worker for `lambda`, forwards the request to it, and
    /// releases the worker once the proxy call returns — regardless of
    /// whether that call produced a success or an error response. The
    /// release happening in all cases, not just the happy path, is the one
    /// invariant this method exists to guarantee.
    pub async fn run(
        &self,
        lambda: &Lambda,
        ctx: &SelectionContext,
        method: Method,
        headers: HeaderMap,
        body: Body,
    ) -> Response {
        let start = Instant::now();
        let worker = match self.balancer.select_worker(ctx, lambda).await {
            Ok(worker) => worker,
            Err(err) => {
                metrics::record_selection_failure(self.balancer.name());
                return err.into_response_with_tracing();
            }
        };
        info!(
            worker = %worker,
            lambda = %lambda,
            policy = self.balancer.name(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "selected worker",
        );
        metrics::record_selection(self.balancer.name());

        let response = self
            .proxy
            .proxy_request(&worker, method, &ctx.path_and_query, headers, body)
            .await;

        self.balancer.release_worker(&worker, lambda);
        response
    }

    pub fn add_workers(&self, urls: Vec<WorkerUrl>) {
        for url in urls {
            self.balancer.add_worker(url);
        }
    }

    pub fn remove_workers(&self, urls: Vec<WorkerUrl>) {
        for url in &urls {
            self.balancer.remove_worker(url);
        }
    }

    pub fn destroy_sandbox(&self, worker: &WorkerUrl, lambda: &Lambda) {
        self.balancer.destroy_sandbox(worker, lambda);
    }

    /// Proxies a status probe to every worker currently in the pool and
    /// joins their bodies with newlines, matching the original's behavior
    /// of writing each worker's response onto the same `ResponseWriter` in
    /// turn.
    pub async fn status_check_all_workers(&self, method: Method, headers: HeaderMap) -> Response {
        let workers = self.balancer.get_all_workers();
        let ctx = SelectionContext {
            path_and_query: "/status".to_string(),
        };

        let calls = workers.iter().map(|worker| {
            let proxy = Arc::clone(&self.proxy);
            let method = method.clone();
            let headers = headers.clone();
            let path = ctx.path_and_query.clone();
            let worker = worker.clone();
            async move {
                proxy
                    .proxy_request(&worker, method, &path, headers, Body::empty())
                    .await
            }
        });

        let responses = join_all(calls).await;
        let mut bodies = Vec::with_capacity(responses.len());
        for response in responses {
            let (_, body) = response.into_parts();
            if let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await {
                bodies.push(String::from_utf8_lossy(&bytes).into_owned());
            }
        }

        Response::new(Body::from(bodies.join("\n")))
    }
}

trait SchedulerErrorResponse {
    fn into_response_with_tracing(self) -> Response;
}

impl SchedulerErrorResponse for SchedulerError {
    fn into_response_with_tracing(self) -> Response {
        tracing::warn!(error = %self, "worker selection failed");
        axum::response::IntoResponse::into_response(self)
    }
}
