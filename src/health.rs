//! Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! A cache outage never makes the service unready: reads degrade to live
//! handling. Readiness reports the cache state so operators can see it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheStore, bounded};
use crate::handler::Handler;
use crate::request::Request;
use crate::response::{Json, Response};

/// Always `200 OK` with body `"ok"`. No dependencies.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    cache: &'static str,
}

/// Readiness handler reporting the cache as `up`, `down` or `disabled`.
/// The ping is bounded by `timeout`.
pub fn readiness(cache: Option<Arc<dyn CacheStore>>, timeout: Duration) -> impl Handler {
    move |_req: Request| {
        let cache = cache.clone();
        async move {
            let cache = match cache {
                None => "disabled",
                Some(store) => match bounded(timeout, store.ping()).await {
                    Ok(()) => "up",
                    Err(_) => "down",
                },
            };
            Json(Readiness { status: "ready", cache })
        }
    }
}
