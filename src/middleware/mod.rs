//! Request pipeline.
//!
//! Every routed request runs the stages its [`Access`] level asks for, in
//! this fixed order:
//!
//! ```text
//! Received ─▶ Authenticating ─┬─▶ Unauthenticated (401, stop)
//!                             └─▶ Authenticated ─┬─▶ CacheCheck ─┬─▶ Completed (hit)
//!                                                │               └─▶ Dispatched ─▶ Completed
//!                                                └─▶ Dispatched ─▶ Completed
//! ```
//!
//! Public routes go straight to `Dispatched`. Authentication always comes
//! before the cache lookup, so an unauthenticated request never sees a
//! cached body.

mod auth;
mod cache;

use tracing::trace;

pub use self::cache::CacheGateway;

use crate::request::Request;
use crate::response::Response;
use crate::router::{Access, Route};
use crate::token::TokenVerifier;

/// Drives one request through auth, the optional cache gateway and the
/// handler. Built once at startup and shared by every connection.
pub struct Pipeline {
    verifier: TokenVerifier,
    gateway: Option<CacheGateway>,
}

impl Pipeline {
    /// `gateway` is `None` when caching is disabled; cached routes then
    /// behave like plain authenticated ones.
    pub fn new(verifier: TokenVerifier, gateway: Option<CacheGateway>) -> Self {
        Self { verifier, gateway }
    }

    pub(crate) async fn run(&self, route: &Route, mut req: Request) -> Response {
        if route.access == Access::Public {
            trace!(path = req.path(), "dispatched (public)");
            return route.handler.call(req).await;
        }

        if let Err(unauthenticated) = auth::authenticate(&self.verifier, &mut req) {
            return unauthenticated;
        }

        match (route.access, &self.gateway) {
            (Access::Cached, Some(gateway)) => gateway.serve(req, &route.handler).await,
            _ => {
                trace!(path = req.path(), "dispatched");
                route.handler.call(req).await
            }
        }
    }
}
