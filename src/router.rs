//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Every route also carries
//! its [`Access`] level, which decides which pipeline stages run before the
//! handler.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

/// Which pipeline stages guard a route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access {
    /// Straight to the handler. Login, registration, health probes.
    Public,
    /// Bearer token verified, identity set, then the handler.
    Authenticated,
    /// As `Authenticated`, then served through the cache-aside gateway.
    /// Read methods only.
    Cached,
}

#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) handler: BoxedHandler,
    pub(crate) access: Access,
}

/// The application router.
///
/// Build it once at startup and hand it to [`Service::new`](crate::Service::new).
/// Registration methods return `self` so they chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers a public handler.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// ```rust,no_run
    /// # use taskd::{Access, Method, Request, Response, Router};
    /// # async fn login(_: Request) -> Response { Response::text("") }
    /// # async fn get_task(_: Request) -> Response { Response::text("") }
    /// # async fn delete_task(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Post, "/login", login)
    ///     .route(Method::Get, "/tasks/{id}", Access::Cached, get_task)
    ///     .route(Method::Delete, "/tasks/{id}", Access::Authenticated, delete_task);
    /// ```
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.route(method, path, Access::Public, handler)
    }

    /// Registers a handler behind the given access level.
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate path, and on an [`Access::Cached`]
    /// route for a method that is not a read.
    pub fn route(mut self, method: Method, path: &str, access: Access, handler: impl Handler) -> Self {
        if access == Access::Cached && !method.is_read() {
            panic!("route `{method} {path}`: only GET/HEAD routes may be cached");
        }
        let route = Route { handler: handler.into_boxed_handler(), access };
        self.routes
            .entry(method)
            .or_default()
            .insert(path, route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(Route, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let route = Route {
            handler: Arc::clone(&matched.value.handler),
            access: matched.value.access,
        };
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
