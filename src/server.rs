//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`. No new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! A response still streaming when the connection is torn down never
//! populates the cache; see [`capture`](crate::capture).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::capture::CaptureBody;
use crate::error::Error;
use crate::method::Method;
use crate::middleware::Pipeline;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::status::Status;

// ── Service ───────────────────────────────────────────────────────────────────

/// Routing table plus request pipeline: everything between a parsed request
/// and the response handed back to the connection.
///
/// Tests drive it directly through [`call`](Service::call), no socket needed.
pub struct Service {
    router: Router,
    pipeline: Pipeline,
}

impl Service {
    pub fn new(router: Router, pipeline: Pipeline) -> Self {
        Self { router, pipeline }
    }

    /// Routes `req` and runs it through the stages its route requires.
    pub async fn call(&self, mut req: Request) -> Response {
        let Some((route, params)) = self.router.lookup(req.method(), req.path()) else {
            debug!(method = %req.method(), path = req.path(), "no route");
            return Response::error(Status::NotFound, "not found");
        };
        req.params = params;
        self.pipeline.run(&route, req).await
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    pub fn bind(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `service`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, service: Service) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let service = Arc::new(service);

        info!(addr = %self.addr, "taskd listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a SIGTERM stops accepting new
                // connections even if more are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let service = Arc::clone(&service);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not once
                        // per connection.
                        let svc = service_fn(move |req| {
                            let service = Arc::clone(&service);
                            async move { dispatch(&service, req).await }
                        });

                        // HTTP/1.1 or HTTP/2, whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            debug!(peer = %remote_addr, "connection closed with error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("taskd stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Converts one hyper request, runs it through the service and hands back
/// the wire response. Every failure is a response, so hyper never sees an
/// error.
async fn dispatch(
    service: &Service,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<CaptureBody>, Infallible> {
    let (parts, body) = req.into_parts();

    let Ok(method) = parts.method.as_str().parse::<Method>() else {
        debug!(method = %parts.method, "unsupported method");
        return Ok(Response::error(Status::MethodNotAllowed, "method not allowed").into_inner());
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(path = parts.uri.path(), "request body unreadable: {e}");
            return Ok(Response::error(Status::BadRequest, "unreadable request body").into_inner());
        }
    };

    let response = service.call(Request::from_parts(parts, method, body)).await;
    Ok(response.into_inner())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere.
///
/// A signal handler that cannot be installed disables only its own arm;
/// the server keeps running and the other signal still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
