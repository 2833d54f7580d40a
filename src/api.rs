//! Task API routes and handlers.
//!
//! | Route | Access |
//! |---|---|
//! | `POST /register`, `POST /login` | public |
//! | `GET /tasks`, `GET /tasks/{id}` | authenticated, cached |
//! | `POST /tasks`, `PUT /tasks/{id}`, `DELETE /tasks/{id}` | authenticated |
//! | `GET /healthz`, `GET /readyz` | public |
//!
//! Handlers take the caller from the request's identity, never from the URL.
//! Writes do not touch the cache; a cached read may lag a write by up to the
//! cache TTL.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::handler::Handler;
use crate::health;
use crate::identity::UserId;
use crate::method::Method;
use crate::middleware::{CacheGateway, Pipeline};
use crate::request::Request;
use crate::response::{IntoResponse, Json, Response};
use crate::router::{Access, Router};
use crate::server::Service;
use crate::status::Status;
use crate::store::{NewTask, StoreError, TaskStore};
use crate::token::{TokenIssuer, TokenVerifier};

/// Shared by every handler.
pub struct AppState {
    pub store: Arc<dyn TaskStore>,
    pub issuer: TokenIssuer,
    /// bcrypt cost for new password hashes.
    pub password_cost: u32,
}

/// Builds the full service from configuration.
///
/// `cache` is the store returned by [`cache::connect`](crate::cache::connect);
/// `None` serves every cached route live.
pub fn service(config: &Config, store: Arc<dyn TaskStore>, cache: Option<Arc<dyn CacheStore>>) -> Service {
    let state = Arc::new(AppState {
        store,
        issuer: TokenIssuer::new(&config.jwt_secret, config.token_lifetime()),
        password_cost: config.password_cost,
    });
    let gateway = cache
        .clone()
        .map(|store| CacheGateway::new(store, config.cache.ttl(), config.cache.timeout()));
    let pipeline = Pipeline::new(TokenVerifier::new(&config.jwt_secret), gateway);
    Service::new(routes(&state, cache, config), pipeline)
}

pub fn routes(state: &Arc<AppState>, cache: Option<Arc<dyn CacheStore>>, config: &Config) -> Router {
    Router::new()
        .on(Method::Post, "/register", with_state(state, register))
        .on(Method::Post, "/login", with_state(state, login))
        .route(Method::Get, "/tasks", Access::Cached, with_state(state, list_tasks))
        .route(Method::Post, "/tasks", Access::Authenticated, with_state(state, create_task))
        .route(Method::Get, "/tasks/{id}", Access::Cached, with_state(state, get_task))
        .route(Method::Put, "/tasks/{id}", Access::Authenticated, with_state(state, update_task))
        .route(Method::Delete, "/tasks/{id}", Access::Authenticated, with_state(state, delete_task))
        .on(Method::Get, "/healthz", health::liveness)
        .on(Method::Get, "/readyz", health::readiness(cache, config.cache.timeout()))
}

/// Binds `f` to the shared state so it fits the one-argument handler shape.
fn with_state<F, Fut, R>(state: &Arc<AppState>, f: F) -> impl Handler
where
    F: Fn(Arc<AppState>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    let state = Arc::clone(state);
    move |req: Request| f(Arc::clone(&state), req)
}

// ── Auth ──────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

fn internal(message: &str) -> Response {
    Response::error(Status::InternalServerError, message)
}

fn token_response(state: &AppState, user: UserId) -> Response {
    match state.issuer.issue(user) {
        Ok(token) => Json(TokenBody { token }).into_response(),
        Err(e) => {
            error!(user_id = %user, error = %e, "token signing failed");
            internal("failed to generate token")
        }
    }
}

async fn register(state: Arc<AppState>, req: Request) -> Response {
    let creds: Credentials = match serde_json::from_slice(req.body()) {
        Ok(c) => c,
        Err(_) => return Response::error(Status::BadRequest, "invalid registration data"),
    };
    if creds.username.trim().is_empty() || creds.password.is_empty() {
        return Response::error(Status::BadRequest, "username and password are required");
    }

    let cost = state.password_cost;
    let password = creds.password;
    let hash = match tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await {
        Ok(Ok(hash)) => hash,
        Ok(Err(e)) => {
            error!(error = %e, "password hashing failed");
            return internal("failed to create user");
        }
        Err(e) => {
            error!(error = %e, "password hashing task failed");
            return internal("failed to create user");
        }
    };

    match state.store.create_user(&creds.username, hash).await {
        Ok(user) => {
            info!(user_id = %user.id, "user registered");
            token_response(&state, user.id)
        }
        Err(StoreError::Conflict(_)) => Response::error(Status::Conflict, "username already exists"),
        Err(e) => {
            error!(error = %e, "user creation failed");
            internal("failed to create user")
        }
    }
}

async fn login(state: Arc<AppState>, req: Request) -> Response {
    let creds: Credentials = match serde_json::from_slice(req.body()) {
        Ok(c) => c,
        Err(_) => return Response::error(Status::BadRequest, "invalid login data"),
    };
    let rejected = || Response::error(Status::Unauthorized, "invalid username or password");

    let user = match state.store.find_user(&creds.username).await {
        Ok(Some(user)) => user,
        Ok(None) => return rejected(),
        Err(e) => {
            error!(error = %e, "user lookup failed");
            return internal("failed to log in");
        }
    };

    let hash = user.password_hash.clone();
    let password = creds.password;
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(Ok(true)) => token_response(&state, user.id),
        Ok(Ok(false)) => rejected(),
        Ok(Err(e)) => {
            error!(user_id = %user.id, error = %e, "stored password hash unreadable");
            rejected()
        }
        Err(e) => {
            error!(error = %e, "password check task failed");
            internal("failed to log in")
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

fn task_id(req: &Request) -> Result<i64, Response> {
    req.param("id")
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| Response::error(Status::BadRequest, "invalid task id"))
}

fn task_body(req: &Request) -> Result<NewTask, Response> {
    let task: NewTask = serde_json::from_slice(req.body())
        .map_err(|_| Response::error(Status::BadRequest, "invalid task data"))?;
    task.validate().map_err(|msg| Response::error(Status::BadRequest, msg))?;
    Ok(task)
}

fn store_failure(e: StoreError, action: &str) -> Response {
    match e {
        StoreError::NotFound => Response::error(Status::NotFound, "task not found"),
        e => {
            error!(error = %e, "failed to {action}");
            internal(&format!("failed to {action}"))
        }
    }
}

async fn list_tasks(state: Arc<AppState>, req: Request) -> Response {
    match state.store.list_tasks(req.user_id()).await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => store_failure(e, "fetch tasks"),
    }
}

async fn create_task(state: Arc<AppState>, req: Request) -> Response {
    let new = match task_body(&req) {
        Ok(t) => t,
        Err(res) => return res,
    };
    match state.store.create_task(req.user_id(), new).await {
        Ok(task) => Response::builder()
            .status(Status::Created)
            .header("location", &format!("/tasks/{}", task.id))
            .json_value(&task),
        Err(e) => store_failure(e, "create task"),
    }
}

async fn get_task(state: Arc<AppState>, req: Request) -> Response {
    let id = match task_id(&req) {
        Ok(id) => id,
        Err(res) => return res,
    };
    match state.store.get_task(req.user_id(), id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => store_failure(e, "fetch task"),
    }
}

async fn update_task(state: Arc<AppState>, req: Request) -> Response {
    let (id, new) = match task_id(&req).and_then(|id| Ok((id, task_body(&req)?))) {
        Ok(v) => v,
        Err(res) => return res,
    };
    match state.store.update_task(req.user_id(), id, new).await {
        Ok(_) => Json(Message { message: "task updated" }).into_response(),
        Err(e) => store_failure(e, "update task"),
    }
}

async fn delete_task(state: Arc<AppState>, req: Request) -> Response {
    let id = match task_id(&req) {
        Ok(id) => id,
        Err(res) => return res,
    };
    match state.store.delete_task(req.user_id(), id).await {
        Ok(()) => Json(Message { message: "task deleted" }).into_response(),
        Err(e) => store_failure(e, "delete task"),
    }
}
