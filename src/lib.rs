//! # taskd
//!
//! A task-management HTTP service: bearer-token authenticated CRUD over
//! per-user tasks, with an optional cache in front of the read routes.
//!
//! ## Request pipeline
//!
//! Every routed request passes through a fixed sequence of stages chosen by
//! the route's [`Access`] level:
//!
//! - **Public**: straight to the handler.
//! - **Authenticated**: bearer token verified ([`TokenVerifier`]), the
//!   subject written once into the request's [`Identity`], then the handler.
//! - **Cached**: as above, then the [`CacheGateway`]. A live cache entry is
//!   the response and the handler never runs. On a miss the handler runs
//!   and, if it answers 2xx with a body, the bytes actually delivered to the
//!   client are stored for the next reader.
//!
//! A cache that is down, slow or returning garbage only ever costs a
//! recompute; it never changes a response.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use taskd::{Config, MemoryTaskStore, Server, api, cache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), taskd::Error> {
//!     let config = Config::load("configs/taskd.toml")?;
//!     let cache = cache::connect(&config.cache).await;
//!     let service = api::service(&config, Arc::new(MemoryTaskStore::new()), cache);
//!     Server::bind(config.bind_addr).serve(service).await
//! }
//! ```

mod error;
mod handler;
mod identity;
mod method;
mod request;
mod response;
mod router;
mod server;
mod status;

pub mod api;
pub mod cache;
pub mod capture;
pub mod config;
pub mod health;
pub mod middleware;
pub mod store;
pub mod token;

pub use cache::{CacheEntry, CacheError, CacheStore, MemoryCache, RedisCache};
pub use config::{CacheBackendKind, CacheConfig, Config, ConfigError};
pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use identity::{Identity, UserId};
pub use method::Method;
pub use middleware::{CacheGateway, Pipeline};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Json, Response, ResponseBuilder};
pub use router::{Access, Router};
pub use server::{Server, Service};
pub use status::Status;
pub use store::{MemoryTaskStore, NewTask, StoreError, Task, TaskStore, User};
pub use token::{AuthError, Claims, InvalidToken, TokenIssuer, TokenVerifier};
