//! HTTP status codes as a typed enum.
//!
//! Use [`Status`] anywhere a status code is accepted: `Response::status()`,
//! `Response::builder().status()`, or as a bare handler return value.
//!
//! ```rust
//! use taskd::{Response, Status};
//!
//! // status-only, no body
//! Response::status(Status::NoContent);
//!
//! // return Status directly from a handler and taskd wraps it
//! async fn delete_task(_req: taskd::Request) -> Status {
//!     Status::NoContent
//! }
//! ```

/// The status codes taskd's handlers and pipeline produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    // ── 2xx Success ───────────────────────────────────────────────────────────
    Ok,                            // 200
    Created,                       // 201
    NoContent,                     // 204

    // ── 4xx Client errors ─────────────────────────────────────────────────────
    BadRequest,                    // 400
    Unauthorized,                  // 401
    NotFound,                      // 404
    MethodNotAllowed,              // 405
    Conflict,                      // 409

    // ── 5xx Server errors ─────────────────────────────────────────────────────
    InternalServerError,           // 500
}

impl From<Status> for u16 {
    fn from(s: Status) -> u16 {
        match s {
            Status::Ok                   => 200,
            Status::Created              => 201,
            Status::NoContent            => 204,
            Status::BadRequest           => 400,
            Status::Unauthorized         => 401,
            Status::NotFound             => 404,
            Status::MethodNotAllowed     => 405,
            Status::Conflict             => 409,
            Status::InternalServerError  => 500,
        }
    }
}

/// `true` for the 2xx class, the only responses the cache will store.
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}
