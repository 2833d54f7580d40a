//! Authentication stage.

use tracing::debug;

use crate::request::Request;
use crate::response::Response;
use crate::status::Status;
use crate::token::{AuthError, TokenVerifier, bearer_token};

/// Verifies the request's bearer token and records the subject in its
/// identity slot.
///
/// On failure the request is consumed into the 401 response the client
/// receives; nothing downstream runs.
pub(crate) fn authenticate(verifier: &TokenVerifier, req: &mut Request) -> Result<(), Response> {
    let verified = bearer_token(req.headers()).and_then(|token| verifier.verify(token));
    match verified {
        Ok(claims) => {
            req.identity.set(claims.sub);
            debug!(user_id = %claims.sub, "authenticated");
            Ok(())
        }
        Err(e) => {
            debug!(reason = e.reason(), method = %req.method(), path = req.path(), "unauthenticated");
            Err(unauthorized(e))
        }
    }
}

fn unauthorized(e: AuthError) -> Response {
    let message = match e {
        AuthError::Missing => "authorization header is missing",
        AuthError::Invalid(_) => "invalid or expired token",
    };
    Response::builder()
        .status(Status::Unauthorized)
        .header("www-authenticate", "Bearer")
        .error(message)
}
