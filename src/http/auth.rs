//! Authenticates every request against the external identity capability
//! (§6: "The core expects an authenticated `user_id` on every request via
//! session cookie or equivalent").

use actix_web::HttpRequest;

use crate::error::AppError;
use crate::http::state::AppState;
use crate::ids::UserId;

const SESSION_COOKIE: &str = "docflow_session";

/// Pulls the session token out of the `Authorization: Bearer …` header,
/// falling back to the session cookie, then validates it.
pub async fn authenticate(req: &HttpRequest, state: &AppState) -> Result<UserId, AppError> {
    let token = bearer_token(req).or_else(|| session_cookie(req)).ok_or(AppError::Unauthenticated)?;

    let identity = state
        .auth
        .validate(&token)
        .await
        .map_err(|_| AppError::Unauthenticated)?;
    Ok(identity.user_id)
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    let header = req.headers().get(actix_web::http::header::AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(str::to_string)
}

fn session_cookie(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE).map(|c| c.value().to_string())
}
