//! `GET /api/ws` — websocket upgrade into a `GatewaySession` actor (§4.8).

use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use crate::error::{AppError, AppResult};
use crate::gateway::GatewaySession;
use crate::http::auth::authenticate;
use crate::http::state::AppState;

pub async fn connect(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let user_id = authenticate(&req, &state).await?;
    let session = GatewaySession::new(user_id, state.registry.clone(), state.metrics.clone());
    ws::start(session, &req, stream).map_err(|e| AppError::ValidationFailed(e.to_string()))
}
