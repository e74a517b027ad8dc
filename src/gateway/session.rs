//! `GatewaySession` (C8): one `actix` actor per open websocket connection,
//! grounded on the teacher's per-connection `UserSession` shape but
//! generalized from a polling `is_expired` check to a ping/pong actor
//! driven by `actix-web-actors::ws`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, Running, StreamHandler};
use actix_web_actors::ws;
use tracing::{info, warn};

use crate::gateway::envelope::GatewayEnvelope;
use crate::gateway::registry::ConnectionRegistry;
use crate::ids::{SessionId, UserId};
use crate::metrics::MetricsRegistry;

/// §4.8: "Emits `ping` every 30s; closes channels silent for 90s."
const PING_INTERVAL: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Actor message delivering one outbound envelope to a connected client.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub GatewayEnvelope);

pub struct GatewaySession {
    pub connection_id: SessionId,
    pub user_id: UserId,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<MetricsRegistry>,
    last_heartbeat: Instant,
}

impl GatewaySession {
    pub fn new(user_id: UserId, registry: Arc<ConnectionRegistry>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            connection_id: SessionId::new(),
            user_id,
            registry,
            metrics,
            last_heartbeat: Instant::now(),
        }
    }

    fn schedule_heartbeat_check(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(PING_INTERVAL, |session, ctx| {
            if Instant::now().duration_since(session.last_heartbeat) > IDLE_TIMEOUT {
                warn!(user_id = %session.user_id, "closing idle websocket connection");
                session.metrics.gateway_idle_closes_total.inc();
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for GatewaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.schedule_heartbeat_check(ctx);
        self.registry.register(self.user_id, ctx.address());
        self.metrics.gateway_connections.inc();
        ctx.text(GatewayEnvelope::welcome().to_json());
        info!(user_id = %self.user_id, connection_id = %self.connection_id, "gateway connection opened");
    }

    fn stopping(&mut self, ctx: &mut Self::Context) -> Running {
        self.registry.unregister(self.user_id, ctx.address());
        self.metrics.gateway_connections.dec();
        Running::Stop
    }
}

impl Handler<Deliver> for GatewaySession {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_json());
        self.metrics.gateway_events_sent_total.inc();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for GatewaySession {
    /// §4.8: on connect, no replay happens — the client is expected to
    /// reconcile with a `GET` of the task list, so inbound application
    /// messages from the client carry no protocol meaning here beyond
    /// the websocket-level ping/pong/close handshake.
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(bytes)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}
