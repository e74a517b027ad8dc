//! `ConnectionRegistry` (C8): `user_id -> {channel}`, grounded on the
//! teacher's channel-registry idiom but backed by a plain
//! `std::sync::RwLock<HashMap<_, Vec<_>>>` instead of per-channel client
//! objects. A `std::sync::RwLock` rather than `tokio::sync::RwLock` on
//! purpose: `register`/`unregister` run from the actor's synchronous
//! `started`/`stopping` hooks, and the critical section is a single
//! `Vec` push/retain, never held across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use actix::Addr;

use crate::gateway::envelope::GatewayEnvelope;
use crate::gateway::session::{Deliver, GatewaySession};
use crate::ids::UserId;

#[derive(Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<UserId, Vec<Addr<GatewaySession>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: UserId, addr: Addr<GatewaySession>) {
        self.channels.write().unwrap().entry(user_id).or_default().push(addr);
    }

    pub fn unregister(&self, user_id: UserId, addr: Addr<GatewaySession>) {
        let mut guard = self.channels.write().unwrap();
        if let Some(addrs) = guard.get_mut(&user_id) {
            addrs.retain(|a| a != &addr);
            if addrs.is_empty() {
                guard.remove(&user_id);
            }
        }
    }

    /// Fans `envelope` out to every channel open for `user_id`. A dead
    /// `Addr` (actor already stopped) is a silent no-op — `stopping` will
    /// remove it from the registry on its own.
    pub fn broadcast(&self, user_id: UserId, envelope: GatewayEnvelope) {
        let addrs = {
            let guard = self.channels.read().unwrap();
            guard.get(&user_id).cloned().unwrap_or_default()
        };
        for addr in addrs {
            addr.do_send(Deliver(envelope.clone()));
        }
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.channels.read().unwrap().get(&user_id).map(Vec::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasting_to_an_unknown_user_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        registry.broadcast(UserId::new(), GatewayEnvelope::welcome());
        assert_eq!(registry.connection_count(UserId::new()), 0);
    }
}
