//! Named, mutable collections of ingress/egress definitions with live
//! update/erase semantics. These are the capabilities a (not-built-here)
//! REST layer would drive; the session orchestrator and `Node` bootstrap
//! only ever see them through this same interface.

use crate::common::error::{Error, Result};
use crate::config::{EgressVO, IngressVO};
use crate::router::Router;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct IngressEntry {
    vo: IngressVO,
    acceptor: JoinHandle<()>,
}

/// Owns the accept-loop task for every configured ingress listener.
pub struct IngressManager {
    entries: DashMap<String, IngressEntry>,
}

impl IngressManager {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Replace (or insert) the named ingress. The previous acceptor task,
    /// if any, is aborted — its accept loop sees this as an ordinary
    /// cancellation, not an error.
    pub fn update(&self, vo: IngressVO, acceptor: JoinHandle<()>) {
        let name = vo.name().to_string();
        if let Some((_, old)) = self.entries.remove(&name) {
            old.acceptor.abort();
        }
        self.entries.insert(name, IngressEntry { vo, acceptor });
    }

    pub fn erase(&self, name: &str) -> Result<()> {
        match self.entries.remove(name) {
            Some((_, entry)) => {
                entry.acceptor.abort();
                Ok(())
            }
            None => Err(Error::misc(format!("no such ingress: {}", name))),
        }
    }

    pub fn get(&self, name: &str) -> Option<IngressVO> {
        self.entries.get(name).map(|e| e.vo.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for IngressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IngressManager {
    fn drop(&mut self) {
        for entry in self.entries.iter() {
            entry.value().acceptor.abort();
        }
    }
}

/// Named collection of egress definitions. Unlike ingresses, egresses own
/// no background task — they're constructed fresh per connection — so
/// this is just a validated map with a router-aware `erase`.
pub struct EgressManager {
    entries: DashMap<String, EgressVO>,
    router: Arc<Router>,
}

impl EgressManager {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            entries: DashMap::new(),
            router,
        }
    }

    pub fn update(&self, vo: EgressVO) {
        self.entries.insert(vo.name().to_string(), vo);
    }

    pub fn erase(&self, name: &str) -> Result<()> {
        if self.router.is_used(name) {
            return Err(Error::res_in_use(format!("egress {} is referenced by the live route", name)));
        }
        self.entries
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::misc(format!("no such egress: {}", name)))
    }

    pub fn get(&self, name: &str) -> Option<EgressVO> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::geoip::GeoIpReader;

    #[test]
    fn erase_unknown_ingress_is_misc() {
        let mgr = IngressManager::new();
        assert!(matches!(mgr.erase("nope"), Err(Error::Misc(_))));
    }

    #[test]
    fn egress_erase_respects_router_usage() {
        let router = Arc::new(Router::new(Arc::new(GeoIpReader::empty()), "direct"));
        let mgr = EgressManager::new(router);
        mgr.update(EgressVO::Direct { name: "direct".into() });
        assert!(matches!(mgr.erase("direct"), Err(Error::ResInUse(_))));
    }

    #[test]
    fn egress_update_and_get_roundtrip() {
        let router = Arc::new(Router::new(Arc::new(GeoIpReader::empty()), "direct"));
        let mgr = EgressManager::new(router);
        mgr.update(EgressVO::Reject { name: "reject".into(), delay_ms: None });
        assert!(mgr.get("reject").is_some());
        assert!(mgr.get("missing").is_none());
    }
}
