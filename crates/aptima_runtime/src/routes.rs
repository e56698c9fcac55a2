//! Connection Routing
//!
//! Resolves the destinations of a message from the configured connections.

use aptima_bridge::MsgKind;
use wildmatch::WildMatch;

use crate::config::{ConnectionConfig, ConnectionKind};

#[derive(Debug, Clone)]
struct Route {
    from: String,
    kind: ConnectionKind,
    pattern: WildMatch,
    to: Vec<String>,
}

/// Immutable routing table built once per app
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(connections: &[ConnectionConfig]) -> Self {
        let routes = connections
            .iter()
            .map(|c| Route {
                from: c.from.clone(),
                kind: c.kind,
                pattern: WildMatch::new(&c.name),
                to: c.to.clone(),
            })
            .collect();
        Self { routes }
    }

    /// Destinations for a `kind` message named `name` sent by `from`, in
    /// configuration order and without duplicates.
    pub fn destinations(&self, from: &str, kind: MsgKind, name: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for route in &self.routes {
            if route.from != from || !route.kind.matches(kind) || !route.pattern.matches(name) {
                continue;
            }
            for dest in &route.to {
                if !out.contains(dest) {
                    out.push(dest.clone());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
