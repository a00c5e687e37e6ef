use std::{collections::HashMap, sync::Arc};

use crate::hopper::config::{Config, Route, DEFAULT_ROUTE_NAME};
use crate::hopper::net;

/// Read-only dispatch table prepared once from configuration and shared by
/// every connection.
///
/// Match strings with a port land in `exact`; the rest land in `hosts` by
/// bare hostname. Exact entries always win over host-only entries for the
/// same host.
pub struct RouteTable {
    exact: HashMap<String, Arc<Route>>,
    hosts: HashMap<String, Arc<Route>>,
    default_route: Option<Arc<Route>>,
}

impl RouteTable {
    pub fn build(cfg: &Config) -> Self {
        let mut table = RouteTable {
            exact: HashMap::new(),
            hosts: HashMap::new(),
            default_route: None,
        };

        for route in &cfg.routes {
            let route = Arc::new(route.clone());

            if route.name == DEFAULT_ROUTE_NAME {
                if !route.matches.is_empty() {
                    tracing::warn!(route = %route.name, "'matches' field for the default route is ignored");
                }
                table.default_route = Some(route);
                continue;
            }

            for m in &route.matches {
                let lowered = m.to_ascii_lowercase();
                let has_port = net::split_host_port(&lowered).is_some();
                let (map, key) = if has_port {
                    (&mut table.exact, lowered)
                } else {
                    (&mut table.hosts, normalize_hostname(&lowered))
                };
                if let Some(prior) = map.insert(key.clone(), route.clone()) {
                    tracing::warn!(
                        key = %m,
                        prior = %prior.name,
                        route = %route.name,
                        "duplicated route match, the later route wins"
                    );
                }
            }
        }

        table
    }

    /// Lookup priority: exact `host:port`, then bare host, then the default
    /// route. The inbound hostname is lowercased and loses one trailing dot
    /// first.
    pub fn lookup(&self, hostname: &str, port: u16) -> Option<Arc<Route>> {
        let host = normalize_hostname(hostname);
        if let Some(route) = self.exact.get(&format!("{host}:{port}")) {
            tracing::debug!(route = %route.name, host = %host, port, "selected exact route");
            return Some(route.clone());
        }
        if let Some(route) = self.hosts.get(&host) {
            tracing::debug!(route = %route.name, host = %host, "selected host route");
            return Some(route.clone());
        }
        if let Some(route) = &self.default_route {
            tracing::debug!(route = %route.name, host = %host, "selected default route");
            return Some(route.clone());
        }
        None
    }

    pub fn dump(&self) {
        tracing::debug!(
            exact = self.exact.len(),
            hosts = self.hosts.len(),
            "route table"
        );
        for (key, route) in self.exact.iter().chain(self.hosts.iter()) {
            tracing::debug!(key = %key, route = %route.name, target = %route.target, "route entry");
        }
        if let Some(route) = &self.default_route {
            tracing::debug!(route = %route.name, target = %route.target, "default route");
        }
    }
}

/// Strips exactly one trailing dot, then lowercases.
fn normalize_hostname(hostname: &str) -> String {
    let hostname = hostname.strip_suffix('.').unwrap_or(hostname);
    hostname.to_ascii_lowercase()
}
