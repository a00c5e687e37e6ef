use std::time::Duration;

use anyhow::Context;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::hopper::config::DEFAULT_GAME_PORT;

/// Turns a route target into a concrete `host:port`.
///
/// A target that already carries a port is returned verbatim; the dialer
/// resolves A/AAAA records on its own. A bare hostname goes through an SRV
/// lookup first, falling back to the default game port on any failure.
pub struct TargetResolver {
    resolver: TokioAsyncResolver,
    srv_timeout: Duration,
}

impl TargetResolver {
    pub fn new(srv_timeout: Duration) -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(err) => {
                tracing::warn!(err = %err, "system DNS configuration unavailable, using resolver defaults");
                TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self {
            resolver,
            srv_timeout,
        }
    }

    pub async fn resolve(&self, target: &str) -> String {
        if target.contains(':') {
            return target.to_string();
        }
        match self.lookup_srv(target).await {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::debug!(target = %target, err = %err, "srv lookup failed, falling back to default port");
                format!("{target}:{DEFAULT_GAME_PORT}")
            }
        }
    }

    async fn lookup_srv(&self, host: &str) -> anyhow::Result<String> {
        let name = srv_name(host);
        let lookup = tokio::time::timeout(self.srv_timeout, self.resolver.srv_lookup(name.clone()))
            .await
            .with_context(|| format!("resolve srv {name} timed out"))?
            .with_context(|| format!("resolve srv {name} failed"))?;

        // Only the first record; weight/priority selection is out of scope.
        let record = lookup
            .iter()
            .next()
            .with_context(|| format!("srv {name} has empty result"))?;

        let target = record.target().to_utf8();
        Ok(format!(
            "{}:{}",
            target.trim_end_matches('.'),
            record.port()
        ))
    }
}

fn srv_name(host: &str) -> String {
    format!("_minecraft._tcp.{host}.")
}
