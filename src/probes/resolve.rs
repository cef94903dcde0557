//! Client-identifier to host-name resolution.
//!
//! SMB sessions report the client as either a host name or a raw IP
//! address. IPs are reverse-resolved once and cached for the process
//! lifetime; resolution failures fall back to the raw identifier. Host
//! names are shortened to their first dot-separated label and upper-cased,
//! so "alice-pc.corp.example.com" and "ALICE-PC" compare equal downstream.

use std::collections::HashMap;
use std::net::IpAddr;

use anyhow::Result;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

use super::exec::run_powershell;

/// Reverse-DNS backend; swapped for a canned double in tests.
pub trait ResolveBackend: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> BoxFuture<'_, Result<String>>;
}

/// Default backend: asks the host's DNS facility via PowerShell, like the
/// other external data sources.
pub struct DnsResolveBackend;

impl ResolveBackend for DnsResolveBackend {
    fn lookup(&self, ip: IpAddr) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let script = format!("[System.Net.Dns]::GetHostEntry('{}').HostName", ip);
            let out = run_powershell(&script).await?;
            if out.is_empty() {
                anyhow::bail!("empty reverse lookup result for {}", ip);
            }
            Ok(out)
        })
    }
}

pub struct HostnameResolver {
    backend: Box<dyn ResolveBackend>,
    cache: RwLock<HashMap<String, String>>,
}

impl HostnameResolver {
    pub fn new() -> Self {
        Self::with_backend(Box::new(DnsResolveBackend))
    }

    pub fn with_backend(backend: Box<dyn ResolveBackend>) -> Self {
        Self { backend, cache: RwLock::new(HashMap::new()) }
    }

    /// Resolve a client identifier (IP or host name) to a short host name.
    /// Never fails: unresolvable identifiers come back as given.
    pub async fn resolve(&self, id: &str) -> String {
        if id.is_empty() {
            return String::new();
        }
        if let Some(hit) = self.cache.read().get(id) {
            return hit.clone();
        }
        let resolved = match id.parse::<IpAddr>() {
            Ok(ip) => match self.backend.lookup(ip).await {
                Ok(host) => {
                    let short = short_host_name(&host);
                    debug!(target: "opensight::probes", "resolved {} -> {}", id, short);
                    short
                }
                Err(e) => {
                    debug!(target: "opensight::probes", "reverse lookup of {} failed ({}), using as-is", id, e);
                    id.to_string()
                }
            },
            // Already a host name, just shorten and case-fold it.
            Err(_) => short_host_name(id),
        };
        self.cache.write().insert(id.to_string(), resolved.clone());
        resolved
    }
}

fn short_host_name(host: &str) -> String {
    host.split('.').next().unwrap_or(host).to_uppercase()
}
