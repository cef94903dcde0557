//!
//! Request-time guards
//! -------------------
//! Three policies applied, in order, before any query reaches the cache:
//! network allow-listing, API-key checking, and per-client rate limiting.
//! Each guard is fully transparent when unconfigured so the service runs
//! with zero security configuration for local/dev use; every disabled
//! guard announces itself with a startup warning.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Entries whose window is more than twice the window length stale are
/// reclaimed once the table grows past this many clients.
const SWEEP_THRESHOLD: usize = 1000;

/// Strip the IPv6 mapping from v4-mapped client addresses so they compare
/// against IPv4 ranges.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        IpAddr::V4(_) => ip,
    }
}

/// One CIDR-style address range, e.g. `10.33.0.0/16`.
#[derive(Debug, Clone, Copy)]
pub struct IpNetworkRange {
    address: IpAddr,
    prefix_len: u8,
}

impl IpNetworkRange {
    pub fn parse(network: &str) -> Option<Self> {
        let (addr, prefix) = network.trim().split_once('/')?;
        let address: IpAddr = addr.parse().ok()?;
        let prefix_len: u8 = prefix.parse().ok()?;
        let max = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix_len <= max).then_some(Self { address, prefix_len })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.address, canonical_ip(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix_len == 0 { 0 } else { u32::MAX << (32 - self.prefix_len as u32) };
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix_len == 0 { 0 } else { u128::MAX << (128 - self.prefix_len as u32) };
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

/// Source-address allow-list. Loopback always passes; an empty list means
/// the guard is disabled and everything passes.
pub struct IpAllowList {
    ranges: Vec<IpNetworkRange>,
}

impl IpAllowList {
    pub fn from_config(networks: &[String]) -> Self {
        let mut ranges = Vec::new();
        for network in networks {
            match IpNetworkRange::parse(network) {
                Some(range) => {
                    info!(target: "opensight::guards", "allowed network: {}", network);
                    ranges.push(range);
                }
                None => {
                    warn!(target: "opensight::guards", "failed to parse network: {}", network);
                }
            }
        }
        if ranges.is_empty() {
            warn!(target: "opensight::guards", "IP filtering DISABLED - set security.allowedNetworks in the config file");
        }
        Self { ranges }
    }

    pub fn enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        if !self.enabled() {
            return true;
        }
        let ip = canonical_ip(ip);
        if ip.is_loopback() {
            return true;
        }
        self.ranges.iter().any(|r| r.contains(ip))
    }
}

/// Shared-secret check against the X-API-Key request header.
pub struct ApiKeyGuard {
    key: Option<String>,
}

impl ApiKeyGuard {
    pub const HEADER: &'static str = "X-API-Key";

    pub fn new(key: Option<String>) -> Self {
        let key = key.filter(|k| !k.is_empty());
        if key.is_some() {
            info!(target: "opensight::guards", "API key authentication enabled");
        } else {
            warn!(target: "opensight::guards", "API key authentication DISABLED - set security.apiKey in the config file");
        }
        Self { key }
    }

    pub fn enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn accepts(&self, provided: Option<&str>) -> bool {
        match &self.key {
            None => true,
            Some(expected) => provided == Some(expected.as_str()),
        }
    }
}

struct RateLimitEntry {
    window_start: Instant,
    request_count: u32,
}

pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Fixed-size sliding window per source address. The window resets lazily
/// on the first request after expiry; stale entries are swept
/// opportunistically once the table grows large.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        if max_requests > 0 {
            info!(target: "opensight::guards", "rate limiting enabled: {} requests per {}s", max_requests, window.as_secs());
        } else {
            warn!(target: "opensight::guards", "rate limiting DISABLED - set security.rateLimit.maxRequests in the config file");
        }
        Self { max_requests, window, clients: Mutex::new(HashMap::new()) }
    }

    pub fn enabled(&self) -> bool {
        self.max_requests > 0
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, client: IpAddr) -> RateDecision {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> RateDecision {
        if !self.enabled() {
            return RateDecision::Allowed;
        }
        let mut clients = self.clients.lock();
        if clients.len() > SWEEP_THRESHOLD {
            clients.retain(|_, e| now.saturating_duration_since(e.window_start) <= self.window * 2);
        }
        let entry = clients
            .entry(client)
            .or_insert(RateLimitEntry { window_start: now, request_count: 0 });
        if now.saturating_duration_since(entry.window_start) > self.window {
            entry.window_start = now;
            entry.request_count = 0;
        }
        entry.request_count += 1;
        if entry.request_count > self.max_requests {
            let remaining = self.window.saturating_sub(now.saturating_duration_since(entry.window_start));
            warn!(target: "opensight::guards", "rate limit exceeded for {}: {} requests", client, entry.request_count);
            RateDecision::Limited { retry_after_secs: remaining.as_secs() }
        } else {
            RateDecision::Allowed
        }
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}
