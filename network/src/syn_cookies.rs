//! Handshake cookies.
//!
//! Every connection is challenged with a random cookie that the peer must
//! sign with its node key. Cookies are per endpoint, expire after a cutoff,
//! and the number outstanding per IP is capped.

use std::collections::HashMap;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::time::{Duration, Instant};

use lattice_messages::NodeIdHandshakeResponse;
use lattice_protocol::verify_handshake_response;

pub struct SynCookies {
    cookies: HashMap<SocketAddrV6, CookieEntry>,
    per_ip: HashMap<Ipv6Addr, usize>,
    max_cookies_per_ip: usize,
}

struct CookieEntry {
    cookie: [u8; 32],
    created_at: Instant,
}

impl SynCookies {
    pub fn new(max_cookies_per_ip: usize) -> Self {
        Self {
            cookies: HashMap::new(),
            per_ip: HashMap::new(),
            max_cookies_per_ip,
        }
    }

    /// Issue a cookie for `endpoint`.
    ///
    /// Returns `None` if the endpoint already has one outstanding or its IP
    /// is at the per-IP cap.
    pub fn assign(&mut self, endpoint: SocketAddrV6) -> Option<[u8; 32]> {
        self.assign_at(endpoint, Instant::now())
    }

    fn assign_at(&mut self, endpoint: SocketAddrV6, now: Instant) -> Option<[u8; 32]> {
        if self.cookies.contains_key(&endpoint) {
            return None;
        }
        let ip_count = self.per_ip.entry(*endpoint.ip()).or_insert(0);
        if *ip_count >= self.max_cookies_per_ip {
            return None;
        }

        let mut cookie = [0u8; 32];
        getrandom::getrandom(&mut cookie).ok()?;
        *ip_count += 1;
        self.cookies.insert(
            endpoint,
            CookieEntry {
                cookie,
                created_at: now,
            },
        );
        Some(cookie)
    }

    /// Check a handshake response against the cookie issued to `endpoint`.
    ///
    /// A cookie is consumed by a successful validation only.
    pub fn validate(&mut self, endpoint: &SocketAddrV6, response: &NodeIdHandshakeResponse) -> bool {
        let valid = match self.cookies.get(endpoint) {
            Some(entry) => verify_handshake_response(&entry.cookie, response),
            None => false,
        };
        if valid {
            self.remove(endpoint);
        }
        valid
    }

    /// Drop cookies older than `cutoff`.
    pub fn purge(&mut self, cutoff: Duration) {
        self.purge_at(cutoff, Instant::now());
    }

    fn purge_at(&mut self, cutoff: Duration, now: Instant) {
        let expired: Vec<SocketAddrV6> = self
            .cookies
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.created_at) > cutoff)
            .map(|(endpoint, _)| *endpoint)
            .collect();
        for endpoint in expired {
            self.remove(&endpoint);
        }
    }

    pub fn cookies_count(&self) -> usize {
        self.cookies.len()
    }

    fn remove(&mut self, endpoint: &SocketAddrV6) {
        if self.cookies.remove(endpoint).is_some() {
            if let Some(count) = self.per_ip.get_mut(endpoint.ip()) {
                *count -= 1;
                if *count == 0 {
                    self.per_ip.remove(endpoint.ip());
                }
            }
        }
    }
}
