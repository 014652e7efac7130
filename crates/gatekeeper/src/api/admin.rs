//! Admin IP gate for the control surface

use crate::api::ApiState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

/// Static list of addresses allowed to use the control surface
#[derive(Debug, Clone, Default)]
pub struct AdminAllowList {
    entries: Vec<String>,
}

impl AdminAllowList {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// An empty list admits every caller; otherwise the address must match an entry
    pub fn admits(&self, ip: IpAddr) -> bool {
        if self.entries.is_empty() {
            return true;
        }
        let ip = ip.to_canonical().to_string();
        self.entries.iter().any(|entry| *entry == ip)
    }
}

/// Middleware rejecting callers outside the admin allow-list
///
/// Requests without connection info are treated as coming from nowhere
/// and denied unless the list is empty.
pub async fn require_admin_ip(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let admitted = match peer {
        Some(ip) => state.admin_ips.admits(ip),
        None => state.admin_ips.entries.is_empty(),
    };

    if admitted {
        return next.run(req).await;
    }

    let ip = peer.map_or_else(|| "unknown".to_string(), |ip| ip.to_canonical().to_string());
    warn!(path = %req.uri().path(), ip = %ip, "unauthorized API attempt");
    (StatusCode::FORBIDDEN, "unauthorized").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_admits_everyone() {
        let admins = AdminAllowList::default();
        assert!(admins.admits(ip("203.0.113.9")));
        assert!(admins.admits(ip("::1")));
    }

    #[test]
    fn test_exact_match_required() {
        let admins = AdminAllowList::new(vec!["127.0.0.1".to_string()]);
        assert!(admins.admits(ip("127.0.0.1")));
        assert!(!admins.admits(ip("127.0.0.2")));
        // IPv4-mapped IPv6 callers match their IPv4 entry
        assert!(admins.admits(ip("::ffff:127.0.0.1")));
    }
}
