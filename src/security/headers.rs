//! Header manipulation at the proxy boundary.
//!
//! # Responsibilities
//! - Strip proxy-controlled headers (X-Forwarded-*, X-Real-IP) sent by untrusted peers
//! - Remove configured cookies before they reach an origin
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Preserve original client IP in X-Forwarded-For
//! - Never trust existing X-Forwarded-* from untrusted sources
//! - Configurable trusted peer list for header trust

use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::schema::{AllowProxyHeaders, HeaderPolicyConfig};
use crate::filters::{FilterError, FilterInfo, SyncFilter};
use crate::message::{Headers, HttpRequestMessage};

/// Connection-scoped headers never forwarded by a proxy.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut Headers) {
    let named: Vec<String> = headers
        .get_all("connection")
        .iter()
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect();

    headers.retain(|name, _| {
        let name = name.to_ascii_lowercase();
        !HOP_BY_HOP.contains(&name.as_str()) && !named.contains(&name)
    });
}

/// Inbound filter applying the proxy header policy.
pub struct ProxyHeaderFilter {
    info: FilterInfo,
    policy: AllowProxyHeaders,
    trusted_peers: HashSet<IpAddr>,
    untrusted_headers: Vec<String>,
    strip_cookies: HashSet<String>,
    add_forwarded: bool,
}

impl ProxyHeaderFilter {
    pub const NAME: &'static str = "proxy_headers";

    pub fn new(config: &HeaderPolicyConfig) -> Self {
        let trusted_peers = config
            .trusted_peers
            .iter()
            .filter_map(|peer| match peer.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(peer = %peer, "Ignoring unparseable trusted peer");
                    None
                }
            })
            .collect();

        Self {
            info: FilterInfo::inbound(Self::NAME, -100),
            policy: config.allow_proxy_headers,
            trusted_peers,
            untrusted_headers: config.untrusted_headers.clone(),
            strip_cookies: config.strip_cookies.iter().cloned().collect(),
            add_forwarded: config.add_forwarded_headers,
        }
    }

    fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match self.policy {
            AllowProxyHeaders::Always => true,
            AllowProxyHeaders::Never => false,
            AllowProxyHeaders::TrustedPeers => {
                peer.is_some_and(|ip| self.trusted_peers.contains(&ip))
            }
        }
    }

    fn strip_cookies(&self, headers: &mut Headers) {
        if self.strip_cookies.is_empty() {
            return;
        }
        headers.map_values("cookie", |value| {
            let kept: Vec<&str> = value
                .split(';')
                .map(str::trim)
                .filter(|pair| {
                    let name = pair.split_once('=').map_or(*pair, |(n, _)| n).trim();
                    !pair.is_empty() && !self.strip_cookies.contains(name)
                })
                .collect();
            (!kept.is_empty()).then(|| kept.join("; "))
        });
    }
}

impl SyncFilter<HttpRequestMessage> for ProxyHeaderFilter {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn apply_sync(&self, request: &mut HttpRequestMessage) -> Result<(), FilterError> {
        let peer = request.session().client_addr().map(|a| a.ip());

        if !self.trusts(peer) {
            let mut removed = 0;
            for name in &self.untrusted_headers {
                removed += request.headers_mut().remove(name);
            }
            if removed > 0 {
                tracing::debug!(
                    request_id = %request.session().id(),
                    removed,
                    "Stripped untrusted proxy headers"
                );
            }
        }

        self.strip_cookies(request.headers_mut());
        strip_hop_by_hop(request.headers_mut());

        if self.add_forwarded {
            if let Some(ip) = peer {
                let forwarded_for = match request.headers().get("x-forwarded-for") {
                    Some(existing) => format!("{existing}, {ip}"),
                    None => ip.to_string(),
                };
                request.headers_mut().set("X-Forwarded-For", forwarded_for);
            }
            if !request.headers().contains("x-forwarded-proto") {
                let scheme = request.scheme().to_string();
                request.headers_mut().set("X-Forwarded-Proto", scheme);
            }
            if !request.headers().contains("x-forwarded-host") {
                if let Some(host) = request.headers().get("host").map(str::to_string) {
                    request.headers_mut().set("X-Forwarded-Host", host);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestSession;
    use http::Method;

    fn request(peer: &str, headers: &[(&str, &str)]) -> HttpRequestMessage {
        let mut session = RequestSession::new();
        session.set_client_addr(peer.parse().unwrap());
        let headers: Headers = headers.iter().copied().collect();
        HttpRequestMessage::new(session, Method::GET, "/", headers)
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers: Headers = [
            ("Connection", "keep-alive, X-Private"),
            ("X-Private", "1"),
            ("Transfer-Encoding", "chunked"),
            ("Content-Type", "text/plain"),
        ]
        .into_iter()
        .collect();
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains("content-type"));
    }

    #[test]
    fn test_untrusted_peer_headers_replaced() {
        let filter = ProxyHeaderFilter::new(&HeaderPolicyConfig::default());
        let mut req = request(
            "203.0.113.9:5000",
            &[("Host", "api.example.com"), ("X-Forwarded-For", "10.0.0.1"), ("X-Real-IP", "10.0.0.1")],
        );
        filter.apply_sync(&mut req).unwrap();

        assert_eq!(req.headers().get("x-forwarded-for"), Some("203.0.113.9"));
        assert!(!req.headers().contains("x-real-ip"));
        assert_eq!(req.headers().get("x-forwarded-proto"), Some("http"));
        assert_eq!(req.headers().get("x-forwarded-host"), Some("api.example.com"));
    }

    #[test]
    fn test_trusted_peer_chain_appended() {
        let config = HeaderPolicyConfig {
            trusted_peers: vec!["10.1.1.1".to_string()],
            ..Default::default()
        };
        let filter = ProxyHeaderFilter::new(&config);
        let mut req = request("10.1.1.1:5000", &[("X-Forwarded-For", "198.51.100.7")]);
        filter.apply_sync(&mut req).unwrap();
        assert_eq!(
            req.headers().get("x-forwarded-for"),
            Some("198.51.100.7, 10.1.1.1")
        );
    }

    #[test]
    fn test_cookie_stripping() {
        let config = HeaderPolicyConfig {
            strip_cookies: vec!["session".to_string()],
            ..Default::default()
        };
        let filter = ProxyHeaderFilter::new(&config);
        let mut req = request(
            "203.0.113.9:5000",
            &[("Cookie", "session=abc; theme=dark"), ("Cookie", "session=xyz")],
        );
        filter.apply_sync(&mut req).unwrap();
        assert_eq!(req.headers().get_all("cookie"), vec!["theme=dark"]);
    }
}
