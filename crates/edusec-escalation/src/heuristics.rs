//! Request-context heuristics
//!
//! Pattern matching only. Swap in a stronger [`ThreatHeuristics`] without
//! touching callers.

use aho_corasick::{AhoCorasick, MatchKind};
use edusec_common::{SecurityError, SecurityResult};
use ipnetwork::IpNetwork;
use std::net::IpAddr;

/// Context signals consulted by the risk scorer
pub trait ThreatHeuristics: Send + Sync {
    /// Loopback, private, reserved or otherwise non-routable origin
    fn is_suspicious_ip(&self, ip: &str) -> bool;

    /// CLI tool, script or crawler signature
    fn is_automated_agent(&self, user_agent: &str) -> bool;
}

const SUSPICIOUS_RANGES: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

const AUTOMATION_SIGNATURES: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpie",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww-perl",
    "node-fetch",
    "axios",
    "postman",
    "insomnia",
    "scrapy",
    "headlesschrome",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "bot",
    "crawler",
    "spider",
];

/// Built-in address ranges and user-agent signatures
pub struct DefaultHeuristics {
    ranges: Vec<IpNetwork>,
    agents: AhoCorasick,
}

impl DefaultHeuristics {
    pub fn new() -> SecurityResult<Self> {
        let ranges = SUSPICIOUS_RANGES
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNetwork>()
                    .map_err(|e| SecurityError::Unknown(format!("invalid range {cidr}: {e}")))
            })
            .collect::<SecurityResult<Vec<_>>>()?;

        let agents = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(AUTOMATION_SIGNATURES)
            .map_err(|e| SecurityError::Unknown(format!("agent signatures: {e}")))?;

        Ok(Self { ranges, agents })
    }
}

impl ThreatHeuristics for DefaultHeuristics {
    fn is_suspicious_ip(&self, ip: &str) -> bool {
        match ip.trim().parse::<IpAddr>() {
            Ok(addr) => self.ranges.iter().any(|net| net.contains(addr)),
            // unparseable origin is treated as hostile
            Err(_) => true,
        }
    }

    fn is_automated_agent(&self, user_agent: &str) -> bool {
        let agent = user_agent.trim();
        agent.is_empty() || self.agents.is_match(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suspicious_ranges() {
        let h = DefaultHeuristics::new().unwrap();
        for ip in ["127.0.0.1", "10.1.2.3", "192.168.1.20", "172.20.0.5", "169.254.1.1", "::1", "fd00::1"] {
            assert!(h.is_suspicious_ip(ip), "{ip} should be suspicious");
        }
        for ip in ["8.8.8.8", "151.101.1.69", "2606:4700::1111"] {
            assert!(!h.is_suspicious_ip(ip), "{ip} should be clean");
        }
        assert!(h.is_suspicious_ip("not-an-ip"));
    }

    #[test]
    fn test_automation_signatures() {
        let h = DefaultHeuristics::new().unwrap();
        assert!(h.is_automated_agent("curl/8.4.0"));
        assert!(h.is_automated_agent("Python-Requests/2.31"));
        assert!(h.is_automated_agent("Mozilla/5.0 (compatible; Googlebot/2.1)"));
        assert!(h.is_automated_agent(""));
        assert!(!h.is_automated_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
        ));
    }
}
