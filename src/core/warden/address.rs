// src/core/warden/address.rs

//! The address/identity primitives every other Warden module builds on.

use crate::core::WardenError;
use std::fmt;

/// A monitor target's address. Kept as a string pair rather than `SocketAddr` because
/// configuration allows hostnames that only resolve at connect time.
#[derive(Debug, Clone)]
pub struct Address {
    pub ip: String,
    pub port: u16,
}

impl Address {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Parses `host:port` or `[ipv6]:port`.
    pub fn parse(s: &str) -> Result<Self, WardenError> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix('[') {
            let (ip, port) = rest
                .split_once("]:")
                .ok_or_else(|| WardenError::InvalidAddress(s.to_string()))?;
            let port: u16 = port
                .parse()
                .map_err(|_| WardenError::InvalidAddress(s.to_string()))?;
            return Ok(Self::new(ip, port));
        }
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| WardenError::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| WardenError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(ip, port))
    }

    /// The `ip:port`, or `[ip]:port` when `ip` contains a colon (IPv6 literal), display form
    /// used as the derived identity for replicas and peer monitors.
    pub fn display_name(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.port == other.port && self.ip.eq_ignore_ascii_case(&other.ip)
    }
}
impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip.to_ascii_lowercase().hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Generates a fresh 40-hex-character run id, used both for this process's own identity and
/// as the seed for comparison against a peer's.
pub fn generate_run_id() -> Result<String, WardenError> {
    let mut bytes = [0u8; 20];
    getrandom::fill(&mut bytes).map_err(|e| WardenError::Config(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Placeholder run id for "not yet known".
pub const UNKNOWN_RUN_ID: &str = "?";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        let a = Address::parse("10.0.0.1:6379").unwrap();
        assert_eq!(a.ip, "10.0.0.1");
        assert_eq!(a.port, 6379);
        assert_eq!(a.display_name(), "10.0.0.1:6379");
    }

    #[test]
    fn parses_ipv6_literal() {
        let a = Address::parse("[::1]:6379").unwrap();
        assert_eq!(a.ip, "::1");
        assert_eq!(a.port, 6379);
        assert_eq!(a.display_name(), "[::1]:6379");
    }

    #[test]
    fn equality_is_case_insensitive_on_ip_only() {
        assert_eq!(Address::new("Host.Local", 1), Address::new("host.local", 1));
        assert_ne!(Address::new("host.local", 1), Address::new("host.local", 2));
    }

    #[test]
    fn run_id_is_forty_hex_chars() {
        let id = generate_run_id().unwrap();
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
