//! Router configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the router server. The defaults match the protocol
/// constants; tests shrink the timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// TCP listen address. Port 0 binds an ephemeral port.
    pub listen_addr: SocketAddr,
    /// Budget for the whole auth handshake on a new connection.
    #[serde(with = "secs")]
    pub auth_timeout: Duration,
    /// Deadline applied to every write toward a delivery recipient.
    #[serde(with = "secs")]
    pub write_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".parse().expect("static address"),
            auth_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl RouterConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }
}

mod secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.auth_timeout, Duration::from_secs(5));
        assert_eq!(cfg.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_round_trips_through_serde() {
        let cfg = RouterConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: RouterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.auth_timeout, cfg.auth_timeout);
        assert_eq!(back.listen_addr, cfg.listen_addr);
    }
}
