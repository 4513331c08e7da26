//! Centralized configuration for plugbridge.
//!
//! Constants for the IPC transport and for the plugin launch/dispense layer.

use std::net::SocketAddr;
use std::time::Duration;

/// IPC transport configuration.
pub struct IpcConfig;

impl IpcConfig {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const MAX_CONNECTIONS: usize = 16;
    pub const OUTBOUND_QUEUE_DEPTH: usize = 256;
    /// Buffer size for in-process duplex connections.
    pub const DUPLEX_BUFFER_SIZE: usize = 64 * 1024;
    pub const JSONRPC_VERSION: &'static str = "2.0";
    /// Notification method used to cancel an in-flight call.
    pub const CANCEL_METHOD: &'static str = "$/cancel";
}

/// Plugin launch and dispense configuration.
pub struct PluginConfig;

impl PluginConfig {
    /// The single well-known name a backend is dispensed under.
    pub const BACKEND_PLUGIN_NAME: &'static str = "backend";
    /// Prefix of the stdout line a plugin process prints once it is listening.
    pub const HANDSHAKE_PREFIX: &'static str = "PLUGIN_ADDR=";
    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);
    /// Address the plugin binary binds unless told otherwise.
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";

    /// Format the handshake line for a listening address.
    pub fn handshake_line(addr: SocketAddr) -> String {
        format!("{}{}", Self::HANDSHAKE_PREFIX, addr)
    }

    /// Parse a handshake line, returning `None` for unrelated output.
    pub fn parse_handshake(line: &str) -> Option<Result<SocketAddr, String>> {
        let value = line.trim().strip_prefix(Self::HANDSHAKE_PREFIX)?;
        Some(
            value
                .parse::<SocketAddr>()
                .map_err(|e| format!("invalid plugin address '{value}': {e}")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_roundtrip() {
        let addr: SocketAddr = "127.0.0.1:4567".parse().unwrap();
        let line = PluginConfig::handshake_line(addr);
        assert_eq!(line, "PLUGIN_ADDR=127.0.0.1:4567");
        assert_eq!(PluginConfig::parse_handshake(&line), Some(Ok(addr)));
    }

    #[test]
    fn test_handshake_ignores_other_output() {
        assert!(PluginConfig::parse_handshake("starting plugin").is_none());
        assert!(matches!(
            PluginConfig::parse_handshake("PLUGIN_ADDR=garbage"),
            Some(Err(_))
        ));
    }

    #[test]
    fn test_default_host_is_loopback() {
        let host: std::net::IpAddr = PluginConfig::DEFAULT_HOST.parse().unwrap();
        assert!(host.is_loopback());
    }

    #[test]
    fn test_limits_are_reasonable() {
        assert!(IpcConfig::MAX_MESSAGE_SIZE > 1024);
        assert!(IpcConfig::CONNECT_TIMEOUT > Duration::ZERO);
    }
}
