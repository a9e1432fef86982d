//! Client and server configuration.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};
use tandem_protocol::FrameAssembler;

/// Default size of one reliable-channel read.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;

/// Largest datagram the unreliable channel will receive.
pub(crate) const MAX_DATAGRAM_LEN: usize = 65_536;

/// Smallest usable frame ceiling: a length prefix must cover the packet id.
const MIN_FRAME_LEN: usize = 2;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Configuration for a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Bytes requested per read on the reliable channel. Default: 4096.
    pub recv_buffer_size: usize,
    /// Largest frame length accepted from the server. A larger declared
    /// length ends the connection. Default: 1 MiB.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_frame_len: FrameAssembler::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    /// Replace out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`ClientSession::new`](crate::ClientSession::new).
    /// A zero `recv_buffer_size` falls back to the default; `max_frame_len`
    /// is raised to at least 2.
    pub fn validated(mut self) -> Self {
        self.recv_buffer_size = validated_recv_buffer(self.recv_buffer_size);
        self.max_frame_len = validated_max_frame_len(self.max_frame_len);
        self
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Configuration for a [`ServerSession`](crate::ServerSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both listeners bind to. Default: `0.0.0.0`.
    pub bind_ip: IpAddr,
    /// Bytes requested per read on each reliable channel. Default: 4096.
    pub recv_buffer_size: usize,
    /// Largest frame length accepted from a client. A larger declared
    /// length ends that connection. Default: 1 MiB.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_frame_len: FrameAssembler::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    /// A config bound to `ip` with every other field defaulted.
    pub fn with_bind_ip(ip: IpAddr) -> Self {
        Self {
            bind_ip: ip,
            ..Default::default()
        }
    }

    /// Replace out-of-range values so the config is safe to use.
    ///
    /// Same rules as [`ClientConfig::validated`].
    pub fn validated(mut self) -> Self {
        self.recv_buffer_size = validated_recv_buffer(self.recv_buffer_size);
        self.max_frame_len = validated_max_frame_len(self.max_frame_len);
        self
    }
}

fn validated_recv_buffer(size: usize) -> usize {
    if size == 0 {
        tracing::warn!(
            default = DEFAULT_RECV_BUFFER_SIZE,
            "recv_buffer_size is zero, using default"
        );
        return DEFAULT_RECV_BUFFER_SIZE;
    }
    size
}

fn validated_max_frame_len(len: usize) -> usize {
    if len < MIN_FRAME_LEN {
        tracing::warn!(
            max_frame_len = len,
            min = MIN_FRAME_LEN,
            "max_frame_len cannot hold a packet id, clamping"
        );
        return MIN_FRAME_LEN;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.recv_buffer_size, 4096);
        assert_eq!(config.max_frame_len, 1024 * 1024);
    }

    #[test]
    fn test_validated_replaces_zero_buffer() {
        let config = ClientConfig {
            recv_buffer_size: 0,
            max_frame_len: 0,
        }
        .validated();
        assert_eq!(config.recv_buffer_size, DEFAULT_RECV_BUFFER_SIZE);
        assert_eq!(config.max_frame_len, 2);
    }

    #[test]
    fn test_validated_keeps_sane_values() {
        let config = ServerConfig {
            recv_buffer_size: 16,
            max_frame_len: 64,
            ..Default::default()
        };
        assert_eq!(config.clone().validated(), config);
    }

    #[test]
    fn test_server_config_json_round_trip() {
        let config = ServerConfig::with_bind_ip(Ipv4Addr::LOCALHOST.into());
        let json = serde_json::to_string(&config).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "bind_ip": "127.0.0.1" }"#).unwrap();
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.recv_buffer_size, DEFAULT_RECV_BUFFER_SIZE);

        let client: ClientConfig =
            serde_json::from_str(r#"{ "max_frame_len": 512 }"#).unwrap();
        assert_eq!(client.max_frame_len, 512);
    }
}
