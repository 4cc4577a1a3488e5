//! Engine configuration.

use crate::protocol::MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for one muxrpc connection.
#[derive(Debug, Clone)]
pub struct MuxRpcConfig {
    /// Largest body accepted or sent, in bytes.
    pub max_frame_size: usize,
    /// Frames buffered per inbound source stream before the reader waits
    /// for the consumer.
    pub source_buffer: usize,
    /// Local deadline for async calls. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for MuxRpcConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            source_buffer: 16,
            request_timeout: None,
        }
    }
}

impl MuxRpcConfig {
    /// Create a new config builder.
    #[must_use]
    pub fn builder() -> MuxRpcConfigBuilder {
        MuxRpcConfigBuilder::new()
    }
}

/// Builder for [`MuxRpcConfig`].
#[derive(Debug, Clone)]
pub struct MuxRpcConfigBuilder {
    config: MuxRpcConfig,
}

impl MuxRpcConfigBuilder {
    /// Start from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MuxRpcConfig::default(),
        }
    }

    /// Set the maximum frame body size.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the per-stream inbound buffer, in frames. Clamped to at least 1.
    #[must_use]
    pub const fn source_buffer(mut self, frames: usize) -> Self {
        self.config.source_buffer = if frames == 0 { 1 } else { frames };
        self
    }

    /// Set the async call deadline.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> MuxRpcConfig {
        self.config
    }
}

impl Default for MuxRpcConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = MuxRpcConfig::builder()
            .max_frame_size(1024)
            .source_buffer(0)
            .request_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.source_buffer, 1);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
    }
}
