use crate::error::ClientError;

/// Identity of the worker (event-loop thread) a connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WorkerId(pub usize);

/// Per-connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Worker the connection belongs to. Reported back, never interpreted.
    pub worker: WorkerId,
    /// Allow more than one request in flight when the codec supports it.
    /// Seeds the `PIPELINING` option.
    pub pipelining: bool,
    /// Maximum number of admitted exchanges awaiting completion.
    pub max_pipeline_depth: usize,
    /// Cap on requests waiting for admission. `None` = unbounded.
    pub max_queued: Option<usize>,
    /// Maximum bytes read from the transport per `on_readable` call, so one
    /// busy connection cannot starve others on the same worker.
    pub read_chunk_size: usize,
    /// Pending outbound bytes above which [`Exchange::is_writable`]
    /// reports false.
    ///
    /// [`Exchange::is_writable`]: crate::Exchange::is_writable
    pub write_high_watermark: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            worker: WorkerId::default(),
            pipelining: true,
            max_pipeline_depth: 32,
            max_queued: None,
            read_chunk_size: 256 * 1024,
            write_high_watermark: 64 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.max_pipeline_depth == 0 {
            return Err(ClientError::InvalidConfig(
                "max_pipeline_depth must be > 0".into(),
            ));
        }
        if self.max_queued == Some(0) {
            return Err(ClientError::InvalidConfig(
                "max_queued must be > 0 when set".into(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(ClientError::InvalidConfig(
                "read_chunk_size must be > 0".into(),
            ));
        }
        if self.write_high_watermark == 0 {
            return Err(ClientError::InvalidConfig(
                "write_high_watermark must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ConnectionConfig`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use ringline_client::{ConnectionConfigBuilder, WorkerId};
///
/// let config = ConnectionConfigBuilder::new()
///     .worker(WorkerId(3))
///     .pipelining(true)
///     .max_pipeline_depth(8)
///     .max_queued(1024)
///     .build()
///     .expect("invalid config");
/// assert_eq!(config.max_queued, Some(1024));
/// ```
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Worker settings ──────────────────────────────────────────────

    /// Set the worker the connection is bound to.
    pub fn worker(mut self, worker: WorkerId) -> Self {
        self.config.worker = worker;
        self
    }

    // ── Pipelining ───────────────────────────────────────────────────

    /// Enable or disable request pipelining.
    pub fn pipelining(mut self, enable: bool) -> Self {
        self.config.pipelining = enable;
        self
    }

    /// Set the maximum number of in-flight exchanges.
    pub fn max_pipeline_depth(mut self, n: usize) -> Self {
        self.config.max_pipeline_depth = n;
        self
    }

    /// Bound the pending queue. Submits beyond it fail with `QueueFull`.
    pub fn max_queued(mut self, n: usize) -> Self {
        self.config.max_queued = Some(n);
        self
    }

    // ── Buffer settings ──────────────────────────────────────────────

    /// Set the per-event read budget in bytes.
    pub fn read_chunk_size(mut self, n: usize) -> Self {
        self.config.read_chunk_size = n;
        self
    }

    /// Set the outbound high watermark in bytes.
    pub fn write_high_watermark(mut self, n: usize) -> Self {
        self.config.write_high_watermark = n;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<ConnectionConfig, ClientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ConnectionConfig::default();
        config.validate().unwrap();
        assert!(config.pipelining);
        assert_eq!(config.max_queued, None);
    }

    #[test]
    fn builder_sets_fields() {
        let config = ConnectionConfigBuilder::new()
            .worker(WorkerId(2))
            .pipelining(false)
            .max_pipeline_depth(4)
            .max_queued(16)
            .read_chunk_size(4096)
            .write_high_watermark(8192)
            .build()
            .unwrap();
        assert_eq!(config.worker, WorkerId(2));
        assert!(!config.pipelining);
        assert_eq!(config.max_pipeline_depth, 4);
        assert_eq!(config.max_queued, Some(16));
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.write_high_watermark, 8192);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(
            ConnectionConfigBuilder::new().max_pipeline_depth(0).build(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectionConfigBuilder::new().max_queued(0).build(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectionConfigBuilder::new().read_chunk_size(0).build(),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(matches!(
            ConnectionConfigBuilder::new().write_high_watermark(0).build(),
            Err(ClientError::InvalidConfig(_))
        ));
    }
}
