//! Runtime configuration
//!
//! One [`ParleyConfig`] groups the tunables of every component. Each
//! section deserializes from TOML with defaults for missing fields, so a
//! file only needs to list what it overrides:
//!
//! ```toml
//! [serializer]
//! queue_capacity = 256
//!
//! [router]
//! accept_threshold = 0.75
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub serializer: SerializerConfig,
    pub router: RouterConfig,
    pub orchestrator: OrchestratorConfig,
    pub bus: BusConfig,
    pub harness: HarnessConfig,
}

impl ParleyConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// With serializer section
    #[inline]
    #[must_use]
    pub fn with_serializer(mut self, serializer: SerializerConfig) -> Self {
        self.serializer = serializer;
        self
    }

    /// With router section
    #[inline]
    #[must_use]
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    /// With orchestrator section
    #[inline]
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: OrchestratorConfig) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    /// With bus section
    #[inline]
    #[must_use]
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// With harness section
    #[inline]
    #[must_use]
    pub fn with_harness(mut self, harness: HarnessConfig) -> Self {
        self.harness = harness;
        self
    }

    /// Reject zero capacities, zero intervals and thresholds outside (0, 1]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serializer.validate()?;
        self.router.validate()?;
        self.orchestrator.validate()?;
        self.bus.validate()?;
        self.harness.validate()
    }
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::invalid(
            field,
            format!("{value} is outside (0, 1]"),
        ));
    }
    Ok(())
}

/// Per-block event serializer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Inbound queue capacity per block
    pub queue_capacity: usize,
    /// Max wait for a worker to drain on stop, in milliseconds
    pub stop_timeout_ms: u64,
    /// Idle time after which a worker is reclaimed, in seconds
    pub stale_after_secs: u64,
    /// Period of the background sweep, in seconds
    pub sweep_interval_secs: u64,
}

impl SerializerConfig {
    /// With queue capacity
    #[inline]
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// With stale threshold
    #[inline]
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after_secs = stale_after.as_secs();
        self
    }

    #[inline]
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_zero("serializer.queue_capacity", self.queue_capacity as u64)?;
        non_zero("serializer.stop_timeout_ms", self.stop_timeout_ms)?;
        non_zero("serializer.stale_after_secs", self.stale_after_secs)?;
        non_zero("serializer.sweep_interval_secs", self.sweep_interval_secs)
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            stop_timeout_ms: 5_000,
            stale_after_secs: 30 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

/// Router cascade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Minimum confidence for a layer verdict to be accepted
    pub accept_threshold: f32,
    /// Route cache capacity
    pub cache_capacity: u64,
    /// TTL of cached non-semantic verdicts, in seconds
    pub cache_ttl_secs: u64,
    /// TTL of cached semantic verdicts, in seconds
    pub semantic_cache_ttl_secs: u64,
    /// Deadline of the semantic classifier call, in milliseconds
    pub semantic_timeout_ms: u64,
    /// Minimum bigram similarity for history matches
    pub history_similarity: f32,
    /// Recent decisions kept per user
    pub history_size: usize,
    /// How long a conversation's last route stays sticky, in seconds
    pub last_route_ttl_secs: u64,
    pub enable_cache: bool,
    pub enable_history: bool,
    pub enable_weighted: bool,
}

impl RouterConfig {
    /// With accept threshold
    #[inline]
    #[must_use]
    pub fn with_accept_threshold(mut self, threshold: f32) -> Self {
        self.accept_threshold = threshold;
        self
    }

    /// With semantic timeout
    #[inline]
    #[must_use]
    pub fn with_semantic_timeout(mut self, timeout: Duration) -> Self {
        self.semantic_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Disable the memoization layer
    #[inline]
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[inline]
    #[must_use]
    pub fn semantic_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.semantic_cache_ttl_secs)
    }

    #[inline]
    #[must_use]
    pub fn semantic_timeout(&self) -> Duration {
        Duration::from_millis(self.semantic_timeout_ms)
    }

    #[inline]
    #[must_use]
    pub fn last_route_ttl(&self) -> Duration {
        Duration::from_secs(self.last_route_ttl_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        unit_interval("router.accept_threshold", self.accept_threshold)?;
        unit_interval("router.history_similarity", self.history_similarity)?;
        non_zero("router.cache_capacity", self.cache_capacity)?;
        non_zero("router.cache_ttl_secs", self.cache_ttl_secs)?;
        non_zero("router.semantic_cache_ttl_secs", self.semantic_cache_ttl_secs)?;
        non_zero("router.semantic_timeout_ms", self.semantic_timeout_ms)?;
        non_zero("router.history_size", self.history_size as u64)?;
        non_zero("router.last_route_ttl_secs", self.last_route_ttl_secs)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            accept_threshold: 0.8,
            cache_capacity: 500,
            cache_ttl_secs: 5 * 60,
            semantic_cache_ttl_secs: 30 * 60,
            semantic_timeout_ms: 10_000,
            history_similarity: 0.8,
            history_size: 50,
            last_route_ttl_secs: 5 * 60,
            enable_cache: true,
            enable_history: true,
            enable_weighted: true,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrently running task nodes
    pub max_parallel_tasks: usize,
    /// Retries of a transient node failure
    pub max_retries: u32,
    /// First retry delay, doubled per attempt, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Per-node deadline, in seconds
    pub task_timeout_secs: u64,
    /// Max hops a task may be handed between experts
    pub max_handoff_depth: u32,
    /// Expert used when nothing else matches
    pub default_expert: String,
}

impl OrchestratorConfig {
    /// With max parallel tasks
    #[inline]
    #[must_use]
    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = u64::try_from(base_delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With default expert
    #[inline]
    #[must_use]
    pub fn with_default_expert(mut self, expert: impl Into<String>) -> Self {
        self.default_expert = expert.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[inline]
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_zero(
            "orchestrator.max_parallel_tasks",
            self.max_parallel_tasks as u64,
        )?;
        non_zero("orchestrator.task_timeout_secs", self.task_timeout_secs)?;
        if self.default_expert.trim().is_empty() {
            return Err(ConfigError::invalid(
                "orchestrator.default_expert",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 3,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            task_timeout_secs: 120,
            max_handoff_depth: 2,
            default_expert: "memo".to_string(),
        }
    }
}

/// Lifecycle bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-listener deadline, in milliseconds
    pub listener_timeout_ms: u64,
}

impl BusConfig {
    /// With listener timeout
    #[inline]
    #[must_use]
    pub fn with_listener_timeout(mut self, timeout: Duration) -> Self {
        self.listener_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn listener_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_zero("bus.listener_timeout_ms", self.listener_timeout_ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            listener_timeout_ms: 5_000,
        }
    }
}

/// Streaming harness settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Idle period before a ping is sent, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Handler used when decomposition is needed and no orchestrator exists
    pub default_handler: String,
}

impl HarnessConfig {
    /// With heartbeat interval
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With default handler
    #[inline]
    #[must_use]
    pub fn with_default_handler(mut self, name: impl Into<String>) -> Self {
        self.default_handler = name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_zero("harness.heartbeat_interval_ms", self.heartbeat_interval_ms)?;
        if self.default_handler.trim().is_empty() {
            return Err(ConfigError::invalid(
                "harness.default_handler",
                "must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            default_handler: "memo".to_string(),
        }
    }
}
