//! TOML-driven configuration for the pipeline and the verifier.
//!
//! Both config types deserialize from TOML with per-field defaults, so a
//! config file only needs to name the values it overrides.  `validate()`
//! rejects configurations that would make the backpressure policy
//! meaningless (zero capacity, out-of-range fractions).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use custos_contracts::{CustosError, CustosResult};

// ── Pipeline configuration ────────────────────────────────────────────────────

/// Configuration for the ingestion pipeline and its flush scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum number of events buffered awaiting flush.
    pub queue_capacity: usize,

    /// Maximum number of events drained per flush.
    pub batch_size: usize,

    /// Period of the scheduled flush, in milliseconds.
    pub flush_interval_ms: u64,

    /// Bounded wait for a normal enqueue below the high-water mark.
    pub enqueue_timeout_ms: u64,

    /// Extended bounded wait for a high-risk event that must not be dropped.
    pub high_risk_timeout_ms: u64,

    /// Queue occupancy fraction above which the normal bounded wait is
    /// skipped and the overflow path is taken directly.
    pub high_water_fraction: f64,

    /// Memory-use fraction above which an emergency flush runs before any
    /// enqueue attempt.
    pub memory_pressure_threshold: f64,

    /// Pending-entry count at which a high-risk record triggers an
    /// immediate synchronous flush.
    pub high_risk_flush_threshold: usize,

    /// Bounded grace period for draining background work on shutdown.
    pub shutdown_grace_ms: u64,

    /// Period of the key-rotation check.
    pub rotation_check_interval_ms: u64,

    /// Period of the health check.
    pub health_check_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval_ms: 500,
            enqueue_timeout_ms: 5_000,
            high_risk_timeout_ms: 30_000,
            high_water_fraction: 0.95,
            memory_pressure_threshold: 0.90,
            high_risk_flush_threshold: 10,
            shutdown_grace_ms: 5_000,
            rotation_check_interval_ms: 3_600_000,
            health_check_interval_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Parse a config from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` on parse or validation failure.
    pub fn from_toml_str(raw: &str) -> CustosResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| CustosError::ConfigError {
            reason: format!("invalid pipeline config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` when the file cannot be read or
    /// the content fails to parse/validate.
    pub fn from_file(path: &Path) -> CustosResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CustosError::ConfigError {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations that would break the backpressure policy.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` naming the first offending field.
    pub fn validate(&self) -> CustosResult<()> {
        if self.queue_capacity == 0 {
            return Err(CustosError::ConfigError {
                reason: "queue_capacity must be > 0".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(CustosError::ConfigError {
                reason: "batch_size must be > 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.high_water_fraction) {
            return Err(CustosError::ConfigError {
                reason: "high_water_fraction must be within 0.0..=1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.memory_pressure_threshold) {
            return Err(CustosError::ConfigError {
                reason: "memory_pressure_threshold must be within 0.0..=1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Queue occupancy (in entries) at which the overflow path begins.
    pub fn high_water_mark(&self) -> usize {
        (self.queue_capacity as f64 * self.high_water_fraction) as usize
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn high_risk_timeout(&self) -> Duration {
        Duration::from_millis(self.high_risk_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn rotation_check_interval(&self) -> Duration {
        Duration::from_millis(self.rotation_check_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

// ── Verifier configuration ────────────────────────────────────────────────────

/// Configuration for the chain verifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Bounded wait for all shards of a sharded verification to complete.
    pub shard_timeout_ms: u64,

    /// Bounded wait for in-flight verification workers on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            shard_timeout_ms: 30_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl VerifierConfig {
    /// Parse a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `CustosError::ConfigError` on parse failure.
    pub fn from_toml_str(raw: &str) -> CustosResult<Self> {
        toml::from_str(raw).map_err(|e| CustosError::ConfigError {
            reason: format!("invalid verifier config: {e}"),
        })
    }

    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
