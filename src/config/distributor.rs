//! Distributor configuration structures.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 64;
/// Default worker thread stack size (2 MiB).
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
/// Smallest accepted worker thread stack size (64 KiB).
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// What a submission does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Reject immediately with `Full`.
    Drop,
    /// Wait up to `timeout_ms` for space, then reject with `TimedOut`.
    Timeout {
        /// Maximum wait in milliseconds.
        timeout_ms: u64,
    },
    /// Wait until space frees up, the queue closes, or the scope is done.
    #[default]
    Block,
}

impl BackpressurePolicy {
    /// Wait bound for the `Timeout` policy.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Timeout { timeout_ms } => Some(Duration::from_millis(*timeout_ms)),
            Self::Drop | Self::Block => None,
        }
    }

    /// Parse `drop`, `block` or `timeout:<ms>`.
    ///
    /// # Errors
    ///
    /// Returns a message describing the unrecognised input.
    pub fn parse(input: &str) -> Result<Self, String> {
        let input = input.trim();
        match input.to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "block" => Ok(Self::Block),
            other => other
                .strip_prefix("timeout:")
                .ok_or_else(|| format!("unknown backpressure policy `{input}`"))?
                .parse::<u64>()
                .map(|timeout_ms| Self::Timeout { timeout_ms })
                .map_err(|e| format!("invalid timeout in `{input}`: {e}")),
        }
    }
}

/// Work distributor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorConfig {
    /// Queue capacity.
    pub capacity: usize,
    /// Number of worker threads.
    pub worker_count: usize,
    /// Backpressure policy applied by every submission.
    #[serde(default)]
    pub policy: BackpressurePolicy,
    /// Optional deadline in milliseconds, counted from distributor construction.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    /// Worker thread stack size in bytes.
    #[serde(default = "default_stack_size")]
    pub thread_stack_size: usize,
}

const fn default_stack_size() -> usize {
    DEFAULT_STACK_SIZE
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributorConfig {
    /// Defaults: capacity 64, one worker per CPU, blocking policy, no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            worker_count: num_cpus::get().max(1),
            policy: BackpressurePolicy::default(),
            deadline_ms: None,
            thread_stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Set the queue capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the number of workers.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the backpressure policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: BackpressurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set a deadline relative to construction. Sub-millisecond parts are dropped.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// The deadline as a duration, if configured.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        match self.deadline_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if let BackpressurePolicy::Timeout { timeout_ms: 0 } = self.policy {
            return Err("timeout policy requires timeout_ms greater than 0".into());
        }
        if self.deadline_ms == Some(0) {
            return Err("deadline_ms must be greater than 0 when set".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the environment, loading `.env` first if present.
    ///
    /// Reads `WD_CAPACITY`, `WD_WORKERS`, `WD_POLICY` (`drop`, `block` or
    /// `timeout:<ms>`) and `WD_DEADLINE_MS`; unset variables keep defaults.
    ///
    /// # Errors
    ///
    /// Returns a message for unparsable values or an invalid result.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}: invalid value `{raw}`: {e}"))
        }

        let mut cfg = Self::new();
        if let Some(raw) = lookup("WD_CAPACITY") {
            cfg.capacity = number("WD_CAPACITY", &raw)?;
        }
        if let Some(raw) = lookup("WD_WORKERS") {
            cfg.worker_count = number("WD_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("WD_POLICY") {
            cfg.policy = BackpressurePolicy::parse(&raw).map_err(|e| format!("WD_POLICY: {e}"))?;
        }
        if let Some(raw) = lookup("WD_DEADLINE_MS") {
            cfg.deadline_ms = Some(number("WD_DEADLINE_MS", &raw)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_policy_parse() {
        assert_eq!(BackpressurePolicy::parse("drop"), Ok(BackpressurePolicy::Drop));
        assert_eq!(BackpressurePolicy::parse(" Block "), Ok(BackpressurePolicy::Block));
        assert_eq!(
            BackpressurePolicy::parse("timeout:250"),
            Ok(BackpressurePolicy::Timeout { timeout_ms: 250 })
        );
        assert!(BackpressurePolicy::parse("timeout:soon").is_err());
        assert!(BackpressurePolicy::parse("spill").is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WD_CAPACITY", "8"),
            ("WD_WORKERS", "3"),
            ("WD_POLICY", "timeout:100"),
            ("WD_DEADLINE_MS", "500"),
        ]
        .into_iter()
        .collect();
        let cfg = DistributorConfig::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(cfg.capacity, 8);
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.policy, BackpressurePolicy::Timeout { timeout_ms: 100 });
        assert_eq!(cfg.deadline(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = DistributorConfig::from_lookup(|k| (k == "WD_CAPACITY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.starts_with("WD_CAPACITY"));
    }

    #[test]
    fn test_with_deadline_rounds_to_millis() {
        let cfg = DistributorConfig::new().with_deadline(Duration::from_micros(1500));
        assert_eq!(cfg.deadline_ms, Some(1));
    }
}
