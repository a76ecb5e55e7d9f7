//! Per-connection session settings for bulk loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, System};
use tracing::{info, warn};

const FALLBACK_AVAILABLE_MB: u64 = 4 * 1024;

/// `SET` values applied to every pooled connection.
///
/// Memory settings are fractions of the memory available when the process
/// starts (20 % / 30 % / 10 %); any value can be overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTuning {
    pub work_mem_mb: u64,
    pub maintenance_work_mem_mb: u64,
    pub temp_buffers_mb: u64,
    pub synchronous_commit: bool,
    pub effective_io_concurrency: u32,
    pub max_parallel_workers_per_gather: u32,
}

/// Available memory in MB, or a conservative guess when it cannot be read
pub fn detect_available_memory_mb() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory_specifics(MemoryRefreshKind::everything());
    let available = sys.available_memory();

    if available == 0 {
        warn!(
            fallback_mb = FALLBACK_AVAILABLE_MB,
            "Could not detect available memory, using fallback"
        );
        FALLBACK_AVAILABLE_MB
    } else {
        available / (1024 * 1024)
    }
}

impl SessionTuning {
    pub fn from_available_memory_mb(available_mb: u64) -> Self {
        Self {
            work_mem_mb: (available_mb / 5).max(1),
            maintenance_work_mem_mb: (available_mb * 3 / 10).max(1),
            temp_buffers_mb: (available_mb / 10).max(1),
            synchronous_commit: false,
            effective_io_concurrency: 200,
            max_parallel_workers_per_gather: 8,
        }
    }

    /// Derive from this machine's available memory
    pub fn detect() -> Self {
        let available_mb = detect_available_memory_mb();
        let tuning = Self::from_available_memory_mb(available_mb);
        info!(
            available_mb,
            work_mem_mb = tuning.work_mem_mb,
            maintenance_work_mem_mb = tuning.maintenance_work_mem_mb,
            "Session tuning derived from available memory"
        );
        tuning
    }

    /// Apply `DB_WORK_MEM_MB`, `DB_MAINTENANCE_WORK_MEM_MB`,
    /// `DB_TEMP_BUFFERS_MB` and `DB_SYNCHRONOUS_COMMIT` when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            match std::env::var(name) {
                Ok(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .with_context(|| format!("Invalid {}: '{}'", name, value)),
                Err(_) => Ok(None),
            }
        }

        if let Some(v) = parse_var("DB_WORK_MEM_MB")? {
            self.work_mem_mb = v;
        }
        if let Some(v) = parse_var("DB_MAINTENANCE_WORK_MEM_MB")? {
            self.maintenance_work_mem_mb = v;
        }
        if let Some(v) = parse_var("DB_TEMP_BUFFERS_MB")? {
            self.temp_buffers_mb = v;
        }
        if let Some(v) = parse_var("DB_SYNCHRONOUS_COMMIT")? {
            self.synchronous_commit = v;
        }
        Ok(self)
    }

    pub fn statements(&self) -> Vec<String> {
        vec![
            format!(
                "SET synchronous_commit = {}",
                if self.synchronous_commit { "on" } else { "off" }
            ),
            format!("SET work_mem = '{}MB'", self.work_mem_mb),
            format!("SET maintenance_work_mem = '{}MB'", self.maintenance_work_mem_mb),
            format!("SET temp_buffers = '{}MB'", self.temp_buffers_mb),
            format!("SET effective_io_concurrency = {}", self.effective_io_concurrency),
            format!(
                "SET max_parallel_workers_per_gather = {}",
                self.max_parallel_workers_per_gather
            ),
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_fractions_of_available_memory() {
        let tuning = SessionTuning::from_available_memory_mb(10_000);
        assert_eq!(tuning.work_mem_mb, 2_000);
        assert_eq!(tuning.maintenance_work_mem_mb, 3_000);
        assert_eq!(tuning.temp_buffers_mb, 1_000);
        assert!(!tuning.synchronous_commit);
    }

    #[test]
    fn test_tiny_memory_never_zero() {
        let tuning = SessionTuning::from_available_memory_mb(0);
        assert_eq!(tuning.work_mem_mb, 1);
        assert_eq!(tuning.temp_buffers_mb, 1);
    }

    #[test]
    fn test_statements() {
        let statements = SessionTuning::from_available_memory_mb(1000).statements();
        assert_eq!(statements[0], "SET synchronous_commit = off");
        assert!(statements.contains(&"SET work_mem = '200MB'".to_string()));
        assert!(statements.contains(&"SET max_parallel_workers_per_gather = 8".to_string()));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("DB_WORK_MEM_MB", "64");
        std::env::set_var("DB_SYNCHRONOUS_COMMIT", "true");
        let tuning = SessionTuning::from_available_memory_mb(1000)
            .with_env_overrides()
            .unwrap();
        assert_eq!(tuning.work_mem_mb, 64);
        assert!(tuning.synchronous_commit);
        assert_eq!(tuning.maintenance_work_mem_mb, 300);

        std::env::set_var("DB_WORK_MEM_MB", "lots");
        assert!(SessionTuning::from_available_memory_mb(1000)
            .with_env_overrides()
            .is_err());

        std::env::remove_var("DB_WORK_MEM_MB");
        std::env::remove_var("DB_SYNCHRONOUS_COMMIT");
    }
}
