//! Resource limits for project environments

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DockhandError, Result};

fn memory_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\d+(\.\d+)?[bkmg]?$").expect("Invalid regex pattern"))
}

/// Memory and CPU limits applied to a project's container.
///
/// Values keep the container runtime's own syntax (`512m`, `2g`, `1.5`) so
/// they can be passed through unchanged and stored as labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit such as `512m` or `2g`
    pub memory: String,
    /// Number of CPUs, fractional values allowed
    pub cpus: String,
}

impl ResourceLimits {
    /// Build limits from runtime-syntax strings, trimming whitespace.
    pub fn new(memory: &str, cpus: &str) -> Self {
        Self {
            memory: memory.trim().to_string(),
            cpus: cpus.trim().to_string(),
        }
    }

    /// Check the limits before any container is created.
    ///
    /// # Errors
    ///
    /// Returns [`DockhandError::InvalidResourceSpec`] when the memory value
    /// is not `<number>[b|k|m|g]`, is zero, or when the CPU value is not a
    /// positive number no greater than `max_cpus`.
    pub fn validate(&self, max_cpus: f64) -> Result<()> {
        if !memory_pattern().is_match(&self.memory) {
            return Err(DockhandError::InvalidResourceSpec(format!(
                "memory '{}' must look like 512m or 2g",
                self.memory
            ))
            .into());
        }

        let numeric: String = self
            .memory
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if numeric.parse::<f64>().map(|v| v <= 0.0).unwrap_or(true) {
            return Err(DockhandError::InvalidResourceSpec(format!(
                "memory '{}' must be greater than zero",
                self.memory
            ))
            .into());
        }

        let cpus: f64 = self.cpus.parse().map_err(|_| {
            DockhandError::InvalidResourceSpec(format!("cpus '{}' is not a number", self.cpus))
        })?;
        if !cpus.is_finite() || cpus <= 0.0 || cpus > max_cpus {
            return Err(DockhandError::InvalidResourceSpec(format!(
                "cpus '{}' must be greater than 0 and at most {}",
                self.cpus, max_cpus
            ))
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_limits() {
        for (memory, cpus) in [("2g", "1.0"), ("512m", "0.5"), ("1.5G", "2"), ("1024", "16")] {
            assert!(
                ResourceLimits::new(memory, cpus).validate(16.0).is_ok(),
                "{} / {} should be valid",
                memory,
                cpus
            );
        }
    }

    #[test]
    fn test_rejects_bad_memory() {
        for memory in ["", "lots", "2gb", "-1g", "0m", "g"] {
            let err = ResourceLimits::new(memory, "1").validate(16.0).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<DockhandError>(),
                Some(DockhandError::InvalidResourceSpec(_))
            ));
        }
    }

    #[test]
    fn test_rejects_bad_cpus() {
        for cpus in ["zero", "0", "-2", "17", "NaN"] {
            assert!(ResourceLimits::new("1g", cpus).validate(16.0).is_err(), "{}", cpus);
        }
    }
}
