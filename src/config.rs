use anyhow::{bail, Result};
use std::time::Duration;

use crate::core::types::Amount;

/// Outputs below this are unspendable in practice and cannot be change.
pub const DEFAULT_DUST_THRESHOLD: Amount = 546;

/// Analysis parameters.
///
/// `max_fee_rel` is the protocol knob: the largest fee a single maker may
/// charge, as a fraction of the equal-output denomination. Everything the
/// preprocessor and the ILP treat as a bound derives from it via
/// [`AnalyzerConfig::max_fee_abs`].
#[derive(Clone, Debug)]
pub struct AnalyzerConfig {
    /// Max maker fee as a fraction of `equal_amount`, in `[0, 1]`.
    pub max_fee_rel: f64,
    /// Stop enumerating after this many distinct solutions.
    pub max_solutions: usize,
    /// Change outputs below this many satoshis are rejected.
    pub dust_threshold: Amount,
    /// Wall-clock budget for a single solver invocation.
    pub per_solve_timeout: Duration,
    /// Resident-memory ceiling for the whole run.
    pub memory_limit_bytes: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_fee_rel: 0.05,
            max_solutions: 1000,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            per_solve_timeout: Duration::from_secs(60),
            memory_limit_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_fee_rel) {
            bail!("max_fee_rel must be in [0, 1], got {}", self.max_fee_rel);
        }
        if self.max_solutions == 0 {
            bail!("max_solutions must be positive");
        }
        if self.per_solve_timeout.is_zero() {
            bail!("per_solve_timeout must be positive");
        }
        if self.memory_limit_bytes == 0 {
            bail!("memory_limit_bytes must be positive");
        }
        Ok(())
    }

    /// Max individual maker fee in satoshis, floored to keep the model
    /// strictly integer-linear.
    pub fn max_fee_abs(&self, equal_amount: Amount) -> Amount {
        (self.max_fee_rel * equal_amount as f64).floor() as Amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AnalyzerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_fee() {
        let mut cfg = AnalyzerConfig::default();
        cfg.max_fee_rel = 1.5;
        assert!(cfg.validate().is_err());
        cfg.max_fee_rel = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cap_and_timeout() {
        let mut cfg = AnalyzerConfig::default();
        cfg.max_solutions = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AnalyzerConfig::default();
        cfg.per_solve_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn max_fee_abs_is_floored() {
        let mut cfg = AnalyzerConfig::default();
        cfg.max_fee_rel = 0.005;
        // 0.005 * 100_001 = 500.005 → 500
        assert_eq!(cfg.max_fee_abs(100_001), 500);
        assert_eq!(cfg.max_fee_abs(100_000), 500);
        cfg.max_fee_rel = 0.0;
        assert_eq!(cfg.max_fee_abs(100_000), 0);
    }
}
