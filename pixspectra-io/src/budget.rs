//! Memory budget checks for the spectral store.
//!
//! A full CSPad store holds `4 × 8 × 388 × 185 × nbins` counters, about
//! 918 MB at the default 100 bins. The budget is checked before allocation.

use crate::{Error, Result};
use sysinfo::System;

/// Memory budget for the spectral store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MemoryBudget {
    /// Fraction of available system memory the store may use.
    pub memory_fraction: f64,
    /// Explicit budget; overrides `memory_fraction` when set.
    pub memory_budget_bytes: Option<usize>,
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self {
            memory_fraction: 0.8,
            memory_budget_bytes: None,
        }
    }
}

impl MemoryBudget {
    /// Set the fraction of available memory to use.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Set an explicit memory budget in bytes.
    #[must_use]
    pub fn with_memory_budget_bytes(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = Some(bytes);
        self
    }

    /// Resolve the effective budget in bytes.
    ///
    /// # Errors
    /// Returns an error if the memory fraction is invalid or system memory cannot be queried.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn resolve_budget_bytes(&self) -> Result<usize> {
        if let Some(bytes) = self.memory_budget_bytes {
            return Ok(bytes);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(Error::InvalidFormat(
                "memory_fraction must be in (0.0, 1.0]".to_string(),
            ));
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available == 0 {
            return Err(Error::InvalidFormat(
                "available system memory reported as 0".to_string(),
            ));
        }
        let budget = (available as f64 * self.memory_fraction).floor() as u64;
        Ok(usize::try_from(budget).unwrap_or(usize::MAX))
    }

    /// Checks that a store of `pixels × nbins` counters fits the budget.
    ///
    /// # Errors
    /// Returns `MemoryBudget` if it does not fit.
    pub fn check_store(&self, pixels: usize, nbins: usize) -> Result<usize> {
        let needed = store_bytes(pixels, nbins);
        let available = self.resolve_budget_bytes()?;
        if needed > available {
            return Err(Error::MemoryBudget { needed, available });
        }
        log::debug!("spectral store needs {needed} of {available} budget bytes");
        Ok(needed)
    }
}

/// Bytes used by a store of `pixels × nbins` u32 counters, saturating.
#[must_use]
pub fn store_bytes(pixels: usize, nbins: usize) -> usize {
    pixels
        .saturating_mul(nbins)
        .saturating_mul(std::mem::size_of::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_bytes() {
        assert_eq!(store_bytes(2_296_960, 100), 918_784_000);
        assert_eq!(store_bytes(usize::MAX, 2), usize::MAX);
    }

    #[test]
    fn test_explicit_budget() {
        let budget = MemoryBudget::default().with_memory_budget_bytes(1000);
        assert_eq!(budget.check_store(10, 25).unwrap(), 1000);
        assert!(matches!(
            budget.check_store(10, 26),
            Err(Error::MemoryBudget {
                needed: 1040,
                available: 1000
            })
        ));
    }

    #[test]
    fn test_invalid_fraction_rejected() {
        let budget = MemoryBudget::default().with_memory_fraction(1.5);
        assert!(budget.resolve_budget_bytes().is_err());
    }
}
