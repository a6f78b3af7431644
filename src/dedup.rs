// 🔍 Duplicate Resolver - is this historical record already stored?
// Exact match on date, sigla, type and pieces; amount within a tolerance

use crate::model::CanonicalRecord;
use crate::storage::{ServiceFilter, ServiceStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Absorbs rounding from currency text and total/pieces division
pub const DEFAULT_TOLERANCE: f64 = 0.01;

// ============================================================================
// DUPLICATE POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the stored record, drop the candidate, count a skip. Never overwrites.
    #[default]
    SkipDuplicates,

    /// Write every candidate without looking at storage
    ImportAll,
}

// ============================================================================
// DUPLICATE RESOLVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    /// Maximum amount difference still treated as the same record (exclusive)
    pub tolerance: f64,

    pub policy: DuplicatePolicy,
}

impl DuplicateResolver {
    /// Create resolver with default tolerance and skip policy
    pub fn new() -> Self {
        DuplicateResolver {
            tolerance: DEFAULT_TOLERANCE,
            policy: DuplicatePolicy::SkipDuplicates,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        DuplicateResolver {
            tolerance,
            ..Self::new()
        }
    }

    pub fn with_policy(tolerance: f64, policy: DuplicatePolicy) -> Self {
        DuplicateResolver { tolerance, policy }
    }

    /// True when one of `existing` has the candidate's date, sigla, type and
    /// pieces and an amount closer than the tolerance
    pub fn is_duplicate(&self, candidate: &CanonicalRecord, existing: &[CanonicalRecord]) -> bool {
        existing.iter().any(|e| {
            e.date() == candidate.date()
                && e.sigla() == candidate.sigla()
                && e.service_type() == candidate.service_type()
                && e.pieces() == candidate.pieces()
                && (e.amount() - candidate.amount()).abs() < self.tolerance
        })
    }

    /// Ask the store for records sharing the candidate's key (archived included)
    /// and decide. Under `ImportAll` the store is not consulted.
    pub fn check<S: ServiceStore + ?Sized>(&self, candidate: &CanonicalRecord, store: &S) -> Result<bool> {
        if self.policy == DuplicatePolicy::ImportAll {
            return Ok(false);
        }

        let existing = store.get_services(&ServiceFilter::natural_key(candidate))?;
        Ok(self.is_duplicate(candidate, &existing))
    }
}

impl Default for DuplicateResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
