// 🗄️ Storage collaborator
// The only component with side effects; everything the import pipeline
// needs from a store is `get_services` + `create_service`.

use crate::model::{CanonicalRecord, ServiceType};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// QUERY FILTER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub sigla: Option<String>,
    pub service_type: Option<ServiceType>,
    pub pieces: Option<u32>,
    /// Include rows created by historical imports
    pub include_archived: bool,
}

impl ServiceFilter {
    /// Everything in the store
    pub fn all() -> Self {
        ServiceFilter {
            include_archived: true,
            ..ServiceFilter::default()
        }
    }

    /// Records sharing a candidate's exact-match key: same day, sigla, type, pieces
    pub fn natural_key(candidate: &CanonicalRecord) -> Self {
        ServiceFilter {
            date_from: Some(candidate.date()),
            date_to: Some(candidate.date()),
            sigla: Some(candidate.sigla().to_string()),
            service_type: Some(candidate.service_type()),
            pieces: Some(candidate.pieces()),
            include_archived: true,
        }
    }

    pub fn matches(&self, record: &CanonicalRecord) -> bool {
        if !self.include_archived && record.is_archived() {
            return false;
        }
        if self.date_from.is_some_and(|d| record.date() < d) {
            return false;
        }
        if self.date_to.is_some_and(|d| record.date() > d) {
            return false;
        }
        if self.sigla.as_deref().is_some_and(|s| s != record.sigla()) {
            return false;
        }
        if self.service_type.is_some_and(|t| t != record.service_type()) {
            return false;
        }
        if self.pieces.is_some_and(|p| p != record.pieces()) {
            return false;
        }
        true
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait ServiceStore {
    fn get_services(&self, filter: &ServiceFilter) -> Result<Vec<CanonicalRecord>>;

    fn create_service(&mut self, record: &CanonicalRecord) -> Result<CanonicalRecord>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Vec-backed store for tests and dry experiments.
/// Counts calls and can be told to fail specific writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<CanonicalRecord>,
    /// Sigla values whose `create_service` call fails
    failing_siglas: Vec<String>,
    pub create_calls: usize,
    pub query_calls: std::cell::Cell<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<CanonicalRecord>) -> Self {
        MemoryStore {
            records,
            ..Self::default()
        }
    }

    /// Make every write for this sigla fail
    pub fn fail_writes_for(mut self, sigla: &str) -> Self {
        self.failing_siglas.push(sigla.to_string());
        self
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ServiceStore for MemoryStore {
    fn get_services(&self, filter: &ServiceFilter) -> Result<Vec<CanonicalRecord>> {
        self.query_calls.set(self.query_calls.get() + 1);
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn create_service(&mut self, record: &CanonicalRecord) -> Result<CanonicalRecord> {
        self.create_calls += 1;
        if self.failing_siglas.iter().any(|s| s == record.sigla()) {
            return Err(anyhow!("write rejected for sigla {}", record.sigla()));
        }
        self.records.push(record.clone());
        Ok(record.clone())
    }
}
