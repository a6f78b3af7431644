// 📊 Import reports
// Aggregate counts for responses and keep error output bounded

use crate::model::CanonicalRecord;
use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================================
// BOUNDED ERROR COLLECTOR
// ============================================================================

/// Keeps the first `capacity` error strings and counts the rest
#[derive(Debug, Clone)]
pub struct ErrorCollector {
    capacity: usize,
    errors: Vec<String>,
    overflow: usize,
}

impl ErrorCollector {
    pub fn new(capacity: usize) -> Self {
        ErrorCollector {
            capacity,
            errors: Vec::with_capacity(capacity.min(64)),
            overflow: 0,
        }
    }

    pub fn push(&mut self, error: impl Into<String>) {
        if self.errors.len() < self.capacity {
            self.errors.push(error.into());
        } else {
            self.overflow += 1;
        }
    }

    pub fn extend<I>(&mut self, errors: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for e in errors {
            self.push(e);
        }
    }

    /// Every error seen, kept or not
    pub fn total(&self) -> usize {
        self.errors.len() + self.overflow
    }

    pub fn is_truncated(&self) -> bool {
        self.overflow > 0
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<String> {
        self.errors
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub total_services: usize,
    pub services_by_year: BTreeMap<i32, usize>,
    pub services_by_type: BTreeMap<String, usize>,
}

impl ImportStats {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a CanonicalRecord>,
    {
        let mut stats = ImportStats::default();
        for r in records {
            stats.total_services += 1;
            *stats.services_by_year.entry(r.archived_year()).or_insert(0) += 1;
            *stats
                .services_by_type
                .entry(r.service_type().as_str().to_string())
                .or_insert(0) += 1;
        }
        stats
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunReport {
    pub dry_run: bool,
    #[serde(flatten)]
    pub stats: ImportStats,
    pub errors: Vec<String>,
    pub total_errors: usize,
    pub sample_services: Vec<CanonicalRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub success: bool,
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub total_errors: usize,
    #[serde(flatten)]
    pub stats: ImportStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ImportReport {
    DryRun(DryRunReport),
    Commit(CommitReport),
}

impl ImportReport {
    pub fn dry_run(stats: ImportStats, errors: ErrorCollector, sample: Vec<CanonicalRecord>) -> Self {
        ImportReport::DryRun(DryRunReport {
            dry_run: true,
            stats,
            total_errors: errors.total(),
            errors: errors.into_errors(),
            sample_services: sample,
        })
    }

    pub fn commit(stats: ImportStats, imported: usize, skipped: usize, errors: ErrorCollector) -> Self {
        ImportReport::Commit(CommitReport {
            success: true,
            imported,
            skipped,
            total_errors: errors.total(),
            errors: errors.into_errors(),
            stats,
        })
    }

    pub fn stats(&self) -> &ImportStats {
        match self {
            ImportReport::DryRun(r) => &r.stats,
            ImportReport::Commit(r) => &r.stats,
        }
    }

    pub fn errors(&self) -> &[String] {
        match self {
            ImportReport::DryRun(r) => &r.errors,
            ImportReport::Commit(r) => &r.errors,
        }
    }

    pub fn total_errors(&self) -> usize {
        match self {
            ImportReport::DryRun(r) => r.total_errors,
            ImportReport::Commit(r) => r.total_errors,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            ImportReport::DryRun(r) => format!(
                "Dry run: {} services, {} errors",
                r.stats.total_services, r.total_errors
            ),
            ImportReport::Commit(r) => format!(
                "Import: {} imported, {} skipped, {} errors (of {} services)",
                r.imported, r.skipped, r.total_errors, r.stats.total_services
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;
    use chrono::{NaiveDate, Utc};

    fn record(year: i32, t: ServiceType) -> CanonicalRecord {
        CanonicalRecord::historical(
            NaiveDate::from_ymd_opt(year, 3, 1).unwrap(),
            "97",
            1,
            t,
            0.40,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_collector_caps_and_counts() {
        let mut c = ErrorCollector::new(3);
        c.extend((1..=5).map(|i| format!("Line {}: bad", i)));

        assert_eq!(c.errors().len(), 3);
        assert_eq!(c.total(), 5);
        assert!(c.is_truncated());
        assert_eq!(c.errors()[0], "Line 1: bad");
    }

    #[test]
    fn test_collector_under_capacity() {
        let mut c = ErrorCollector::new(10);
        c.push("Line 2: bad");
        assert_eq!(c.total(), 1);
        assert!(!c.is_truncated());
    }

    #[test]
    fn test_stats_grouping() {
        let records = vec![
            record(2019, ServiceType::Siglatura),
            record(2019, ServiceType::Riparazione),
            record(2020, ServiceType::Siglatura),
        ];
        let stats = ImportStats::from_records(&records);

        assert_eq!(stats.total_services, 3);
        assert_eq!(stats.services_by_year[&2019], 2);
        assert_eq!(stats.services_by_year[&2020], 1);
        assert_eq!(stats.services_by_type["siglatura"], 2);
        assert_eq!(stats.services_by_type["riparazione"], 1);
        assert!(!stats.services_by_type.contains_key("happy_hour"));
    }

    #[test]
    fn test_dry_run_json_shape() {
        let records = vec![record(2020, ServiceType::Siglatura)];
        let mut errors = ErrorCollector::new(10);
        errors.push("Line 4: invalid date");

        let report = ImportReport::dry_run(ImportStats::from_records(&records), errors, records.clone());
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["dryRun"], true);
        assert_eq!(json["totalServices"], 1);
        assert_eq!(json["servicesByYear"]["2020"], 1);
        assert_eq!(json["servicesByType"]["siglatura"], 1);
        assert_eq!(json["errors"][0], "Line 4: invalid date");
        assert_eq!(json["sampleServices"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_json_shape() {
        let records = vec![record(2020, ServiceType::HappyHour)];
        let mut errors = ErrorCollector::new(1);
        errors.push("Line 1: storage error");
        errors.push("Line 2: storage error");

        let report = ImportReport::commit(ImportStats::from_records(&records), 1, 0, errors);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["imported"], 1);
        assert_eq!(json["skipped"], 0);
        assert_eq!(json["errors"].as_array().unwrap().len(), 1);
        assert_eq!(json["totalErrors"], 2);
        assert_eq!(json["servicesByType"]["happy_hour"], 1);
        assert!(json.get("dryRun").is_none());
    }
}
