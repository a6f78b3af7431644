// 🚚 Import Executor - one job from source file to report
// Read → parse → drop test records → normalize → (dry run | commit)

use crate::config::ImportConfig;
use crate::dedup::{DuplicatePolicy, DuplicateResolver, DEFAULT_TOLERANCE};
use crate::error::{ImportError, ImportResult, LineError};
use crate::model::CanonicalRecord;
use crate::normalizer::{Normalized, Normalizer};
use crate::parser::{get_parser, read_source, SourceFormat, TestRecordFilter};
use crate::report::{ErrorCollector, ImportReport, ImportStats};
use crate::storage::ServiceStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

// ============================================================================
// JOB STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Parsing,
    Normalizing,
    DryRunComplete,
    Committing,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Parsing => "parsing",
            JobState::Normalizing => "normalizing",
            JobState::DryRunComplete => "dry_run_complete",
            JobState::Committing => "committing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks and logs state transitions for one job
struct Job<'a> {
    format: SourceFormat,
    path: &'a Path,
    state: JobState,
}

impl<'a> Job<'a> {
    fn new(format: SourceFormat, path: &'a Path) -> Self {
        Job {
            format,
            path,
            state: JobState::Pending,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug!(
            format = self.format.code(),
            path = %self.path.display(),
            from = %self.state,
            to = %next,
            "import job state change"
        );
        self.state = next;
    }

    fn fail(&mut self, err: ImportError) -> ImportError {
        self.advance(JobState::Failed);
        warn!(format = self.format.code(), path = %self.path.display(), "import job failed: {}", err);
        err
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    /// Preview only; nothing is written
    pub dry_run: bool,
    pub tolerance: f64,
    pub policy: DuplicatePolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            dry_run: true,
            tolerance: DEFAULT_TOLERANCE,
            policy: DuplicatePolicy::SkipDuplicates,
        }
    }
}

impl ImportOptions {
    /// Dry-run options carrying the configured tolerance and policy
    pub fn from_config(config: &ImportConfig) -> Self {
        ImportOptions {
            dry_run: true,
            tolerance: config.tolerance,
            policy: config.duplicate_policy,
        }
    }

    pub fn commit(mut self) -> Self {
        self.dry_run = false;
        self
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Parsed and normalized content of one source file
#[derive(Debug)]
pub struct PreparedBatch {
    pub records: Vec<Normalized>,
    /// Parse and normalization failures in file order
    pub errors: Vec<LineError>,
    /// Lines dropped as test data
    pub test_records: usize,
}

pub struct ImportExecutor {
    normalizer: Normalizer,
    filter: TestRecordFilter,
    max_errors: usize,
    sample_size: usize,
    progress_every: usize,
}

impl ImportExecutor {
    pub fn from_config(config: &ImportConfig) -> Self {
        ImportExecutor {
            normalizer: config.normalizer(),
            filter: config.test_records.clone(),
            max_errors: config.max_errors,
            sample_size: config.sample_size,
            progress_every: config.progress_every.max(1),
        }
    }

    /// Read, parse, filter and normalize a file without touching storage.
    /// Only a missing or unreadable source is an `Err`.
    pub fn prepare(&self, format: SourceFormat, path: &Path) -> ImportResult<PreparedBatch> {
        let content = read_source(path)?;
        let parsed = get_parser(format)
            .parse_with(&content, &self.filter)
            .map_err(|e| with_source_path(e, path))?;

        let normalized = self.normalizer.normalize_all(&parsed.records, Utc::now());

        let mut errors = parsed.errors;
        errors.extend(normalized.errors);
        errors.sort_by_key(|e| e.line);

        Ok(PreparedBatch {
            records: normalized.records,
            errors,
            test_records: parsed.test_records,
        })
    }

    /// Run one import job against `store`
    pub fn run<S: ServiceStore + ?Sized>(
        &self,
        format: SourceFormat,
        path: &Path,
        options: &ImportOptions,
        store: &mut S,
    ) -> ImportResult<ImportReport> {
        let mut job = Job::new(format, path);
        info!(
            format = format.code(),
            path = %path.display(),
            dry_run = options.dry_run,
            "starting historical import"
        );

        job.advance(JobState::Parsing);
        let batch = self.prepare(format, path).map_err(|e| job.fail(e))?;
        job.advance(JobState::Normalizing);

        if batch.test_records > 0 {
            debug!(count = batch.test_records, "dropped test records");
        }

        let mut errors = ErrorCollector::new(self.max_errors);
        errors.extend(batch.errors);

        let stats = ImportStats::from_records(batch.records.iter().map(|n| &n.record));

        if options.dry_run {
            let sample: Vec<CanonicalRecord> = batch
                .records
                .iter()
                .take(self.sample_size)
                .map(|n| n.record.clone())
                .collect();
            job.advance(JobState::DryRunComplete);
            info!(
                services = stats.total_services,
                errors = errors.total(),
                "dry run complete"
            );
            return Ok(ImportReport::dry_run(stats, errors, sample));
        }

        job.advance(JobState::Committing);
        let resolver = DuplicateResolver::with_policy(options.tolerance, options.policy);
        let total = batch.records.len();
        let mut imported = 0;
        let mut skipped = 0;

        for (i, item) in batch.records.iter().enumerate() {
            let unit = format.unit();
            match resolver.check(&item.record, &*store) {
                Ok(true) => skipped += 1,
                Ok(false) => match store.create_service(&item.record) {
                    Ok(_) => imported += 1,
                    Err(e) => {
                        let err = ImportError::Storage(format!("{:#}", e));
                        warn!(line = item.line, "{}", err);
                        errors.push(format!("{} {}: {}", unit, item.line, err));
                    }
                },
                Err(e) => {
                    let err = ImportError::Storage(format!("{:#}", e));
                    warn!(line = item.line, "duplicate lookup failed: {}", err);
                    errors.push(format!("{} {}: {}", unit, item.line, err));
                }
            }

            let done = i + 1;
            if done % self.progress_every == 0 {
                info!(done, total, imported, skipped, "import progress");
            }
        }

        job.advance(JobState::Completed);
        info!(
            imported,
            skipped,
            errors = errors.total(),
            "historical import committed"
        );

        Ok(ImportReport::commit(stats, imported, skipped, errors))
    }
}

impl Default for ImportExecutor {
    fn default() -> Self {
        ImportExecutor::from_config(&ImportConfig::default())
    }
}

/// Parsers only see content; put the file path back on shape errors
fn with_source_path(err: ImportError, path: &Path) -> ImportError {
    match err {
        ImportError::SourceUnreadable { reason, .. } => ImportError::SourceUnreadable {
            path: path.to_path_buf(),
            reason,
        },
        other => other,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceType;
    use crate::report::{CommitReport, DryRunReport};
    use crate::storage::{MemoryStore, ServiceFilter};
    use std::fs;
    use tempfile::TempDir;

    fn write_source(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn as_dry_run(report: ImportReport) -> DryRunReport {
        match report {
            ImportReport::DryRun(r) => r,
            other => panic!("expected dry run report, got {:?}", other),
        }
    }

    fn as_commit(report: ImportReport) -> CommitReport {
        match report {
            ImportReport::Commit(r) => r,
            other => panic!("expected commit report, got {:?}", other),
        }
    }

    const TAB_SOURCE: &str = "06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n\
        07/02/2020\t98\t\t3\tsiglatura\t€ 1,20\n\
        10/03/2021\t12\t\t1\torlo pantaloni\t€ 3,00\n";

    #[test]
    fn test_dry_run_never_writes() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", TAB_SOURCE);
        let mut store = MemoryStore::new();

        let report = ImportExecutor::default()
            .run(SourceFormat::TabDelimited, &path, &ImportOptions::default(), &mut store)
            .unwrap();

        let report = as_dry_run(report);
        assert!(report.dry_run);
        assert_eq!(report.stats.total_services, 3);
        assert_eq!(report.stats.services_by_year[&2020], 2);
        assert_eq!(report.stats.services_by_type["riparazione"], 1);
        assert_eq!(report.sample_services.len(), 3);
        assert_eq!(store.create_calls, 0);
        assert_eq!(store.query_calls.get(), 0);
    }

    #[test]
    fn test_tab_example_canonical_values() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", "06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n");
        let mut store = MemoryStore::new();

        let report = ImportExecutor::default()
            .run(SourceFormat::TabDelimited, &path, &ImportOptions::default(), &mut store)
            .unwrap();
        let report = as_dry_run(report);

        let record = &report.sample_services[0];
        assert_eq!(record.date().to_string(), "2020-02-06");
        assert_eq!(record.sigla(), "97");
        assert_eq!(record.pieces(), 1);
        assert_eq!(record.service_type(), ServiceType::Siglatura);
        assert!((record.amount() - 0.40).abs() < 1e-9);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", TAB_SOURCE);
        let mut store = MemoryStore::new();
        let executor = ImportExecutor::default();
        let options = ImportOptions::default().commit();

        let first = as_commit(
            executor
                .run(SourceFormat::TabDelimited, &path, &options, &mut store)
                .unwrap(),
        );
        assert_eq!((first.imported, first.skipped), (3, 0));

        let second = as_commit(
            executor
                .run(SourceFormat::TabDelimited, &path, &options, &mut store)
                .unwrap(),
        );
        assert_eq!((second.imported, second.skipped), (0, 3));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_import_all_policy_writes_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", TAB_SOURCE);
        let mut store = MemoryStore::new();
        let executor = ImportExecutor::default();
        let mut options = ImportOptions::default().commit();
        options.policy = DuplicatePolicy::ImportAll;

        executor.run(SourceFormat::TabDelimited, &path, &options, &mut store).unwrap();
        let again = as_commit(
            executor
                .run(SourceFormat::TabDelimited, &path, &options, &mut store)
                .unwrap(),
        );
        assert_eq!(again.imported, 3);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn test_malformed_lines_are_reported_and_skipped() {
        let mut content = String::new();
        for day in 1..=8 {
            content.push_str(&format!("{:02}/05/2019\t{}\t\t1\tsiglatura\t€ 0,40\n", day, 100 + day));
        }
        content.push_str("31/02/2019\t200\t\t1\tsiglatura\t€ 0,40\n");
        content.push_str("not a record\n");

        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", &content);
        let report = as_dry_run(
            ImportExecutor::default()
                .run(SourceFormat::TabDelimited, &path, &ImportOptions::default(), &mut MemoryStore::new())
                .unwrap(),
        );

        assert_eq!(report.stats.total_services, 8);
        assert_eq!(report.total_errors, 2);
        assert!(report.errors[0].starts_with("Line 9:"));
        assert!(report.errors[1].starts_with("Line 10:"));
    }

    #[test]
    fn test_test_records_excluded_everywhere() {
        let content = "06/02/2020\t97\t\t1\tsiglatura\t€ 0,40\n\
            06/02/2020\t0\t\t1\tsiglatura\t€ 0,40\n\
            06/02/2020\tTEST\t\t1\tsiglatura\t€ 0,40\n\
            06/02/2020\tprova3\t\t1\tbanana\t€ 0,40\n";
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", content);
        let mut store = MemoryStore::new();

        let report = as_commit(
            ImportExecutor::default()
                .run(SourceFormat::TabDelimited, &path, &ImportOptions::default().commit(), &mut store)
                .unwrap(),
        );

        assert_eq!(report.stats.total_services, 1);
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total_errors, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_malformed_test_line_is_not_an_error() {
        let content = "06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n\
            31/02/2020\tTEST\t\t1\tSiglatura\t€ 0,40\n\
            06/02/2020\tprova\tbroken\n";
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", content);
        let mut store = MemoryStore::new();

        let report = as_commit(
            ImportExecutor::default()
                .run(SourceFormat::TabDelimited, &path, &ImportOptions::default().commit(), &mut store)
                .unwrap(),
        );

        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total_errors, 0);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_prepare_twice_gives_same_records() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", TAB_SOURCE);
        let executor = ImportExecutor::default();

        let key = |batch: PreparedBatch| -> Vec<_> {
            batch
                .records
                .into_iter()
                .map(|n| {
                    let r = n.record;
                    (
                        r.date(),
                        r.sigla().to_string(),
                        r.pieces(),
                        r.service_type(),
                        r.amount(),
                        r.notes().map(str::to_string),
                    )
                })
                .collect()
        };

        let first = executor.prepare(SourceFormat::TabDelimited, &path).unwrap();
        let second = executor.prepare(SourceFormat::TabDelimited, &path).unwrap();
        assert_ne!(first.records[0].record.id(), second.records[0].record.id());

        let (first, second) = (key(first), key(second));
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_errors_follow_file_order() {
        // Line 2 fails type mapping, line 3 fails parsing
        let content = "06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n\
            07/02/2020\t98\t\t1\tlavaggio\t€ 1,00\n\
            32/02/2020\t99\t\t1\tSiglatura\t€ 0,40\n";
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", content);

        let batch = ImportExecutor::default()
            .prepare(SourceFormat::TabDelimited, &path)
            .unwrap();

        let lines: Vec<usize> = batch.errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert!(batch.errors[0].message.contains("lavaggio"));
    }

    #[test]
    fn test_storage_failures_do_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", TAB_SOURCE);
        let mut store = MemoryStore::new().fail_writes_for("98");

        let report = as_commit(
            ImportExecutor::default()
                .run(SourceFormat::TabDelimited, &path, &ImportOptions::default().commit(), &mut store)
                .unwrap(),
        );

        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.total_errors, 1);
        assert!(report.errors[0].starts_with("Line 2: storage error:"));
        assert!(report.success);
    }

    #[test]
    fn test_errors_truncated_but_counted() {
        let content: String = (1..=15).map(|i| format!("bad line {}\n", i)).collect();
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "storico.tsv", &content);

        let report = as_dry_run(
            ImportExecutor::default()
                .run(SourceFormat::TabDelimited, &path, &ImportOptions::default(), &mut MemoryStore::new())
                .unwrap(),
        );

        assert_eq!(report.errors.len(), 10);
        assert_eq!(report.total_errors, 15);
        assert_eq!(report.stats.total_services, 0);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.tsv");
        let mut store = MemoryStore::new();

        let err = ImportExecutor::default()
            .run(SourceFormat::TabDelimited, &path, &ImportOptions::default().commit(), &mut store)
            .unwrap_err();

        assert!(matches!(err, ImportError::SourceNotFound(_)));
        assert_eq!(store.create_calls, 0);
    }

    #[test]
    fn test_rows_document_not_array_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, "estratti.json", "{\"date\": \"22/04/2021\"}");

        let err = ImportExecutor::default()
            .run(SourceFormat::StructuredRow, &path, &ImportOptions::default(), &mut MemoryStore::new())
            .unwrap_err();

        match err {
            ImportError::SourceUnreadable { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rows_repair_example() {
        let dir = TempDir::new().unwrap();
        let path = write_source(
            &dir,
            "estratti.json",
            r#"[{"date": "22/04/2021", "sigla": "198", "pieces": 1, "type": "bottone", "amount": "€ 0,40"}]"#,
        );
        let mut store = MemoryStore::new();

        let report = as_commit(
            ImportExecutor::default()
                .run(SourceFormat::StructuredRow, &path, &ImportOptions::default().commit(), &mut store)
                .unwrap(),
        );
        assert_eq!(report.imported, 1);

        let stored = store.get_services(&ServiceFilter::all()).unwrap();
        assert_eq!(stored[0].service_type(), ServiceType::Riparazione);
        assert_eq!(stored[0].notes(), Some("bottone"));
        assert!((stored[0].amount() - 0.40).abs() < 1e-9);
        assert!(stored[0].is_archived());
    }

    #[test]
    fn test_options_from_json_default_to_dry_run() {
        let options: ImportOptions = serde_json::from_str("{}").unwrap();
        assert!(options.dry_run);

        let options: ImportOptions = serde_json::from_str(r#"{"dryRun": false}"#).unwrap();
        assert!(!options.dry_run);
        assert_eq!(options.tolerance, DEFAULT_TOLERANCE);
    }
}
