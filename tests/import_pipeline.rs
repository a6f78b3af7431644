// End-to-end import runs against a file-backed SQLite store

use service_archive::{
    get_events_for_entity, ImportConfig, ImportExecutor, ImportOptions, ImportReport,
    ServiceFilter, ServiceStore, ServiceType, SourceFormat, SqliteStore,
};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    store: SqliteStore,
    executor: ImportExecutor,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("services.db")).unwrap();
        Fixture {
            dir,
            store,
            executor: ImportExecutor::from_config(&ImportConfig::default()),
        }
    }

    fn source(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn commit(&mut self, format: SourceFormat, path: &PathBuf) -> (usize, usize, usize) {
        let report = self
            .executor
            .run(format, path, &ImportOptions::default().commit(), &mut self.store)
            .unwrap();
        match report {
            ImportReport::Commit(r) => (r.imported, r.skipped, r.total_errors),
            other => panic!("expected commit report, got {:?}", other),
        }
    }
}

const TAB_EXPORT: &str = "Data\tSigla\t\tCapi\tTipo\tImporto\n\
06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n\
06/02/2020\t97\t\t3\tSiglatura\t€ 1,20\n\
\n\
14/11/2019\t45\t\t2\tHappy Hour\t€ 4,00\n\
14/11/2019\tTEST\t\t1\tSiglatura\t€ 0,40\n\
15/11/2019\t46\t1\tsiglatura + orlo\t€ 3,50\n";

const SPACE_DUMP: &str = "id date time sigla pieces type amount status notes\n\
1 2022-03-01 10:15:00.000 301 2 siglatura 0.40 paid\n\
2 2022-03-01 10:20:31.512 302 1 riparazione 3.00 pending orlo jeans\n\
3 2022-03-02 09:00:00 303 1 happy_hour 2.00 paid\n\
4 2022-13-02 09:00:00 304 1 siglatura 0.40 paid\n";

const ROWS_JSON: &str = r#"[
  {"date": "22/04/2021", "sigla": "198", "pieces": 1, "type": "bottone", "amount": "€ 0,40"},
  {"date": "23/04/2021", "sigla": 199, "pieces": "2", "type": "siglatura", "amount": 0.8},
  {"date": "24/04/2021", "sigla": "200", "pieces": 1, "type": "lavaggio", "amount": "1,00"},
  {"sigla": "201"}
]"#;

#[test]
fn tab_export_commits_once() {
    let mut fx = Fixture::new();
    let path = fx.source("storico.tsv", TAB_EXPORT);

    assert_eq!(fx.commit(SourceFormat::TabDelimited, &path), (4, 0, 0));
    assert_eq!(fx.commit(SourceFormat::TabDelimited, &path), (0, 4, 0));
    assert_eq!(fx.store.count().unwrap(), 4);

    let stored = fx.store.get_services(&ServiceFilter::all()).unwrap();
    assert!(stored.iter().all(|r| r.is_archived()));
    assert!(stored.iter().all(|r| r.sigla() != "TEST"));

    // Five-column line: total split across pieces, compound type resolved to repair
    let compound = stored.iter().find(|r| r.sigla() == "46").unwrap();
    assert_eq!(compound.service_type(), ServiceType::Riparazione);
    assert_eq!(compound.notes(), Some("siglatura + orlo"));

    let three_pieces = stored.iter().find(|r| r.sigla() == "97" && r.pieces() == 3).unwrap();
    assert!((three_pieces.amount() - 0.40).abs() < 1e-9);

    let events = get_events_for_entity(fx.store.connection(), compound.id()).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn space_dump_reports_bad_timestamp() {
    let mut fx = Fixture::new();
    let path = fx.source("servizi_dump.txt", SPACE_DUMP);

    let report = fx
        .executor
        .run(SourceFormat::SpaceDelimited, &path, &ImportOptions::default(), &mut fx.store)
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["dryRun"], true);
    assert_eq!(json["totalServices"], 3);
    assert_eq!(json["servicesByYear"]["2022"], 3);
    assert_eq!(json["errors"][0].as_str().unwrap().starts_with("Line 5:"), true);
    assert_eq!(fx.store.count().unwrap(), 0);

    assert_eq!(fx.commit(SourceFormat::SpaceDelimited, &path), (3, 0, 1));
    let repair = fx
        .store
        .get_services(&ServiceFilter {
            sigla: Some("302".into()),
            ..ServiceFilter::all()
        })
        .unwrap();
    assert_eq!(repair[0].notes(), Some("orlo jeans"));
}

#[test]
fn structured_rows_mix_good_and_bad() {
    let mut fx = Fixture::new();
    let path = fx.source("estratti_pdf.json", ROWS_JSON);

    let report = fx
        .executor
        .run(SourceFormat::StructuredRow, &path, &ImportOptions::default().commit(), &mut fx.store)
        .unwrap();

    assert_eq!(report.stats().total_services, 2);
    assert_eq!(report.total_errors(), 2);
    assert!(report.errors().iter().any(|e| e.starts_with("Row 3:") && e.contains("lavaggio")));
    assert!(report.errors().iter().any(|e| e.starts_with("Row 4:")));

    let stored = fx.store.get_services(&ServiceFilter::all()).unwrap();
    let button = stored.iter().find(|r| r.sigla() == "198").unwrap();
    assert_eq!(button.service_type(), ServiceType::Riparazione);
    assert_eq!(button.notes(), Some("bottone"));

    let numeric_sigla = stored.iter().find(|r| r.sigla() == "199").unwrap();
    assert_eq!(numeric_sigla.pieces(), 2);
    assert!((numeric_sigla.amount() - 0.40).abs() < 1e-9);
}

#[test]
fn live_rows_are_left_alone() {
    let mut fx = Fixture::new();
    let path = fx.source("storico.tsv", TAB_EXPORT);
    fx.commit(SourceFormat::TabDelimited, &path);

    // Default filter is what the live app sees
    assert!(fx.store.get_services(&ServiceFilter::default()).unwrap().is_empty());
}

#[test]
fn failed_audit_write_is_an_error_and_stores_nothing() {
    let mut fx = Fixture::new();
    fx.store.connection().execute("DROP TABLE events", []).unwrap();
    let path = fx.source("storico.tsv", "06/02/2020\t97\t\t1\tSiglatura\t€ 0,40\n");

    assert_eq!(fx.commit(SourceFormat::TabDelimited, &path), (0, 0, 1));
    assert_eq!(fx.store.count().unwrap(), 0);
}
