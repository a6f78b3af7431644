// 🏗️ Parser Framework
// One parser per legacy export format, all producing RawRecord + line errors

use crate::error::{ImportError, ImportResult, LineError};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// SourceFormat - which legacy export a file comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// `DD/MM/YYYY \t sigla \t \t pieces \t type \t € amount`
    TabDelimited,
    /// `id YYYY-MM-DD HH:MM:SS.mmm sigla pieces type amount status [notes...]`
    SpaceDelimited,
    /// JSON array of row objects extracted from PDF statements
    StructuredRow,
}

impl SourceFormat {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceFormat::TabDelimited => "Tab-delimited export",
            SourceFormat::SpaceDelimited => "Database dump",
            SourceFormat::StructuredRow => "PDF rows",
        }
    }

    /// Short code used in routes and on the command line
    pub fn code(&self) -> &'static str {
        match self {
            SourceFormat::TabDelimited => "tab",
            SourceFormat::SpaceDelimited => "space",
            SourceFormat::StructuredRow => "rows",
        }
    }

    pub fn from_name(name: &str) -> Option<SourceFormat> {
        match name.trim().to_lowercase().as_str() {
            "tab" | "tsv" | "tab_delimited" | "tab-delimited" => Some(SourceFormat::TabDelimited),
            "space" | "dump" | "space_delimited" | "space-delimited" => {
                Some(SourceFormat::SpaceDelimited)
            }
            "rows" | "pdf" | "json" | "structured_row" | "structured-row" => {
                Some(SourceFormat::StructuredRow)
            }
            _ => None,
        }
    }

    /// Label used in error strings ("Line 4: ...", "Row 4: ...")
    pub fn unit(&self) -> &'static str {
        match self {
            SourceFormat::StructuredRow => "Row",
            _ => "Line",
        }
    }
}

/// RawRecord - one source line before normalization.
/// Text fields are kept as they appear in the source; only the date has been
/// checked, because its layout is format-specific.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub line: usize,
    pub date: NaiveDate,
    pub sigla: String,
    pub pieces: String,
    pub type_text: String,
    pub amount: String,
    pub notes: Option<String>,
    pub format: SourceFormat,
    pub raw_line: String,
}

impl RawRecord {
    pub fn new(
        line: usize,
        date: NaiveDate,
        sigla: &str,
        pieces: &str,
        type_text: &str,
        amount: &str,
        format: SourceFormat,
        raw_line: String,
    ) -> Self {
        RawRecord {
            line,
            date,
            sigla: sigla.trim().to_string(),
            pieces: pieces.trim().to_string(),
            type_text: type_text.trim().to_string(),
            amount: amount.trim().to_string(),
            notes: None,
            format,
            raw_line,
        }
    }

    /// Builder pattern: add trailing free-text notes
    pub fn with_notes(mut self, notes: &str) -> Self {
        let notes = notes.trim();
        if !notes.is_empty() {
            self.notes = Some(notes.to_string());
        }
        self
    }
}

/// Output of `RecordParser::parse`: surviving records plus one error string per bad line
#[derive(Debug, Default, Clone)]
pub struct ParseOutput {
    pub records: Vec<RawRecord>,
    pub errors: Vec<LineError>,
    /// Lines dropped as test data, well-formed or not
    pub test_records: usize,
}

impl ParseOutput {
    fn reject(&mut self, format: SourceFormat, err: ImportError) {
        let line = match &err {
            ImportError::LineParse { line, .. } => *line,
            _ => 0,
        };
        self.errors.push(LineError::new(format.unit(), line, err));
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// RecordParser - shared interface for every export format.
///
/// Parsing is fail-soft: a malformed line lands in `ParseOutput::errors` and
/// the next line is processed. `Err` is reserved for documents whose overall
/// shape is wrong (e.g. a rows file that is not a JSON array).
///
/// The sigla is checked against the test filter before anything else on the
/// line, so test data never shows up as an error either.
pub trait RecordParser: Send + Sync {
    fn parse_with(&self, content: &str, filter: &TestRecordFilter) -> ImportResult<ParseOutput>;

    /// Parse with the default test filter
    fn parse(&self, content: &str) -> ImportResult<ParseOutput> {
        self.parse_with(content, &TestRecordFilter::default())
    }

    fn format(&self) -> SourceFormat;
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Guess the format from a file name
pub fn detect_format(file_path: &Path) -> ImportResult<SourceFormat> {
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if filename.ends_with(".json") {
        return Ok(SourceFormat::StructuredRow);
    }
    if filename.ends_with(".tsv") || filename.contains("tab") {
        return Ok(SourceFormat::TabDelimited);
    }
    if filename.contains("dump") || filename.ends_with(".sql") || filename.ends_with(".dat") {
        return Ok(SourceFormat::SpaceDelimited);
    }

    Err(ImportError::Config(format!(
        "could not detect source format from filename: {}",
        filename
    )))
}

pub fn get_parser(format: SourceFormat) -> Box<dyn RecordParser> {
    match format {
        SourceFormat::TabDelimited => Box::new(TabDelimitedParser::new()),
        SourceFormat::SpaceDelimited => Box::new(SpaceDelimitedParser::new()),
        SourceFormat::StructuredRow => Box::new(StructuredRowParser::new()),
    }
}

/// Read a source file. The only fatal step of a job: nothing is parsed if this fails.
pub fn read_source(file_path: &Path) -> ImportResult<String> {
    fs::read_to_string(file_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ImportError::SourceNotFound(file_path.to_path_buf()),
        _ => ImportError::SourceUnreadable {
            path: file_path.to_path_buf(),
            reason: e.to_string(),
        },
    })
}

/// DD/MM/YYYY, rejecting day/month overflow
fn parse_day_first(line: usize, text: &str) -> ImportResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%d/%m/%Y").map_err(|_| {
        ImportError::line(line, format!("invalid date '{}' (expected DD/MM/YYYY)", text.trim()))
    })
}

// ============================================================================
// TEST RECORD FILTER
// ============================================================================

/// Records entered while testing the old system. They are dropped before
/// normalization and never counted as imported, skipped or errored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecordFilter {
    /// Exact sigla values (case-insensitive)
    pub sentinels: Vec<String>,
    /// Substrings that mark a sigla as test data (case-insensitive)
    pub markers: Vec<String>,
}

impl Default for TestRecordFilter {
    fn default() -> Self {
        TestRecordFilter {
            sentinels: vec!["0".into(), "000".into(), "TEST".into()],
            markers: vec!["test".into(), "prova".into()],
        }
    }
}

impl TestRecordFilter {
    pub fn is_test_record(&self, sigla: &str) -> bool {
        let sigla = sigla.trim().to_lowercase();
        self.sentinels.iter().any(|s| s.to_lowercase() == sigla)
            || self
                .markers
                .iter()
                .any(|m| !m.is_empty() && sigla.contains(&m.to_lowercase()))
    }
}

// ============================================================================
// TAB-DELIMITED PARSER
// ============================================================================

pub struct TabDelimitedParser;

impl TabDelimitedParser {
    pub fn new() -> Self {
        TabDelimitedParser
    }

    fn parse_fields(&self, line: usize, fields: &[&str], raw_line: String) -> ImportResult<RawRecord> {
        if fields.len() < 5 {
            return Err(ImportError::line(
                line,
                format!("expected at least 5 tab-separated columns, found {}", fields.len()),
            ));
        }

        // Exports sometimes drop the empty third column
        let (pieces, type_text, amount) = if fields.len() == 5 {
            (fields[2], fields[3], fields[4])
        } else {
            (fields[3], fields[4], fields[5])
        };

        let date = parse_day_first(line, fields[0])?;

        Ok(RawRecord::new(
            line,
            date,
            fields[1],
            pieces,
            type_text,
            amount,
            SourceFormat::TabDelimited,
            raw_line,
        ))
    }
}

impl Default for TabDelimitedParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split one line on tabs. Quotes carry no meaning in these exports.
fn tab_fields(text: &str) -> ImportResult<Vec<String>> {
    use csv::ReaderBuilder;

    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(text.as_bytes());

    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(|f| f.trim().to_string()).collect()),
        Some(Err(e)) => Err(ImportError::line(0, e.to_string())),
        None => Ok(Vec::new()),
    }
}

impl RecordParser for TabDelimitedParser {
    fn parse_with(&self, content: &str, filter: &TestRecordFilter) -> ImportResult<ParseOutput> {
        let mut output = ParseOutput::default();

        for (idx, text) in content.lines().enumerate() {
            let line = idx + 1;
            if text.trim().is_empty() {
                continue;
            }

            let fields = match tab_fields(text) {
                Ok(f) => f,
                Err(e) => {
                    output.reject(self.format(), ImportError::line(line, e.to_string()));
                    continue;
                }
            };
            // Header row of spreadsheet exports
            if line == 1 && matches!(fields[0].to_lowercase().as_str(), "data" | "date") {
                continue;
            }
            if fields.get(1).is_some_and(|sigla| filter.is_test_record(sigla)) {
                output.test_records += 1;
                continue;
            }

            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            match self.parse_fields(line, &fields, text.to_string()) {
                Ok(r) => output.records.push(r),
                Err(e) => output.reject(self.format(), e),
            }
        }

        Ok(output)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::TabDelimited
    }
}

// ============================================================================
// SPACE-DELIMITED (DATABASE DUMP) PARSER
// ============================================================================

pub struct SpaceDelimitedParser;

impl SpaceDelimitedParser {
    pub fn new() -> Self {
        SpaceDelimitedParser
    }

    fn parse_line(&self, line: usize, text: &str) -> ImportResult<RawRecord> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < 8 {
            return Err(ImportError::line(
                line,
                format!("expected at least 8 space-separated fields, found {}", tokens.len()),
            ));
        }

        // Date and time were split apart by the whitespace tokenizer
        let stamp = format!("{} {}", tokens[1], tokens[2]);
        let date = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S"))
            .map(|dt| dt.date())
            .map_err(|_| {
                ImportError::line(
                    line,
                    format!("invalid timestamp '{}' (expected YYYY-MM-DD HH:MM:SS.mmm)", stamp),
                )
            })?;

        let record = RawRecord::new(
            line,
            date,
            tokens[3],
            tokens[4],
            tokens[5],
            tokens[6],
            SourceFormat::SpaceDelimited,
            text.to_string(),
        );

        // tokens[7] is the old payment status; historical rows are all imported as paid
        Ok(record.with_notes(&tokens[8..].join(" ")))
    }
}

impl Default for SpaceDelimitedParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordParser for SpaceDelimitedParser {
    fn parse_with(&self, content: &str, filter: &TestRecordFilter) -> ImportResult<ParseOutput> {
        let mut output = ParseOutput::default();

        for (idx, text) in content.lines().enumerate() {
            let line = idx + 1;
            if text.trim().is_empty() {
                continue;
            }
            if line == 1 && text.split_whitespace().next().is_some_and(|t| t.eq_ignore_ascii_case("id")) {
                continue;
            }
            if text.split_whitespace().nth(3).is_some_and(|sigla| filter.is_test_record(sigla)) {
                output.test_records += 1;
                continue;
            }

            match self.parse_line(line, text) {
                Ok(r) => output.records.push(r),
                Err(e) => output.reject(self.format(), e),
            }
        }

        Ok(output)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::SpaceDelimited
    }
}

// ============================================================================
// STRUCTURED ROW PARSER
// ============================================================================

/// A JSON scalar that legacy extractors emitted either as text or as a number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StructuredRow {
    date: String,
    sigla: Scalar,
    pieces: Scalar,
    #[serde(rename = "type")]
    type_text: String,
    amount: Scalar,
    #[serde(default)]
    notes: Option<String>,
}

pub struct StructuredRowParser;

/// Sigla of a row that may not deserialize as a whole
fn row_sigla(value: &serde_json::Value) -> Option<String> {
    match value.get("sigla")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl StructuredRowParser {
    pub fn new() -> Self {
        StructuredRowParser
    }

    fn parse_row(&self, line: usize, value: serde_json::Value) -> ImportResult<RawRecord> {
        let raw_line = value.to_string();
        let row: StructuredRow = serde_json::from_value(value)
            .map_err(|e| ImportError::line(line, format!("malformed row: {}", e)))?;

        let date = parse_day_first(line, &row.date)?;

        let record = RawRecord::new(
            line,
            date,
            &row.sigla.into_text(),
            &row.pieces.into_text(),
            &row.type_text,
            &row.amount.into_text(),
            SourceFormat::StructuredRow,
            raw_line,
        );

        Ok(match row.notes {
            Some(n) => record.with_notes(&n),
            None => record,
        })
    }
}

impl Default for StructuredRowParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordParser for StructuredRowParser {
    fn parse_with(&self, content: &str, filter: &TestRecordFilter) -> ImportResult<ParseOutput> {
        let rows: Vec<serde_json::Value> =
            serde_json::from_str(content).map_err(|e| ImportError::SourceUnreadable {
                path: "<rows>".into(),
                reason: format!("expected a JSON array of rows: {}", e),
            })?;

        let mut output = ParseOutput::default();
        for (idx, value) in rows.into_iter().enumerate() {
            if row_sigla(&value).is_some_and(|sigla| filter.is_test_record(&sigla)) {
                output.test_records += 1;
                continue;
            }
            match self.parse_row(idx + 1, value) {
                Ok(r) => output.records.push(r),
                Err(e) => output.reject(self.format(), e),
            }
        }

        Ok(output)
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::StructuredRow
    }
}

// ============================================================================
// TESTS
// ============================================================================
