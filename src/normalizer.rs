// 🏷️ Type & Amount Normalizer
// Collapses free-text service descriptions into the closed ServiceType set
// and turns currency text into a per-piece amount.

use crate::error::{ImportError, ImportResult, LineError};
use crate::model::{CanonicalRecord, ServiceType};
use crate::parser::{RawRecord, SourceFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// MAPPING TABLE (configuration data)
// ============================================================================

/// Lookup data for `Normalizer::map_type`. Loaded once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeMappingTable {
    /// Spellings that mean a canonical type with nothing lost (lowercase)
    pub aliases: BTreeMap<String, ServiceType>,

    /// Substrings that identify a repair; the description is kept as notes
    pub repair_keywords: Vec<String>,

    /// Substrings of the "siglatura" family, including the common typo
    pub siglatura_spellings: Vec<String>,

    /// Separators of compound descriptions ("orlo + siglatura")
    pub compound_separators: Vec<String>,

    /// Which type wins in a compound description (first = strongest)
    pub dominance: Vec<ServiceType>,
}

impl Default for TypeMappingTable {
    fn default() -> Self {
        let aliases = [
            ("happy hour", ServiceType::HappyHour),
            ("happy-hour", ServiceType::HappyHour),
            ("happyhour", ServiceType::HappyHour),
            ("hh", ServiceType::HappyHour),
            ("riparazioni", ServiceType::Riparazione),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        TypeMappingTable {
            aliases,
            repair_keywords: strings(&[
                "orlo", "orli", "bottone", "bottoni", "cerniera", "zip", "hem", "button",
                "zipper", "riparazion", "repair", "rammend",
            ]),
            siglatura_spellings: strings(&["siglatur", "sigaltur", "labeling", "labelling"]),
            compound_separators: strings(&["+", "&", "/", ",", " e ", " and "]),
            dominance: vec![
                ServiceType::Riparazione,
                ServiceType::Siglatura,
                ServiceType::HappyHour,
            ],
        }
    }
}

// ============================================================================
// AMOUNT BASIS (per format)
// ============================================================================

/// Whether a format's amount column is already per piece or a line total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountBasis {
    PerPiece,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmountBases {
    pub tab: AmountBasis,
    pub space: AmountBasis,
    pub rows: AmountBasis,
}

impl Default for AmountBases {
    fn default() -> Self {
        AmountBases {
            tab: AmountBasis::Total,
            space: AmountBasis::PerPiece,
            rows: AmountBasis::Total,
        }
    }
}

impl AmountBases {
    pub fn for_format(&self, format: SourceFormat) -> AmountBasis {
        match format {
            SourceFormat::TabDelimited => self.tab,
            SourceFormat::SpaceDelimited => self.space,
            SourceFormat::StructuredRow => self.rows,
        }
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Result of mapping one description
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMapping {
    pub service_type: ServiceType,
    /// Original text, when detail had to be dropped to fit the enum
    pub note: Option<String>,
}

/// A canonical record together with the source line it came from
#[derive(Debug, Clone)]
pub struct Normalized {
    pub line: usize,
    pub record: CanonicalRecord,
}

#[derive(Debug, Default)]
pub struct NormalizeOutput {
    pub records: Vec<Normalized>,
    pub errors: Vec<LineError>,
}

pub struct Normalizer {
    table: TypeMappingTable,
    bases: AmountBases,
}

impl Normalizer {
    /// Lookups run against lowercased input, so every table is lowercased here
    pub fn new(table: TypeMappingTable, bases: AmountBases) -> Self {
        let aliases = table
            .aliases
            .into_iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        Normalizer {
            table: TypeMappingTable {
                aliases,
                repair_keywords: lowercase_all(table.repair_keywords, true),
                siglatura_spellings: lowercase_all(table.siglatura_spellings, true),
                // " e " and " and " need their spaces
                compound_separators: lowercase_all(table.compound_separators, false),
                dominance: table.dominance,
            },
            bases,
        }
    }

    /// Map a free-text description to a canonical type.
    ///
    /// Precedence: exact name or alias, repair keyword, siglatura spelling,
    /// compound description (dominant part wins). Anything else is a
    /// `TypeMapping` error naming the text.
    pub fn map_type(&self, text: &str) -> ImportResult<TypeMapping> {
        let original = text.trim();
        let lower = original.to_lowercase();

        if lower.is_empty() {
            return Err(ImportError::TypeMapping(original.to_string()));
        }

        if let Some(service_type) = self.exact(&lower) {
            return Ok(TypeMapping {
                service_type,
                note: None,
            });
        }

        if let Some(service_type) = self.keyword(&lower) {
            return Ok(TypeMapping {
                service_type,
                note: Some(original.to_string()),
            });
        }

        if let Some(service_type) = self.compound(&lower) {
            return Ok(TypeMapping {
                service_type,
                note: Some(original.to_string()),
            });
        }

        Err(ImportError::TypeMapping(original.to_string()))
    }

    fn exact(&self, lower: &str) -> Option<ServiceType> {
        if let Ok(t) = lower.parse::<ServiceType>() {
            return Some(t);
        }
        self.table.aliases.get(lower).copied()
    }

    fn keyword(&self, lower: &str) -> Option<ServiceType> {
        if self.table.repair_keywords.iter().any(|k| lower.contains(k.as_str())) {
            return Some(ServiceType::Riparazione);
        }
        if self.table.siglatura_spellings.iter().any(|k| lower.contains(k.as_str())) {
            return Some(ServiceType::Siglatura);
        }
        None
    }

    fn compound(&self, lower: &str) -> Option<ServiceType> {
        let mut parts = vec![lower.to_string()];
        for sep in &self.table.compound_separators {
            parts = parts
                .iter()
                .flat_map(|p| p.split(sep.as_str()).map(str::to_string).collect::<Vec<_>>())
                .collect();
        }

        let parts: Vec<&str> = parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return None;
        }

        let found: Vec<ServiceType> = parts
            .iter()
            .filter_map(|p| self.exact(p).or_else(|| self.keyword(p)))
            .collect();

        self.table
            .dominance
            .iter()
            .copied()
            .find(|t| found.contains(t))
            .or_else(|| found.first().copied())
    }

    /// Parse currency text such as `€ 1.234,50`, `0.40` or `2,00 EUR`
    pub fn parse_amount(&self, text: &str) -> ImportResult<f64> {
        let mut cleaned: String = text
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '€')
            .collect();

        let upper = cleaned.to_uppercase();
        if let Some(stripped) = upper.strip_prefix("EUR").or_else(|| upper.strip_suffix("EUR")) {
            cleaned = stripped.to_string();
        }

        if cleaned.contains(',') {
            cleaned = cleaned.replace('.', "").replace(',', ".");
        }

        let value: f64 = cleaned.parse().map_err(|_| {
            ImportError::Validation(format!("amount '{}' is not a number", text.trim()))
        })?;

        if !value.is_finite() || value < 0.0 {
            return Err(ImportError::Validation(format!(
                "amount '{}' must be a non-negative number",
                text.trim()
            )));
        }

        Ok(value)
    }

    pub fn parse_pieces(&self, text: &str) -> ImportResult<u32> {
        match text.trim().parse::<i64>() {
            Ok(n) if n >= 1 && n <= u32::MAX as i64 => Ok(n as u32),
            Ok(n) => Err(ImportError::Validation(format!(
                "pieces must be at least 1, got {}",
                n
            ))),
            Err(_) => Err(ImportError::Validation(format!(
                "pieces '{}' is not a whole number",
                text.trim()
            ))),
        }
    }

    /// Turn one raw line into a canonical record
    pub fn normalize(&self, raw: &RawRecord, archived_at: DateTime<Utc>) -> ImportResult<CanonicalRecord> {
        let pieces = self.parse_pieces(&raw.pieces)?;
        let mapping = self.map_type(&raw.type_text)?;
        let amount = self.parse_amount(&raw.amount)?;

        let amount = match self.bases.for_format(raw.format) {
            AmountBasis::PerPiece => amount,
            // Stored to the cent; duplicate tolerance covers the rounding
            AmountBasis::Total => round_cents(amount / pieces as f64),
        };

        let notes = match (mapping.note, raw.notes.as_deref()) {
            (Some(m), Some(n)) => Some(format!("{} | {}", m, n)),
            (Some(m), None) => Some(m),
            (None, Some(n)) => Some(n.to_string()),
            (None, None) => None,
        };

        CanonicalRecord::historical(
            raw.date,
            &raw.sigla,
            pieces,
            mapping.service_type,
            amount,
            notes,
            archived_at,
        )
    }

    /// Normalize a batch. Records that fail are reported as `"Line N: ..."`
    /// and left out; the rest keep their file order.
    pub fn normalize_all(&self, records: &[RawRecord], archived_at: DateTime<Utc>) -> NormalizeOutput {
        let mut output = NormalizeOutput::default();

        for raw in records {
            match self.normalize(raw, archived_at) {
                Ok(record) => output.records.push(Normalized {
                    line: raw.line,
                    record,
                }),
                Err(e) => output
                    .errors
                    .push(LineError::new(raw.format.unit(), raw.line, e)),
            }
        }

        output
    }
}

fn lowercase_all(words: Vec<String>, trim: bool) -> Vec<String> {
    words
        .into_iter()
        .map(|w| if trim { w.trim().to_lowercase() } else { w.to_lowercase() })
        .filter(|w| !w.is_empty())
        .collect()
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::new(TypeMappingTable::default(), AmountBases::default())
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// TESTS
// ============================================================================
