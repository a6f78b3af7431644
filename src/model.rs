// 🧾 Canonical service record
// The single normalized shape every legacy format converges to before storage

use crate::error::{ImportError, ImportResult};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SERVICE TYPE (closed set)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Siglatura,
    HappyHour,
    Riparazione,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::Siglatura,
        ServiceType::HappyHour,
        ServiceType::Riparazione,
    ];

    /// Canonical storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Siglatura => "siglatura",
            ServiceType::HappyHour => "happy_hour",
            ServiceType::Riparazione => "riparazione",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ImportError::TypeMapping(s.to_string()))
    }
}

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    /// Every historical import is recorded as paid
    Paid,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Paid => "paid",
        }
    }

    pub fn from_db(s: &str) -> Self {
        if s == "pending" {
            ServiceStatus::Pending
        } else {
            ServiceStatus::Paid
        }
    }
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// A normalized service record.
///
/// Built once per surviving source line through [`CanonicalRecord::historical`],
/// which enforces `pieces >= 1`, `amount >= 0` and a non-empty sigla. There are
/// no mutators: a record is either persisted once or only shown in a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    id: String,
    date: NaiveDate,
    sigla: String,
    pieces: u32,
    #[serde(rename = "type")]
    service_type: ServiceType,
    amount: f64,
    status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
    archived_year: i32,
    /// Set for historical imports; `None` for rows entered through the live app
    archived_at: Option<DateTime<Utc>>,
}

impl CanonicalRecord {
    /// Build a record for a historical import run
    pub fn historical(
        date: NaiveDate,
        sigla: &str,
        pieces: u32,
        service_type: ServiceType,
        amount: f64,
        notes: Option<String>,
        archived_at: DateTime<Utc>,
    ) -> ImportResult<Self> {
        let sigla = sigla.trim();
        if sigla.is_empty() {
            return Err(ImportError::Validation("sigla is empty".to_string()));
        }
        if pieces < 1 {
            return Err(ImportError::Validation(format!(
                "pieces must be at least 1, got {}",
                pieces
            )));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(ImportError::Validation(format!(
                "amount must be a non-negative number, got {}",
                amount
            )));
        }

        Ok(CanonicalRecord {
            id: uuid::Uuid::new_v4().to_string(),
            date,
            sigla: sigla.to_string(),
            pieces,
            service_type,
            amount,
            status: ServiceStatus::Paid,
            notes: notes.filter(|n| !n.trim().is_empty()),
            archived_year: date.year(),
            archived_at: Some(archived_at),
        })
    }

    /// Rebuild a record read back from storage (already validated on the way in)
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_stored(
        id: String,
        date: NaiveDate,
        sigla: String,
        pieces: u32,
        service_type: ServiceType,
        amount: f64,
        status: ServiceStatus,
        notes: Option<String>,
        archived_at: Option<DateTime<Utc>>,
    ) -> Self {
        CanonicalRecord {
            id,
            date,
            sigla,
            pieces,
            service_type,
            amount,
            status,
            notes,
            archived_year: date.year(),
            archived_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn sigla(&self) -> &str {
        &self.sigla
    }

    pub fn pieces(&self) -> u32 {
        self.pieces
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn archived_year(&self) -> i32 {
        self.archived_year
    }

    pub fn archived_at(&self) -> Option<DateTime<Utc>> {
        self.archived_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Hash of the exact-match part of the duplicate key (date, sigla, type, pieces).
    /// Amount is compared with a tolerance, so it is not part of the hash.
    pub fn natural_key(&self) -> String {
        natural_key(self.date, &self.sigla, self.service_type, self.pieces)
    }
}

pub fn natural_key(date: NaiveDate, sigla: &str, service_type: ServiceType, pieces: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}",
        date.format("%Y-%m-%d"),
        sigla,
        service_type.as_str(),
        pieces
    ));
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_service_type_round_trip_names() {
        assert_eq!("siglatura".parse::<ServiceType>().unwrap(), ServiceType::Siglatura);
        assert_eq!("HAPPY_HOUR".parse::<ServiceType>().unwrap(), ServiceType::HappyHour);
        assert!("orlo".parse::<ServiceType>().is_err());
        assert_eq!(ServiceType::Riparazione.to_string(), "riparazione");
    }

    #[test]
    fn test_historical_record_is_paid_and_archived_by_year() {
        let now = Utc::now();
        let rec = CanonicalRecord::historical(
            day(2020, 2, 6),
            " 97 ",
            1,
            ServiceType::Siglatura,
            0.40,
            None,
            now,
        )
        .unwrap();

        assert_eq!(rec.sigla(), "97");
        assert_eq!(rec.status(), ServiceStatus::Paid);
        assert_eq!(rec.archived_year(), 2020);
        assert_eq!(rec.archived_at(), Some(now));
        assert!(rec.is_archived());
        assert!(!rec.id().is_empty());
    }

    #[test]
    fn test_invariants_rejected() {
        let now = Utc::now();
        let d = day(2021, 4, 22);
        assert!(CanonicalRecord::historical(d, "", 1, ServiceType::Siglatura, 1.0, None, now).is_err());
        assert!(CanonicalRecord::historical(d, "12", 0, ServiceType::Siglatura, 1.0, None, now).is_err());
        assert!(CanonicalRecord::historical(d, "12", 1, ServiceType::Siglatura, -0.5, None, now).is_err());
        assert!(CanonicalRecord::historical(d, "12", 1, ServiceType::Siglatura, f64::NAN, None, now).is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let rec = CanonicalRecord::historical(
            day(2021, 4, 22),
            "198",
            1,
            ServiceType::Riparazione,
            0.4,
            Some("bottone".into()),
            Utc::now(),
        )
        .unwrap();

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["date"], "2021-04-22");
        assert_eq!(json["type"], "riparazione");
        assert_eq!(json["status"], "paid");
        assert_eq!(json["notes"], "bottone");
        assert_eq!(json["archivedYear"], 2021);
    }

    #[test]
    fn test_natural_key_ignores_amount_and_case_matters() {
        let now = Utc::now();
        let d = day(2022, 1, 10);
        let a = CanonicalRecord::historical(d, "AB", 2, ServiceType::Siglatura, 1.0, None, now).unwrap();
        let b = CanonicalRecord::historical(d, "AB", 2, ServiceType::Siglatura, 9.0, None, now).unwrap();
        let c = CanonicalRecord::historical(d, "ab", 2, ServiceType::Siglatura, 1.0, None, now).unwrap();

        assert_eq!(a.natural_key(), b.natural_key());
        assert_ne!(a.natural_key(), c.natural_key());
        assert_eq!(a.natural_key().len(), 64);
    }
}
