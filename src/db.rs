use crate::model::{CanonicalRecord, ServiceStatus, ServiceType};
use crate::storage::{ServiceFilter, ServiceStore};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Event for the audit trail: every imported record leaves one behind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases answer "memory")
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    // ==========================================================================
    // Services table
    // archived_at is NULL for rows entered through the live application
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_uuid TEXT UNIQUE NOT NULL,
            natural_key TEXT NOT NULL,
            date TEXT NOT NULL,
            sigla TEXT NOT NULL,
            pieces INTEGER NOT NULL CHECK (pieces >= 1),
            service_type TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            status TEXT NOT NULL,
            notes TEXT,
            archived_year INTEGER NOT NULL,
            archived_at TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_services_natural_key ON services(natural_key)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_services_date ON services(date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_services_sigla ON services(sigla)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific record
pub fn get_events_for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_id, data, actor
         FROM events
         WHERE entity_id = ?1
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(4)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_id: row.get(3)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

const SELECT_SERVICES: &str = "SELECT service_uuid, date, sigla, pieces, service_type, amount,
        status, notes, archived_at
     FROM services";

fn map_service(row: &Row<'_>) -> rusqlite::Result<CanonicalRecord> {
    let date_str: String = row.get(1)?;
    let type_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    let archived_str: Option<String> = row.get(8)?;

    let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let service_type: ServiceType = type_str
        .parse()
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let archived_at = archived_str
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(CanonicalRecord::from_stored(
        row.get(0)?,
        date,
        row.get(2)?,
        row.get(3)?,
        service_type,
        row.get(5)?,
        ServiceStatus::from_db(&status_str),
        row.get(7)?,
        archived_at,
    ))
}

fn insert_service(conn: &Connection, record: &CanonicalRecord) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO services (
            service_uuid, natural_key, date, sigla, pieces, service_type, amount,
            status, notes, archived_year, archived_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.id(),
            record.natural_key(),
            record.date().format("%Y-%m-%d").to_string(),
            record.sigla(),
            record.pieces(),
            record.service_type().as_str(),
            record.amount(),
            record.status().as_str(),
            record.notes(),
            record.archived_year(),
            record.archived_at().map(|dt| dt.to_rfc3339()),
        ],
    )
}

fn imported_event(record: &CanonicalRecord) -> Event {
    Event::new(
        "service_imported",
        record.id(),
        serde_json::json!({
            "sigla": record.sigla(),
            "type": record.service_type().as_str(),
            "amount": record.amount(),
        }),
        "historical_importer",
    )
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM services", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Duplicate check and insert in one transaction.
    /// Returns `false` (and writes nothing) when a record with the same key and
    /// an amount within `tolerance` already exists.
    pub fn create_if_absent(&mut self, record: &CanonicalRecord, tolerance: f64) -> Result<bool> {
        let tx = self.conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM services WHERE natural_key = ?1 AND ABS(amount - ?2) < ?3
             )",
            params![record.natural_key(), record.amount(), tolerance],
            |row| row.get(0),
        )?;

        if exists {
            tx.rollback()?;
            return Ok(false);
        }

        insert_service(&tx, record)?;
        insert_event(&tx, &imported_event(record))?;
        tx.commit()?;
        Ok(true)
    }
}

impl ServiceStore for SqliteStore {
    fn get_services(&self, filter: &ServiceFilter) -> Result<Vec<CanonicalRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(d) = filter.date_from {
            clauses.push("date >= ?");
            values.push(Value::Text(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = filter.date_to {
            clauses.push("date <= ?");
            values.push(Value::Text(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(s) = &filter.sigla {
            clauses.push("sigla = ?");
            values.push(Value::Text(s.clone()));
        }
        if let Some(t) = filter.service_type {
            clauses.push("service_type = ?");
            values.push(Value::Text(t.as_str().to_string()));
        }
        if let Some(p) = filter.pieces {
            clauses.push("pieces = ?");
            values.push(Value::Integer(p as i64));
        }
        if !filter.include_archived {
            clauses.push("archived_at IS NULL");
        }

        let mut sql = SELECT_SERVICES.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let services = stmt
            .query_map(params_from_iter(values), map_service)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read services")?;

        Ok(services)
    }

    fn create_service(&mut self, record: &CanonicalRecord) -> Result<CanonicalRecord> {
        // Row and audit event land together or not at all
        let tx = self.conn.transaction()?;

        insert_service(&tx, record)
            .with_context(|| format!("Failed to insert service {}", record.id()))?;
        insert_event(&tx, &imported_event(record))?;

        // Read back what was stored
        let stored = tx
            .query_row(
                &format!("{} WHERE service_uuid = ?1", SELECT_SERVICES),
                params![record.id()],
                map_service,
            )
            .map_err(|e| anyhow!("Inserted service {} not readable: {}", record.id(), e))?;

        tx.commit()?;
        Ok(stored)
    }
}
