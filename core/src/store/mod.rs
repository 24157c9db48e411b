//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine calls store methods; it never executes SQL directly.

use crate::{
    error::{FeeError, FeeResult},
    event::{EventLogEntry, FeeEvent},
    types::{PaymentItemId, UserId},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::str::FromStr;

mod fee_record;
mod payment_item;
mod plan;

pub struct FeeStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl FeeStore {
    pub fn open(path: &str) -> FeeResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> FeeResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> FeeResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_fee_engine.sql"))?;
        Ok(())
    }

    /// Run `f` inside one transaction. Any error rolls back everything `f`
    /// wrote, so a fee is never persisted without its amount adjustment.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> FeeResult<T>) -> FeeResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &FeeEvent) -> FeeResult<()> {
        self.conn.execute(
            "INSERT INTO fee_event_log (user_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.user_id(),
                event.type_name(),
                serde_json::to_string(event)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_user(&self, user_id: UserId) -> FeeResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, event_type, payload, created_at
             FROM fee_event_log WHERE user_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![user_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    user_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// A stored payment item. Only the columns the fee engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentItemRow {
    pub item_id:     PaymentItemId,
    pub user_id:     UserId,
    /// Amount as persisted, i.e. after any fee.
    pub amount:      Decimal,
    pub description: Option<String>,
}

fn parse_decimal(column: &'static str, value: &str) -> FeeResult<Decimal> {
    Decimal::from_str(value).map_err(|_| FeeError::InvalidStoredValue {
        column,
        value: value.to_string(),
    })
}

fn parse_timestamp(column: &'static str, value: &str) -> FeeResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| FeeError::InvalidStoredValue {
            column,
            value: value.to_string(),
        })
}
