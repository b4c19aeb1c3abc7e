//! Collaborator boundary: user data, consent, audit.
//!
//! The pipeline only ever talks to the traits below. `DecisionStore` is
//! the SQLite-backed implementation; `memory` holds the in-process ones
//! used by tests and by callers that already have the data in hand.
//!
//! RULE: Only this module talks to the database.

mod audit;
mod consent;
pub mod memory;
mod user_data;

pub use audit::AssignmentAuditRow;
pub use memory::{MemoryAuditSink, MemoryUserData, StaticConsent};

use crate::{
    error::{PipelineError, PipelineResult},
    guardrail::GuardrailViolation,
    model::{ConsentStatus, UserData},
    persona::PersonaAssignment,
};
use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::Connection;

/// Source of transactions, accounts, and profile data.
pub trait UserDataSource: Send + Sync {
    fn load_user(&self, user_id: &str) -> PipelineResult<UserData>;
}

/// Read side of the consent service. `None` = never recorded.
pub trait ConsentStore: Send + Sync {
    fn get_consent(&self, user_id: &str) -> PipelineResult<Option<ConsentStatus>>;
}

/// Write sink for persona evidence and guardrail violations.
pub trait AuditSink: Send + Sync {
    fn record_assignment(
        &self,
        request_id: &str,
        assignment: &PersonaAssignment,
    ) -> PipelineResult<()>;

    fn record_violations(
        &self,
        request_id: &str,
        user_id: &str,
        violations: &[GuardrailViolation],
    ) -> PipelineResult<()>;
}

pub struct DecisionStore {
    conn: Mutex<Connection>,
}

impl DecisionStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; in-memory ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .lock()
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }
}

pub(crate) fn parse_date(raw: &str) -> PipelineResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        PipelineError::Other(anyhow::anyhow!("invalid date '{raw}' in store: {e}"))
    })
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
