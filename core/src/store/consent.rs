use super::{ConsentStore, DecisionStore};
use crate::{
    error::{PipelineError, PipelineResult},
    model::ConsentStatus,
};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

impl DecisionStore {
    /// Record a consent decision. Used by fixtures and the runner; the
    /// pipeline itself only reads consent.
    pub fn set_consent(&self, user_id: &str, status: ConsentStatus) -> PipelineResult<()> {
        self.conn.lock().execute(
            "INSERT INTO consent (user_id, status, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET status = excluded.status,
                                                updated_at = excluded.updated_at",
            params![user_id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl ConsentStore for DecisionStore {
    fn get_consent(&self, user_id: &str) -> PipelineResult<Option<ConsentStatus>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT status FROM consent WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(s) => ConsentStatus::parse(&s).map(Some).ok_or_else(|| {
                PipelineError::Other(anyhow::anyhow!(
                    "unrecognised consent status '{s}' for user {user_id}"
                ))
            }),
        }
    }
}
