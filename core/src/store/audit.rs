use super::{format_date, AuditSink, DecisionStore};
use crate::{
    error::PipelineResult,
    guardrail::GuardrailViolation,
    persona::PersonaAssignment,
};
use chrono::Utc;
use rusqlite::params;

/// A persona audit row as read back for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentAuditRow {
    pub request_id:            String,
    pub user_id:               String,
    pub window_days:           u32,
    pub assigned_persona_id:   String,
    pub prioritization_reason: String,
    pub evidence_json:         String,
}

impl AuditSink for DecisionStore {
    fn record_assignment(
        &self,
        request_id: &str,
        assignment: &PersonaAssignment,
    ) -> PipelineResult<()> {
        let qualifying = serde_json::to_string(&assignment.all_qualifying_persona_ids)?;
        let evidence = serde_json::to_string(&assignment.match_evidence)?;
        self.conn.lock().execute(
            "INSERT INTO persona_assignment_audit (
                request_id, user_id, window_days, reference_date,
                assigned_persona_id, prioritization_reason,
                qualifying_json, evidence_json, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request_id,
                assignment.user_id,
                assignment.window.window_days as i64,
                format_date(assignment.window.reference_date),
                assignment.assigned_persona_id,
                assignment.prioritization_reason.as_str(),
                qualifying,
                evidence,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn record_violations(
        &self,
        request_id: &str,
        user_id: &str,
        violations: &[GuardrailViolation],
    ) -> PipelineResult<()> {
        if violations.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let recorded_at = Utc::now().to_rfc3339();
        for v in violations {
            tx.execute(
                "INSERT INTO guardrail_violation (
                    request_id, user_id, stage, item_id, rule, detail, action, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    request_id,
                    user_id,
                    v.stage.as_str(),
                    v.item_id,
                    v.rule,
                    v.detail,
                    v.action.as_str(),
                    recorded_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl DecisionStore {
    pub fn assignment_audit_for_user(&self, user_id: &str) -> PipelineResult<Vec<AssignmentAuditRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT request_id, user_id, window_days, assigned_persona_id,
                    prioritization_reason, evidence_json
             FROM persona_assignment_audit
             WHERE user_id = ?1
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(AssignmentAuditRow {
                    request_id:            row.get(0)?,
                    user_id:               row.get(1)?,
                    window_days:           row.get::<_, i64>(2)? as u32,
                    assigned_persona_id:   row.get(3)?,
                    prioritization_reason: row.get(4)?,
                    evidence_json:         row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn violation_count(&self, user_id: &str) -> PipelineResult<i64> {
        let count = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM guardrail_violation WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
