//! In-process collaborators. No I/O.

use super::{AuditSink, ConsentStore, UserDataSource};
use crate::{
    error::{PipelineError, PipelineResult},
    guardrail::GuardrailViolation,
    model::{ConsentStatus, UserData},
    persona::PersonaAssignment,
};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Fixed consent answers keyed by user.
#[derive(Debug, Default)]
pub struct StaticConsent {
    statuses: RwLock<HashMap<String, ConsentStatus>>,
}

impl StaticConsent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, user_id: &str, status: ConsentStatus) -> Self {
        self.set(user_id, status);
        self
    }

    pub fn set(&self, user_id: &str, status: ConsentStatus) {
        self.statuses.write().insert(user_id.to_string(), status);
    }
}

impl ConsentStore for StaticConsent {
    fn get_consent(&self, user_id: &str) -> PipelineResult<Option<ConsentStatus>> {
        Ok(self.statuses.read().get(user_id).copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAssignment {
    pub request_id: String,
    pub assignment: PersonaAssignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedViolation {
    pub request_id: String,
    pub user_id:    String,
    pub violation:  GuardrailViolation,
}

/// Audit sink that keeps everything in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    assignments: RwLock<Vec<RecordedAssignment>>,
    violations:  RwLock<Vec<RecordedViolation>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignments(&self) -> Vec<RecordedAssignment> {
        self.assignments.read().clone()
    }

    pub fn violations(&self) -> Vec<RecordedViolation> {
        self.violations.read().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_assignment(
        &self,
        request_id: &str,
        assignment: &PersonaAssignment,
    ) -> PipelineResult<()> {
        self.assignments.write().push(RecordedAssignment {
            request_id: request_id.to_string(),
            assignment: assignment.clone(),
        });
        Ok(())
    }

    fn record_violations(
        &self,
        request_id: &str,
        user_id: &str,
        violations: &[GuardrailViolation],
    ) -> PipelineResult<()> {
        let mut out = self.violations.write();
        out.extend(violations.iter().map(|v| RecordedViolation {
            request_id: request_id.to_string(),
            user_id: user_id.to_string(),
            violation: v.clone(),
        }));
        Ok(())
    }
}

/// User data held in memory, keyed by user id.
#[derive(Debug, Default)]
pub struct MemoryUserData {
    users: RwLock<HashMap<String, UserData>>,
}

impl MemoryUserData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, data: UserData) {
        self.users.write().insert(data.user_id().to_string(), data);
    }
}

impl UserDataSource for MemoryUserData {
    fn load_user(&self, user_id: &str) -> PipelineResult<UserData> {
        self.users
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| PipelineError::UserNotFound { user_id: user_id.to_string() })
    }
}
