//! Persona matching and prioritization.
//!
//! Evaluation order (fixed, documented, tested):
//!   1. Every non-fallback persona's criteria tree is evaluated against
//!      the summary, in catalog declaration order.
//!   2. No qualifying persona → the catalog's single fallback persona,
//!      reason `no_match_fallback`.
//!   3. Otherwise the lowest `priority` wins. Equal priorities resolve to
//!      the persona declared first in the catalog.
//!
//! Evidence is recorded for EVERY qualifying persona, not just the winner.
//! It is the audit trail and is never summarised away.

use crate::{
    error::{PipelineError, PipelineResult},
    summary::{BehavioralSummary, SignalField},
    types::{PersonaId, UserId},
    window::TimeWindow,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Definitions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gte,
    Gt,
    Lte,
    Lt,
    Eq,
}

impl Operator {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gte => observed >= threshold,
            Self::Gt  => observed > threshold,
            Self::Lte => observed <= threshold,
            Self::Lt  => observed < threshold,
            Self::Eq  => (observed - threshold).abs() < 1e-9,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gte => "≥",
            Self::Gt  => ">",
            Self::Lte => "≤",
            Self::Lt  => "<",
            Self::Eq  => "=",
        }
    }
}

/// A single threshold test over one summary field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: SignalField,
    pub op:    Operator,
    pub value: f64,
}

/// Declarative criteria tree as written in the catalog, e.g.
/// `{"all": [{"signal": {...}}, {"any": [...]}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criteria {
    All(Vec<Criteria>),
    Any(Vec<Criteria>),
    Signal(Criterion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    pub persona_id:  PersonaId,
    pub name:        String,
    pub description: String,
    /// Lower wins.
    pub priority:    u32,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Exactly one persona per catalog is the fallback. Its criteria are
    /// never evaluated.
    #[serde(default)]
    pub fallback:    bool,
    #[serde(default)]
    pub criteria:    Option<Criteria>,
}

/// Validated, read-only persona catalog. Declaration order is significant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaCatalog {
    personas:       Vec<PersonaDefinition>,
    fallback_index: usize,
}

impl PersonaCatalog {
    pub fn new(personas: Vec<PersonaDefinition>) -> PipelineResult<Self> {
        let mut seen = HashSet::new();
        for p in &personas {
            if !seen.insert(p.persona_id.as_str()) {
                return Err(invalid(format!("duplicate persona id '{}'", p.persona_id)));
            }
            if !p.fallback && p.criteria.is_none() {
                return Err(invalid(format!("persona '{}' has no criteria", p.persona_id)));
            }
        }
        let fallbacks: Vec<usize> = personas
            .iter()
            .enumerate()
            .filter(|(_, p)| p.fallback)
            .map(|(i, _)| i)
            .collect();
        match fallbacks.as_slice() {
            [index] => Ok(Self { personas, fallback_index: *index }),
            [] => Err(invalid("persona catalog has no fallback persona".into())),
            _ => Err(invalid("persona catalog has more than one fallback persona".into())),
        }
    }

    pub fn personas(&self) -> &[PersonaDefinition] {
        &self.personas
    }

    pub fn fallback(&self) -> &PersonaDefinition {
        &self.personas[self.fallback_index]
    }

    pub fn get(&self, persona_id: &str) -> Option<&PersonaDefinition> {
        self.personas.iter().find(|p| p.persona_id == persona_id)
    }
}

fn invalid(reason: String) -> PipelineError {
    PipelineError::InvalidCatalog { reason }
}

// ── Assignment ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrioritizationReason {
    SingleMatch,
    HighestPriority,
    TieBrokenByDeclarationOrder,
    NoMatchFallback,
}

impl PrioritizationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleMatch                 => "single_match",
            Self::HighestPriority             => "highest_priority",
            Self::TieBrokenByDeclarationOrder => "tie_broken_by_declaration_order",
            Self::NoMatchFallback             => "no_match_fallback",
        }
    }
}

/// One satisfied criterion, with the literal value that satisfied it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionEvidence {
    pub field:     SignalField,
    pub observed:  f64,
    pub operator:  Operator,
    pub threshold: f64,
    /// e.g. "utilization: 68%, threshold: ≥50%".
    pub display:   String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaEvidence {
    pub persona_id: PersonaId,
    pub priority:   u32,
    pub criteria:   Vec<CriterionEvidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaAssignment {
    pub user_id:                    UserId,
    pub window:                     TimeWindow,
    pub assigned_persona_id:        PersonaId,
    pub assigned_persona_name:      String,
    pub all_qualifying_persona_ids: Vec<PersonaId>,
    pub prioritization_reason:      PrioritizationReason,
    pub match_evidence:             Vec<PersonaEvidence>,
}

impl PersonaAssignment {
    /// Evidence for the assigned persona; empty for the fallback.
    pub fn winning_evidence(&self) -> &[CriterionEvidence] {
        self.match_evidence
            .iter()
            .find(|e| e.persona_id == self.assigned_persona_id)
            .map(|e| e.criteria.as_slice())
            .unwrap_or(&[])
    }
}

/// Match a summary against the catalog and pick exactly one persona.
pub fn assign(catalog: &PersonaCatalog, summary: &BehavioralSummary) -> PersonaAssignment {
    // (declaration index, definition, evidence)
    let mut qualifying: Vec<(usize, &PersonaDefinition, Vec<CriterionEvidence>)> = Vec::new();

    for (index, persona) in catalog.personas().iter().enumerate() {
        if persona.fallback {
            continue;
        }
        let Some(criteria) = &persona.criteria else { continue };
        if let Some(evidence) = evaluate(criteria, summary) {
            qualifying.push((index, persona, evidence));
        }
    }

    let (winner, reason) = select(&qualifying).unwrap_or_else(|| {
        (catalog.fallback(), PrioritizationReason::NoMatchFallback)
    });

    log::info!(
        "user={} window={} persona={} reason={} qualifying={}",
        summary.user_id,
        summary.window.label(),
        winner.persona_id,
        reason.as_str(),
        qualifying.len()
    );

    PersonaAssignment {
        user_id: summary.user_id.clone(),
        window: summary.window,
        assigned_persona_id: winner.persona_id.clone(),
        assigned_persona_name: winner.name.clone(),
        all_qualifying_persona_ids: qualifying.iter().map(|(_, p, _)| p.persona_id.clone()).collect(),
        prioritization_reason: reason,
        match_evidence: qualifying
            .into_iter()
            .map(|(_, p, criteria)| PersonaEvidence {
                persona_id: p.persona_id.clone(),
                priority: p.priority,
                criteria,
            })
            .collect(),
    }
}

/// Lowest priority wins; among equals the earliest declaration index wins.
fn select<'a>(
    qualifying: &[(usize, &'a PersonaDefinition, Vec<CriterionEvidence>)],
) -> Option<(&'a PersonaDefinition, PrioritizationReason)> {
    let (_, best, _) = qualifying
        .iter()
        .min_by_key(|(index, p, _)| (p.priority, *index))?;

    let reason = if qualifying.len() == 1 {
        PrioritizationReason::SingleMatch
    } else if qualifying
        .iter()
        .filter(|(_, p, _)| p.priority == best.priority)
        .count()
        > 1
    {
        PrioritizationReason::TieBrokenByDeclarationOrder
    } else {
        PrioritizationReason::HighestPriority
    };
    Some((*best, reason))
}

/// Evaluate a criteria tree. Returns the evidence of every satisfied leaf
/// that contributed to the match, or `None` when the tree is false.
pub fn evaluate(criteria: &Criteria, summary: &BehavioralSummary) -> Option<Vec<CriterionEvidence>> {
    match criteria {
        Criteria::Signal(c) => {
            let observed = c.field.value(summary);
            c.op.holds(observed, c.value).then(|| vec![evidence(c, observed)])
        }
        Criteria::All(children) => {
            let mut out = Vec::new();
            for child in children {
                out.extend(evaluate(child, summary)?);
            }
            Some(out)
        }
        Criteria::Any(children) => {
            let mut out = Vec::new();
            let mut matched = false;
            for child in children {
                if let Some(ev) = evaluate(child, summary) {
                    matched = true;
                    out.extend(ev);
                }
            }
            matched.then_some(out)
        }
    }
}

fn evidence(c: &Criterion, observed: f64) -> CriterionEvidence {
    let unit = c.field.unit();
    CriterionEvidence {
        field: c.field,
        observed,
        operator: c.op,
        threshold: c.value,
        display: format!(
            "{}: {}, threshold: {}{}",
            c.field.label(),
            unit.format(observed),
            c.op.symbol(),
            unit.format(c.value)
        ),
    }
}
