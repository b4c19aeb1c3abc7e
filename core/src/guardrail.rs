//! Guardrail chain: consent, eligibility, tone, disclaimer.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Consent:      hard stop. Anything but opted-in ends the request
//!                     before any signal is computed.
//!   2. Eligibility:  every item is re-checked against the live catalog.
//!   3. Tone:         shame-coded phrases in titles, rationales and match
//!                    reasons are rewritten or the item dropped.
//!   4. Disclaimer:   always attached. No path skips it.

use crate::{
    error::{PipelineError, PipelineResult},
    model::ConsentStatus,
    rationale::Recommendation,
    recommend::{check_eligibility, ContentCatalog, EligibilityContext},
    store::ConsentStore,
    types::ItemId,
};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DISCLAIMER: &str = "This is educational content, not financial advice. \
Consult a licensed advisor for personalized guidance.";

/// Persona text shown when the configured description fails tone review
/// and has no supportive rewrite.
const NEUTRAL_PERSONA_DESCRIPTION: &str =
    "A profile built from patterns in your recent financial activity.";

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneRule {
    pub phrase:      String,
    /// Supportive rewrite. Without one, matching items are dropped.
    #[serde(default)]
    pub replacement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub disclaimer:         String,
    pub tone_rules:         Vec<ToneRule>,
    #[serde(default)]
    pub harmful_categories: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            disclaimer: DEFAULT_DISCLAIMER.into(),
            tone_rules: Vec::new(),
            harmful_categories: Vec::new(),
        }
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStage {
    Consent,
    Eligibility,
    Tone,
    Disclaimer,
}

impl GuardrailStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consent     => "consent",
            Self::Eligibility => "eligibility",
            Self::Tone        => "tone",
            Self::Disclaimer  => "disclaimer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    Rewritten,
    Dropped,
    Blocked,
}

impl ViolationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rewritten => "rewritten",
            Self::Dropped   => "dropped",
            Self::Blocked   => "blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    pub stage:   GuardrailStage,
    /// `None` when the violation is not tied to one item.
    pub item_id: Option<ItemId>,
    pub rule:    String,
    pub detail:  String,
    pub action:  ViolationAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub consent_ok:      bool,
    pub eligibility_ok:  bool,
    /// False only when tone review dropped an item.
    pub tone_ok:         bool,
    pub disclaimer_text: String,
    pub violations:      Vec<GuardrailViolation>,
}

/// What survives the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardedOutput {
    pub recommendations:     Vec<Recommendation>,
    pub persona_description: String,
    pub result:              GuardrailResult,
}

// ── Chain ────────────────────────────────────────────────────────────────────

struct CompiledRule {
    phrase:      String,
    pattern:     Regex,
    replacement: Option<String>,
}

pub struct GuardrailChain {
    disclaimer: String,
    rules:      Vec<CompiledRule>,
}

impl std::fmt::Debug for GuardrailChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailChain")
            .field("disclaimer", &self.disclaimer)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl GuardrailChain {
    pub fn new(config: &GuardrailConfig) -> PipelineResult<Self> {
        let mut rules = Vec::with_capacity(config.tone_rules.len());
        for rule in &config.tone_rules {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(rule.phrase.trim())))
                .map_err(|e| PipelineError::InvalidCatalog {
                    reason: format!("tone rule '{}': {e}", rule.phrase),
                })?;
            // Rewrites land in rationale text, which may only carry cited numbers.
            if let Some(r) = &rule.replacement {
                if r.chars().any(|c| c.is_ascii_digit()) {
                    return Err(PipelineError::InvalidCatalog {
                        reason: format!("tone rule '{}': replacement contains digits", rule.phrase),
                    });
                }
            }
            rules.push(CompiledRule {
                phrase: rule.phrase.clone(),
                pattern,
                replacement: rule.replacement.clone(),
            });
        }
        Ok(Self { disclaimer: config.disclaimer.clone(), rules })
    }

    pub fn disclaimer(&self) -> &str {
        &self.disclaimer
    }

    /// Stage 1. Fails fast with `ConsentRequired` unless explicitly opted in.
    pub fn check_consent(&self, consent: &dyn ConsentStore, user_id: &str) -> PipelineResult<()> {
        match consent.get_consent(user_id)? {
            Some(ConsentStatus::OptedIn) => Ok(()),
            status => {
                log::warn!(
                    "user={user_id} consent check failed (status={})",
                    status.map(|s| s.as_str()).unwrap_or("none")
                );
                Err(PipelineError::ConsentRequired { user_id: user_id.to_string() })
            }
        }
    }

    /// Stages 2–4 over already-rendered recommendations.
    pub fn apply(
        &self,
        recommendations: Vec<Recommendation>,
        catalog: &ContentCatalog,
        ctx: &EligibilityContext,
        persona_description: &str,
    ) -> GuardedOutput {
        let mut violations = Vec::new();

        // ── Eligibility ─────────────────────────────────────
        let before = recommendations.len();
        let eligible: Vec<Recommendation> = recommendations
            .into_iter()
            .filter(|rec| {
                let failure = match catalog.get(&rec.item_id) {
                    None => Some(("unknown_item".to_string(), "item no longer in catalog".to_string())),
                    Some(item) => check_eligibility(catalog, item, ctx)
                        .map(|reason| ("eligibility".to_string(), reason.describe())),
                };
                match failure {
                    None => true,
                    Some((rule, detail)) => {
                        violations.push(GuardrailViolation {
                            stage: GuardrailStage::Eligibility,
                            item_id: Some(rec.item_id.clone()),
                            rule,
                            detail,
                            action: ViolationAction::Dropped,
                        });
                        false
                    }
                }
            })
            .collect();
        let eligibility_ok = eligible.len() == before;

        // ── Tone ────────────────────────────────────────────
        let mut tone_ok = true;
        let mut toned = Vec::with_capacity(eligible.len());
        for mut rec in eligible {
            let mut keep = true;
            for text in [&mut rec.title, &mut rec.rationale_text, &mut rec.persona_match_reason] {
                match self.review(text, &rec.item_id, &mut violations) {
                    ToneOutcome::Clean | ToneOutcome::Rewritten => {}
                    ToneOutcome::Rejected => keep = false,
                }
            }
            if keep {
                toned.push(rec);
            } else {
                tone_ok = false;
            }
        }

        let mut description = persona_description.to_string();
        if self.review(&mut description, "persona_description", &mut violations)
            == ToneOutcome::Rejected
        {
            description = NEUTRAL_PERSONA_DESCRIPTION.to_string();
        }

        for (i, rec) in toned.iter_mut().enumerate() {
            rec.priority = i + 1;
        }

        for v in &violations {
            log::warn!(
                "guardrail stage={} action={} item={} rule={} detail={}",
                v.stage.as_str(),
                v.action.as_str(),
                v.item_id.as_deref().unwrap_or("-"),
                v.rule,
                v.detail
            );
        }

        // ── Disclaimer ──────────────────────────────────────
        GuardedOutput {
            recommendations: toned,
            persona_description: description,
            result: GuardrailResult {
                consent_ok: true,
                eligibility_ok,
                tone_ok,
                disclaimer_text: self.disclaimer.clone(),
                violations,
            },
        }
    }

    /// Apply every tone rule to `text` in place.
    fn review(
        &self,
        text: &mut String,
        subject: &str,
        violations: &mut Vec<GuardrailViolation>,
    ) -> ToneOutcome {
        let mut outcome = ToneOutcome::Clean;
        for rule in &self.rules {
            if !rule.pattern.is_match(text.as_str()) {
                continue;
            }
            let action = match &rule.replacement {
                Some(replacement) => {
                    // Replacements are literal text, never capture-group templates.
                    *text = rule
                        .pattern
                        .replace_all(text.as_str(), NoExpand(replacement.as_str()))
                        .into_owned();
                    if outcome == ToneOutcome::Clean {
                        outcome = ToneOutcome::Rewritten;
                    }
                    ViolationAction::Rewritten
                }
                None => {
                    outcome = ToneOutcome::Rejected;
                    ViolationAction::Dropped
                }
            };
            violations.push(GuardrailViolation {
                stage: GuardrailStage::Tone,
                item_id: Some(subject.to_string()),
                rule: rule.phrase.clone(),
                detail: format!("matched phrase '{}'", rule.phrase),
                action,
            });
        }
        outcome
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToneOutcome {
    Clean,
    Rewritten,
    Rejected,
}
