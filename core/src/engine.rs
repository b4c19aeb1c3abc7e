//! The decision engine. Orchestrates one request end to end.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Consent:          checked before the cache and before any data load.
//!   2. Cache lookup:     keyed by (user, window, force_generate).
//!   3. Load user data:   via the `UserDataSource` collaborator.
//!   4. History check:    fewer than 30 days → `InsufficientData`.
//!   5. Summaries:        both windows, detectors run once each.
//!   6. Persona:          assign + audit.
//!   7. Content match:    persona filter, eligibility filter, caps.
//!   8. Rationale:        template substitution with citations.
//!   9. Guardrails:       eligibility, tone, disclaimer + audit.
//!
//! RULES:
//!   - Reference data is read through an `Arc` snapshot taken once per
//!     request. `reload` swaps the snapshot; running requests keep theirs.
//!   - Expected failures pass through unchanged. Anything else, including
//!     panics, becomes `PipelineError::System` after being logged.

use crate::{
    cache::{CacheKey, RecommendationCache},
    config::DecisionConfig,
    error::{PipelineError, PipelineResult},
    guardrail::{GuardrailChain, GuardrailResult},
    model::UserData,
    persona::{self, PersonaAssignment},
    rationale::{self, CitationMap, Recommendation},
    recommend::{self, ContentType, EligibilityContext},
    signals::SignalKind,
    store::{AuditSink, ConsentStore, UserDataSource},
    summary::{self, BehavioralSummary, SummaryPair},
    types::{PersonaId, UserId, WindowDays, MIN_HISTORY_DAYS},
    window::{self, TimeWindow},
};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::{Duration, Instant},
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id:          String,
    pub generation_time_ms:  u64,
    pub total_count:         usize,
    pub education_count:     usize,
    pub partner_offer_count: usize,
    pub signals_detected:    Vec<SignalKind>,
    pub cached:              bool,
    pub generated_at:        DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id:             UserId,
    pub window:              TimeWindow,
    pub persona_id:          PersonaId,
    pub persona_name:        String,
    pub persona_description: String,
    pub recommendations:     Vec<Recommendation>,
    pub disclaimer:          String,
    pub guardrails:          GuardrailResult,
    pub metadata:            ResponseMetadata,
}

/// Reference data plus everything compiled from it.
struct Loaded {
    config: DecisionConfig,
    chain:  GuardrailChain,
}

impl Loaded {
    fn new(config: DecisionConfig) -> PipelineResult<Self> {
        let chain = GuardrailChain::new(&config.guardrails)?;
        Ok(Self { config, chain })
    }
}

pub struct DecisionEngine {
    loaded:  RwLock<Arc<Loaded>>,
    users:   Arc<dyn UserDataSource>,
    consent: Arc<dyn ConsentStore>,
    audit:   Arc<dyn AuditSink>,
    cache:   RecommendationCache<RecommendationResponse>,
}

impl DecisionEngine {
    pub fn new(
        config: DecisionConfig,
        users: Arc<dyn UserDataSource>,
        consent: Arc<dyn ConsentStore>,
        audit: Arc<dyn AuditSink>,
    ) -> PipelineResult<Self> {
        let ttl = Duration::from_secs(config.engine.cache_ttl_secs);
        Ok(Self {
            loaded: RwLock::new(Arc::new(Loaded::new(config)?)),
            users,
            consent,
            audit,
            cache: RecommendationCache::new(ttl),
        })
    }

    /// Swap in new reference data. Cached responses built from the old
    /// catalogs are discarded, and computations still running against them
    /// are not cached when they finish.
    pub fn reload(&self, config: DecisionConfig) -> PipelineResult<()> {
        let ttl = Duration::from_secs(config.engine.cache_ttl_secs);
        let loaded = Arc::new(Loaded::new(config)?);
        *self.loaded.write() = loaded;
        self.cache.reset(ttl);
        log::info!("decision config reloaded");
        Ok(())
    }

    /// Current reference data.
    pub fn config(&self) -> DecisionConfig {
        self.snapshot().config.clone()
    }

    fn snapshot(&self) -> Arc<Loaded> {
        Arc::clone(&self.loaded.read())
    }

    /// Drop cached responses for one user, e.g. after new data arrives.
    pub fn invalidate_user(&self, user_id: &str) {
        self.cache.invalidate_user(user_id);
    }

    // ── Operations ───────────────────────────────────────────────────────────

    /// Both window summaries for a consenting user.
    pub fn behavioral_summary(
        &self,
        user_id: &str,
        reference_date: NaiveDate,
    ) -> PipelineResult<SummaryPair> {
        let request_id = new_request_id();
        self.boundary(&request_id, || {
            let loaded = self.snapshot();
            loaded.chain.check_consent(self.consent.as_ref(), user_id)?;
            let data = self.load_with_history(user_id, reference_date)?;
            summary::assemble(&data, reference_date, Utc::now(), loaded.config.engine.execution_mode)
        })
    }

    /// Persona assignment for one window. The evidence is audited.
    pub fn assign_persona(
        &self,
        user_id: &str,
        window_days: WindowDays,
        reference_date: NaiveDate,
    ) -> PipelineResult<PersonaAssignment> {
        let request_id = new_request_id();
        self.boundary(&request_id, || {
            let loaded = self.snapshot();
            loaded.chain.check_consent(self.consent.as_ref(), user_id)?;
            TimeWindow::new(window_days, reference_date)?;
            let data = self.load_with_history(user_id, reference_date)?;
            let summary = summary::assemble_window(
                &data,
                window_days,
                reference_date,
                Utc::now(),
                loaded.config.engine.execution_mode,
            )?;
            let assignment = persona::assign(&loaded.config.personas, &summary);
            self.audit.record_assignment(&request_id, &assignment)?;
            Ok(assignment)
        })
    }

    /// Full pipeline: persona, matched content, rationales, guardrails.
    pub fn recommend(
        &self,
        user_id: &str,
        window_days: WindowDays,
        reference_date: NaiveDate,
        force_generate: bool,
    ) -> PipelineResult<RecommendationResponse> {
        let started = Instant::now();
        let request_id = new_request_id();
        self.boundary(&request_id, || {
            let loaded = self.snapshot();
            loaded.chain.check_consent(self.consent.as_ref(), user_id)?;
            let window = TimeWindow::new(window_days, reference_date)?;

            let key = CacheKey { user_id: user_id.to_string(), window, force_generate };
            let (mut response, fresh) = self.cache.get_or_compute(&key, || {
                self.compute(&loaded, &request_id, user_id, window, started)
            })?;

            if !fresh {
                response.metadata.request_id = request_id.clone();
                response.metadata.cached = true;
                response.metadata.generation_time_ms = elapsed_ms(started);
                log::debug!("user={user_id} window={} served from cache", window.label());
            }
            Ok(response)
        })
    }

    // ── Pipeline ─────────────────────────────────────────────────────────────

    fn load_with_history(&self, user_id: &str, reference_date: NaiveDate) -> PipelineResult<UserData> {
        let data = self.users.load_user(user_id)?;
        let history_days = window::history_days(&data, reference_date);
        if history_days < MIN_HISTORY_DAYS {
            log::info!("user={user_id} has {history_days} days of history, need {MIN_HISTORY_DAYS}");
            return Err(PipelineError::InsufficientData {
                history_days,
                required_days: MIN_HISTORY_DAYS,
            });
        }
        Ok(data)
    }

    fn compute(
        &self,
        loaded: &Loaded,
        request_id: &str,
        user_id: &str,
        window: TimeWindow,
        started: Instant,
    ) -> PipelineResult<RecommendationResponse> {
        let config = &loaded.config;
        let data = self.load_with_history(user_id, window.reference_date)?;
        let generated_at = Utc::now();
        let pair = summary::assemble(
            &data,
            window.reference_date,
            generated_at,
            config.engine.execution_mode,
        )?;
        let summary = pair
            .for_window(window.window_days)
            .ok_or(PipelineError::InvalidWindow { window_days: window.window_days })?;

        let assignment = persona::assign(&config.personas, summary);
        self.audit.record_assignment(request_id, &assignment)?;

        let ctx = eligibility_context(&data, &pair, summary);
        let items = recommend::match_content(
            &config.content,
            &assignment.assigned_persona_id,
            &ctx,
            config.engine.limits,
        );
        let citations = CitationMap::build(summary, &assignment);
        let recommendations = rationale::generate_all(&items, &assignment, &citations);

        let description = config
            .personas
            .get(&assignment.assigned_persona_id)
            .map(|p| p.description.as_str())
            .unwrap_or_default();
        let guarded = loaded.chain.apply(recommendations, &config.content, &ctx, description);
        self.audit.record_violations(request_id, user_id, &guarded.result.violations)?;

        let count = |t: ContentType| {
            guarded.recommendations.iter().filter(|r| r.content_type == t).count()
        };
        let metadata = ResponseMetadata {
            request_id: request_id.to_string(),
            generation_time_ms: elapsed_ms(started),
            total_count: guarded.recommendations.len(),
            education_count: count(ContentType::Education),
            partner_offer_count: count(ContentType::PartnerOffer),
            signals_detected: summary.signals_detected(),
            cached: false,
            generated_at,
        };

        log::info!(
            "user={user_id} window={} persona={} recommendations={} violations={} in {}ms",
            window.label(),
            assignment.assigned_persona_id,
            metadata.total_count,
            guarded.result.violations.len(),
            metadata.generation_time_ms
        );

        Ok(RecommendationResponse {
            user_id: user_id.to_string(),
            window,
            persona_id: assignment.assigned_persona_id.clone(),
            persona_name: assignment.assigned_persona_name.clone(),
            persona_description: guarded.persona_description,
            recommendations: guarded.recommendations,
            disclaimer: guarded.result.disclaimer_text.clone(),
            guardrails: guarded.result,
            metadata,
        })
    }

    /// Top-level error capture. Expected errors pass through; everything
    /// else is logged with the request id and replaced by `System`.
    fn boundary<T>(
        &self,
        request_id: &str,
        op: impl FnOnce() -> PipelineResult<T>,
    ) -> PipelineResult<T> {
        let outcome = catch_unwind(AssertUnwindSafe(op));
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if is_expected(&e) => Err(e),
            Ok(Err(e)) => {
                log::error!("request={request_id} failed: {e}");
                Err(PipelineError::System { request_id: request_id.to_string() })
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".into());
                log::error!("request={request_id} panicked: {msg}");
                Err(PipelineError::System { request_id: request_id.to_string() })
            }
        }
    }
}

fn is_expected(e: &PipelineError) -> bool {
    matches!(
        e,
        PipelineError::InvalidWindow { .. }
            | PipelineError::InsufficientData { .. }
            | PipelineError::ConsentRequired { .. }
            | PipelineError::UserNotFound { .. }
            | PipelineError::System { .. }
    )
}

/// Declared income wins; otherwise estimate from the long window's
/// detected income.
fn eligibility_context(
    data: &UserData,
    pair: &SummaryPair,
    summary: &BehavioralSummary,
) -> EligibilityContext {
    let estimated = pair.long_term.income.average_monthly_income * 12.0;
    EligibilityContext {
        annual_income: data
            .profile
            .annual_income
            .or_else(|| (estimated > 0.0).then_some(estimated)),
        credit_score: data.profile.credit_score,
        held_product_types: data.held_product_types(),
        aggregate_utilization: summary.credit.aggregate_utilization,
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
