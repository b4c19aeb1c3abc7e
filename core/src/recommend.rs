//! Recommendation matching: persona filter, eligibility filter, selection.
//!
//! Two passes over the content catalog:
//!   1. keep items tagged with the assigned persona;
//!   2. drop items the user is not eligible for.
//!
//! Survivors are ordered by declared priority, then catalog order, and
//! capped per content type. An empty result is a valid outcome.

use crate::{
    error::{PipelineError, PipelineResult},
    rationale,
    types::{ItemId, PersonaId},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Catalog ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Education,
    PartnerOffer,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityRules {
    #[serde(default)]
    pub minimum_income:       Option<f64>,
    #[serde(default)]
    pub minimum_credit_score: Option<u32>,
    /// Offers that would worsen card stress set a ceiling here.
    #[serde(default)]
    pub max_utilization:      Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub item_id:      ItemId,
    pub title:        String,
    pub content_type: ContentType,
    pub persona_tags: Vec<PersonaId>,
    /// Lower is shown first.
    pub priority:     u32,
    pub category:     String,
    /// Product the offer opens, e.g. "savings" or "credit_card".
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub eligibility:  EligibilityRules,
    pub template_text: String,
    #[serde(default)]
    pub persona_reason_template: Option<String>,
}

impl ContentItem {
    pub fn is_tagged(&self, persona_id: &str) -> bool {
        self.persona_tags.iter().any(|t| t == persona_id)
    }
}

/// Validated, read-only content catalog. Catalog order breaks priority ties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentCatalog {
    items:              Vec<ContentItem>,
    harmful_categories: Vec<String>,
}

impl ContentCatalog {
    pub fn new(items: Vec<ContentItem>, harmful_categories: Vec<String>) -> PipelineResult<Self> {
        let mut seen = HashSet::new();
        for item in &items {
            if !seen.insert(item.item_id.as_str()) {
                return Err(PipelineError::InvalidCatalog {
                    reason: format!("duplicate content item id '{}'", item.item_id),
                });
            }
            rationale::validate_template(&item.item_id, &item.template_text)?;
            if let Some(reason) = &item.persona_reason_template {
                rationale::validate_template(&item.item_id, reason)?;
            }
        }
        let harmful_categories = harmful_categories
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(Self { items, harmful_categories })
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn get(&self, item_id: &str) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn harmful_categories(&self) -> &[String] {
        &self.harmful_categories
    }

    pub fn is_harmful(&self, category: &str) -> bool {
        let c = category.to_ascii_lowercase();
        self.harmful_categories.iter().any(|h| *h == c)
    }
}

// ── Eligibility ──────────────────────────────────────────────────────────────

/// What the eligibility filter knows about the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityContext {
    /// Declared, or estimated from detected income. `None` if neither.
    pub annual_income:         Option<f64>,
    pub credit_score:          Option<u32>,
    pub held_product_types:    Vec<String>,
    pub aggregate_utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Ineligibility {
    IncomeBelowMinimum { required: f64, actual: Option<f64> },
    CreditScoreBelowMinimum { required: u32, actual: u32 },
    HarmfulCategory { category: String },
    AlreadyHeld { product_type: String },
    UtilizationAboveMaximum { maximum: f64, actual: f64 },
}

impl Ineligibility {
    pub fn describe(&self) -> String {
        match self {
            Self::IncomeBelowMinimum { required, actual } => match actual {
                Some(a) => format!("income {a:.0} below minimum {required:.0}"),
                None => format!("income unknown, minimum {required:.0}"),
            },
            Self::CreditScoreBelowMinimum { required, actual } => {
                format!("credit score {actual} below minimum {required}")
            }
            Self::HarmfulCategory { category } => format!("category '{category}' is excluded"),
            Self::AlreadyHeld { product_type } => format!("user already holds '{product_type}'"),
            Self::UtilizationAboveMaximum { maximum, actual } => {
                format!("utilization {actual:.2} above maximum {maximum:.2}")
            }
        }
    }
}

/// First rule the item fails, or `None` when eligible.
pub fn check_eligibility(
    catalog: &ContentCatalog,
    item: &ContentItem,
    ctx: &EligibilityContext,
) -> Option<Ineligibility> {
    let rules = &item.eligibility;

    if catalog.is_harmful(&item.category) {
        return Some(Ineligibility::HarmfulCategory { category: item.category.clone() });
    }
    if let Some(required) = rules.minimum_income {
        match ctx.annual_income {
            Some(actual) if actual >= required => {}
            actual => return Some(Ineligibility::IncomeBelowMinimum { required, actual }),
        }
    }
    // Unknown credit score does not disqualify.
    if let (Some(required), Some(actual)) = (rules.minimum_credit_score, ctx.credit_score) {
        if actual < required {
            return Some(Ineligibility::CreditScoreBelowMinimum { required, actual });
        }
    }
    if let Some(product_type) = &item.product_type {
        if ctx.held_product_types.iter().any(|h| h == product_type) {
            return Some(Ineligibility::AlreadyHeld { product_type: product_type.clone() });
        }
    }
    if let Some(maximum) = rules.max_utilization {
        if ctx.aggregate_utilization > maximum {
            return Some(Ineligibility::UtilizationAboveMaximum {
                maximum,
                actual: ctx.aggregate_utilization,
            });
        }
    }
    None
}

// ── Selection ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionLimits {
    pub max_education:      usize,
    pub max_partner_offers: usize,
}

impl Default for SelectionLimits {
    fn default() -> Self {
        Self { max_education: 5, max_partner_offers: 3 }
    }
}

impl SelectionLimits {
    fn cap(&self, content_type: ContentType) -> usize {
        match content_type {
            ContentType::Education    => self.max_education,
            ContentType::PartnerOffer => self.max_partner_offers,
        }
    }
}

/// Persona filter, eligibility filter, ordering and caps.
pub fn match_content<'c>(
    catalog: &'c ContentCatalog,
    persona_id: &str,
    ctx: &EligibilityContext,
    limits: SelectionLimits,
) -> Vec<&'c ContentItem> {
    let mut candidates: Vec<(usize, &ContentItem)> = catalog
        .items()
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_tagged(persona_id))
        .filter(|(_, item)| match check_eligibility(catalog, item, ctx) {
            None => true,
            Some(reason) => {
                log::debug!(
                    "persona={persona_id} item={} ineligible: {}",
                    item.item_id,
                    reason.describe()
                );
                false
            }
        })
        .collect();

    candidates.sort_by_key(|(index, item)| (item.priority, *index));

    let mut education = 0;
    let mut offers = 0;
    let mut selected = Vec::new();
    for (_, item) in candidates {
        let taken = match item.content_type {
            ContentType::Education    => &mut education,
            ContentType::PartnerOffer => &mut offers,
        };
        if *taken < limits.cap(item.content_type) {
            *taken += 1;
            selected.push(item);
        }
    }
    selected
}
