//! Rationale generation: template substitution with citations.
//!
//! Templates use `{key}` placeholders. Every key resolves through an
//! explicit citation map built from the user's summary; nothing is
//! evaluated. Templates may not contain literal digits, so every number in
//! a rendered rationale came from a citation.

use crate::{
    error::{PipelineError, PipelineResult},
    persona::PersonaAssignment,
    recommend::{ContentItem, ContentType},
    summary::{BehavioralSummary, FieldUnit, SignalField},
    types::ItemId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholders that are not summary fields.
pub const TEXT_KEYS: [&str; 3] = ["persona_name", "top_merchant", "payment_frequency"];

/// A typed cited value, serialized as `{"Percentage": "68%"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CitationValue {
    Percentage(String),
    Currency(String),
    Count(String),
    Months(String),
    Days(String),
    Ratio(String),
    Flag(String),
    Text(String),
}

impl CitationValue {
    fn from_unit(unit: FieldUnit, formatted: String) -> Self {
        match unit {
            FieldUnit::Percentage => Self::Percentage(formatted),
            FieldUnit::Currency   => Self::Currency(formatted),
            FieldUnit::Count      => Self::Count(formatted),
            FieldUnit::Months     => Self::Months(formatted),
            FieldUnit::Days       => Self::Days(formatted),
            FieldUnit::Ratio      => Self::Ratio(formatted),
            FieldUnit::Flag       => Self::Flag(formatted),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Percentage(s)
            | Self::Currency(s)
            | Self::Count(s)
            | Self::Months(s)
            | Self::Days(s)
            | Self::Ratio(s)
            | Self::Flag(s)
            | Self::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCitation {
    pub signal: String,
    #[serde(flatten)]
    pub value:  CitationValue,
}

/// Every value a template may reference for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationMap {
    values: BTreeMap<String, CitationValue>,
}

impl CitationMap {
    pub fn build(summary: &BehavioralSummary, assignment: &PersonaAssignment) -> Self {
        let mut values = BTreeMap::new();
        for field in SignalField::ALL {
            if is_available(field, summary) {
                values.insert(
                    field.key().to_string(),
                    CitationValue::from_unit(field.unit(), field.display(summary)),
                );
            }
        }

        values.insert(
            "persona_name".into(),
            CitationValue::Text(assignment.assigned_persona_name.clone()),
        );
        values.insert(
            "payment_frequency".into(),
            CitationValue::Text(summary.income.payment_frequency.as_str().into()),
        );
        let top = summary.subscription.subscriptions.iter().max_by(|a, b| {
            a.monthly_amount()
                .total_cmp(&b.monthly_amount())
                .then_with(|| b.merchant.cmp(&a.merchant))
        });
        if let Some(top) = top {
            values.insert("top_merchant".into(), CitationValue::Text(top.merchant.clone()));
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&CitationValue> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fields whose value would be meaningless for this user are left out of
/// the map, so a template that needs them fails to render.
fn is_available(field: SignalField, s: &BehavioralSummary) -> bool {
    use SignalField::*;
    match field {
        SavingsGrowthRate => s.savings.data_complete,
        PaymentMedianGapDays | IncomeVariabilityCv => s.income.deposit_count >= 2,
        AggregateUtilization | MaxUtilization | HighUtilizationCount | TotalCreditBalance
        | InterestCharged | MinimumPaymentOnly | HasInterestCharges | AnyOverdue => {
            s.credit.card_count > 0
        }
        _ => true,
    }
}

// ── Templates ────────────────────────────────────────────────────────────────

enum Segment<'t> {
    Literal(&'t str),
    Placeholder(&'t str),
}

fn parse<'t>(item_id: &str, template: &'t str) -> PipelineResult<Vec<Segment<'t>>> {
    let bad = |reason: &str| PipelineError::InvalidCatalog {
        reason: format!("template for '{item_id}': {reason}"),
    };
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find(|c: char| c == '{' || c == '}') {
        if rest[open..].starts_with('}') {
            return Err(bad("unmatched '}'"));
        }
        out.push(Segment::Literal(&rest[..open]));
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| bad("unclosed '{'"))?;
        let key = &after[..close];
        if key.is_empty() || key.contains('{') {
            return Err(bad("malformed placeholder"));
        }
        out.push(Segment::Placeholder(key));
        rest = &after[close + 1..];
    }
    out.push(Segment::Literal(rest));
    Ok(out)
}

/// Placeholder keys in order of appearance.
pub fn placeholders<'t>(item_id: &str, template: &'t str) -> PipelineResult<Vec<&'t str>> {
    Ok(parse(item_id, template)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(k) => Some(k),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Catalog-load check: well-formed, known keys only, no literal digits.
pub fn validate_template(item_id: &str, template: &str) -> PipelineResult<()> {
    for segment in parse(item_id, template)? {
        match segment {
            Segment::Literal(text) => {
                if text.chars().any(|c| c.is_ascii_digit()) {
                    return Err(PipelineError::InvalidCatalog {
                        reason: format!(
                            "template for '{item_id}' contains a literal number; \
                             numbers must come from placeholders"
                        ),
                    });
                }
            }
            Segment::Placeholder(key) => {
                if SignalField::from_key(key).is_none() && !TEXT_KEYS.contains(&key) {
                    return Err(PipelineError::UnknownPlaceholder {
                        item_id: item_id.to_string(),
                        placeholder: key.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text:      String,
    pub citations: Vec<SignalCitation>,
}

/// Substitute every placeholder. A key missing from the map is an error.
pub fn render(item_id: &str, template: &str, map: &CitationMap) -> PipelineResult<Rendered> {
    let mut text = String::with_capacity(template.len() + 32);
    let mut citations: Vec<SignalCitation> = Vec::new();
    for segment in parse(item_id, template)? {
        match segment {
            Segment::Literal(s) => text.push_str(s),
            Segment::Placeholder(key) => {
                let value = map.get(key).ok_or_else(|| PipelineError::UnknownPlaceholder {
                    item_id: item_id.to_string(),
                    placeholder: key.to_string(),
                })?;
                text.push_str(value.text());
                if !citations.iter().any(|c| c.signal == key) {
                    citations.push(SignalCitation { signal: key.to_string(), value: value.clone() });
                }
            }
        }
    }
    Ok(Rendered { text, citations })
}

// ── Recommendations ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id:              ItemId,
    pub title:                String,
    pub content_type:         ContentType,
    pub rationale_text:       String,
    pub persona_match_reason: String,
    pub signal_citations:     Vec<SignalCitation>,
    /// 1-based display rank.
    pub priority:             usize,
}

/// Render one selected item for this user.
pub fn generate(
    item: &ContentItem,
    assignment: &PersonaAssignment,
    map: &CitationMap,
    rank: usize,
) -> PipelineResult<Recommendation> {
    let rendered = render(&item.item_id, &item.template_text, map)?;
    let persona_match_reason = match &item.persona_reason_template {
        Some(template) => render(&item.item_id, template, map)?.text,
        None => default_match_reason(assignment),
    };
    Ok(Recommendation {
        item_id: item.item_id.clone(),
        title: item.title.clone(),
        content_type: item.content_type,
        rationale_text: rendered.text,
        persona_match_reason,
        signal_citations: rendered.citations,
        priority: rank,
    })
}

fn default_match_reason(assignment: &PersonaAssignment) -> String {
    let evidence = assignment.winning_evidence();
    if evidence.is_empty() {
        return format!(
            "Recommended for the {} profile as general guidance.",
            assignment.assigned_persona_name
        );
    }
    let cited: Vec<&str> = evidence.iter().map(|e| e.display.as_str()).collect();
    format!(
        "Matches your {} profile ({}).",
        assignment.assigned_persona_name,
        cited.join("; ")
    )
}

/// Render all selected items, dropping any that cannot be filled in.
pub fn generate_all(
    items: &[&ContentItem],
    assignment: &PersonaAssignment,
    map: &CitationMap,
) -> Vec<Recommendation> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match generate(item, assignment, map, out.len() + 1) {
            Ok(rec) => out.push(rec),
            Err(e) => log::warn!(
                "user={} item={} skipped: {e}",
                assignment.user_id,
                item.item_id
            ),
        }
    }
    out
}
