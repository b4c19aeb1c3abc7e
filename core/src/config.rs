use crate::{
    guardrail::{GuardrailConfig, ToneRule, DEFAULT_DISCLAIMER},
    persona::{Criteria, Criterion, Operator, PersonaCatalog, PersonaDefinition},
    recommend::{ContentCatalog, ContentItem, ContentType, EligibilityRules, SelectionLimits},
    summary::{ExecutionMode, SignalField},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
struct PersonaCatalogFile {
    personas: Vec<PersonaDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentCatalogFile {
    items: Vec<ContentItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long a computed response stays servable from cache.
    pub cache_ttl_secs: u64,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub limits:         SelectionLimits,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            execution_mode: ExecutionMode::Sequential,
            limits: SelectionLimits::default(),
        }
    }
}

/// Reference data for the whole pipeline. Built once, shared read-only,
/// replaced wholesale on reload.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub personas:   PersonaCatalog,
    pub content:    ContentCatalog,
    pub guardrails: GuardrailConfig,
    pub engine:     EngineSettings,
}

fn read_json<T: DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}

impl DecisionConfig {
    /// Load from the data/ directory.
    /// In tests, use DecisionConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let persona_file: PersonaCatalogFile =
            read_json(&format!("{data_dir}/personas/persona_catalog.json"))?;
        let content_file: ContentCatalogFile =
            read_json(&format!("{data_dir}/content/content_catalog.json"))?;
        let guardrails: GuardrailConfig =
            read_json(&format!("{data_dir}/guardrails/guardrails.json"))?;
        let engine: EngineSettings = read_json(&format!("{data_dir}/engine.json"))?;

        let personas = PersonaCatalog::new(persona_file.personas)?;
        let content =
            ContentCatalog::new(content_file.items, guardrails.harmful_categories.clone())?;

        log::info!(
            "loaded config from {data_dir}: personas={} content_items={} tone_rules={}",
            personas.personas().len(),
            content.items().len(),
            guardrails.tone_rules.len()
        );
        Ok(Self { personas, content, guardrails, engine })
    }

    /// Config with hardcoded defaults for use in unit tests. Mirrors the
    /// shipped data/ catalogs.
    pub fn default_test() -> Self {
        let guardrails = GuardrailConfig {
            disclaimer: DEFAULT_DISCLAIMER.into(),
            tone_rules: vec![
                tone("overspending", Some("spending more than planned")),
                tone("wasting money", Some("spending on things you may not use")),
                tone("bad with money", None),
                tone("irresponsible", None),
                tone("reckless", None),
            ],
            harmful_categories: vec!["payday_loan".into(), "title_loan".into()],
        };
        let personas = PersonaCatalog::new(default_personas())
            .unwrap_or_else(|e| panic!("built-in persona catalog is invalid: {e}"));
        let content = ContentCatalog::new(default_content(), guardrails.harmful_categories.clone())
            .unwrap_or_else(|e| panic!("built-in content catalog is invalid: {e}"));
        Self { personas, content, guardrails, engine: EngineSettings::default() }
    }
}

fn tone(phrase: &str, replacement: Option<&str>) -> ToneRule {
    ToneRule { phrase: phrase.into(), replacement: replacement.map(Into::into) }
}

fn sig(field: SignalField, op: Operator, value: f64) -> Criteria {
    Criteria::Signal(Criterion { field, op, value })
}

fn persona(
    persona_id: &str,
    name: &str,
    description: &str,
    priority: u32,
    focus_areas: &[&str],
    criteria: Option<Criteria>,
) -> PersonaDefinition {
    PersonaDefinition {
        persona_id: persona_id.into(),
        name: name.into(),
        description: description.into(),
        priority,
        focus_areas: focus_areas.iter().map(|s| s.to_string()).collect(),
        fallback: criteria.is_none(),
        criteria,
    }
}

fn default_personas() -> Vec<PersonaDefinition> {
    use Operator::*;
    use SignalField::*;
    vec![
        persona(
            "high_utilization",
            "High Utilization",
            "Card balances are high relative to limits, or interest and late \
             payments are adding cost.",
            1,
            &["debt_paydown", "interest_reduction", "autopay"],
            Some(Criteria::Any(vec![
                sig(AggregateUtilization, Gte, 0.5),
                sig(HasInterestCharges, Eq, 1.0),
                sig(MinimumPaymentOnly, Eq, 1.0),
                sig(AnyOverdue, Eq, 1.0),
            ])),
        ),
        persona(
            "variable_income_budgeter",
            "Variable Income Budgeter",
            "Income arrives at uneven intervals and the cash cushion is thin.",
            2,
            &["percent_budgeting", "income_smoothing", "cash_buffer"],
            Some(Criteria::All(vec![
                sig(PaymentMedianGapDays, Gte, 45.0),
                sig(CashFlowBufferMonths, Lt, 1.0),
            ])),
        ),
        persona(
            "subscription_heavy",
            "Subscription Heavy",
            "Several recurring services make up a noticeable share of spending.",
            3,
            &["subscription_audit", "plan_negotiation", "renewal_alerts"],
            Some(Criteria::All(vec![
                sig(SubscriptionCount, Gte, 3.0),
                Criteria::Any(vec![
                    sig(MonthlyRecurringSpend, Gte, 50.0),
                    sig(SubscriptionShare, Gte, 0.10),
                ]),
            ])),
        ),
        persona(
            "savings_builder",
            "Savings Builder",
            "Savings are growing steadily while card balances stay low.",
            4,
            &["goal_setting", "automation", "yield_optimization"],
            Some(Criteria::All(vec![
                Criteria::Any(vec![
                    sig(SavingsGrowthRate, Gte, 0.02),
                    sig(MonthlySavingsInflow, Gte, 200.0),
                ]),
                sig(MaxUtilization, Lt, 0.30),
            ])),
        ),
        persona(
            "emergency_fund_starter",
            "Emergency Fund Starter",
            "Pay is steady but savings would cover less than a month of expenses.",
            5,
            &["emergency_fund", "automatic_transfers"],
            Some(Criteria::All(vec![
                sig(EmergencyFundMonths, Lt, 1.0),
                sig(HasRegularIncome, Eq, 1.0),
            ])),
        ),
        persona(
            "general_wellness",
            "General Wellness",
            "No single pattern stands out. General guidance on keeping finances healthy.",
            99,
            &["financial_basics"],
            None,
        ),
    ]
}

struct ItemSpec<'a> {
    item_id:       &'a str,
    title:         &'a str,
    content_type:  ContentType,
    tags:          &'a [&'a str],
    priority:      u32,
    category:      &'a str,
    product_type:  Option<&'a str>,
    eligibility:   EligibilityRules,
    template:      &'a str,
    reason:        Option<&'a str>,
}

impl ItemSpec<'_> {
    fn build(self) -> ContentItem {
        ContentItem {
            item_id: self.item_id.into(),
            title: self.title.into(),
            content_type: self.content_type,
            persona_tags: self.tags.iter().map(|s| s.to_string()).collect(),
            priority: self.priority,
            category: self.category.into(),
            product_type: self.product_type.map(Into::into),
            eligibility: self.eligibility,
            template_text: self.template.into(),
            persona_reason_template: self.reason.map(Into::into),
        }
    }
}

fn default_content() -> Vec<ContentItem> {
    use ContentType::*;
    let none = EligibilityRules::default;
    [
        ItemSpec {
            item_id: "edu_utilization_basics",
            title: "How card utilization affects your credit",
            content_type: Education,
            tags: &["high_utilization"],
            priority: 1,
            category: "credit_education",
            product_type: None,
            eligibility: none(),
            template: "Your card utilization is {aggregate_utilization} across \
                       {credit_card_count} cards, with {total_credit_balance} carried. \
                       Bringing balances down lowers interest costs and can lift your credit score.",
            reason: Some("Suggested because your utilization is {aggregate_utilization}."),
        },
        ItemSpec {
            item_id: "edu_minimum_payment_trap",
            title: "Paying more than the minimum",
            content_type: Education,
            tags: &["high_utilization"],
            priority: 2,
            category: "credit_education",
            product_type: None,
            eligibility: none(),
            template: "Paying only the minimum keeps {total_credit_balance} accruing interest. \
                       You paid {interest_charged} in interest over this period.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_autopay_setup",
            title: "Never miss a due date with autopay",
            content_type: Education,
            tags: &["high_utilization"],
            priority: 3,
            category: "credit_education",
            product_type: None,
            eligibility: none(),
            template: "Setting up autopay on your {credit_card_count} cards helps avoid \
                       late fees and protects your payment history.",
            reason: None,
        },
        ItemSpec {
            item_id: "offer_balance_transfer",
            title: "Balance transfer card",
            content_type: PartnerOffer,
            tags: &["high_utilization"],
            priority: 4,
            category: "credit_card",
            product_type: Some("balance_transfer_card"),
            eligibility: EligibilityRules {
                minimum_income: Some(30_000.0),
                minimum_credit_score: Some(670),
                max_utilization: None,
            },
            template: "A promotional balance transfer could pause interest on part of your \
                       {total_credit_balance} balance while you pay it down.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_variable_income_budget",
            title: "Budgeting when paychecks vary",
            content_type: Education,
            tags: &["variable_income_budgeter"],
            priority: 1,
            category: "budgeting",
            product_type: None,
            eligibility: none(),
            template: "Your income arrives about every {payment_median_gap_days} days and your \
                       cash buffer covers {cash_flow_buffer_months} months of expenses. \
                       A percent-based budget adapts to uneven income.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_income_smoothing",
            title: "Smoothing out uneven income",
            content_type: Education,
            tags: &["variable_income_budgeter"],
            priority: 2,
            category: "budgeting",
            product_type: None,
            eligibility: none(),
            template: "You average {average_monthly_income} a month in income. Setting aside \
                       a share of each deposit builds a cushion for lean months.",
            reason: None,
        },
        ItemSpec {
            item_id: "offer_payday_advance",
            title: "Get paid early",
            content_type: PartnerOffer,
            tags: &["variable_income_budgeter"],
            priority: 3,
            category: "payday_loan",
            product_type: Some("cash_advance"),
            eligibility: none(),
            template: "Access cash before your next deposit.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_subscription_audit",
            title: "Audit your subscriptions",
            content_type: Education,
            tags: &["subscription_heavy"],
            priority: 1,
            category: "spending",
            product_type: None,
            eligibility: none(),
            template: "You have {subscription_count} recurring subscriptions totaling \
                       {monthly_recurring_spend} a month, {subscription_share} of your spending. \
                       Your largest is {top_merchant}.",
            reason: Some("Suggested because {subscription_count} subscriptions recur each month."),
        },
        ItemSpec {
            item_id: "edu_plan_negotiation",
            title: "Switching to cheaper plans",
            content_type: Education,
            tags: &["subscription_heavy"],
            priority: 2,
            category: "spending",
            product_type: None,
            eligibility: none(),
            template: "Many services offer lower tiers. Reviewing {top_merchant} and the rest \
                       of your {monthly_recurring_spend} in monthly charges could free up cash.",
            reason: None,
        },
        ItemSpec {
            item_id: "offer_subscription_tracker",
            title: "Subscription tracker app",
            content_type: PartnerOffer,
            tags: &["subscription_heavy"],
            priority: 3,
            category: "budgeting_app",
            product_type: Some("budgeting_app"),
            eligibility: none(),
            template: "A tracker can flag upcoming renewals across your \
                       {subscription_count} services.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_savings_goals",
            title: "Setting savings goals",
            content_type: Education,
            tags: &["savings_builder"],
            priority: 1,
            category: "savings",
            product_type: None,
            eligibility: none(),
            template: "You're adding about {monthly_savings_inflow} a month to savings, and your \
                       balance is {total_savings_balance}. Naming a goal keeps momentum going.",
            reason: None,
        },
        ItemSpec {
            item_id: "offer_high_yield_savings",
            title: "High-yield savings account",
            content_type: PartnerOffer,
            tags: &["savings_builder", "emergency_fund_starter"],
            priority: 2,
            category: "savings_account",
            product_type: Some("high_yield_savings"),
            eligibility: none(),
            template: "A high-yield account could help your {total_savings_balance} in savings \
                       grow faster.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_emergency_fund",
            title: "Starting an emergency fund",
            content_type: Education,
            tags: &["emergency_fund_starter"],
            priority: 1,
            category: "savings",
            product_type: None,
            eligibility: none(),
            template: "Your savings cover {emergency_fund_months} months of expenses. With \
                       {payment_frequency} pay, small automatic transfers add up quickly.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_spending_snapshot",
            title: "Your spending at a glance",
            content_type: Education,
            tags: &["general_wellness"],
            priority: 1,
            category: "spending",
            product_type: None,
            eligibility: none(),
            template: "Your spending averaged {avg_monthly_expenses} a month over this period. \
                       A quick monthly review keeps you on track.",
            reason: None,
        },
        ItemSpec {
            item_id: "edu_financial_basics",
            title: "Financial health basics",
            content_type: Education,
            tags: &["general_wellness"],
            priority: 2,
            category: "financial_basics",
            product_type: None,
            eligibility: none(),
            template: "Small habits like tracking spending, paying bills on time and saving \
                       a little each month build lasting financial health.",
            reason: None,
        },
    ]
    .into_iter()
    .map(ItemSpec::build)
    .collect()
}
