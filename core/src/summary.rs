//! Behavioral summary assembly.
//!
//! Runs the four detectors over a window and freezes the results into one
//! `BehavioralSummary`. The summary is the only thing persona matching and
//! rationale rendering ever read; detectors are not re-run downstream.

use crate::{
    error::PipelineResult,
    model::UserData,
    signals::{
        CreditSignal, IncomeSignal, SavingsSignal, SignalKind, SignalRecord, SubscriptionSignal,
    },
    types::{UserId, WindowDays},
    window::{self, SpendTotals, TimeWindow, WindowedData},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the four detectors are scheduled within one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    /// One scoped thread per detector.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralSummary {
    pub user_id:           UserId,
    pub window:            TimeWindow,
    pub generated_at:      DateTime<Utc>,
    pub history_days:      i64,
    pub spend:             SpendTotals,
    pub subscription:      SubscriptionSignal,
    pub income:            IncomeSignal,
    pub credit:            CreditSignal,
    pub savings:           SavingsSignal,
    pub data_completeness: BTreeMap<SignalKind, bool>,
    pub fallbacks_applied: Vec<SignalKind>,
}

/// Both windows for one user, computed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPair {
    pub short_term: BehavioralSummary,
    pub long_term:  BehavioralSummary,
}

impl SummaryPair {
    pub fn for_window(&self, window_days: WindowDays) -> Option<&BehavioralSummary> {
        if self.short_term.window.window_days == window_days {
            Some(&self.short_term)
        } else if self.long_term.window.window_days == window_days {
            Some(&self.long_term)
        } else {
            None
        }
    }
}

impl BehavioralSummary {
    /// Names of the signals that carry real data, in fixed order.
    pub fn signals_detected(&self) -> Vec<SignalKind> {
        SignalKind::ALL
            .into_iter()
            .filter(|k| self.data_completeness.get(k).copied().unwrap_or(false))
            .collect()
    }

    pub fn is_complete(&self, kind: SignalKind) -> bool {
        self.data_completeness.get(&kind).copied().unwrap_or(false)
    }
}

/// Assemble both the 30-day and 180-day summaries.
pub fn assemble(
    data: &UserData,
    reference_date: NaiveDate,
    generated_at: DateTime<Utc>,
    mode: ExecutionMode,
) -> PipelineResult<SummaryPair> {
    Ok(SummaryPair {
        short_term: assemble_window(data, 30, reference_date, generated_at, mode)?,
        long_term:  assemble_window(data, 180, reference_date, generated_at, mode)?,
    })
}

/// Assemble a single window's summary.
pub fn assemble_window(
    data: &UserData,
    window_days: WindowDays,
    reference_date: NaiveDate,
    generated_at: DateTime<Utc>,
    mode: ExecutionMode,
) -> PipelineResult<BehavioralSummary> {
    let windowed = window::aggregate(data, window_days, reference_date)?;
    let records = run_detectors(&windowed, mode);
    Ok(merge(&windowed, records, generated_at))
}

fn run_detectors(windowed: &WindowedData<'_>, mode: ExecutionMode) -> Vec<SignalRecord> {
    match mode {
        ExecutionMode::Sequential => SignalKind::ALL
            .into_iter()
            .map(|kind| kind.detect(windowed))
            .collect(),
        ExecutionMode::Parallel => std::thread::scope(|scope| {
            let handles: Vec<_> = SignalKind::ALL
                .into_iter()
                .map(|kind| (kind, scope.spawn(move || kind.detect(windowed))))
                .collect();
            handles
                .into_iter()
                .map(|(kind, handle)| match handle.join() {
                    Ok(record) => record,
                    // A panicking detector degrades like any other failure.
                    Err(_) => {
                        log::error!(
                            "user={} window={} detector '{}' panicked, using fallback",
                            windowed.user_id(),
                            windowed.window().label(),
                            kind.name()
                        );
                        empty_record(kind)
                    }
                })
                .collect()
        }),
    }
}

fn empty_record(kind: SignalKind) -> SignalRecord {
    match kind {
        SignalKind::Subscription => SignalRecord::Subscription(SubscriptionSignal::default()),
        SignalKind::Income       => SignalRecord::Income(IncomeSignal::default()),
        SignalKind::Credit       => SignalRecord::Credit(CreditSignal::default()),
        SignalKind::Savings      => SignalRecord::Savings(SavingsSignal::default()),
    }
}

fn merge(
    windowed: &WindowedData<'_>,
    records: Vec<SignalRecord>,
    generated_at: DateTime<Utc>,
) -> BehavioralSummary {
    let mut data_completeness = BTreeMap::new();
    let mut fallbacks_applied = Vec::new();
    for record in &records {
        data_completeness.insert(record.kind(), record.data_complete());
        if !record.data_complete() {
            fallbacks_applied.push(record.kind());
        }
    }
    fallbacks_applied.sort();

    let mut subscription = SubscriptionSignal::default();
    let mut income = IncomeSignal::default();
    let mut credit = CreditSignal::default();
    let mut savings = SavingsSignal::default();
    for record in records {
        match record {
            SignalRecord::Subscription(s) => subscription = s,
            SignalRecord::Income(s)       => income = s,
            SignalRecord::Credit(s)       => credit = s,
            SignalRecord::Savings(s)      => savings = s,
        }
    }

    if !fallbacks_applied.is_empty() {
        log::info!(
            "user={} window={} fallbacks applied: {:?}",
            windowed.user_id(),
            windowed.window().label(),
            fallbacks_applied
        );
    }

    BehavioralSummary {
        user_id: windowed.user_id().to_string(),
        window: windowed.window(),
        generated_at,
        history_days: windowed.history_days(),
        spend: windowed.spend_totals(),
        subscription,
        income,
        credit,
        savings,
        data_completeness,
        fallbacks_applied,
    }
}

// ── Named signal fields ──────────────────────────────────────────────────────

/// How a field's value is displayed to users and in citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldUnit {
    Percentage,
    Currency,
    Count,
    Months,
    Days,
    Ratio,
    Flag,
}

impl FieldUnit {
    pub fn format(&self, value: f64) -> String {
        match self {
            Self::Percentage => format!("{:.0}%", value * 100.0),
            Self::Currency   => format_currency(value),
            Self::Count      => format!("{:.0}", value),
            Self::Months     => format!("{:.1}", value),
            Self::Days       => format!("{:.0}", value),
            Self::Ratio      => format!("{:.2}", value),
            Self::Flag       => if value != 0.0 { "yes".into() } else { "no".into() },
        }
    }
}

/// `$1,234.56`; negative values keep the sign in front of the symbol.
pub fn format_currency(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Every summary field a persona criterion or template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalField {
    SubscriptionCount,
    MonthlyRecurringSpend,
    SubscriptionShare,
    PaymentMedianGapDays,
    IncomeVariabilityCv,
    HasRegularIncome,
    CashFlowBufferMonths,
    AverageMonthlyIncome,
    CreditCardCount,
    AggregateUtilization,
    MaxUtilization,
    HighUtilizationCount,
    AnyOverdue,
    MinimumPaymentOnly,
    HasInterestCharges,
    InterestCharged,
    TotalCreditBalance,
    HasSavingsAccounts,
    TotalSavingsBalance,
    EmergencyFundMonths,
    SavingsGrowthRate,
    MonthlySavingsInflow,
    TotalSpend,
    AvgMonthlyExpenses,
}

impl SignalField {
    pub const ALL: [SignalField; 24] = [
        Self::SubscriptionCount,
        Self::MonthlyRecurringSpend,
        Self::SubscriptionShare,
        Self::PaymentMedianGapDays,
        Self::IncomeVariabilityCv,
        Self::HasRegularIncome,
        Self::CashFlowBufferMonths,
        Self::AverageMonthlyIncome,
        Self::CreditCardCount,
        Self::AggregateUtilization,
        Self::MaxUtilization,
        Self::HighUtilizationCount,
        Self::AnyOverdue,
        Self::MinimumPaymentOnly,
        Self::HasInterestCharges,
        Self::InterestCharged,
        Self::TotalCreditBalance,
        Self::HasSavingsAccounts,
        Self::TotalSavingsBalance,
        Self::EmergencyFundMonths,
        Self::SavingsGrowthRate,
        Self::MonthlySavingsInflow,
        Self::TotalSpend,
        Self::AvgMonthlyExpenses,
    ];

    /// Placeholder / citation key, e.g. `aggregate_utilization`.
    pub fn key(&self) -> &'static str {
        match self {
            Self::SubscriptionCount     => "subscription_count",
            Self::MonthlyRecurringSpend => "monthly_recurring_spend",
            Self::SubscriptionShare     => "subscription_share",
            Self::PaymentMedianGapDays  => "payment_median_gap_days",
            Self::IncomeVariabilityCv   => "income_variability_cv",
            Self::HasRegularIncome      => "has_regular_income",
            Self::CashFlowBufferMonths  => "cash_flow_buffer_months",
            Self::AverageMonthlyIncome  => "average_monthly_income",
            Self::CreditCardCount       => "credit_card_count",
            Self::AggregateUtilization  => "aggregate_utilization",
            Self::MaxUtilization        => "max_utilization",
            Self::HighUtilizationCount  => "high_utilization_count",
            Self::AnyOverdue            => "any_overdue",
            Self::MinimumPaymentOnly    => "minimum_payment_only",
            Self::HasInterestCharges    => "has_interest_charges",
            Self::InterestCharged       => "interest_charged",
            Self::TotalCreditBalance    => "total_credit_balance",
            Self::HasSavingsAccounts    => "has_savings_accounts",
            Self::TotalSavingsBalance   => "total_savings_balance",
            Self::EmergencyFundMonths   => "emergency_fund_months",
            Self::SavingsGrowthRate     => "savings_growth_rate",
            Self::MonthlySavingsInflow  => "monthly_savings_inflow",
            Self::TotalSpend            => "total_spend",
            Self::AvgMonthlyExpenses    => "avg_monthly_expenses",
        }
    }

    /// Short human label used in evidence strings.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SubscriptionCount     => "subscriptions",
            Self::MonthlyRecurringSpend => "recurring spend",
            Self::SubscriptionShare     => "subscription share",
            Self::PaymentMedianGapDays  => "median pay gap (days)",
            Self::IncomeVariabilityCv   => "income variability",
            Self::HasRegularIncome      => "regular income",
            Self::CashFlowBufferMonths  => "cash-flow buffer (months)",
            Self::AverageMonthlyIncome  => "monthly income",
            Self::CreditCardCount       => "credit cards",
            Self::AggregateUtilization  => "utilization",
            Self::MaxUtilization        => "highest card utilization",
            Self::HighUtilizationCount  => "cards at or above 50%",
            Self::AnyOverdue            => "overdue",
            Self::MinimumPaymentOnly    => "minimum payments only",
            Self::HasInterestCharges    => "interest charges",
            Self::InterestCharged       => "interest charged",
            Self::TotalCreditBalance    => "card balances",
            Self::HasSavingsAccounts    => "savings account",
            Self::TotalSavingsBalance   => "savings balance",
            Self::EmergencyFundMonths   => "emergency fund (months)",
            Self::SavingsGrowthRate     => "savings growth",
            Self::MonthlySavingsInflow  => "monthly savings inflow",
            Self::TotalSpend            => "total spend",
            Self::AvgMonthlyExpenses    => "monthly expenses",
        }
    }

    pub fn unit(&self) -> FieldUnit {
        use FieldUnit::*;
        match self {
            Self::SubscriptionCount | Self::CreditCardCount | Self::HighUtilizationCount => Count,
            Self::MonthlyRecurringSpend
            | Self::AverageMonthlyIncome
            | Self::InterestCharged
            | Self::TotalCreditBalance
            | Self::TotalSavingsBalance
            | Self::MonthlySavingsInflow
            | Self::TotalSpend
            | Self::AvgMonthlyExpenses => Currency,
            Self::SubscriptionShare
            | Self::AggregateUtilization
            | Self::MaxUtilization
            | Self::SavingsGrowthRate => Percentage,
            Self::PaymentMedianGapDays => Days,
            Self::IncomeVariabilityCv => Ratio,
            Self::CashFlowBufferMonths | Self::EmergencyFundMonths => Months,
            Self::HasRegularIncome
            | Self::AnyOverdue
            | Self::MinimumPaymentOnly
            | Self::HasInterestCharges
            | Self::HasSavingsAccounts => Flag,
        }
    }

    /// Numeric value of this field; flags read as 1.0 / 0.0.
    pub fn value(&self, s: &BehavioralSummary) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Self::SubscriptionCount     => s.subscription.subscription_count as f64,
            Self::MonthlyRecurringSpend => s.subscription.monthly_recurring_spend,
            Self::SubscriptionShare     => s.subscription.subscription_share,
            Self::PaymentMedianGapDays  => s.income.median_gap_days,
            Self::IncomeVariabilityCv   => s.income.income_variability_cv,
            Self::HasRegularIncome      => flag(s.income.has_regular_income),
            Self::CashFlowBufferMonths  => s.income.cash_flow_buffer_months,
            Self::AverageMonthlyIncome  => s.income.average_monthly_income,
            Self::CreditCardCount       => s.credit.card_count as f64,
            Self::AggregateUtilization  => s.credit.aggregate_utilization,
            Self::MaxUtilization        => s.credit.max_utilization,
            Self::HighUtilizationCount  => s.credit.high_utilization_count as f64,
            Self::AnyOverdue            => flag(s.credit.any_overdue),
            Self::MinimumPaymentOnly    => flag(s.credit.minimum_payment_only),
            Self::HasInterestCharges    => flag(s.credit.has_interest_charges),
            Self::InterestCharged       => s.credit.interest_charged,
            Self::TotalCreditBalance    => s.credit.total_balance,
            Self::HasSavingsAccounts    => flag(s.savings.has_savings_accounts),
            Self::TotalSavingsBalance   => s.savings.total_savings_balance,
            Self::EmergencyFundMonths   => s.savings.emergency_fund_months,
            Self::SavingsGrowthRate     => s.savings.savings_growth_rate,
            Self::MonthlySavingsInflow  => s.savings.monthly_savings_inflow,
            Self::TotalSpend            => s.spend.total_spend,
            Self::AvgMonthlyExpenses    => s.spend.avg_monthly_expenses,
        }
    }

    /// The detector this field comes from, if any.
    pub fn source(&self) -> Option<SignalKind> {
        match self {
            Self::SubscriptionCount | Self::MonthlyRecurringSpend | Self::SubscriptionShare => {
                Some(SignalKind::Subscription)
            }
            Self::PaymentMedianGapDays
            | Self::IncomeVariabilityCv
            | Self::HasRegularIncome
            | Self::CashFlowBufferMonths
            | Self::AverageMonthlyIncome => Some(SignalKind::Income),
            Self::CreditCardCount
            | Self::AggregateUtilization
            | Self::MaxUtilization
            | Self::HighUtilizationCount
            | Self::AnyOverdue
            | Self::MinimumPaymentOnly
            | Self::HasInterestCharges
            | Self::InterestCharged
            | Self::TotalCreditBalance => Some(SignalKind::Credit),
            Self::HasSavingsAccounts
            | Self::TotalSavingsBalance
            | Self::EmergencyFundMonths
            | Self::SavingsGrowthRate
            | Self::MonthlySavingsInflow => Some(SignalKind::Savings),
            Self::TotalSpend | Self::AvgMonthlyExpenses => None,
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn display(&self, s: &BehavioralSummary) -> String {
        self.unit().format(self.value(s))
    }
}
