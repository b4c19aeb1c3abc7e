//! Savings detector: reserves, inflows, and growth.
//!
//! Growth needs at least two in-window balance observations for a savings
//! account. Without them the rate is zero and the record is marked
//! incomplete; the balance-derived fields are still filled in.

use super::ratio_or_zero;
use crate::window::WindowedData;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavingsSignal {
    pub has_savings_accounts:  bool,
    pub savings_account_count: usize,
    pub total_savings_balance: f64,
    pub emergency_fund_months: f64,
    /// Fractional change, e.g. 0.05 for +5% over the window.
    pub savings_growth_rate:   f64,
    pub net_savings_inflow:    f64,
    pub monthly_savings_inflow: f64,
    pub data_complete:         bool,
}

pub fn detect(data: &WindowedData<'_>) -> SavingsSignal {
    let savings: Vec<_> = data.savings_accounts().collect();
    let has_savings_accounts = !savings.is_empty();
    let total_savings_balance: f64 = savings.iter().map(|a| a.balance_current).sum();
    let emergency_fund_months = ratio_or_zero(
        total_savings_balance,
        data.spend_totals().avg_monthly_expenses,
    );

    let savings_ids: Vec<&str> = savings.iter().map(|a| a.account_id.as_str()).collect();
    // Deposits are negative amounts, so flip the sign to get inflow.
    let net_savings_inflow: f64 = -data
        .transactions()
        .iter()
        .filter(|t| savings_ids.contains(&t.account_id.as_str()))
        .map(|t| t.amount)
        .sum::<f64>();

    let growth = growth_rate(data, &savings_ids);
    if growth.is_none() {
        log::debug!(
            "user={} window={} savings: no in-window balance history, growth rate unavailable",
            data.user_id(),
            data.window().label()
        );
    }

    SavingsSignal {
        has_savings_accounts,
        savings_account_count: savings.len(),
        total_savings_balance,
        emergency_fund_months,
        savings_growth_rate: growth.unwrap_or(0.0),
        net_savings_inflow,
        monthly_savings_inflow: net_savings_inflow / data.window().months(),
        data_complete: has_savings_accounts && growth.is_some(),
    }
}

/// Earliest vs. latest in-window observation, summed over savings
/// accounts observed on at least two dates. `None` when nothing in the
/// window supports a measurement.
fn growth_rate(data: &WindowedData<'_>, savings_ids: &[&str]) -> Option<f64> {
    let history = data.balance_history()?;

    // account → (first date, earliest balance, last date, latest balance);
    // history is date-ordered.
    let mut span: BTreeMap<&str, (NaiveDate, f64, NaiveDate, f64)> = BTreeMap::new();
    for obs in history.iter().filter(|o| savings_ids.contains(&o.account_id.as_str())) {
        span.entry(obs.account_id.as_str())
            .and_modify(|(_, _, last, latest)| {
                *last = obs.as_of;
                *latest = obs.balance;
            })
            .or_insert((obs.as_of, obs.balance, obs.as_of, obs.balance));
    }

    let measured: Vec<(f64, f64)> = span
        .values()
        .filter(|(first, _, last, _)| first < last)
        .map(|(_, earliest, _, latest)| (*earliest, *latest))
        .collect();
    if measured.is_empty() {
        return None;
    }
    let earliest: f64 = measured.iter().map(|(e, _)| e).sum();
    let latest: f64 = measured.iter().map(|(_, l)| l).sum();
    Some(ratio_or_zero(latest - earliest, earliest))
}
