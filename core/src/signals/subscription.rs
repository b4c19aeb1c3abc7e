//! Subscription detector: recurring merchant charges.
//!
//! A merchant becomes a subscription when it charged the user at least
//! three times in the 90 days before the reference date and the median
//! gap between charges is weekly or monthly. The lookback is fixed and
//! does not follow the window; only the spend share uses window totals.

use super::{day_gaps, mean, median, ratio_or_zero};
use crate::{model::Transaction, window::WindowedData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Constants ────────────────────────────────────────────────────────────────

pub const LOOKBACK_DAYS: i64 = 90;
pub const MIN_OCCURRENCES: usize = 3;

const MONTHLY_GAP_DAYS: (f64, f64) = (25.0, 35.0);
const WEEKLY_GAP_DAYS: (f64, f64) = (5.0, 9.0);
const WEEKS_PER_MONTH: f64 = 52.0 / 12.0;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Monthly,
    Weekly,
    Irregular,
}

impl Cadence {
    pub fn from_median_gap(gap_days: f64) -> Self {
        if (MONTHLY_GAP_DAYS.0..=MONTHLY_GAP_DAYS.1).contains(&gap_days) {
            Cadence::Monthly
        } else if (WEEKLY_GAP_DAYS.0..=WEEKLY_GAP_DAYS.1).contains(&gap_days) {
            Cadence::Weekly
        } else {
            Cadence::Irregular
        }
    }

    /// Multiplier taking one charge to a monthly amount.
    pub fn monthly_factor(&self) -> f64 {
        match self {
            Cadence::Monthly   => 1.0,
            Cadence::Weekly    => WEEKS_PER_MONTH,
            Cadence::Irregular => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSubscription {
    pub merchant:          String,
    pub cadence:           Cadence,
    pub average_amount:    f64,
    pub transaction_count: usize,
    pub last_charge_date:  NaiveDate,
    pub median_gap_days:   f64,
}

impl DetectedSubscription {
    pub fn monthly_amount(&self) -> f64 {
        self.average_amount * self.cadence.monthly_factor()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSignal {
    pub subscription_count:      usize,
    pub monthly_recurring_spend: f64,
    pub total_spend_in_window:   f64,
    pub subscription_share:      f64,
    pub subscriptions:           Vec<DetectedSubscription>,
    pub data_complete:           bool,
}

// ── Detection ────────────────────────────────────────────────────────────────

pub fn detect(data: &WindowedData<'_>) -> SubscriptionSignal {
    let lookback = data.lookback(LOOKBACK_DAYS);
    let total_spend_in_window = data.spend_totals().total_spend;

    if lookback.is_empty() {
        log::debug!(
            "user={} window={} subscription: no transactions in lookback",
            data.user_id(),
            data.window().label()
        );
        return SubscriptionSignal {
            total_spend_in_window,
            ..SubscriptionSignal::default()
        };
    }

    // BTreeMap keeps the output ordered by merchant for reproducibility.
    let mut by_merchant: BTreeMap<String, Vec<&Transaction>> = BTreeMap::new();
    for txn in lookback.into_iter().filter(|t| t.is_spend()) {
        if let Some(merchant) = txn.merchant_name.as_deref().map(str::trim) {
            if !merchant.is_empty() {
                by_merchant.entry(merchant.to_string()).or_default().push(txn);
            }
        }
    }

    let subscriptions: Vec<DetectedSubscription> = by_merchant
        .into_iter()
        .filter_map(|(merchant, txns)| classify(merchant, &txns))
        .collect();

    let monthly_recurring_spend: f64 = subscriptions.iter().map(|s| s.monthly_amount()).sum();

    SubscriptionSignal {
        subscription_count: subscriptions.len(),
        monthly_recurring_spend,
        total_spend_in_window,
        subscription_share: ratio_or_zero(monthly_recurring_spend, total_spend_in_window),
        subscriptions,
        data_complete: true,
    }
}

/// Returns a confirmed subscription, or `None` for too few charges or an
/// irregular cadence. `txns` is chronological.
fn classify(merchant: String, txns: &[&Transaction]) -> Option<DetectedSubscription> {
    if txns.len() < MIN_OCCURRENCES {
        return None;
    }
    let dates: Vec<NaiveDate> = txns.iter().map(|t| t.posted_date).collect();
    let median_gap_days = median(&day_gaps(&dates))?;
    let cadence = Cadence::from_median_gap(median_gap_days);
    if cadence == Cadence::Irregular {
        return None;
    }
    let amounts: Vec<f64> = txns.iter().map(|t| t.amount).collect();
    Some(DetectedSubscription {
        merchant,
        cadence,
        average_amount: mean(&amounts)?,
        transaction_count: txns.len(),
        last_charge_date: *dates.last()?,
        median_gap_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_boundaries_are_inclusive() {
        assert_eq!(Cadence::from_median_gap(25.0), Cadence::Monthly);
        assert_eq!(Cadence::from_median_gap(35.0), Cadence::Monthly);
        assert_eq!(Cadence::from_median_gap(5.0), Cadence::Weekly);
        assert_eq!(Cadence::from_median_gap(9.0), Cadence::Weekly);
        assert_eq!(Cadence::from_median_gap(14.0), Cadence::Irregular);
        assert_eq!(Cadence::from_median_gap(36.0), Cadence::Irregular);
    }
}
