//! Behavioral signal detectors.
//!
//! RULE: There are exactly four detectors. Each one is a pure function of
//! a `WindowedData` view and returns a freshly built record. Detectors
//! never fail: missing inputs produce a zero-valued record with
//! `data_complete = false`.

pub mod credit;
pub mod income;
pub mod savings;
pub mod subscription;

pub use credit::{CardUtilization, CreditSignal};
pub use income::{IncomeSignal, PaymentFrequency};
pub use savings::SavingsSignal;
pub use subscription::{Cadence, DetectedSubscription, SubscriptionSignal};

use crate::window::WindowedData;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Subscription,
    Income,
    Credit,
    Savings,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Subscription,
        SignalKind::Income,
        SignalKind::Credit,
        SignalKind::Savings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Income       => "income",
            Self::Credit       => "credit",
            Self::Savings      => "savings",
        }
    }

    /// Run this detector over a window.
    pub fn detect(self, data: &WindowedData<'_>) -> SignalRecord {
        match self {
            Self::Subscription => SignalRecord::Subscription(subscription::detect(data)),
            Self::Income       => SignalRecord::Income(income::detect(data)),
            Self::Credit       => SignalRecord::Credit(credit::detect(data)),
            Self::Savings      => SignalRecord::Savings(savings::detect(data)),
        }
    }
}

/// Output of one detector run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalRecord {
    Subscription(SubscriptionSignal),
    Income(IncomeSignal),
    Credit(CreditSignal),
    Savings(SavingsSignal),
}

impl SignalRecord {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Subscription(_) => SignalKind::Subscription,
            Self::Income(_)       => SignalKind::Income,
            Self::Credit(_)       => SignalKind::Credit,
            Self::Savings(_)      => SignalKind::Savings,
        }
    }

    pub fn data_complete(&self) -> bool {
        match self {
            Self::Subscription(s) => s.data_complete,
            Self::Income(s)       => s.data_complete,
            Self::Credit(s)       => s.data_complete,
            Self::Savings(s)      => s.data_complete,
        }
    }
}

// ── Shared statistics ─────────────────────────────────────────────────────────

/// Median of an unsorted slice. `None` when empty.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Gaps in days between consecutive dates. Input must be sorted.
pub(crate) fn day_gaps(dates: &[chrono::NaiveDate]) -> Vec<f64> {
    dates
        .windows(2)
        .map(|w| (w[1] - w[0]).num_days() as f64)
        .collect()
}

/// `numerator / denominator`, or 0 when the denominator is not positive.
pub(crate) fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
