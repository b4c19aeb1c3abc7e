//! Income detector: pay frequency and stability.
//!
//! Only income-categorized deposits inside the window count. The cash-flow
//! buffer divides the checking balance by the window's average monthly
//! expense, taken from the aggregator's spend totals.

use super::{day_gaps, mean, median, ratio_or_zero, std_dev};
use crate::window::WindowedData;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Coefficient of variation below which income counts as stable.
pub const REGULAR_INCOME_MAX_CV: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    Weekly,
    Biweekly,
    Monthly,
    Irregular,
    #[default]
    Unknown,
}

impl PaymentFrequency {
    pub fn from_median_gap(gap_days: f64) -> Self {
        match gap_days {
            g if (5.0..=9.0).contains(&g)   => Self::Weekly,
            g if (10.0..=18.0).contains(&g) => Self::Biweekly,
            g if (25.0..=35.0).contains(&g) => Self::Monthly,
            _ => Self::Irregular,
        }
    }

    /// True for a recognised, repeating schedule.
    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Weekly | Self::Biweekly | Self::Monthly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly    => "weekly",
            Self::Biweekly  => "biweekly",
            Self::Monthly   => "monthly",
            Self::Irregular => "irregular",
            Self::Unknown   => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncomeSignal {
    pub payment_frequency:       PaymentFrequency,
    pub deposit_count:           usize,
    pub total_income:            f64,
    pub average_deposit:         f64,
    pub average_monthly_income:  f64,
    /// 0 when fewer than two deposits.
    pub median_gap_days:         f64,
    pub income_variability_cv:   f64,
    pub has_regular_income:      bool,
    pub cash_flow_buffer_months: f64,
    pub last_deposit_date:       Option<NaiveDate>,
    pub data_complete:           bool,
}

pub fn detect(data: &WindowedData<'_>) -> IncomeSignal {
    let deposits: Vec<_> = data.transactions().iter().filter(|t| t.is_income()).collect();
    let cash_flow_buffer_months = ratio_or_zero(
        data.checking_balance(),
        data.spend_totals().avg_monthly_expenses,
    );

    if deposits.is_empty() {
        log::debug!(
            "user={} window={} income: no income deposits",
            data.user_id(),
            data.window().label()
        );
        return IncomeSignal {
            cash_flow_buffer_months,
            ..IncomeSignal::default()
        };
    }

    let amounts: Vec<f64> = deposits.iter().map(|t| t.amount.abs()).collect();
    let dates: Vec<NaiveDate> = deposits.iter().map(|t| t.posted_date).collect();
    let total_income: f64 = amounts.iter().sum();
    let average_deposit = mean(&amounts).unwrap_or(0.0);

    let (payment_frequency, median_gap_days) = if deposits.len() < 2 {
        (PaymentFrequency::Unknown, 0.0)
    } else {
        let gap = median(&day_gaps(&dates)).unwrap_or(0.0);
        (PaymentFrequency::from_median_gap(gap), gap)
    };

    let income_variability_cv = if deposits.len() < 2 {
        0.0
    } else {
        ratio_or_zero(std_dev(&amounts).unwrap_or(0.0), average_deposit)
    };

    IncomeSignal {
        payment_frequency,
        deposit_count: deposits.len(),
        total_income,
        average_deposit,
        average_monthly_income: total_income / data.window().months(),
        median_gap_days,
        income_variability_cv,
        has_regular_income: income_variability_cv < REGULAR_INCOME_MAX_CV
            && payment_frequency.is_regular(),
        cash_flow_buffer_months,
        last_deposit_date: dates.last().copied(),
        data_complete: deposits.len() >= 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_bands() {
        assert_eq!(PaymentFrequency::from_median_gap(7.0), PaymentFrequency::Weekly);
        assert_eq!(PaymentFrequency::from_median_gap(14.0), PaymentFrequency::Biweekly);
        assert_eq!(PaymentFrequency::from_median_gap(15.5), PaymentFrequency::Biweekly);
        assert_eq!(PaymentFrequency::from_median_gap(30.0), PaymentFrequency::Monthly);
        assert_eq!(PaymentFrequency::from_median_gap(21.0), PaymentFrequency::Irregular);
        assert_eq!(PaymentFrequency::from_median_gap(60.0), PaymentFrequency::Irregular);
    }
}
