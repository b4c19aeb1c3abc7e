//! Time-window aggregation.
//!
//! A window is a closed date range `[reference_date - window_days,
//! reference_date]`. Transactions are sliced by `posted_date`; accounts
//! are never sliced; detectors always see current balances.
//!
//! RULE: The reference date is always explicit. Nothing in here reads
//! the wall clock.

use crate::{
    error::{PipelineError, PipelineResult},
    model::{Account, BalanceObservation, Transaction, UserData},
    types::{WindowDays, SUPPORTED_WINDOWS},
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days per "month" when normalising window totals.
pub const DAYS_PER_MONTH: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub window_days:    WindowDays,
    pub reference_date: NaiveDate,
}

impl TimeWindow {
    pub fn new(window_days: WindowDays, reference_date: NaiveDate) -> PipelineResult<Self> {
        if !SUPPORTED_WINDOWS.contains(&window_days) {
            return Err(PipelineError::InvalidWindow { window_days });
        }
        Ok(Self { window_days, reference_date })
    }

    pub fn start_date(&self) -> NaiveDate {
        self.reference_date - Duration::days(i64::from(self.window_days))
    }

    /// Inclusive at both ends.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date() && date <= self.reference_date
    }

    /// Window length expressed in 30-day months.
    pub fn months(&self) -> f64 {
        f64::from(self.window_days) / DAYS_PER_MONTH
    }

    pub fn label(&self) -> String {
        format!("{}d", self.window_days)
    }
}

/// Spend baseline for a window, computed once by the aggregator and
/// shared by every detector that needs an expense denominator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendTotals {
    pub total_spend:          f64,
    pub avg_monthly_expenses: f64,
}

/// A read-only view of one user's data through one window.
#[derive(Debug)]
pub struct WindowedData<'a> {
    window:       TimeWindow,
    data:         &'a UserData,
    transactions: Vec<&'a Transaction>,
    spend:        SpendTotals,
}

/// Slice a user's history into a window.
///
/// Fails only on an unsupported `window_days`.
pub fn aggregate<'a>(
    data: &'a UserData,
    window_days: WindowDays,
    reference_date: NaiveDate,
) -> PipelineResult<WindowedData<'a>> {
    let window = TimeWindow::new(window_days, reference_date)?;
    Ok(WindowedData::new(data, window))
}

impl<'a> WindowedData<'a> {
    pub fn new(data: &'a UserData, window: TimeWindow) -> Self {
        let mut transactions: Vec<&Transaction> = data
            .transactions
            .iter()
            .filter(|t| window.contains(t.posted_date))
            .collect();
        sort_chronologically(&mut transactions);

        let total_spend: f64 = transactions
            .iter()
            .filter(|t| t.is_spend())
            .map(|t| t.amount)
            .sum();
        let spend = SpendTotals {
            total_spend,
            avg_monthly_expenses: total_spend / window.months(),
        };

        Self { window, data, transactions, spend }
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn user_id(&self) -> &str {
        self.data.user_id()
    }

    /// In-window transactions, oldest first (ties by id).
    pub fn transactions(&self) -> &[&'a Transaction] {
        &self.transactions
    }

    /// Transactions in `[reference_date - days, reference_date]`, drawn from
    /// the full history rather than the window. Oldest first.
    pub fn lookback(&self, days: i64) -> Vec<&'a Transaction> {
        let end = self.window.reference_date;
        let start = end - Duration::days(days);
        let mut out: Vec<&Transaction> = self
            .data
            .transactions
            .iter()
            .filter(|t| t.posted_date >= start && t.posted_date <= end)
            .collect();
        sort_chronologically(&mut out);
        out
    }

    pub fn accounts(&self) -> &'a [Account] {
        &self.data.accounts
    }

    pub fn credit_accounts(&self) -> impl Iterator<Item = &'a Account> {
        self.data.accounts.iter().filter(|a| a.is_credit())
    }

    pub fn savings_accounts(&self) -> impl Iterator<Item = &'a Account> {
        self.data.accounts.iter().filter(|a| a.is_savings())
    }

    pub fn checking_balance(&self) -> f64 {
        self.data
            .accounts
            .iter()
            .filter(|a| a.is_checking())
            .map(|a| a.balance_current)
            .sum()
    }

    /// In-window balance observations, or `None` when the balance
    /// history collaborator supplied nothing.
    pub fn balance_history(&self) -> Option<Vec<&'a BalanceObservation>> {
        let history = self.data.balance_history.as_ref()?;
        let mut out: Vec<&BalanceObservation> = history
            .iter()
            .filter(|o| self.window.contains(o.as_of))
            .collect();
        out.sort_by(|a, b| a.as_of.cmp(&b.as_of).then_with(|| a.account_id.cmp(&b.account_id)));
        Some(out)
    }

    pub fn spend_totals(&self) -> SpendTotals {
        self.spend
    }

    /// Days between the earliest known data point and the reference date.
    pub fn history_days(&self) -> i64 {
        history_days(self.data, self.window.reference_date)
    }
}

/// Days of history available as of `reference_date`. Zero when nothing
/// is known about the user.
pub fn history_days(data: &UserData, reference_date: NaiveDate) -> i64 {
    let earliest_txn = data
        .transactions
        .iter()
        .map(|t| t.posted_date)
        .filter(|d| *d <= reference_date)
        .min();
    let earliest = match (data.profile.history_start, earliest_txn) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    earliest
        .map(|d| (reference_date - d).num_days().max(0))
        .unwrap_or(0)
}

fn sort_chronologically(txns: &mut [&Transaction]) {
    txns.sort_by(|a, b| a.posted_date.cmp(&b.posted_date).then_with(|| a.id.cmp(&b.id)));
}
