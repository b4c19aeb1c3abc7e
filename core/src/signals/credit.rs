//! Credit detector: card utilization and repayment stress.
//!
//! Aggregate utilization is total balance over total limit, weighted by
//! limit. It is never the mean of per-card rates.
//!
//! Zero-limit cards (and cards with no limit at all) are counted in
//! `card_count` but contribute nothing to the aggregate and carry no
//! per-card rate.

use super::ratio_or_zero;
use crate::{model::Account, window::WindowedData};
use serde::{Deserialize, Serialize};

pub const HIGH_UTILIZATION: f64 = 0.50;
pub const VERY_HIGH_UTILIZATION: f64 = 0.80;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardUtilization {
    pub account_id:               String,
    pub balance:                  f64,
    pub limit:                    Option<f64>,
    /// `None` for cards without a positive limit.
    pub utilization_rate:         Option<f64>,
    pub is_high_utilization:      bool,
    pub is_very_high_utilization: bool,
    pub is_overdue:               bool,
    pub minimum_payment_only:     bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreditSignal {
    pub card_count:             usize,
    pub total_balance:          f64,
    pub total_limit:            f64,
    pub aggregate_utilization:  f64,
    pub max_utilization:        f64,
    pub high_utilization_count: usize,
    pub any_overdue:            bool,
    pub minimum_payment_only:   bool,
    pub has_interest_charges:   bool,
    pub interest_charged:       f64,
    pub cards:                  Vec<CardUtilization>,
    pub data_complete:          bool,
}

pub fn detect(data: &WindowedData<'_>) -> CreditSignal {
    let mut accounts: Vec<&Account> = data.credit_accounts().collect();
    if accounts.is_empty() {
        log::debug!(
            "user={} window={} credit: no credit accounts",
            data.user_id(),
            data.window().label()
        );
        return CreditSignal::default();
    }
    accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    let cards: Vec<CardUtilization> = accounts.iter().map(|a| card_utilization(a)).collect();

    let (total_balance, total_limit) = accounts
        .iter()
        .filter_map(|a| match a.balance_limit {
            Some(limit) if limit > 0.0 => Some((a.balance_current, limit)),
            _ => None,
        })
        .fold((0.0, 0.0), |(b, l), (balance, limit)| (b + balance, l + limit));

    let credit_ids: Vec<&str> = accounts.iter().map(|a| a.account_id.as_str()).collect();
    let interest_charged: f64 = data
        .transactions()
        .iter()
        .filter(|t| t.is_interest_charge() && credit_ids.contains(&t.account_id.as_str()))
        .map(|t| t.amount)
        .sum();

    CreditSignal {
        card_count: cards.len(),
        total_balance,
        total_limit,
        aggregate_utilization: ratio_or_zero(total_balance, total_limit),
        max_utilization: cards
            .iter()
            .filter_map(|c| c.utilization_rate)
            .fold(0.0, f64::max),
        high_utilization_count: cards.iter().filter(|c| c.is_high_utilization).count(),
        any_overdue: cards.iter().any(|c| c.is_overdue),
        minimum_payment_only: cards.iter().any(|c| c.minimum_payment_only),
        has_interest_charges: interest_charged > 0.0,
        interest_charged,
        cards,
        data_complete: true,
    }
}

fn card_utilization(account: &Account) -> CardUtilization {
    let utilization_rate = match account.balance_limit {
        Some(limit) if limit > 0.0 => Some(account.balance_current / limit),
        _ => None,
    };
    let rate = utilization_rate.unwrap_or(0.0);

    let minimum_payment_only = match (account.last_payment_amount, account.minimum_payment_amount) {
        (Some(paid), Some(minimum)) => minimum > 0.0 && paid <= minimum,
        _ => false,
    };

    CardUtilization {
        account_id: account.account_id.clone(),
        balance: account.balance_current,
        limit: account.balance_limit,
        utilization_rate,
        is_high_utilization: utilization_rate.is_some() && rate >= HIGH_UTILIZATION,
        is_very_high_utilization: utilization_rate.is_some() && rate >= VERY_HIGH_UTILIZATION,
        is_overdue: account.is_overdue,
        minimum_payment_only,
    }
}
