//! Input records handed to the pipeline by the storage collaborator.
//!
//! RULE: Nothing in the pipeline mutates these. Detectors borrow them,
//! compute, and return fresh signal records.
//!
//! Amount convention: positive = money leaving the account (spend),
//! negative = money arriving (deposits, income, refunds).

use crate::types::UserId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id:              String,
    pub account_id:      String,
    pub posted_date:     NaiveDate,
    pub amount:          f64,
    pub category:        String,
    pub merchant_name:   Option<String>,
    #[serde(default)]
    pub payment_channel: Option<String>,
}

impl Transaction {
    pub fn is_outflow(&self) -> bool {
        self.amount > 0.0
    }

    /// Payroll and other earned-income deposits.
    pub fn is_income(&self) -> bool {
        if self.amount >= 0.0 {
            return false;
        }
        let c = self.category.to_ascii_lowercase();
        c.contains("income") || c.contains("payroll") || c.contains("wage")
    }

    /// Money moved between the user's own accounts, or card payoffs.
    pub fn is_transfer(&self) -> bool {
        let c = self.category.to_ascii_lowercase();
        c.contains("transfer") || c.contains("credit_card_payment")
    }

    /// Outflows that count toward the user's spending.
    pub fn is_spend(&self) -> bool {
        self.is_outflow() && !self.is_transfer()
    }

    pub fn is_interest_charge(&self) -> bool {
        self.amount > 0.0 && self.category.to_ascii_lowercase().contains("interest")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Depository,
    Credit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id:      String,
    pub account_type:    AccountType,
    /// e.g. "checking", "savings", "money_market", "cd", "hsa", "credit_card".
    pub subtype:         String,
    pub balance_current: f64,
    /// Credit accounts only.
    #[serde(default)]
    pub balance_limit:   Option<f64>,
    #[serde(default)]
    pub is_overdue:      bool,

    // Liability detail, credit accounts only.
    #[serde(default)]
    pub minimum_payment_amount: Option<f64>,
    #[serde(default)]
    pub last_payment_amount:    Option<f64>,
    #[serde(default)]
    pub apr_percentage:         Option<f64>,
}

/// Depository subtypes counted as savings.
pub const SAVINGS_SUBTYPES: [&str; 4] = ["savings", "money_market", "cd", "hsa"];

impl Account {
    pub fn is_credit(&self) -> bool {
        self.account_type == AccountType::Credit
    }

    pub fn is_checking(&self) -> bool {
        self.account_type == AccountType::Depository && self.subtype == "checking"
    }

    pub fn is_savings(&self) -> bool {
        self.account_type == AccountType::Depository
            && SAVINGS_SUBTYPES.contains(&self.subtype.as_str())
    }
}

/// One point-in-time balance reading from the balance history collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceObservation {
    pub account_id: String,
    pub as_of:      NaiveDate,
    pub balance:    f64,
}

/// User metadata supplied alongside the transaction stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id:            UserId,
    #[serde(default)]
    pub annual_income:      Option<f64>,
    #[serde(default)]
    pub credit_score:       Option<u32>,
    /// Earliest date data is known for, e.g. the oldest account open date.
    #[serde(default)]
    pub history_start:      Option<NaiveDate>,
    /// Product types held outside the linked accounts (e.g. "personal_loan").
    #[serde(default)]
    pub held_product_types: Vec<String>,
}

/// Everything the pipeline needs for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub profile:         UserProfile,
    #[serde(default)]
    pub transactions:    Vec<Transaction>,
    #[serde(default)]
    pub accounts:        Vec<Account>,
    /// `None` when the balance history collaborator is unavailable.
    #[serde(default)]
    pub balance_history: Option<Vec<BalanceObservation>>,
}

impl UserData {
    pub fn user_id(&self) -> &str {
        &self.profile.user_id
    }

    /// Product types the user already holds: linked account subtypes plus
    /// anything recorded on the profile.
    pub fn held_product_types(&self) -> Vec<String> {
        let mut held: Vec<String> = self.accounts.iter().map(|a| a.subtype.clone()).collect();
        held.extend(self.profile.held_product_types.iter().cloned());
        held.sort();
        held.dedup();
        held
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    OptedIn,
    OptedOut,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedIn  => "opted_in",
            Self::OptedOut => "opted_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "opted_in"  => Some(Self::OptedIn),
            "opted_out" => Some(Self::OptedOut),
            _ => None,
        }
    }
}
