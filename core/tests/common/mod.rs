//! Shared fixture builders for the integration tests.
#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use spendsense_core::{
    model::{
        Account, AccountType, BalanceObservation, ConsentStatus, Transaction, UserData,
        UserProfile,
    },
    store::{MemoryAuditSink, MemoryUserData, StaticConsent},
    DecisionConfig, DecisionEngine,
};
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Every fixture is anchored here.
pub fn reference_date() -> NaiveDate {
    date(2024, 6, 30)
}

pub fn days_ago(n: i64) -> NaiveDate {
    reference_date() - Duration::days(n)
}

pub fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

pub struct UserBuilder {
    data:    UserData,
    next_id: usize,
}

impl UserBuilder {
    /// A user with a year of known history and nothing else.
    pub fn new(user_id: &str) -> Self {
        Self {
            data: UserData {
                profile: UserProfile {
                    user_id: user_id.into(),
                    history_start: Some(days_ago(365)),
                    ..UserProfile::default()
                },
                ..UserData::default()
            },
            next_id: 0,
        }
    }

    pub fn history_start(mut self, start: Option<NaiveDate>) -> Self {
        self.data.profile.history_start = start;
        self
    }

    pub fn annual_income(mut self, income: f64) -> Self {
        self.data.profile.annual_income = Some(income);
        self
    }

    pub fn credit_score(mut self, score: u32) -> Self {
        self.data.profile.credit_score = Some(score);
        self
    }

    pub fn holds(mut self, product_type: &str) -> Self {
        self.data.profile.held_product_types.push(product_type.into());
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.data.accounts.push(account);
        self
    }

    pub fn checking(self, id: &str, balance: f64) -> Self {
        self.account(depository(id, "checking", balance))
    }

    pub fn savings(self, id: &str, balance: f64) -> Self {
        self.account(depository(id, "savings", balance))
    }

    pub fn credit_card(self, id: &str, balance: f64, limit: Option<f64>) -> Self {
        self.account(credit_card(id, balance, limit))
    }

    pub fn txn(
        mut self,
        account_id: &str,
        ago: i64,
        amount: f64,
        category: &str,
        merchant: Option<&str>,
    ) -> Self {
        self.next_id += 1;
        self.data.transactions.push(Transaction {
            id: format!("{}-t{:04}", self.data.profile.user_id, self.next_id),
            account_id: account_id.into(),
            posted_date: days_ago(ago),
            amount,
            category: category.into(),
            merchant_name: merchant.map(Into::into),
            payment_channel: None,
        });
        self
    }

    /// A card or debit purchase from checking.
    pub fn charge(self, ago: i64, amount: f64, merchant: &str) -> Self {
        self.txn("chk", ago, amount, "shopping", Some(merchant))
    }

    /// The same charge at each of the given offsets.
    pub fn recurring(mut self, merchant: &str, amount: f64, offsets: &[i64]) -> Self {
        for &ago in offsets {
            self = self.charge(ago, amount, merchant);
        }
        self
    }

    pub fn payroll(self, ago: i64, amount: f64) -> Self {
        self.txn("chk", ago, -amount, "income_payroll", Some("Employer Inc"))
    }

    /// Payroll every `every` days going back `span` days from the reference date.
    pub fn paid_every(mut self, every: i64, span: i64, amount: f64) -> Self {
        let mut ago = 1;
        while ago <= span {
            self = self.payroll(ago, amount);
            ago += every;
        }
        self
    }

    pub fn balance(mut self, account_id: &str, ago: i64, balance: f64) -> Self {
        self.data
            .balance_history
            .get_or_insert_with(Vec::new)
            .push(BalanceObservation {
                account_id: account_id.into(),
                as_of: days_ago(ago),
                balance,
            });
        self
    }

    pub fn build(self) -> UserData {
        self.data
    }
}

pub fn depository(id: &str, subtype: &str, balance: f64) -> Account {
    Account {
        account_id: id.into(),
        account_type: AccountType::Depository,
        subtype: subtype.into(),
        balance_current: balance,
        balance_limit: None,
        is_overdue: false,
        minimum_payment_amount: None,
        last_payment_amount: None,
        apr_percentage: None,
    }
}

pub fn credit_card(id: &str, balance: f64, limit: Option<f64>) -> Account {
    Account {
        account_id: id.into(),
        account_type: AccountType::Credit,
        subtype: "credit_card".into(),
        balance_current: balance,
        balance_limit: limit,
        is_overdue: false,
        minimum_payment_amount: None,
        last_payment_amount: None,
        apr_percentage: Some(24.99),
    }
}

/// 31 merchants at $13.00 and one at $20.23, each charged at 70, 40 and
/// 10 days back, plus $3,671.41 of one-off spend inside the 30-day window.
pub fn subscription_heavy_user(user_id: &str) -> UserData {
    let mut b = UserBuilder::new(user_id).checking("chk", 2_500.0);
    for i in 0..31 {
        b = b.recurring(&format!("Streaming Service {i:02}"), 13.00, &[70, 40, 10]);
    }
    b = b.recurring("Premium Cloud", 20.23, &[70, 40, 10]);
    b.txn("chk", 5, 3_671.41, "rent", None).build()
}

/// A single card at 65% utilization with steady biweekly pay.
pub fn high_utilization_user(user_id: &str) -> UserData {
    UserBuilder::new(user_id)
        .checking("chk", 1_800.0)
        .credit_card("card-1", 26_633.16, Some(40_974.09))
        .paid_every(14, 180, 2_100.0)
        .charge(3, 240.0, "Grocer")
        .charge(12, 180.0, "Fuel Stop")
        .credit_score(690)
        .build()
}

/// Growing savings, no cards, steady pay.
pub fn saver_user(user_id: &str) -> UserData {
    UserBuilder::new(user_id)
        .checking("chk", 6_000.0)
        .savings("sav", 12_000.0)
        .paid_every(14, 180, 2_600.0)
        .txn("sav", 25, -400.0, "transfer_in", None)
        .txn("sav", 10, -400.0, "transfer_in", None)
        .charge(4, 900.0, "Grocer")
        .balance("sav", 29, 11_200.0)
        .balance("sav", 0, 12_000.0)
        .build()
}

pub struct Harness {
    pub engine:  DecisionEngine,
    pub users:   Arc<MemoryUserData>,
    pub consent: Arc<StaticConsent>,
    pub audit:   Arc<MemoryAuditSink>,
}

/// Engine over in-memory collaborators. Every given user is opted in.
pub fn harness(users: Vec<UserData>) -> Harness {
    harness_with(DecisionConfig::default_test(), users)
}

pub fn harness_with(config: DecisionConfig, users: Vec<UserData>) -> Harness {
    init_logging();
    let source = Arc::new(MemoryUserData::new());
    let consent = Arc::new(StaticConsent::new());
    for user in users {
        consent.set(user.user_id(), ConsentStatus::OptedIn);
        source.insert(user);
    }
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = DecisionEngine::new(config, source.clone(), consent.clone(), audit.clone())
        .expect("engine");
    Harness { engine, users: source, consent, audit }
}
