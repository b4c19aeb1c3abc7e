mod common;

use common::{approx, depository, reference_date, saver_user, UserBuilder};
use spendsense_core::{
    model::UserData,
    signals::{SavingsSignal, SignalKind, SignalRecord},
    window,
};

fn detect(user: &UserData, window_days: u32) -> SavingsSignal {
    let windowed = window::aggregate(user, window_days, reference_date()).unwrap();
    match SignalKind::Savings.detect(&windowed) {
        SignalRecord::Savings(s) => s,
        other => panic!("wrong record kind: {other:?}"),
    }
}

#[test]
fn growth_inflow_and_emergency_fund() {
    let signal = detect(&saver_user("u1"), 30);
    assert!(signal.has_savings_accounts);
    assert_eq!(signal.total_savings_balance, 12_000.0);
    assert!(approx(signal.savings_growth_rate, 800.0 / 11_200.0, 1e-12));
    assert!(approx(signal.net_savings_inflow, 800.0, 1e-12));
    assert!(approx(signal.monthly_savings_inflow, 800.0, 1e-12));
    // $900 of spend in the month.
    assert!(approx(signal.emergency_fund_months, 12_000.0 / 900.0, 1e-9));
    assert!(signal.data_complete);
}

#[test]
fn every_savings_subtype_counts() {
    let user = UserBuilder::new("u1")
        .account(depository("s1", "savings", 100.0))
        .account(depository("s2", "money_market", 200.0))
        .account(depository("s3", "cd", 300.0))
        .account(depository("s4", "hsa", 400.0))
        .checking("chk", 5_000.0)
        .build();
    let signal = detect(&user, 30);
    assert_eq!(signal.savings_account_count, 4);
    assert_eq!(signal.total_savings_balance, 1_000.0);
}

#[test]
fn missing_balance_history_degrades_growth_only() {
    let user = UserBuilder::new("u1")
        .savings("sav", 4_000.0)
        .charge(3, 2_000.0, "Landlord")
        .build();
    let signal = detect(&user, 30);
    assert_eq!(signal.savings_growth_rate, 0.0);
    assert!(!signal.data_complete);
    assert!(approx(signal.emergency_fund_months, 2.0, 1e-12));
}

#[test]
fn no_spend_means_no_emergency_fund_baseline() {
    let user = UserBuilder::new("u1").savings("sav", 4_000.0).build();
    assert_eq!(detect(&user, 30).emergency_fund_months, 0.0);
}

#[test]
fn observations_outside_the_window_are_ignored() {
    let user = UserBuilder::new("u1")
        .savings("sav", 1_100.0)
        .balance("sav", 120, 100.0)
        .balance("sav", 20, 1_000.0)
        .balance("sav", 1, 1_100.0)
        .build();
    let signal = detect(&user, 30);
    assert!(approx(signal.savings_growth_rate, 0.1, 1e-12));
}

#[test]
fn history_with_nothing_in_the_window_is_incomplete() {
    let user = UserBuilder::new("u1")
        .savings("sav", 1_100.0)
        .balance("sav", 120, 100.0)
        .build();
    let signal = detect(&user, 30);
    assert_eq!(signal.savings_growth_rate, 0.0);
    assert!(!signal.data_complete);
}

#[test]
fn a_single_in_window_observation_is_not_a_measurement() {
    let user = UserBuilder::new("u1")
        .savings("sav", 1_100.0)
        .balance("sav", 10, 1_000.0)
        .build();
    let signal = detect(&user, 30);
    assert_eq!(signal.savings_growth_rate, 0.0);
    assert!(!signal.data_complete);

    // The longer window reaches an earlier reading and can measure growth.
    let user = UserBuilder::new("u1")
        .savings("sav", 1_100.0)
        .balance("sav", 120, 800.0)
        .balance("sav", 10, 1_000.0)
        .build();
    let signal = detect(&user, 180);
    assert!(approx(signal.savings_growth_rate, 0.25, 1e-12));
    assert!(signal.data_complete);
}
