//! THE MOST IMPORTANT TEST IN THE PROJECT.
//!
//! Two engines, same users, same reference data.
//! They must produce identical responses, apart from request ids and
//! timing. Any divergence is a blocker. Do not merge until fixed.

mod common;

use common::{harness_with, reference_date, UserBuilder};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use spendsense_core::{
    model::UserData,
    summary::ExecutionMode,
    DecisionConfig, RecommendationResponse,
};

const MERCHANTS: [&str; 6] = ["Grocer", "Fuel Stop", "Cafe", "Hardware", "Pharmacy", "Books"];
const SERVICES: [&str; 4] = ["Video Plus", "Music Box", "Cloud Drive", "News Daily"];

fn random_user(rng: &mut Pcg64Mcg, user_id: &str) -> UserData {
    let mut b = UserBuilder::new(user_id).checking("chk", rng.gen_range(0.0..8_000.0));

    if rng.gen_bool(0.5) {
        let limit = rng.gen_range(1_000.0..20_000.0);
        b = b.credit_card("card", rng.gen_range(0.0..limit), Some(limit));
        if rng.gen_bool(0.3) {
            b = b.txn("card", rng.gen_range(1..28), rng.gen_range(5.0..90.0), "interest", None);
        }
    }
    if rng.gen_bool(0.5) {
        let balance = rng.gen_range(0.0..15_000.0);
        b = b
            .savings("sav", balance)
            .balance("sav", 29, balance * rng.gen_range(0.8..1.0))
            .balance("sav", 0, balance);
    }

    let every = [7, 14, 15, 30, 60][rng.gen_range(0..5)];
    b = b.paid_every(every, 180, rng.gen_range(500.0..4_000.0));

    for service in SERVICES {
        if rng.gen_bool(0.4) {
            b = b.recurring(service, rng.gen_range(5.0..30.0), &[75, 45, 15]);
        }
    }
    for _ in 0..rng.gen_range(5..40) {
        let merchant = MERCHANTS[rng.gen_range(0..MERCHANTS.len())];
        b = b.charge(rng.gen_range(0..180), rng.gen_range(3.0..400.0), merchant);
    }
    b.build()
}

fn population(seed: u64, size: usize) -> Vec<UserData> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    (0..size).map(|i| random_user(&mut rng, &format!("user-{i:03}"))).collect()
}

/// Response JSON with the per-request fields removed.
fn stable_json(resp: &RecommendationResponse) -> String {
    let mut value = serde_json::to_value(resp).expect("serialize response");
    let metadata = value["metadata"].as_object_mut().expect("metadata object");
    for key in ["request_id", "generation_time_ms", "generated_at", "cached"] {
        metadata.remove(key);
    }
    value.to_string()
}

fn run_all(config: DecisionConfig, users: &[UserData]) -> Vec<String> {
    let h = harness_with(config, users.to_vec());
    let mut out = Vec::new();
    for user in users {
        for window in [30, 180] {
            let resp = h
                .engine
                .recommend(user.user_id(), window, reference_date(), false)
                .expect("recommend");
            out.push(stable_json(&resp));
        }
    }
    out
}

#[test]
fn same_inputs_produce_identical_responses() {
    const SEED: u64 = 0xDEAD_BEEF_CAFE_1234;
    let users = population(SEED, 40);

    let log_a = run_all(DecisionConfig::default_test(), &users);
    let log_b = run_all(DecisionConfig::default_test(), &users);

    assert_eq!(log_a.len(), log_b.len());
    for (i, (a, b)) in log_a.iter().zip(log_b.iter()).enumerate() {
        assert_eq!(a, b, "Responses diverged at entry {i}:\n  A: {a}\n  B: {b}");
    }
}

#[test]
fn execution_mode_does_not_change_results() {
    let users = population(7, 25);

    let mut sequential = DecisionConfig::default_test();
    sequential.engine.execution_mode = ExecutionMode::Sequential;
    let mut parallel = DecisionConfig::default_test();
    parallel.engine.execution_mode = ExecutionMode::Parallel;

    assert_eq!(run_all(sequential, &users), run_all(parallel, &users));
}

#[test]
fn population_exercises_several_personas() {
    let users = population(0xDEAD_BEEF_CAFE_1234, 40);
    let h = harness_with(DecisionConfig::default_test(), users.clone());
    let mut personas: Vec<String> = users
        .iter()
        .map(|u| {
            h.engine
                .recommend(u.user_id(), 30, reference_date(), false)
                .expect("recommend")
                .persona_id
        })
        .collect();
    personas.sort();
    personas.dedup();
    assert!(personas.len() >= 2, "only saw {personas:?}");
}
