mod common;

use chrono::Utc;
use common::{high_utilization_user, reference_date, saver_user, subscription_heavy_user, UserBuilder};
use regex::Regex;
use spendsense_core::{
    model::UserData,
    persona::{self, PersonaAssignment},
    rationale::{self, CitationMap, CitationValue, Recommendation},
    recommend::{match_content, EligibilityContext, SelectionLimits},
    summary::{self, BehavioralSummary, ExecutionMode},
    DecisionConfig, PipelineError,
};

fn pipeline(user: &UserData) -> (BehavioralSummary, PersonaAssignment, Vec<Recommendation>) {
    let config = DecisionConfig::default_test();
    let s = summary::assemble_window(user, 30, reference_date(), Utc::now(), ExecutionMode::Sequential)
        .unwrap();
    let assignment = persona::assign(&config.personas, &s);
    let ctx = EligibilityContext {
        annual_income: Some(80_000.0),
        credit_score: Some(760),
        held_product_types: user.held_product_types(),
        aggregate_utilization: s.credit.aggregate_utilization,
    };
    let items = match_content(&config.content, &assignment.assigned_persona_id, &ctx, SelectionLimits::default());
    let map = CitationMap::build(&s, &assignment);
    let recs = rationale::generate_all(&items, &assignment, &map);
    (s, assignment, recs)
}

#[test]
fn subscription_rationale_cites_exact_values() {
    let (_, _, recs) = pipeline(&subscription_heavy_user("u1"));
    let audit = recs.iter().find(|r| r.item_id == "edu_subscription_audit").unwrap();
    assert_eq!(
        audit.rationale_text,
        "You have 32 recurring subscriptions totaling $423.23 a month, 10% of your spending. \
         Your largest is Premium Cloud."
    );
    let share = audit
        .signal_citations
        .iter()
        .find(|c| c.signal == "subscription_share")
        .unwrap();
    assert_eq!(share.value, CitationValue::Percentage("10%".into()));
    assert_eq!(audit.persona_match_reason, "Suggested because 32 subscriptions recur each month.");
}

#[test]
fn every_number_in_a_rationale_is_cited() {
    let number = Regex::new(r"\d[\d,]*(?:\.\d+)?").unwrap();
    for user in [
        high_utilization_user("u1"),
        saver_user("u2"),
        subscription_heavy_user("u3"),
        UserBuilder::new("u4").checking("chk", 10.0).charge(3, 12.0, "Cafe").build(),
    ] {
        let (_, _, recs) = pipeline(&user);
        assert!(!recs.is_empty(), "no recommendations for {}", user.user_id());
        for rec in &recs {
            for token in number.find_iter(&rec.rationale_text) {
                assert!(
                    rec.signal_citations.iter().any(|c| c.value.text().contains(token.as_str())),
                    "{}: '{}' not cited in {:?}",
                    rec.item_id,
                    token.as_str(),
                    rec.signal_citations
                );
            }
        }
    }
}

#[test]
fn default_match_reason_quotes_winning_evidence() {
    let (_, assignment, recs) = pipeline(&high_utilization_user("u1"));
    assert_eq!(assignment.assigned_persona_id, "high_utilization");
    let autopay = recs.iter().find(|r| r.item_id == "edu_autopay_setup").unwrap();
    assert_eq!(
        autopay.persona_match_reason,
        "Matches your High Utilization profile (utilization: 65%, threshold: ≥50%)."
    );
}

#[test]
fn ranks_are_contiguous_from_one() {
    let (_, _, recs) = pipeline(&high_utilization_user("u1"));
    let ranks: Vec<usize> = recs.iter().map(|r| r.priority).collect();
    assert_eq!(ranks, (1..=recs.len()).collect::<Vec<_>>());
}

#[test]
fn missing_values_fail_rendering() {
    let user = UserBuilder::new("u1").checking("chk", 10.0).build();
    let config = DecisionConfig::default_test();
    let s = summary::assemble_window(&user, 30, reference_date(), Utc::now(), ExecutionMode::Sequential)
        .unwrap();
    let assignment = persona::assign(&config.personas, &s);
    let map = CitationMap::build(&s, &assignment);

    // No cards, so credit fields are not citable.
    assert!(map.get("aggregate_utilization").is_none());
    assert!(map.get("top_merchant").is_none());
    assert!(matches!(
        rationale::render("x", "Utilization {aggregate_utilization}", &map),
        Err(PipelineError::UnknownPlaceholder { .. })
    ));
    let ok = rationale::render("x", "Spent {total_spend} as {persona_name}", &map).unwrap();
    assert_eq!(ok.text, "Spent $0.00 as General Wellness");
    assert_eq!(ok.citations.len(), 2);
}

#[test]
fn citations_serialize_with_type_tag() {
    let (_, _, recs) = pipeline(&high_utilization_user("u1"));
    let basics = recs.iter().find(|r| r.item_id == "edu_utilization_basics").unwrap();
    let json = serde_json::to_value(&basics.signal_citations).unwrap();
    assert_eq!(json[0]["signal"], "aggregate_utilization");
    assert_eq!(json[0]["Percentage"], "65%");
    assert_eq!(json[2]["Currency"], "$26,633.16");
}
