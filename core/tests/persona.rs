mod common;

use chrono::Utc;
use common::{high_utilization_user, reference_date, saver_user, subscription_heavy_user, UserBuilder};
use spendsense_core::{
    model::UserData,
    persona::{self, Criteria, Criterion, Operator, PersonaCatalog, PersonaDefinition, PrioritizationReason},
    summary::{self, BehavioralSummary, ExecutionMode, SignalField},
    DecisionConfig, PipelineError,
};

fn summarize(user: &UserData) -> BehavioralSummary {
    summary::assemble_window(user, 30, reference_date(), Utc::now(), ExecutionMode::Sequential)
        .unwrap()
}

fn leaf(field: SignalField, op: Operator, value: f64) -> Criteria {
    Criteria::Signal(Criterion { field, op, value })
}

fn def(id: &str, priority: u32, criteria: Option<Criteria>) -> PersonaDefinition {
    PersonaDefinition {
        persona_id: id.into(),
        name: id.into(),
        description: format!("{id} description"),
        priority,
        focus_areas: vec![],
        fallback: criteria.is_none(),
        criteria,
    }
}

#[test]
fn high_utilization_outranks_other_matches() {
    let config = DecisionConfig::default_test();
    let assignment = persona::assign(&config.personas, &summarize(&high_utilization_user("u1")));

    assert_eq!(assignment.assigned_persona_id, "high_utilization");
    assert_eq!(
        assignment.all_qualifying_persona_ids,
        vec!["high_utilization".to_string(), "emergency_fund_starter".to_string()]
    );
    assert_eq!(assignment.prioritization_reason, PrioritizationReason::HighestPriority);
    assert_eq!(assignment.match_evidence.len(), 2);

    let evidence = assignment.winning_evidence();
    assert_eq!(evidence.len(), 1);
    assert_eq!(evidence[0].field, SignalField::AggregateUtilization);
    assert_eq!(evidence[0].display, "utilization: 65%, threshold: ≥50%");
}

#[test]
fn single_match_reason() {
    let config = DecisionConfig::default_test();
    let assignment = persona::assign(&config.personas, &summarize(&saver_user("u1")));
    assert_eq!(assignment.assigned_persona_id, "savings_builder");
    assert_eq!(assignment.prioritization_reason, PrioritizationReason::SingleMatch);
}

#[test]
fn subscription_heavy_user_matches() {
    let config = DecisionConfig::default_test();
    let assignment = persona::assign(&config.personas, &summarize(&subscription_heavy_user("u1")));
    assert_eq!(assignment.assigned_persona_id, "subscription_heavy");
    let fields: Vec<SignalField> = assignment.winning_evidence().iter().map(|e| e.field).collect();
    assert_eq!(
        fields,
        vec![
            SignalField::SubscriptionCount,
            SignalField::MonthlyRecurringSpend,
            SignalField::SubscriptionShare
        ]
    );
}

#[test]
fn nothing_matches_assigns_fallback() {
    let config = DecisionConfig::default_test();
    let user = UserBuilder::new("u1").checking("chk", 100.0).build();
    let assignment = persona::assign(&config.personas, &summarize(&user));
    assert_eq!(assignment.assigned_persona_id, "general_wellness");
    assert_eq!(assignment.prioritization_reason, PrioritizationReason::NoMatchFallback);
    assert!(assignment.all_qualifying_persona_ids.is_empty());
    assert!(assignment.match_evidence.is_empty());
}

#[test]
fn equal_priority_goes_to_first_declared() {
    let always = || Some(leaf(SignalField::CreditCardCount, Operator::Gte, 0.0));
    let catalog = PersonaCatalog::new(vec![
        def("first", 3, always()),
        def("second", 3, always()),
        def("fallback", 99, None),
    ])
    .unwrap();
    let user = UserBuilder::new("u1").build();
    let assignment = persona::assign(&catalog, &summarize(&user));
    assert_eq!(assignment.assigned_persona_id, "first");
    assert_eq!(
        assignment.prioritization_reason,
        PrioritizationReason::TieBrokenByDeclarationOrder
    );

    // Reversing declaration order flips the winner.
    let catalog = PersonaCatalog::new(vec![
        def("second", 3, always()),
        def("first", 3, always()),
        def("fallback", 99, None),
    ])
    .unwrap();
    assert_eq!(persona::assign(&catalog, &summarize(&user)).assigned_persona_id, "second");
}

#[test]
fn lower_priority_number_wins_over_declaration_order() {
    let always = || Some(leaf(SignalField::CreditCardCount, Operator::Gte, 0.0));
    let catalog = PersonaCatalog::new(vec![
        def("late", 5, always()),
        def("early", 1, always()),
        def("fallback", 99, None),
    ])
    .unwrap();
    let assignment = persona::assign(&catalog, &summarize(&UserBuilder::new("u1").build()));
    assert_eq!(assignment.assigned_persona_id, "early");
    assert_eq!(assignment.prioritization_reason, PrioritizationReason::HighestPriority);
}

#[test]
fn assignment_is_deterministic() {
    let config = DecisionConfig::default_test();
    let s = summarize(&subscription_heavy_user("u1"));
    let first = persona::assign(&config.personas, &s);
    for _ in 0..20 {
        assert_eq!(persona::assign(&config.personas, &s), first);
    }
}

#[test]
fn any_collects_every_satisfied_branch() {
    let s = summarize(&high_utilization_user("u1"));
    let tree = Criteria::Any(vec![
        leaf(SignalField::CreditCardCount, Operator::Eq, 1.0),
        leaf(SignalField::SubscriptionCount, Operator::Gt, 10.0),
        leaf(SignalField::AggregateUtilization, Operator::Gt, 0.6),
    ]);
    let evidence = persona::evaluate(&tree, &s).unwrap();
    assert_eq!(evidence.len(), 2);

    let all = Criteria::All(vec![tree, leaf(SignalField::SubscriptionCount, Operator::Gt, 10.0)]);
    assert!(persona::evaluate(&all, &s).is_none());
}

#[test]
fn catalog_validation() {
    let ok = Some(leaf(SignalField::CreditCardCount, Operator::Gte, 1.0));
    let no_fallback = PersonaCatalog::new(vec![def("a", 1, ok.clone())]);
    assert!(matches!(no_fallback, Err(PipelineError::InvalidCatalog { .. })));

    let two_fallbacks = PersonaCatalog::new(vec![def("a", 1, None), def("b", 2, None)]);
    assert!(two_fallbacks.is_err());

    let duplicate = PersonaCatalog::new(vec![
        def("a", 1, ok.clone()),
        def("a", 2, ok),
        def("f", 99, None),
    ]);
    assert!(duplicate.is_err());
}

#[test]
fn catalog_json_shape() {
    let json = r#"{
        "persona_id": "p", "name": "P", "description": "d", "priority": 2,
        "criteria": {"all": [
            {"signal": {"field": "aggregate_utilization", "op": "gte", "value": 0.5}},
            {"any": [{"signal": {"field": "any_overdue", "op": "eq", "value": 1.0}}]}
        ]}
    }"#;
    let def: PersonaDefinition = serde_json::from_str(json).unwrap();
    assert!(!def.fallback);
    assert!(matches!(def.criteria, Some(Criteria::All(ref v)) if v.len() == 2));
}
