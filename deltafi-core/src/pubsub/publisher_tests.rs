use super::*;
use crate::core::{DeltaFileFlowState, DeltaFileStage, FlowType};
use crate::model::ResumeMetadata;
use crate::pubsub::InMemoryTopicDirectory;
use crate::rules::{Rule, Topic};
use crate::testing::{DeltaFileFixture, ScriptedRuleEvaluator, TestFlowDefinition};
use crate::utils::now_utc;
use pretty_assertions::assert_eq;

const PUBLISHER: &str = "publisher";

fn router(evaluator: &Arc<ScriptedRuleEvaluator>, directory: InMemoryTopicDirectory) -> PublisherService {
    PublisherService::new(evaluator.clone(), Arc::new(directory))
}

fn publisher(rules: PublishRules) -> FlowDefinition {
    TestFlowDefinition::transform(PUBLISHER, vec![], rules).into()
}

fn topics(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(ToString::to_string).collect()
}

fn last_action(delta_file: &DeltaFile, flow_id: u32) -> crate::model::Action {
    delta_file.flow(flow_id).unwrap().last_action().unwrap().clone()
}

fn synthetic_causes(delta_file: &DeltaFile, flow_id: u32) -> Vec<(ActionState, String)> {
    delta_file
        .flow(flow_id)
        .unwrap()
        .actions()
        .iter()
        .filter(|a| a.name == NO_SUBSCRIBERS)
        .map(|a| {
            let cause = a.error_cause.clone().or_else(|| a.filtered_cause.clone());
            (a.state, cause.unwrap_or_default())
        })
        .collect()
}

#[test]
fn test_first_matching_selects_first_declared() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("yes", true).with("no", false));
    let rules = PublishRules::new(vec![
        Rule::when("skipped", "no"),
        Rule::when("second", "yes"),
        Rule::when("third", "yes"),
        Rule::new("fourth"),
    ])
    .with_matching_policy(MatchingPolicy::FirstMatching);
    let service = router(&evaluator, InMemoryTopicDirectory::new());

    let matched = service.matching_topics(&rules, &HashMap::new(), &[]);
    assert_eq!(matched, topics(&["second"]));
}

#[test]
fn test_all_matching_ignores_declaration_order() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("yes", true).with("no", false));
    let service = router(&evaluator, InMemoryTopicDirectory::new());
    let forward = vec![Rule::when("a", "yes"), Rule::when("b", "no"), Rule::new("c")];
    let mut reversed = forward.clone();
    reversed.reverse();

    let first = service.matching_topics(&PublishRules::new(forward), &HashMap::new(), &[]);
    let second = service.matching_topics(&PublishRules::new(reversed), &HashMap::new(), &[]);

    assert_eq!(first, topics(&["a", "c"]));
    assert_eq!(first, second);
}

#[test]
fn test_no_match_defaults_to_error() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let rules = PublishRules::new(vec![Rule::when("a", "never")]);
    let directory = TestFlowDefinition::directory(&["a"], vec![publisher(rules)]);
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());
    let flows_before = delta_file.flows.len();

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert!(outcome.created.is_empty());
    assert_eq!(outcome.synthetic, Some(ActionState::Error));
    assert_eq!(delta_file.flows.len(), flows_before);

    let action = last_action(&delta_file, flow_id);
    assert_eq!(action.name, NO_SUBSCRIBERS);
    assert_eq!(action.action_type, ActionType::Publish);
    assert_eq!(action.state, ActionState::Error);
    assert_eq!(action.error_cause.as_deref(), Some(NO_DESTINATIONS_CAUSE));
    let context = action.error_context.unwrap();
    assert!(context.contains("No subscribers found from flow 'publisher' because no topics matched the criteria."));
    assert!(context.contains("{topic: a, condition: never}"));

    delta_file.update_state(now_utc());
    assert_eq!(delta_file.stage, DeltaFileStage::Error);
}

#[test]
fn test_error_action_copies_last_content() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(&[], vec![publisher(PublishRules::default())]);
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER)
        .with_content_size(42)
        .build(now_utc());

    router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    let action = last_action(&delta_file, flow_id);
    assert_eq!(action.content.len(), 1);
    assert_eq!(action.content[0].size(), 42);
}

#[test]
fn test_no_match_with_filter_default() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let rules = PublishRules::new(vec![Rule::when("a", "never")]).with_default_rule(DefaultRule::Filter);
    let directory = TestFlowDefinition::directory(&["a"], vec![publisher(rules)]);
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.synthetic, Some(ActionState::Filtered));
    let action = last_action(&delta_file, flow_id);
    assert_eq!(action.state, ActionState::Filtered);
    assert_eq!(action.filtered_cause.as_deref(), Some(NO_DESTINATIONS_CAUSE));

    delta_file.update_state(now_utc());
    assert!(delta_file.filtered);
    assert_eq!(delta_file.stage, DeltaFileStage::Complete);
}

#[test]
fn test_publish_default_creates_one_flow() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let rules = PublishRules::new(vec![Rule::when("a", "never")])
        .with_default_rule(DefaultRule::Publish("fallback".into()));
    let directory = TestFlowDefinition::directory(
        &["a", "fallback"],
        vec![publisher(rules), TestFlowDefinition::sink("sink", &["fallback"]).into()],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.topics, topics(&["fallback"]));
    assert!(outcome.synthetic.is_none());

    let created = delta_file.flow(outcome.created[0]).unwrap();
    assert_eq!(created.name, "sink");
    assert_eq!(created.flow_type, FlowType::DataSink);
    assert_eq!(created.input.topics, topics(&["fallback"]));
    assert_eq!(created.actions()[0].state, ActionState::Queued);
    assert_eq!(created.actions()[0].name, "sink-egress");

    let publisher_flow = delta_file.flow(flow_id).unwrap();
    assert_eq!(publisher_flow.state, DeltaFileFlowState::Complete);
    assert_eq!(publisher_flow.publish_topics, vec!["fallback".to_string()]);
}

#[test]
fn test_publish_default_without_subscriber_falls_back_to_error() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let rules = PublishRules::new(vec![]).with_default_rule(DefaultRule::Publish("fallback".into()));
    let directory = TestFlowDefinition::directory(&["fallback"], vec![publisher(rules)]);
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.synthetic, Some(ActionState::Error));
    assert_eq!(
        last_action(&delta_file, flow_id).error_cause.as_deref(),
        Some(NO_DESTINATIONS_CAUSE)
    );
}

#[test]
fn test_missing_topic_errors() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(&[], vec![publisher(PublishRules::new(vec![Rule::new("ghost")]))]);
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.synthetic, Some(ActionState::Error));
    assert_eq!(
        synthetic_causes(&delta_file, flow_id),
        vec![
            (ActionState::Error, MISSING_TOPIC_CAUSE.to_string()),
            (ActionState::Error, NO_DESTINATIONS_CAUSE.to_string()),
        ]
    );
    let missing = delta_file.flow(flow_id).unwrap().actions()[1].clone();
    assert!(missing.error_context.unwrap().contains("ghost"));
}

#[test]
fn test_topic_filter_policies() {
    let cases = [
        (
            TopicFilterPolicy::Filter,
            vec![
                (ActionState::Filtered, TOPIC_FILTERED_CAUSE),
                (ActionState::Error, NO_DESTINATIONS_CAUSE),
            ],
        ),
        (
            TopicFilterPolicy::Error,
            vec![
                (ActionState::Error, TOPIC_ERRORED_CAUSE),
                (ActionState::Error, NO_DESTINATIONS_CAUSE),
            ],
        ),
        (TopicFilterPolicy::Drop, vec![(ActionState::Error, NO_DESTINATIONS_CAUSE)]),
    ];

    for (policy, expected) in cases {
        let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("small", false));
        let directory = InMemoryTopicDirectory::new();
        directory.upsert_topic(Topic::new("guarded").with_filter("small").with_filter_policy(policy));
        directory.upsert_flow(publisher(PublishRules::new(vec![Rule::new("guarded")])));
        directory.upsert_flow(TestFlowDefinition::sink("sink", &["guarded"]));
        let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

        let outcome = router(&evaluator, directory)
            .route(&mut delta_file, flow_id, now_utc())
            .unwrap();

        assert!(outcome.created.is_empty(), "{policy:?}");
        assert_eq!(outcome.synthetic, Some(ActionState::Error), "{policy:?}");
        let expected: Vec<(ActionState, String)> = expected
            .into_iter()
            .map(|(state, cause)| (state, cause.to_string()))
            .collect();
        assert_eq!(synthetic_causes(&delta_file, flow_id), expected, "{policy:?}");
    }
}

#[test]
fn test_missing_topic_recorded_when_another_topic_routes() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["open"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("ghost"), Rule::new("open")])),
            TestFlowDefinition::sink("sink", &["open"]).into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(outcome.synthetic, Some(ActionState::Error));
    assert_eq!(
        synthetic_causes(&delta_file, flow_id),
        vec![(ActionState::Error, MISSING_TOPIC_CAUSE.to_string())]
    );
    assert_eq!(delta_file.flow(flow_id).unwrap().state, DeltaFileFlowState::Error);
}

#[test]
fn test_each_rejecting_topic_recorded_beside_healthy_topic() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("small", false));
    let directory = InMemoryTopicDirectory::new();
    directory.upsert_topic(
        Topic::new("errored")
            .with_filter("small")
            .with_filter_policy(TopicFilterPolicy::Error),
    );
    directory.upsert_topic(
        Topic::new("filtered")
            .with_filter("small")
            .with_filter_policy(TopicFilterPolicy::Filter),
    );
    directory.upsert_topic(Topic::new("open"));
    directory.upsert_flow(publisher(PublishRules::new(vec![
        Rule::new("errored"),
        Rule::new("filtered"),
        Rule::new("open"),
    ])));
    directory.upsert_flow(TestFlowDefinition::sink("sink", &["open"]));
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(
        synthetic_causes(&delta_file, flow_id),
        vec![
            (ActionState::Error, TOPIC_ERRORED_CAUSE.to_string()),
            (ActionState::Filtered, TOPIC_FILTERED_CAUSE.to_string()),
        ]
    );
    assert_eq!(outcome.synthetic, Some(ActionState::Filtered));
}

#[test]
fn test_dropped_topic_is_silent_when_another_routes() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("small", false));
    let directory = InMemoryTopicDirectory::new();
    directory.upsert_topic(Topic::new("guarded").with_filter("small"));
    directory.upsert_topic(Topic::new("open"));
    directory.upsert_flow(publisher(PublishRules::new(vec![Rule::new("guarded"), Rule::new("open")])));
    directory.upsert_flow(TestFlowDefinition::sink("guarded-sink", &["guarded"]));
    directory.upsert_flow(TestFlowDefinition::sink("open-sink", &["open"]));
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());
    let actions_before = delta_file.flow(flow_id).unwrap().actions().len();

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(delta_file.flow(outcome.created[0]).unwrap().name, "open-sink");
    assert_eq!(delta_file.flow(flow_id).unwrap().actions().len(), actions_before);
}

#[test]
fn test_subscriber_on_multiple_topics_gets_one_flow() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["a", "b"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("a"), Rule::new("b")])),
            TestFlowDefinition::sink("sink", &["a", "b"]).into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    let created = delta_file.flow(outcome.created[0]).unwrap();
    assert_eq!(created.input.topics, topics(&["a", "b"]));
    assert_eq!(created.input.ancestor_ids, vec![0, flow_id]);
    assert_eq!(created.depth, 2);
}

#[test]
fn test_subscriber_rules_for_unmatched_topics_not_evaluated() {
    let evaluator = Arc::new(
        ScriptedRuleEvaluator::new()
            .with("accept", true)
            .with("unrelated", true),
    );
    let directory = TestFlowDefinition::directory(
        &["a", "b"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("a")])),
            TestFlowDefinition::sink_with_rules("sink", vec![Rule::when("a", "accept"), Rule::when("b", "unrelated")])
                .into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(evaluator.call_count("accept"), 1);
    assert_eq!(evaluator.call_count("unrelated"), 0);
    assert_eq!(delta_file.flow(outcome.created[0]).unwrap().input.topics, topics(&["a"]));
}

#[test]
fn test_subscriber_condition_rejects() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new().with("reject", false));
    let directory = TestFlowDefinition::directory(
        &["a"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("a")])),
            TestFlowDefinition::sink_with_rules("sink", vec![Rule::when("a", "reject")]).into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert!(outcome.created.is_empty());
    let context = last_action(&delta_file, flow_id).error_context.unwrap();
    assert!(context.contains("listening on matching topics: a"));
}

#[test]
fn test_test_mode_propagation() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["out"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("out")])),
            TestFlowDefinition::sink("plain", &["out"]).into(),
            TestFlowDefinition::sink("testing", &["out"]).in_test_mode().into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER)
        .in_test_mode("upstream reason")
        .build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 2);
    let reasons: HashMap<String, Option<String>> = outcome
        .created
        .iter()
        .map(|id| {
            let flow = delta_file.flow(*id).unwrap();
            assert!(flow.test_mode);
            (flow.name.clone(), flow.test_mode_reason.clone())
        })
        .collect();
    assert_eq!(reasons["plain"].as_deref(), Some("upstream reason"));
    assert_eq!(reasons["testing"].as_deref(), Some("testing"));
}

#[test]
fn test_subscriber_test_mode_without_publisher_test_mode() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["out"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("out")])),
            TestFlowDefinition::sink("plain", &["out"]).into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    let created = delta_file.flow(outcome.created[0]).unwrap();
    assert!(!created.test_mode);
    assert!(created.test_mode_reason.is_none());
}

#[test]
fn test_end_to_end_topic_resolution() {
    let evaluator = Arc::new(
        ScriptedRuleEvaluator::new()
            .with_predicate("size>10", |_, content| content.iter().map(Content::size).sum::<u64>() > 10),
    );
    let rules = PublishRules::new(vec![Rule::new("a"), Rule::when("b", "size>10")]);
    let directory = TestFlowDefinition::directory(
        &["a", "b"],
        vec![publisher(rules), TestFlowDefinition::sink("S", &["b"]).into()],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER)
        .with_content_size(20)
        .build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert_eq!(outcome.topics, topics(&["a", "b"]));
    assert_eq!(outcome.created.len(), 1);
    assert!(outcome.synthetic.is_none());
    let created = delta_file.flow(outcome.created[0]).unwrap();
    assert_eq!(created.name, "S");
    assert_eq!(created.input.topics, topics(&["b"]));
    assert_eq!(created.input.content[0].size(), 20);
}

#[test]
fn test_data_source_without_subscribers() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(&["ingest"], vec![FlowDefinition::rest_data_source("fixture-source", "ingest")]);
    let (mut delta_file, _) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, 0, now_utc())
        .unwrap();

    assert_eq!(outcome.synthetic, Some(ActionState::Error));
    let action = last_action(&delta_file, 0);
    assert_eq!(
        action.error_context.as_deref(),
        Some("No subscribers found for data source 'fixture-source' on topic 'ingest'")
    );
}

#[test]
fn test_data_source_routes_to_subscriber() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["ingest"],
        vec![
            FlowDefinition::rest_data_source("fixture-source", "ingest"),
            TestFlowDefinition::sink("sink", &["ingest"]).into(),
        ],
    );
    let (mut delta_file, _) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .route(&mut delta_file, 0, now_utc())
        .unwrap();

    assert_eq!(outcome.created.len(), 1);
    assert_eq!(delta_file.flow(0).unwrap().publish_topics, vec!["ingest".to_string()]);
}

#[test]
fn test_max_depth_exceeded() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = TestFlowDefinition::directory(
        &["out"],
        vec![
            publisher(PublishRules::new(vec![Rule::new("out")])),
            TestFlowDefinition::sink("sink", &["out"]).into(),
        ],
    );
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let outcome = router(&evaluator, directory)
        .with_max_flow_depth(1)
        .route(&mut delta_file, flow_id, now_utc())
        .unwrap();

    assert!(outcome.created.is_empty());
    assert_eq!(last_action(&delta_file, flow_id).error_cause.as_deref(), Some(MAX_DEPTH_CAUSE));
}

#[test]
fn test_resumed_synthetic_action_completes_on_reroute() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let directory = Arc::new(TestFlowDefinition::directory(
        &["out"],
        vec![publisher(PublishRules::new(vec![Rule::new("out")]))],
    ));
    let service = PublisherService::new(evaluator, directory.clone());
    let (mut delta_file, flow_id) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    service.route(&mut delta_file, flow_id, now_utc()).unwrap();
    assert_eq!(last_action(&delta_file, flow_id).state, ActionState::Error);

    directory.upsert_flow(TestFlowDefinition::sink("sink", &["out"]));
    let resumed = delta_file.resume_selected(&[ResumeMetadata::new(PUBLISHER, NO_SUBSCRIBERS)], now_utc());
    assert_eq!(resumed, vec![flow_id]);

    let outcome = service.route(&mut delta_file, flow_id, now_utc()).unwrap();

    assert_eq!(outcome.created.len(), 1);
    let actions = delta_file.flow(flow_id).unwrap().actions();
    let states: Vec<ActionState> = actions.iter().map(|a| a.state).collect();
    assert_eq!(states, vec![ActionState::Complete, ActionState::Retried, ActionState::Complete]);
    assert_eq!(actions[2].attempt, 2);
    assert_eq!(delta_file.flow(flow_id).unwrap().state, DeltaFileFlowState::Complete);
}

#[test]
fn test_unknown_flow_id_is_error() {
    let evaluator = Arc::new(ScriptedRuleEvaluator::new());
    let (mut delta_file, _) = DeltaFileFixture::new(PUBLISHER).build(now_utc());

    let err = router(&evaluator, InMemoryTopicDirectory::new())
        .route(&mut delta_file, 99, now_utc())
        .unwrap_err();
    assert!(matches!(err, DeltaFiError::UnexpectedFlow { .. }));
}
