use callosum::pattern_learner::{
    test_pattern, PatternLearner, PatternMap, PatternType, BATCH_OPPORTUNITY_MIN_WRITES,
};
use callosum::planner::ActionType;
use callosum::synthesizer::{ActionRecord, PlanSynthesis, ResultSynthesizer};
use callosum::task::TaskState;
use serde_json::json;

fn record(action_type: ActionType, status: TaskState, error: Option<&str>) -> ActionRecord {
    ActionRecord {
        action_type,
        status,
        output: if status == TaskState::Completed {
            Some(json!({ "ok": true }))
        } else {
            None
        },
        error: error.map(str::to_string),
    }
}

fn synthesize(records: Vec<ActionRecord>) -> PlanSynthesis {
    ResultSynthesizer::new().synthesize("plan_test", records)
}

#[test]
fn collision_raises_and_is_counted() {
    let mut map = PatternMap::default();
    map.add_pattern(test_pattern("collision_test", &["action_a", "action_b"]))
        .unwrap();

    let err = map
        .add_pattern(test_pattern("collision_test", &["action_x", "action_y"]))
        .unwrap_err();
    assert_eq!(err.pattern_id, "collision_test");

    assert_eq!(map.len(), 1);
    assert_eq!(map.total_collisions(), 1);
    // The stored pattern kept its original signature.
    assert_eq!(
        map.get_pattern("collision_test").unwrap().action_sequence,
        vec!["action_a", "action_b"]
    );
}

#[test]
fn lru_bound_holds_after_overflow() {
    let max_size = 100;
    let mut map = PatternMap::new(max_size);

    for i in 0..max_size {
        map.add_pattern(test_pattern(&format!("test_{}", i), &["a"]))
            .unwrap();
    }
    assert_eq!(map.len(), max_size);
    assert!(map.get_pattern("test_0").is_some());
    assert_eq!(map.total_evictions(), 0);

    map.add_pattern(test_pattern("test_new", &["b"])).unwrap();

    assert_eq!(map.len(), max_size);
    assert_eq!(map.total_evictions(), 1);
    assert!(map.get_pattern("test_0").is_none());
    assert!(map.get_pattern("test_new").is_some());
}

#[test]
fn analysis_discovers_sequence_and_composition() {
    let mut learner = PatternLearner::new(None);
    let synthesis = synthesize(vec![
        record(ActionType::CreateDirectory, TaskState::Completed, None),
        record(ActionType::WriteFile, TaskState::Completed, None),
        record(ActionType::WriteFile, TaskState::Completed, None),
    ]);

    let discovered = learner.analyze_synthesis(&synthesis);
    let kinds: Vec<PatternType> = discovered.iter().map(|p| p.pattern_type).collect();
    assert!(kinds.contains(&PatternType::Sequence));
    assert!(kinds.contains(&PatternType::Composition));

    assert!(learner.pattern_map().get_pattern("comp_directory_with_files").is_some());
    assert_eq!(learner.pattern_map().total_analyses_performed(), 1);
}

#[test]
fn repeated_analysis_increments_occurrences() {
    let mut learner = PatternLearner::new(None);
    let make = || {
        synthesize(vec![
            record(ActionType::CreateDirectory, TaskState::Completed, None),
            record(ActionType::WriteFile, TaskState::Completed, None),
        ])
    };

    learner.analyze_synthesis(&make());
    learner.analyze_synthesis(&make());

    let sequence = learner
        .pattern_map()
        .patterns()
        .find(|p| p.pattern_type == PatternType::Sequence)
        .expect("sequence pattern discovered");
    assert_eq!(sequence.occurrence_count, 2);
}

#[test]
fn batch_opportunity_flagged_for_sequential_writes() {
    let mut learner = PatternLearner::new(None);
    let records = (0..BATCH_OPPORTUNITY_MIN_WRITES)
        .map(|_| record(ActionType::WriteFile, TaskState::Completed, None))
        .collect();
    learner.analyze_synthesis(&synthesize(records));

    let opt = learner
        .pattern_map()
        .get_pattern("opt_batch_opportunity")
        .expect("optimization pattern discovered");
    assert_eq!(opt.pattern_type, PatternType::Optimization);

    // And it comes back as a recommendation for similar sequences.
    let sequence: Vec<String> = (0..4).map(|_| "write_file".to_string()).collect();
    let recommendations = learner.get_pattern_recommendations(&sequence);
    assert!(recommendations
        .iter()
        .any(|p| p.pattern_id == "opt_batch_opportunity"));
}

#[test]
fn error_patterns_group_by_leading_token() {
    let mut learner = PatternLearner::new(None);
    let synthesis = synthesize(vec![
        record(
            ActionType::WriteFile,
            TaskState::Failed,
            Some("PermissionDenied: /etc/shadow"),
        ),
        record(
            ActionType::WriteFile,
            TaskState::Failed,
            Some("PermissionDenied: /etc/passwd"),
        ),
    ]);

    let discovered = learner.analyze_synthesis(&synthesis);
    let error_pattern = discovered
        .iter()
        .find(|p| p.pattern_type == PatternType::Error)
        .expect("error pattern discovered");
    assert!(error_pattern.name.contains("PermissionDenied"));
    assert_eq!(error_pattern.success_rate, 0.0);
}

#[test]
fn structural_pattern_needs_two_directories() {
    let mut learner = PatternLearner::new(None);

    learner.analyze_synthesis(&synthesize(vec![record(
        ActionType::CreateDirectory,
        TaskState::Completed,
        None,
    )]));
    assert!(learner.pattern_map().get_pattern("struct_hierarchy").is_none());

    learner.analyze_synthesis(&synthesize(vec![
        record(ActionType::CreateDirectory, TaskState::Completed, None),
        record(ActionType::CreateDirectory, TaskState::Completed, None),
    ]));
    assert!(learner.pattern_map().get_pattern("struct_hierarchy").is_some());
}

#[test]
fn learner_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patterns").join("pattern_map.json");

    {
        let mut learner = PatternLearner::new(Some(path.clone()));
        learner.analyze_synthesis(&synthesize(vec![
            record(ActionType::CreateDirectory, TaskState::Completed, None),
            record(ActionType::WriteFile, TaskState::Completed, None),
            record(ActionType::WriteFile, TaskState::Completed, None),
        ]));
        assert!(path.exists());
    }

    let reloaded = PatternLearner::new(Some(path));
    assert!(reloaded.pattern_map().len() >= 2);
    assert_eq!(reloaded.pattern_map().total_analyses_performed(), 1);
    assert!(reloaded
        .pattern_map()
        .get_pattern("comp_directory_with_files")
        .is_some());
}

#[test]
fn stats_expose_totals_and_top_patterns() {
    let mut learner = PatternLearner::new(None);
    for _ in 0..3 {
        learner.analyze_synthesis(&synthesize(vec![
            record(ActionType::CreateDirectory, TaskState::Completed, None),
            record(ActionType::WriteFile, TaskState::Completed, None),
        ]));
    }

    let stats = learner.get_stats();
    assert_eq!(stats.total_analyses, 3);
    assert!(stats.total_patterns >= 2);
    assert!(!stats.top_patterns.is_empty());
    assert!(stats.top_patterns[0].occurrences >= stats.top_patterns.last().unwrap().occurrences);
    assert!(stats.consciousness_level > 0.0);
}
