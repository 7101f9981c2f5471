use callosum::mtf_ranker::{MtfRanker, DEFAULT_RE_RANKING_INTERVAL, UNRANKED};
use std::fs;
use std::time::Duration;

fn write_registry(path: &std::path::Path) {
    fs::write(
        path,
        serde_json::to_string_pretty(&serde_json::json!({
            "version": "2.1",
            "agents": {
                "file_writer": {
                    "frequency_rank": 7,
                    "tract": "EXTERNAL",
                    "maintainer": "platform-team"
                },
                "file_reader": {
                    "frequency_rank": 9,
                    "tract": "EXTERNAL"
                }
            }
        }))
        .unwrap(),
    )
    .unwrap();
}

#[test]
fn re_ranking_updates_registry_and_preserves_foreign_fields() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("registry.json");
    let state_path = dir.path().join("mtf_state.json");
    write_registry(&registry_path);

    let mut ranker = MtfRanker::new(
        Some(registry_path.clone()),
        Some(state_path.clone()),
        DEFAULT_RE_RANKING_INTERVAL,
    );

    // file_writer starts at its registry rank.
    assert_eq!(ranker.get_particle_rank("file_writer"), 7);

    for _ in 0..5 {
        ranker.record_particle_invocation("file_writer", 0.01, true);
    }
    for _ in 0..2 {
        ranker.record_particle_invocation("file_reader", 0.02, true);
    }
    let changes = ranker.force_re_rank();
    assert!(changes.contains_key("file_reader"));

    assert_eq!(ranker.get_particle_rank("file_writer"), 2);
    assert_eq!(ranker.get_particle_rank("file_reader"), 3);

    // The registry file on disk reflects the new ranks and keeps fields the
    // ranker knows nothing about.
    let registry: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&registry_path).unwrap()).unwrap();
    assert_eq!(registry["agents"]["file_writer"]["frequency_rank"], 2);
    assert_eq!(registry["agents"]["file_reader"]["frequency_rank"], 3);
    assert_eq!(
        registry["agents"]["file_writer"]["maintainer"],
        "platform-team"
    );
    assert_eq!(registry["version"], "2.1");

    // No temp file left behind by the rename-on-write.
    assert!(!dir.path().join("registry.json.tmp").exists());
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("mtf_state.json");

    {
        let mut ranker = MtfRanker::new(None, Some(state_path.clone()), DEFAULT_RE_RANKING_INTERVAL);
        ranker.record_particle_invocation("template_applier", 0.5, true);
        ranker.record_particle_invocation("template_applier", 0.5, false);
        ranker.force_re_rank();
    }

    let reloaded = MtfRanker::new(None, Some(state_path), DEFAULT_RE_RANKING_INTERVAL);
    let stats = reloaded.get_stats();
    assert_eq!(stats.total_particles_tracked, 1);
    assert!(stats.total_re_rankings >= 1);

    let top = reloaded.get_top_particles(1);
    assert_eq!(top[0].particle_id, "template_applier");
    assert_eq!(top[0].invocation_count, 2);
    assert!((top[0].success_rate - 0.5).abs() < 1e-9);
}

#[test]
fn interval_gates_automatic_re_ranking() {
    // A long interval: the first record triggers the initial ranking pass
    // (nothing has ever been ranked), further records do not.
    let mut ranker = MtfRanker::new(None, None, Duration::from_secs(3600));
    ranker.record_particle_invocation("a", 0.1, true);
    let after_first = ranker.get_stats().total_re_rankings;

    for _ in 0..10 {
        ranker.record_particle_invocation("a", 0.1, true);
    }
    assert_eq!(ranker.get_stats().total_re_rankings, after_first);
}

#[test]
fn unknown_particles_report_the_sentinel_rank() {
    let ranker = MtfRanker::new(None, None, DEFAULT_RE_RANKING_INTERVAL);
    assert_eq!(ranker.get_particle_rank("ghost"), UNRANKED);
}
