//! Integration tests for a running engine: both loops, jobs and config.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata::error::JobResult;
use strata::{Engine, EngineConfig, JobContext, JobKind, JobStatus, WorldDriver};
use strata_core::{ComponentKind, FieldMap, WorldResult, WorldStore};
use strata_patch::PatchBuilder;
use strata_shared::InMemoryMetrics;

fn fast_config() -> EngineConfig {
    EngineConfig::from_toml_str(
        r"
        [orchestrator]
        tick_period_ms = 10
        consumer_poll_ms = 10
        job_batch_size = 4
        join_timeout_ms = 2000
        ",
    )
    .unwrap()
}

fn metadata(value: Value) -> FieldMap {
    match value {
        Value::Object(map) => map,
        _ => FieldMap::new(),
    }
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn test_consumer_applies_submitted_patches() {
    let engine = Engine::new(fast_config()).unwrap();
    engine.start().unwrap();

    for i in 0..20 {
        let patch = PatchBuilder::new()
            .with_region("north")
            .create_entity("npc", Some(&format!("npc-{i}")))
            .build();
        assert!(engine.submit_patch(patch));
    }

    assert!(wait_until(Duration::from_secs(5), || engine.world().entity_count() == 20));
    engine.stop();

    let stats = engine.orchestrator().stats();
    assert!(!stats.running);
    assert_eq!(stats.patches_processed, 20);
    assert_eq!(stats.patches_failed, 0);
    assert_eq!(stats.world.by_region.get("north"), Some(&20));
}

#[test]
fn test_failed_patch_is_counted_and_consumer_continues() {
    let engine = Engine::new(fast_config()).unwrap();
    engine.start().unwrap();

    assert!(engine.submit_patch(PatchBuilder::new().delete_entity("ghost").build()));
    assert!(engine.submit_patch(PatchBuilder::new().create_entity("npc", Some("real")).build()));

    assert!(wait_until(Duration::from_secs(5), || engine.orchestrator().stats().patches_processed == 2));
    engine.stop();

    let stats = engine.orchestrator().stats();
    assert_eq!(stats.patches_failed, 1);
    assert!(stats.last_patch_error.unwrap().contains("entity not found: ghost"));
    assert!(engine.world().contains("real"));
}

#[test]
fn test_jobs_run_through_tick_loop() {
    let engine = Engine::new(fast_config()).unwrap();
    let spawn = engine.submit_job(
        JobKind::SpawnEntity,
        5,
        metadata(json!({"entity_type": "tree", "entity_id": "oak", "region": "forest"})),
    );
    let activate = engine.submit_job(JobKind::ActivateRegion, 1, metadata(json!({"region": "forest"})));
    let broken = engine.submit_job(JobKind::ActivateRegion, 0, FieldMap::new());

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        [&spawn, &activate, &broken].iter().all(|id| {
            engine
                .orchestrator()
                .get_job(id)
                .is_some_and(|job| job.status.is_terminal())
        })
    }));
    engine.stop();

    let spawn = engine.orchestrator().get_job(&spawn).unwrap();
    assert_eq!(spawn.status, JobStatus::Completed);
    assert_eq!(spawn.result.unwrap()["entity_id"], json!("oak"));
    assert!(engine.world().get_entity("oak").unwrap().in_region("forest"));

    let activate = engine.orchestrator().get_job(&activate).unwrap();
    assert_eq!(activate.status, JobStatus::Completed);

    let broken = engine.orchestrator().get_job(&broken).unwrap();
    assert_eq!(broken.status, JobStatus::Failed);
    assert!(broken.error.unwrap().contains("region"));
}

#[test]
fn test_custom_handler_and_driver() {
    struct Counter(AtomicUsize);

    impl WorldDriver for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn advance(&self, _world: &WorldStore, _delta: Duration) -> WorldResult<()> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    let driver = Arc::new(Counter(AtomicUsize::new(0)));
    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = Engine::builder(fast_config())
        .with_metrics(metrics.clone())
        .with_driver(driver.clone())
        .with_handler(
            "count_npcs",
            Arc::new(|ctx: &JobContext<'_>| -> JobResult<Value> {
                Ok(json!(ctx.world.statistics().by_type.get("npc").copied().unwrap_or(0)))
            }),
        )
        .build()
        .unwrap();

    engine.world().create_entity("npc", None, Some("a")).unwrap();
    let id = engine.submit_job(JobKind::from_name("count_npcs"), 0, FieldMap::new());
    let unknown = engine.submit_job(JobKind::from_name("nobody_handles_this"), 0, FieldMap::new());

    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || driver.0.load(Ordering::Relaxed) >= 3));
    assert!(wait_until(Duration::from_secs(5), || {
        engine.orchestrator().get_job(&unknown).is_some_and(|j| j.status.is_terminal())
    }));
    engine.stop();

    let job = engine.orchestrator().get_job(&id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!(1)));

    let unknown = engine.orchestrator().get_job(&unknown).unwrap();
    assert_eq!(unknown.status, JobStatus::Failed);
    assert_eq!(unknown.error.as_deref(), Some("unknown job type: nobody_handles_this"));

    assert!(metrics.count("orchestrator.job_finished") >= 2);
    assert!(metrics.count("orchestrator.uptime_seconds") >= 1);
}

#[test]
fn test_stop_is_prompt_and_restartable() {
    let engine = Engine::new(fast_config()).unwrap();
    engine.start().unwrap();
    assert!(engine.orchestrator().is_running());

    let started = Instant::now();
    engine.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!engine.orchestrator().is_running());

    engine.start().unwrap();
    assert!(engine.submit_patch(
        PatchBuilder::new()
            .create_entity_with("npc", Some("after-restart"), {
                let mut components = std::collections::BTreeMap::new();
                components.insert(ComponentKind::Health, FieldMap::new());
                components
            })
            .build()
    ));
    assert!(wait_until(Duration::from_secs(5), || engine.world().contains("after-restart")));
    engine.stop();

    assert!(engine
        .world()
        .get_component("after-restart", ComponentKind::Health)
        .is_some());
}

#[test]
fn test_stop_detaches_loop_stuck_in_long_handler() {
    let config = EngineConfig::from_toml_str(
        r"
        [orchestrator]
        tick_period_ms = 10
        consumer_poll_ms = 10
        join_timeout_ms = 200
        ",
    )
    .unwrap();
    let engine = Engine::builder(config)
        .with_handler(
            "slow",
            Arc::new(|_ctx: &JobContext<'_>| -> JobResult<Value> {
                thread::sleep(Duration::from_secs(3));
                Ok(Value::Null)
            }),
        )
        .build()
        .unwrap();

    let id = engine.submit_job(JobKind::from_name("slow"), 0, FieldMap::new());
    engine.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        engine
            .orchestrator()
            .get_job(&id)
            .is_some_and(|job| job.status == JobStatus::Running)
    }));

    let started = Instant::now();
    engine.stop();
    let took = started.elapsed();

    assert!(took >= Duration::from_millis(150), "stop returned before waiting: {took:?}");
    assert!(took < Duration::from_millis(1500), "stop waited on the handler: {took:?}");
    assert!(!engine.orchestrator().is_running());
}

#[test]
fn test_config_file_drives_engine() {
    let path = std::env::temp_dir().join(format!("strata_engine_test_{}.toml", std::process::id()));
    std::fs::write(&path, "[queues]\ndefault_capacity = 2\n\n[applier]\nreorder_by_metadata_priority = true\n")
        .unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let engine = Engine::new(config).unwrap();
    assert_eq!(engine.queues().default_queue().capacity(), 2);
    assert!(engine.config().applier.reorder_by_metadata_priority);
}
