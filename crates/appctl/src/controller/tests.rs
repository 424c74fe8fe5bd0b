//! Unit tests for the lifecycle controller.

use std::path::PathBuf;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::behaviour::StartType;
use crate::tests::support::{Harness, LifecycleEvent, StartScript, TestBehaviour};

const NORMAL: StartType = StartType::Normal;

#[fixture]
fn harness() -> Harness {
    let harness = Harness::new();
    harness.define(
        "db",
        json!({
            "name": "db",
            "callback": { "module": "db_app", "args": { "pool": 4 } },
            "env": { "port": 5432 }
        }),
    );
    harness.define(
        "web",
        json!({
            "name": "web",
            "dependencies": ["db"],
            "callback": { "module": "web_app" }
        }),
    );
    harness.define("lib", json!({ "name": "lib", "version": "0.3.1" }));
    harness
}

fn started(harness: &Harness, name: &str) {
    harness
        .controller
        .start(name, &NORMAL, RestartPolicy::Temporary)
        .unwrap_or_else(|err| panic!("start {name}: {err}"));
}

#[rstest]
fn library_component_starts_without_process(harness: Harness) {
    started(&harness, "lib");
    let info = harness.controller.info("lib").expect("info");
    assert_eq!(info.status, Status::Started);
    assert_eq!(info.process, None);
    assert_eq!(harness.controller.list_started(), ["lib"]);
    harness.controller.stop("lib").expect("stop lib");
    assert_eq!(harness.controller.status("lib"), Status::Loaded);
}

#[rstest]
fn start_loads_component_on_demand(harness: Harness) {
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    assert_eq!(harness.controller.status("db"), Status::Unloaded);
    started(&harness, "db");
    assert_eq!(harness.controller.list_loaded(), ["db"]);
    assert_eq!(harness.controller.status("db"), Status::Started);
    assert!(harness.controller.info("db").and_then(|info| info.process).is_some());
}

#[rstest]
fn second_start_is_already_started(harness: Harness) {
    let db = harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    started(&harness, "db");
    let err = harness
        .controller
        .start("db", &NORMAL, RestartPolicy::Temporary)
        .expect_err("second start");
    assert!(matches!(err, ControlError::AlreadyStarted { ref name } if name == "db"));
    assert_eq!(db.start_count(), 1);
    harness
        .controller
        .ensure_started("db", &NORMAL, RestartPolicy::Temporary)
        .expect("ensure started");
    assert_eq!(db.start_count(), 1);
}

#[rstest]
fn missing_dependency_has_no_side_effects(harness: Harness) {
    let web = harness.register("web_app", TestBehaviour::new("web", &harness.journal));
    let err = harness
        .controller
        .start("web", &NORMAL, RestartPolicy::Temporary)
        .expect_err("db not started");
    assert!(matches!(
        err,
        ControlError::MissingDependency { ref name, ref dependency }
            if name == "web" && dependency == "db"
    ));
    assert_eq!(web.start_count(), 0);
    assert_eq!(harness.controller.status("web"), Status::Loaded);
}

#[rstest]
fn unknown_component_cannot_start(harness: Harness) {
    let err = harness
        .controller
        .start("ghost", &NORMAL, RestartPolicy::Temporary)
        .expect_err("ghost");
    assert!(matches!(err, ControlError::NotFound { .. }));
    assert_eq!(harness.controller.status("ghost"), Status::Unloaded);
}

#[rstest]
#[case::explicit_failure(StartScript::Fail(json!("no disk")), "start_failed")]
#[case::panic(StartScript::Panic, "callback_exit")]
#[case::dead_process(StartScript::ReturnDead, "bad_return")]
fn failed_start_reverts_to_loaded(
    harness: Harness,
    #[case] script: StartScript,
    #[case] expected: &str,
) {
    harness.register(
        "db_app",
        TestBehaviour::new("db", &harness.journal).scripted(script),
    );
    let err = harness
        .controller
        .start("db", &NORMAL, RestartPolicy::Permanent)
        .expect_err("start should fail");
    let kind = match err {
        ControlError::StartFailed { ref reason, .. } => {
            assert_eq!(reason, &json!("no disk"));
            "start_failed"
        }
        ControlError::CallbackExit { ref cause, .. } => {
            assert!(cause.contains("blew up"), "unexpected cause: {cause}");
            "callback_exit"
        }
        ControlError::BadReturn { .. } => "bad_return",
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(kind, expected);
    assert_eq!(harness.controller.status("db"), Status::Loaded);
    assert!(harness.controller.list_started().is_empty());
    assert!(
        harness
            .reporter
            .events()
            .contains(&LifecycleEvent::StartFailed("db".into()))
    );
}

#[rstest]
fn unregistered_callback_module_is_callback_exit(harness: Harness) {
    let err = harness
        .controller
        .start("db", &NORMAL, RestartPolicy::Temporary)
        .expect_err("no behaviour");
    assert!(matches!(err, ControlError::CallbackExit { .. }));
    assert_eq!(harness.controller.status("db"), Status::Loaded);
}

#[rstest]
fn failing_phase_leaves_component_started(harness: Harness) {
    harness.define(
        "db",
        json!({
            "name": "db",
            "callback": { "module": "db_app" },
            "start_phases": [{ "phase": "init" }, { "phase": "warm" }, { "phase": "open" }]
        }),
    );
    harness.register(
        "db_app",
        TestBehaviour::new("db", &harness.journal).failing_phase("warm"),
    );
    let err = harness
        .controller
        .start("db", &NORMAL, RestartPolicy::Temporary)
        .expect_err("phase failure");
    assert!(matches!(
        err,
        ControlError::PhaseFailed { ref phase, ref reason, .. }
            if phase == "warm" && reason == &json!("warm refused")
    ));
    assert_eq!(harness.controller.status("db"), Status::Started);
    assert_eq!(
        harness.journal_entries(),
        ["start:db", "phase:db:init", "phase:db:warm"]
    );
}

#[rstest]
fn stop_requires_started_component(harness: Harness) {
    let not_loaded = harness.controller.stop("db").expect_err("not loaded");
    assert!(matches!(not_loaded, ControlError::NotLoaded { .. }));
    harness.controller.load("db").expect("load db");
    let not_started = harness.controller.stop("db").expect_err("not started");
    assert!(matches!(not_started, ControlError::NotStarted { .. }));
}

#[rstest]
fn stop_waits_for_descendants_before_post_stop(harness: Harness) {
    harness.register(
        "db_app",
        TestBehaviour::new("db", &harness.journal).with_children(3),
    );
    started(&harness, "db");
    harness.controller.stop("db").expect("stop db");
    assert_eq!(harness.journal_entries(), ["start:db", "prep_stop:db", "stop:db"]);
    let info = harness.controller.info("db").expect("info");
    assert_eq!(info.status, Status::Loaded);
    assert_eq!(info.last_exit, Some(ExitCause::Shutdown));
}

#[rstest]
fn stop_hooks_receive_the_start_state(harness: Harness) {
    let db = harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    started(&harness, "db");
    harness.controller.stop("db").expect("stop db");
    assert_eq!(
        db.stop_states(),
        [
            ("prep_stop".to_owned(), json!({ "pool": 4 })),
            ("stop".to_owned(), json!({ "pool": 4 })),
        ]
    );
}

#[rstest]
fn state_returned_by_prep_stop_reaches_post_stop(harness: Harness) {
    let db = harness.register(
        "db_app",
        TestBehaviour::new("db", &harness.journal).draining_to(json!({ "drained": true })),
    );
    started(&harness, "db");
    harness.controller.stop("db").expect("stop db");
    assert_eq!(
        db.stop_states(),
        [
            ("prep_stop".to_owned(), json!({ "pool": 4 })),
            ("stop".to_owned(), json!({ "drained": true })),
        ]
    );
}

#[rstest]
fn unmonitored_root_process_fails_the_start(harness: Harness) {
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    harness.controller.inner.monitor.refuse_spawns();
    let err = harness
        .controller
        .start("db", &NORMAL, RestartPolicy::Permanent)
        .expect_err("monitor unavailable");
    assert!(matches!(err, ControlError::Unmonitored { ref name, .. } if name == "db"));
    let info = harness.controller.info("db").expect("info");
    assert_eq!(info.status, Status::Loaded);
    assert_eq!(info.process, None);
    assert!(harness.controller.list_started().is_empty());
    assert!(harness
        .reporter
        .events()
        .contains(&LifecycleEvent::StartFailed("db".to_owned())));
}

#[rstest]
fn unload_and_start_of_an_included_component_serialise(harness: Harness) {
    harness.define("app", json!({ "name": "app", "included": ["part"] }));
    harness.define("part", json!({ "name": "part" }));
    let controller = &harness.controller;
    for round in 0..500 {
        controller.load("app").expect("load app");
        let barrier = Barrier::new(2);
        let unloaded = thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                drop(controller.start("part", &NORMAL, RestartPolicy::Temporary));
            });
            barrier.wait();
            controller.unload("app").is_ok()
        });

        let part_started = controller.status("part") == Status::Started;
        assert_eq!(
            controller.list_started().contains(&"part".to_owned()),
            part_started,
            "round {round}: start order and status disagree"
        );
        if part_started {
            assert!(controller.spec("part").is_some(), "round {round}: started but unloaded");
            controller.stop("part").expect("stop part");
        }
        let leftover = if unloaded { "part" } else { "app" };
        if controller.spec(leftover).is_some() {
            controller.unload(leftover).expect("unload leftover");
        }
    }
}

#[rstest]
fn unload_refuses_started_component(harness: Harness) {
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    started(&harness, "db");
    let err = harness.controller.unload("db").expect_err("still started");
    assert!(matches!(err, ControlError::StillStarted { .. }));
    harness.controller.stop("db").expect("stop");
    harness.controller.unload("db").expect("unload");
    assert_eq!(harness.controller.status("db"), Status::Unloaded);
    assert!(harness.controller.spec("db").is_none());
}

#[rstest]
fn ensure_all_started_rolls_back_on_failure(harness: Harness) {
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    harness.register(
        "web_app",
        TestBehaviour::new("web", &harness.journal)
            .scripted(StartScript::Fail(json!("port taken"))),
    );
    let err = harness
        .controller
        .ensure_all_started("web", &NORMAL, RestartPolicy::Temporary)
        .expect_err("web fails");
    match err {
        ControlError::DependencyFailed { component, source } => {
            assert_eq!(component, "web");
            assert!(matches!(*source, ControlError::StartFailed { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(harness.controller.status("db"), Status::Loaded);
    assert!(harness.controller.list_started().is_empty());
    assert_eq!(
        harness.journal_entries(),
        ["start:db", "start:web", "prep_stop:db", "stop:db"]
    );
}

#[rstest]
fn ensure_all_started_skips_absent_optional_dependency(harness: Harness) {
    harness.define(
        "web",
        json!({
            "name": "web",
            "dependencies": ["db", "metrics"],
            "optional_dependencies": ["metrics"],
            "callback": { "module": "web_app" }
        }),
    );
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    harness.register("web_app", TestBehaviour::new("web", &harness.journal));
    let started = harness
        .controller
        .ensure_all_started("web", &NORMAL, RestartPolicy::Temporary)
        .expect("ensure all started");
    assert_eq!(started, ["db", "web"]);
}

#[rstest]
fn ensure_all_started_reports_missing_required_dependency(harness: Harness) {
    harness.define(
        "web",
        json!({ "name": "web", "dependencies": ["cache"], "callback": { "module": "web_app" } }),
    );
    let err = harness
        .controller
        .ensure_all_started("web", &NORMAL, RestartPolicy::Temporary)
        .expect_err("cache missing");
    assert!(matches!(
        err,
        ControlError::DependencyFailed { ref component, .. } if component == "cache"
    ));
}

#[rstest]
fn temporary_exit_is_only_reported(harness: Harness) {
    let db = harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    started(&harness, "db");
    *db.exit_trigger().lock() = Some(ExitCause::Failed("lost socket".into()));
    assert!(harness.wait_until(|controller| controller.status("db") == Status::Loaded));
    let info = harness.controller.info("db").expect("info");
    assert_eq!(info.last_exit, Some(ExitCause::Failed("lost socket".into())));
    assert_eq!(harness.controller.halt_reason(), None);
    assert!(
        harness
            .reporter
            .events()
            .contains(&LifecycleEvent::Exited("db".into(), RestartPolicy::Temporary))
    );
    assert!(!harness.journal_entries().contains(&"stop:db".to_owned()));
}

#[rstest]
#[case::permanent_normal(RestartPolicy::Permanent, ExitCause::Normal, true)]
#[case::transient_normal(RestartPolicy::Transient, ExitCause::Normal, false)]
#[case::transient_failed(RestartPolicy::Transient, ExitCause::Failed("boom".into()), true)]
fn unexpected_exit_follows_policy(
    harness: Harness,
    #[case] policy: RestartPolicy,
    #[case] cause: ExitCause,
    #[case] halts: bool,
) {
    harness.register("db_app", TestBehaviour::new("db", &harness.journal));
    let web = harness.register("web_app", TestBehaviour::new("web", &harness.journal));
    started(&harness, "db");
    harness
        .controller
        .start("web", &NORMAL, policy)
        .expect("start web");
    started(&harness, "lib");

    *web.exit_trigger().lock() = Some(cause);
    assert!(harness.wait_until(|controller| controller.status("web") == Status::Loaded));

    if halts {
        let reason = harness
            .controller
            .wait_for_halt_timeout(Duration::from_secs(2))
            .expect("halt requested");
        assert_eq!(reason.get("component"), Some(&json!("web")));
        assert!(harness.controller.list_started().is_empty());
        assert_eq!(harness.controller.status("db"), Status::Loaded);
        assert!(
            harness
                .reporter
                .events()
                .contains(&LifecycleEvent::Escalated("web".into()))
        );
    } else {
        assert_eq!(
            harness.controller.wait_for_halt_timeout(Duration::from_millis(100)),
            None
        );
        assert_eq!(harness.controller.list_started(), ["db", "lib"]);
    }
}

#[rstest]
fn shutdown_refuses_new_starts(harness: Harness) {
    started(&harness, "lib");
    assert_eq!(harness.controller.shutdown(json!("maintenance")), ["lib"]);
    let err = harness
        .controller
        .start("lib", &NORMAL, RestartPolicy::Temporary)
        .expect_err("shutting down");
    assert!(matches!(err, ControlError::ShuttingDown { .. }));
    assert_eq!(harness.controller.wait_for_halt(), json!("maintenance"));
}

#[rstest]
fn environment_accessors_delegate(harness: Harness) {
    harness.controller.load("db").expect("load db");
    assert_eq!(harness.controller.fetch_or_fail::<u16>("db", "port").expect("port"), 5432);
    harness.controller.put("db", "port", json!(6543)).expect("put");
    assert_eq!(harness.controller.get("db", "port", Value::Null), json!(6543));
    harness.controller.delete("db", "port").expect("delete");
    assert_eq!(harness.controller.all_env("db").get("port"), Some(&json!(5432)));
    let err = harness
        .controller
        .fetch_or_fail::<String>("db", "port")
        .expect_err("not a string");
    assert!(matches!(err, ControlError::InvalidValue { .. }));
}

#[rstest]
fn write_under_held_lock_times_out(harness: Harness) {
    harness.controller.load("db").expect("load db");
    let layers = harness.controller.environment().hold_write("db");
    let guard = layers.write();
    let err = harness
        .controller
        .put("db", "port", json!(1))
        .expect_err("lock held");
    assert!(matches!(err, ControlError::Timeout { .. }));
    drop(guard);
    harness.controller.put("db", "port", json!(1)).expect("put after release");
}

#[rstest]
fn reload_keeps_persistent_entries(harness: Harness) {
    harness.controller.load("db").expect("load db");
    harness
        .controller
        .put_with("db", "owner", json!("ops"), PutOptions::persistent(Duration::from_secs(1)))
        .expect("persistent put");
    harness.controller.put("db", "mode", json!("fast")).expect("runtime put");
    harness.controller.reload("db").expect("reload");
    assert_eq!(harness.controller.get("db", "owner", Value::Null), json!("ops"));
    assert_eq!(harness.controller.get("db", "mode", Value::Null), Value::Null);
}

#[rstest]
fn introspection_reads_spec_and_directories(harness: Harness) {
    harness.controller.load("lib").expect("load lib");
    assert_eq!(
        harness.controller.spec_field("lib", SpecKey::Version),
        Some(json!("0.3.1"))
    );
    assert_eq!(harness.controller.spec_field("ghost", SpecKey::Version), None);
    assert_eq!(
        harness.controller.app_subdirectory("lib", "priv").expect("priv dir"),
        PathBuf::from("/opt/appctl/lib/lib/priv")
    );
    let err = harness.controller.app_directory("ghost").expect_err("ghost");
    assert!(matches!(err, ControlError::UnknownComponent { .. }));
}
