//! Crate-level integration and BDD tests.

pub(crate) mod support;


use serde_json::json;

use crate::behaviour::{RestartPolicy, StartType};
use crate::status::Status;

use self::support::{Harness, TestBehaviour};

#[test]
fn end_to_end_start_and_stop() {
    let harness = Harness::new();
    harness.define("db", json!({ "name": "db", "callback": { "module": "db_app" } }));
    harness.define(
        "web",
        json!({
            "name": "web",
            "dependencies": ["db"],
            "callback": { "module": "web_app" },
            "env": { "port": 8080 }
        }),
    );
    harness.register("db_app", TestBehaviour::new("db", &harness.journal).with_children(2));
    harness.register("web_app", TestBehaviour::new("web", &harness.journal));
    let controller = &harness.controller;

    let started = controller
        .ensure_all_started("web", &StartType::Normal, RestartPolicy::Temporary)
        .expect("ensure all started");
    assert_eq!(started, ["db", "web"]);
    assert_eq!(controller.fetch("web", "port").expect("port"), json!(8080));

    let stopped = controller.shutdown(json!("test over"));
    assert_eq!(stopped, ["web", "db"]);
    assert_eq!(controller.status("db"), Status::Loaded);
    assert_eq!(
        harness.journal_entries(),
        ["start:db", "start:web", "prep_stop:web", "stop:web", "prep_stop:db", "stop:db"]
    );
    assert_eq!(controller.halt_reason(), Some(json!("test over")));
}
