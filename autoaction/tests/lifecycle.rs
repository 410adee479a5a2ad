//! End-to-end lifecycle tests for wrapped engines.
//!
//! These drive a wrapped target through mount, input updates, state
//! notifications and teardown, checking which handlers run and with what.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::bail;
use serde_json::{Value, json};

use autoaction::core::queue::{DispatchQueue, QueueEntry, drain};
use autoaction::test_support::{CallLog, seq_from_inputs, seq_from_state};
use autoaction::{
    ActionSpec, ActionSpecs, Args, AutoActions, Handlers, Immediate, Phase, Render, Scheduler,
    Store, TickScheduler, handler,
};

fn mount_with(
    specs: ActionSpecs<Value, Value>,
    handlers: Handlers,
    store: &Store<Value>,
    scheduler: Rc<dyn Scheduler>,
    inputs: Value,
) -> autoaction::Wrapped<Value, Value, fn(&Value)> {
    let actions = AutoActions::new(specs, handlers).expect("valid config");
    let mut wrapped = actions.wrap(noop as fn(&Value));
    wrapped
        .mount(Rc::new(store.clone()), scheduler, inputs)
        .expect("mount");
    wrapped
}

fn noop(_: &Value) {}

#[test]
fn load_by_id_dispatches_only_on_change() {
    let log = CallLog::new();
    let store = Store::new(json!({}));
    let specs = ActionSpecs::new().with("load", seq_from_inputs("id"));
    let mut wrapped = mount_with(
        specs,
        log.handlers(["load"]),
        &store,
        Rc::new(Immediate),
        json!({"id": 5}),
    );
    assert_eq!(log.args_for("load"), vec![vec![json!(5)]]);

    store.notify();
    assert_eq!(wrapped.update(json!({"id": 5})).expect("update"), Render::Skipped);
    assert_eq!(log.count("load"), 1);

    assert_eq!(wrapped.update(json!({"id": 7})).expect("update"), Render::Rendered);
    assert_eq!(log.args_for("load"), vec![vec![json!(5)], vec![json!(7)]]);

    wrapped.unmount().expect("unmount");
    assert_eq!(store.listener_count(), 0);
}

fn fetch_k1() -> ActionSpec<Value, Value> {
    ActionSpec::keyed(
        |_inputs: &Value, _state: &Value| Args::values([json!(1)]),
        |_inputs: &Value, _state: &Value| Some(json!("k1")),
    )
}

#[test]
fn keyed_descriptor_enqueued_twice_runs_once() {
    let spec = fetch_k1();
    let calls = RefCell::new(Vec::new());
    let queue = RefCell::new(DispatchQueue::new());
    for _ in 0..2 {
        let descriptor = spec.resolve(&json!({}), &json!({}));
        queue.borrow_mut().enqueue(QueueEntry {
            action: "fetch".to_string(),
            args: descriptor.args,
            key: descriptor.key,
            handler: (),
        });
    }
    queue.borrow_mut().enqueue(QueueEntry {
        action: "fetch".to_string(),
        args: Args::values([json!(1)]),
        key: Some(json!("k2")),
        handler: (),
    });

    let report = drain(&queue, |entry| {
        calls.borrow_mut().push((entry.args.to_call_args(), entry.key.clone()));
        Ok(())
    });

    assert_eq!(
        calls.into_inner(),
        vec![
            (vec![json!(1)], Some(json!("k1"))),
            (vec![json!(1)], Some(json!("k2"))),
        ]
    );
    assert_eq!(report.deduped, 1);
    assert!(queue.borrow().is_empty());
}

#[test]
fn mounted_keyed_action_with_stable_resolution_runs_once() {
    let log = CallLog::new();
    let store = Store::new(json!({}));
    let mut wrapped = mount_with(
        ActionSpecs::new().with("fetch", fetch_k1()),
        log.handlers(["fetch"]),
        &store,
        Rc::new(Immediate),
        json!({"page": 1}),
    );

    store.notify();
    store.set(json!({"unrelated": true}));
    assert_eq!(wrapped.update(json!({"page": 2})).expect("update"), Render::Rendered);

    assert_eq!(log.args_for("fetch"), vec![vec![json!(1)]]);
}

#[test]
fn identical_resolutions_invoke_the_handler_once() {
    let log = CallLog::new();
    let store = Store::new(json!({"org": "acme"}));
    let scheduler = TickScheduler::new();
    let specs = ActionSpecs::new()
        .with("load", seq_from_inputs("id"))
        .with(
            "keyed",
            ActionSpec::keyed(
                |inputs: &Value, _state: &Value| Args::map([("id", inputs.get("id").cloned())]),
                |_inputs: &Value, state: &Value| state.get("org").cloned(),
            ),
        );
    let _wrapped = mount_with(
        specs,
        log.handlers(["keyed", "load"]),
        &store,
        Rc::new(scheduler.clone()),
        json!({"id": 3}),
    );

    store.notify();
    scheduler.tick();
    store.set(json!({"org": "acme"}));
    scheduler.tick();

    assert_eq!(log.count("load"), 1);
    assert_eq!(log.args_for("keyed"), vec![vec![json!({"id": 3})]]);
}

#[test]
fn feedback_into_another_action_keeps_bucket_order() {
    let store = Store::new(json!({"n": 0}));
    let order = Rc::new(RefCell::new(Vec::new()));
    let handlers = {
        let feedback = store.clone();
        let a_order = Rc::clone(&order);
        let b_order = Rc::clone(&order);
        Handlers::from([
            (
                "a".to_string(),
                handler(move |args: &[Value]| {
                    a_order.borrow_mut().push(format!("a({})", args[0]));
                    if args[0] == json!(0) {
                        feedback.set(json!({"n": 1}));
                    }
                    Ok(())
                }),
            ),
            (
                "b".to_string(),
                handler(move |args: &[Value]| {
                    b_order.borrow_mut().push(format!("b({})", args[0]));
                    Ok(())
                }),
            ),
        ])
    };

    let wrapped = mount_with(
        ActionSpecs::new()
            .with("a", seq_from_state("n"))
            .with("b", seq_from_state("n")),
        handlers,
        &store,
        Rc::new(Immediate),
        json!({}),
    );

    assert_eq!(*order.borrow(), vec!["a(0)", "b(0)", "a(1)", "b(1)"]);
    let baseline = wrapped.engine().expect("mounted").baseline();
    for action in ["a", "b"] {
        let last = order
            .borrow()
            .iter()
            .rev()
            .find(|call| call.starts_with(action))
            .cloned();
        let expected = format!("{}({})", action, baseline[action].args.to_call_args()[0]);
        assert_eq!(last, Some(expected));
    }
}

#[test]
fn unresolved_slots_block_dispatch() {
    let log = CallLog::new();
    let store = Store::new(json!({}));
    let specs = ActionSpecs::new()
        .with(
            "seq",
            ActionSpec::computed(|_inputs: &Value, state: &Value| {
                Args::seq([Some(json!(true)), state.get("missing").cloned(), Some(json!(true))])
            }),
        )
        .with(
            "map",
            ActionSpec::computed(|_inputs: &Value, state: &Value| {
                Args::map([("a", Some(json!(1))), ("b", state.get("b").cloned())])
            }),
        );
    let _wrapped = mount_with(
        specs,
        log.handlers(["map", "seq"]),
        &store,
        Rc::new(Immediate),
        json!({}),
    );
    assert!(log.calls().is_empty());

    store.set(json!({"b": 2}));
    assert_eq!(log.args_for("map"), vec![vec![json!({"a": 1, "b": 2})]]);
    assert_eq!(log.count("seq"), 0);
}

#[test]
fn handler_feedback_terminates_and_sees_post_change_args() {
    let store = Store::new(json!({"n": 0}));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let handlers = {
        let store = store.clone();
        let seen = Rc::clone(&seen);
        Handlers::from([(
            "count".to_string(),
            handler(move |args: &[Value]| {
                seen.borrow_mut().push(args[0].clone());
                let n = args[0].as_i64().unwrap_or_default();
                if n < 3 {
                    store.set(json!({"n": n + 1}));
                }
                Ok(())
            }),
        )])
    };

    let _wrapped = mount_with(
        ActionSpecs::new().with("count", seq_from_state("n")),
        handlers,
        &store,
        Rc::new(Immediate),
        json!({}),
    );

    assert_eq!(
        *seen.borrow(),
        vec![json!(0), json!(1), json!(2), json!(3)]
    );
    assert_eq!(store.get(), json!({"n": 3}));
}

#[test]
fn handler_feedback_under_tick_scheduler_advances_one_step_per_tick() {
    let store = Store::new(json!({"n": 0}));
    let scheduler = TickScheduler::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let handlers = {
        let store = store.clone();
        let seen = Rc::clone(&seen);
        Handlers::from([(
            "count".to_string(),
            handler(move |args: &[Value]| {
                seen.borrow_mut().push(args[0].clone());
                let n = args[0].as_i64().unwrap_or_default();
                if n < 2 {
                    store.set(json!({"n": n + 1}));
                }
                Ok(())
            }),
        )])
    };

    let _wrapped = mount_with(
        ActionSpecs::new().with("count", seq_from_state("n")),
        handlers,
        &store,
        Rc::new(scheduler.clone()),
        json!({}),
    );
    assert_eq!(*seen.borrow(), vec![json!(0)]);
    assert_eq!(scheduler.pending(), 1);

    scheduler.tick();
    assert_eq!(*seen.borrow(), vec![json!(0), json!(1)]);

    let ticks = scheduler.run_until_idle(10);
    assert_eq!(ticks, 1);
    assert_eq!(*seen.borrow(), vec![json!(0), json!(1), json!(2)]);
    assert_eq!(scheduler.pending(), 0);
}

#[test]
fn burst_of_notifications_runs_one_recompute_with_latest_state() {
    let log = CallLog::new();
    let store = Store::new(json!({"id": 1}));
    let scheduler = TickScheduler::new();
    let wrapped = mount_with(
        ActionSpecs::new().with("load", seq_from_state("id")),
        log.handlers(["load"]),
        &store,
        Rc::new(scheduler.clone()),
        json!({}),
    );

    for id in 2..=5 {
        store.set(json!({"id": id}));
    }
    assert_eq!(scheduler.pending(), 1);
    assert!(wrapped.engine().expect("mounted").is_recompute_pending());

    scheduler.tick();
    assert_eq!(log.args_for("load"), vec![vec![json!(1)], vec![json!(5)]]);
}

#[test]
fn teardown_before_deferred_recompute_dispatches_nothing() {
    let log = CallLog::new();
    let store = Store::new(json!({"id": 1}));
    let scheduler = TickScheduler::new();
    let mut wrapped = mount_with(
        ActionSpecs::new().with("load", seq_from_state("id")),
        log.handlers(["load"]),
        &store,
        Rc::new(scheduler.clone()),
        json!({}),
    );

    store.set(json!({"id": 2}));
    let engine = wrapped.engine().expect("mounted").clone();
    wrapped.unmount().expect("unmount");
    assert_eq!(engine.phase(), Phase::TornDown);

    store.set(json!({"id": 3}));
    scheduler.run_until_idle(10);
    assert_eq!(log.count("load"), 1);
    engine.on_teardown().expect("repeat teardown");
}

#[test]
fn dropped_engine_makes_scheduled_task_inert() {
    let log = CallLog::new();
    let store = Store::new(json!({"id": 1}));
    let scheduler = TickScheduler::new();
    {
        let wrapped = mount_with(
            ActionSpecs::new().with("load", seq_from_state("id")),
            log.handlers(["load"]),
            &store,
            Rc::new(scheduler.clone()),
            json!({}),
        );
        store.set(json!({"id": 2}));
        drop(wrapped);
    }

    scheduler.run_until_idle(10);
    assert_eq!(log.count("load"), 1);
}

#[test]
fn failing_handler_does_not_block_other_actions() {
    let log = CallLog::new();
    let store = Store::new(json!({"id": 1}));
    let mut handlers = log.handlers(["audit"]);
    handlers.insert(
        "load".to_string(),
        handler(|args: &[Value]| {
            if args[0] == json!(2) {
                bail!("load {} failed", args[0]);
            }
            Ok(())
        }),
    );
    let specs = ActionSpecs::new()
        .with("audit", seq_from_state("id"))
        .with("load", seq_from_state("id"));

    let wrapped = mount_with(specs, handlers, &store, Rc::new(Immediate), json!({}));
    store.set(json!({"id": 2}));

    assert_eq!(log.args_for("audit"), vec![vec![json!(1)], vec![json!(2)]]);
    let failures = wrapped.take_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, "load");
    assert!(format!("{:#}", failures[0].error).contains("load 2 failed"));

    store.set(json!({"id": 3}));
    assert_eq!(log.count("audit"), 3);
    assert!(wrapped.take_failures().is_empty());
}
