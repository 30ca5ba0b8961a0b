use backroom::core::error::BackroomError;
use backroom::core::store::Record;
use backroom::hooks::{
    Action, Adapter, AdapterSet, DeliveryError, DispatchSummary, Dispatcher, HookRegistry,
    HookRule, HookRuleConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Remembers every delivery as (rule index, action, target).
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(usize, Action, String)>>,
}

impl Recorder {
    fn calls(&self) -> Vec<(usize, Action, String)> {
        self.calls.lock().expect("recorder lock").clone()
    }
}

impl Adapter for Recorder {
    fn deliver(&self, rule: &HookRule, action: Action, _record: &Record) -> Result<(), DeliveryError> {
        self.calls
            .lock()
            .expect("recorder lock")
            .push((rule.index, action, rule.target.clone()));
        Ok(())
    }
}

struct Broken;

impl Adapter for Broken {
    fn deliver(&self, _rule: &HookRule, _action: Action, _record: &Record) -> Result<(), DeliveryError> {
        Err(DeliveryError::Transport("connection refused".to_string()))
    }
}

fn rule(cage: &str, actions: &[Action], condition: Option<&str>, adapter: &str, target: &str) -> HookRuleConfig {
    HookRuleConfig {
        cage: cage.to_string(),
        action: actions.to_vec(),
        condition: condition.map(str::to_string),
        adapter: adapter.to_string(),
        target: target.to_string(),
    }
}

fn dispatcher(rules: &[HookRuleConfig], recorder: &Arc<Recorder>) -> Dispatcher {
    let registry = HookRegistry::from_configs(rules).expect("rules compile");
    let mut adapters = AdapterSet::new();
    adapters.register("record", recorder.clone());
    adapters.register("broken", Arc::new(Broken));
    Dispatcher::new(Arc::new(registry), Arc::new(adapters))
}

fn record(cage: &str, json: &str) -> Record {
    Record::from_json_str(cage, json).expect("valid record")
}

#[test]
fn rule_never_fires_outside_its_trigger_set() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let mut actions: Vec<Action> = Action::ALL
            .iter()
            .copied()
            .filter(|_| rng.gen_bool(0.5))
            .collect();
        if actions.is_empty() {
            actions.push(Action::ALL[rng.gen_range(0..3)]);
        }
        let fired = Action::ALL[rng.gen_range(0..3)];

        let recorder = Arc::new(Recorder::default());
        let dispatcher = dispatcher(&[rule("things", &actions, None, "record", "t")], &recorder);
        let summary = dispatcher
            .dispatch(fired, &record("things", r#"{"n": 1}"#))
            .expect("dispatch succeeds");

        let expected = usize::from(actions.contains(&fired));
        assert_eq!(recorder.calls().len(), expected, "actions {actions:?}, fired {fired}");
        assert_eq!(summary.delivered, expected);
        assert_eq!(summary.matched, expected);
    }
}

#[test]
fn unconditional_rule_always_fires_and_false_condition_never_does() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Create], None, "record", "always"),
            rule("orders", &[Action::Create], Some("false"), "record", "never"),
            rule("orders", &[Action::Create], Some("cage.n < 0"), "record", "negative"),
        ],
        &recorder,
    );

    for n in 0..5 {
        dispatcher
            .dispatch(Action::Create, &record("orders", &format!(r#"{{"n": {n}}}"#)))
            .expect("dispatch succeeds");
    }

    let targets: Vec<String> = recorder.calls().into_iter().map(|c| c.2).collect();
    assert_eq!(targets, vec!["always"; 5]);
}

#[test]
fn dispatch_follows_configuration_order() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Update], None, "record", "first"),
            rule("events", &[Action::Update], None, "record", "other cage"),
            rule("orders", &[Action::Update, Action::Delete], None, "record", "second"),
            rule("orders", &[Action::Update], None, "record", "third"),
        ],
        &recorder,
    );

    let summary = dispatcher
        .dispatch(Action::Update, &record("orders", "{}"))
        .expect("dispatch succeeds");

    let calls = recorder.calls();
    let order: Vec<(usize, &str)> = calls.iter().map(|c| (c.0, c.2.as_str())).collect();
    assert_eq!(order, vec![(0, "first"), (2, "second"), (3, "third")]);
    assert_eq!(
        summary,
        DispatchSummary {
            matched: 3,
            delivered: 3,
            skipped: 0
        }
    );
}

#[test]
fn false_condition_between_firing_rules_keeps_order() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Create], Some("cage.total > 0"), "record", "r1"),
            rule("orders", &[Action::Create], Some("cage.total > 100"), "record", "r2"),
            rule("orders", &[Action::Create], None, "record", "r3"),
        ],
        &recorder,
    );

    let summary = dispatcher
        .dispatch(Action::Create, &record("orders", r#"{"total": 40}"#))
        .expect("dispatch succeeds");

    assert_eq!(
        recorder.calls(),
        vec![
            (0, Action::Create, "r1".to_string()),
            (2, Action::Create, "r3".to_string()),
        ]
    );
    assert_eq!(
        summary,
        DispatchSummary {
            matched: 3,
            delivered: 2,
            skipped: 1
        }
    );
}

#[test]
fn evaluation_error_stops_later_rules() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Create], None, "record", "r1"),
            rule("orders", &[Action::Create], Some("cage.total > 100"), "record", "r2"),
            rule("orders", &[Action::Create], None, "record", "r3"),
        ],
        &recorder,
    );

    let err = dispatcher
        .dispatch(Action::Create, &record("orders", r#"{"total": "lots"}"#))
        .expect_err("type mismatch must abort");

    assert!(matches!(err, BackroomError::EvaluationError { rule: 1, .. }), "{err}");
    let targets: Vec<String> = recorder.calls().into_iter().map(|c| c.2).collect();
    assert_eq!(targets, vec!["r1"]);
}

#[test]
fn missing_field_is_an_evaluation_error_unless_guarded() {
    let recorder = Arc::new(Recorder::default());
    let unguarded = dispatcher(
        &[rule("orders", &[Action::Create], Some("cage.total > 100"), "record", "t")],
        &recorder,
    );
    assert!(matches!(
        unguarded.dispatch(Action::Create, &record("orders", "{}")),
        Err(BackroomError::EvaluationError { .. })
    ));

    let guarded = dispatcher(
        &[rule(
            "orders",
            &[Action::Create],
            Some("has(cage.total) && cage.total > 100"),
            "record",
            "t",
        )],
        &recorder,
    );
    let summary = guarded
        .dispatch(Action::Create, &record("orders", "{}"))
        .expect("guarded condition is false, not an error");
    assert_eq!(summary.skipped, 1);
    assert!(recorder.calls().is_empty());
}

#[test]
fn unknown_adapter_aborts_dispatch() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Delete], None, "record", "before"),
            rule("orders", &[Action::Delete], None, "pager", "oncall"),
            rule("orders", &[Action::Delete], None, "record", "after"),
        ],
        &recorder,
    );

    let err = dispatcher
        .dispatch(Action::Delete, &record("orders", "{}"))
        .expect_err("unknown adapter must abort");

    match err {
        BackroomError::UnknownAdapter { rule, adapter } => {
            assert_eq!(rule, 1);
            assert_eq!(adapter, "pager");
        }
        other => panic!("unexpected error: {other}"),
    }
    let targets: Vec<String> = recorder.calls().into_iter().map(|c| c.2).collect();
    assert_eq!(targets, vec!["before"]);
}

#[test]
fn delivery_error_names_rule_and_adapter() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[
            rule("orders", &[Action::Create], None, "broken", "x"),
            rule("orders", &[Action::Create], None, "record", "never reached"),
        ],
        &recorder,
    );

    let err = dispatcher
        .dispatch(Action::Create, &record("orders", "{}"))
        .expect_err("broken adapter must abort");
    assert!(matches!(
        err,
        BackroomError::DeliveryError { rule: 0, ref adapter, .. } if adapter == "broken"
    ));
    assert!(recorder.calls().is_empty());
}

#[test]
fn orders_over_one_hundred_fire_once() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(
        &[rule("orders", &[Action::Create], Some("cage.total > 100"), "record", "billing")],
        &recorder,
    );

    let big = dispatcher
        .dispatch(Action::Create, &record("orders", r#"{"total": 150}"#))
        .expect("dispatch succeeds");
    let small = dispatcher
        .dispatch(Action::Create, &record("orders", r#"{"total": 50}"#))
        .expect("dispatch succeeds");

    assert_eq!(big.delivered, 1);
    assert_eq!(small.delivered, 0);
    assert_eq!(small.skipped, 1);
    assert_eq!(recorder.calls(), vec![(0, Action::Create, "billing".to_string())]);
}

#[test]
fn cage_without_rules_is_a_no_op() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = dispatcher(&[rule("orders", &[Action::Create], None, "record", "t")], &recorder);
    let summary = dispatcher
        .dispatch(Action::Create, &record("events", "{}"))
        .expect("no rules means success");
    assert_eq!(summary, DispatchSummary::default());
}

#[test]
fn log_adapter_delivers_from_default_config() {
    let adapters = AdapterSet::from_config(&backroom::Config::default()).expect("adapters");
    let registry =
        HookRegistry::from_configs(&[rule("orders", &[Action::Create], None, "log", "audit")])
            .expect("rules compile");
    let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(adapters));
    let summary = dispatcher
        .dispatch(Action::Create, &record("orders", r#"{"total": 1}"#))
        .expect("log adapter succeeds");
    assert_eq!(summary.delivered, 1);
}
