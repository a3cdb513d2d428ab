//! End-to-end execution tests for compiled compositions.
//!
//! Terminal scenarios run in a single activation; scenarios with actions are
//! driven by a mock platform loop that feeds each invocation result, merged
//! with the continuation, back into the conductor.

use baton::{
    function, if_, if_with, let_, literal, repeat, retain, retain_with, retry, seq, task, try_,
    while_, Composition, Conductor, Outcome,
};
use serde_json::{json, Value};

/// Run a composition to termination, answering every action invocation with
/// `respond`. Returns the terminal outcome and the invocation count.
fn drive(
    composition: &Composition,
    input: Value,
    mut respond: impl FnMut(&str, &Value) -> Value,
) -> (Outcome, usize) {
    let conductor = Conductor::from_composition(composition);
    let mut invocations = 0;
    let mut outcome = conductor.activate(input);
    loop {
        match outcome {
            Outcome::Invoke {
                action,
                params,
                resume,
            } => {
                invocations += 1;
                assert!(invocations < 100, "composition did not terminate");
                let mut result = respond(&action, &params);
                let map = result
                    .as_object_mut()
                    .expect("mock actions must return objects");
                map.insert(
                    baton::RESUME_KEY.to_string(),
                    serde_json::to_value(&resume).unwrap(),
                );
                outcome = conductor.activate(result);
            }
            terminal => return (terminal, invocations),
        }
    }
}

fn run(composition: &Composition, input: Value) -> Outcome {
    let (outcome, invocations) = drive(composition, input, |action, _| {
        panic!("unexpected invocation of {action}")
    });
    assert_eq!(invocations, 0);
    outcome
}

#[test]
fn literal_then_function_increments_a_field() {
    let composed = seq([literal(json!({"x": 1})), function("{x: params.x + 1}")]).unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"x": 2}))
    );
}

#[test]
fn branch_takes_the_consequent_on_a_true_test() {
    let composed = if_(literal(json!({"value": true})), literal("yes"), literal("no")).unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"value": "yes"}))
    );
}

#[test]
fn a_throwing_function_reaches_the_handler() {
    let composed = try_(function("1 / 0"), function("{ok: true}")).unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"ok": true}))
    );
}

#[test]
fn handler_observes_the_error_value() {
    let composed = try_(
        literal(json!({"error": "boom"})),
        function("{handled: params.error}"),
    )
    .unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"handled": "boom"}))
    );
}

#[test]
fn counted_loop_terminates_and_preserves_params() {
    let composed = let_(
        json!({"count": 3}),
        while_(function("(count = count - 1) >= 0"), function("{}")),
    )
    .unwrap();
    assert_eq!(run(&composed, json!({})), Outcome::Success(json!({})));
}

#[test]
fn loop_counter_ends_below_zero_inside_the_frame() {
    let composed = let_(
        json!({"count": 3}),
        seq([
            while_(function("(count = count - 1) >= 0"), function("{}")).unwrap(),
            function("{final: count}").unwrap(),
        ]),
    )
    .unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"final": -1}))
    );
}

#[test]
fn retain_pairs_snapshot_with_result() {
    let composed = retain(literal(json!({"y": 2}))).unwrap();
    assert_eq!(
        run(&composed, json!({"x": 1})),
        Outcome::Success(json!({"params": {"x": 1}, "result": {"y": 2}}))
    );
}

#[test]
fn retain_field_snapshots_a_single_field() {
    let composed = retain_with(literal(json!({"r": 1})), json!({"field": "sub"})).unwrap();
    assert_eq!(
        run(&composed, json!({"sub": {"a": 1}, "other": 2})),
        Outcome::Success(json!({"params": {"a": 1}, "result": {"r": 1}}))
    );
}

#[test]
fn retain_filter_snapshots_the_filtered_params() {
    let composed =
        retain_with(literal(json!({"y": 2})), json!({"filter": "{keep: params.x}"})).unwrap();
    assert_eq!(
        run(&composed, json!({"x": 1, "z": 9})),
        Outcome::Success(json!({"params": {"keep": 1}, "result": {"y": 2}}))
    );
}

#[test]
fn nosave_branches_observe_the_test_output() {
    let saved = if_(
        literal(json!({"value": true})),
        function("params"),
        literal("unreachable"),
    )
    .unwrap();
    assert_eq!(
        run(&saved, json!({"orig": 1})),
        Outcome::Success(json!({"orig": 1})),
        "a saving branch restores the tested params"
    );

    let unsaved = if_with(
        literal(json!({"value": true})),
        function("params"),
        literal("unreachable"),
        json!({"nosave": true}),
    )
    .unwrap();
    assert_eq!(
        run(&unsaved, json!({"orig": 1})),
        Outcome::Success(json!({"value": true})),
        "a nosave branch sees the test output"
    );
}

#[test]
fn mutations_land_in_the_topmost_declaring_frame() {
    let composed = let_(
        json!({"x": 1}),
        seq([
            let_(json!({"x": 2}), function("x = 99;")).unwrap(),
            function("{outer: x}").unwrap(),
        ]),
    )
    .unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"outer": 1}))
    );
}

#[test]
fn unhandled_errors_terminate_with_the_error() {
    let composed = seq([literal(json!({"error": "boom", "extra": 1})), literal("after")]).unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Failure {
            error: "boom".into(),
            code: 500,
        }
    );
}

#[test]
fn actions_suspend_and_resume_with_their_results() {
    let composed = seq([
        literal(json!({"n": 1})).unwrap(),
        task("double").unwrap(),
        function("{n: params.n + 1}").unwrap(),
    ])
    .unwrap();
    let (outcome, invocations) = drive(&composed, json!({}), |action, params| {
        assert_eq!(action, "/_/double");
        let n = params["n"].as_i64().unwrap();
        json!({"n": n * 2})
    });
    assert_eq!(outcome, Outcome::Success(json!({"n": 3})));
    assert_eq!(invocations, 1);
}

#[test]
fn action_errors_engage_local_handlers() {
    let composed = try_("flaky", function("{recovered: params.error}")).unwrap();
    let (outcome, invocations) = drive(&composed, json!({}), |_, _| json!({"error": "remote"}));
    assert_eq!(outcome, Outcome::Success(json!({"recovered": "remote"})));
    assert_eq!(invocations, 1);
}

#[test]
fn retry_reruns_a_deterministic_failure_to_exhaustion() {
    let composed = retry(2, task("flaky")).unwrap();
    let (outcome, invocations) = drive(&composed, json!({"seed": 7}), |_, params| {
        assert_eq!(
            params,
            &json!({"seed": 7}),
            "every attempt sees the original params"
        );
        json!({"error": "e"})
    });
    assert_eq!(
        outcome,
        Outcome::Failure {
            error: "e".into(),
            code: 500,
        }
    );
    assert_eq!(invocations, 3, "retry(2) makes the initial attempt plus two retries");
}

#[test]
fn retry_stops_after_a_first_try_success() {
    let composed = retry(2, task("flaky")).unwrap();
    let (outcome, invocations) = drive(&composed, json!({}), |_, _| json!({"ok": 1}));
    assert_eq!(outcome, Outcome::Success(json!({"ok": 1})));
    assert_eq!(invocations, 1);
}

#[test]
fn retry_succeeds_once_the_action_recovers() {
    let composed = retry(5, task("flaky")).unwrap();
    let mut attempts = 0;
    let (outcome, invocations) = drive(&composed, json!({}), |_, _| {
        attempts += 1;
        if attempts < 3 {
            json!({"error": "e"})
        } else {
            json!({"ok": attempts})
        }
    });
    assert_eq!(outcome, Outcome::Success(json!({"ok": 3})));
    assert_eq!(invocations, 3);
}

#[test]
fn repeat_invokes_the_body_a_fixed_number_of_times() {
    let composed = repeat(3, task("tick")).unwrap();
    let (outcome, invocations) = drive(&composed, json!({}), |_, _| json!({"ok": true}));
    assert_eq!(outcome, Outcome::Success(json!({"ok": true})));
    assert_eq!(invocations, 3);
}

#[test]
fn empty_composition_returns_params_unchanged() {
    let composed = task(()).unwrap();
    assert_eq!(
        run(&composed, json!({"x": 1})),
        Outcome::Success(json!({"x": 1}))
    );
}

#[test]
fn scalar_input_is_wrapped_by_inspection() {
    let composed = seq([literal("hello")]).unwrap();
    assert_eq!(
        run(&composed, json!({})),
        Outcome::Success(json!({"value": "hello"}))
    );
}

#[test]
fn function_with_trailing_semicolon_keeps_params() {
    let composed = let_(json!({"scratch": 0}), function("scratch = 1;")).unwrap();
    assert_eq!(
        run(&composed, json!({"kept": true})),
        Outcome::Success(json!({"kept": true}))
    );
}

#[test]
fn malformed_resume_is_rejected_with_a_400() {
    let conductor = Conductor::from_composition(&literal(1).unwrap());
    match conductor.activate(json!({"$resume": {"state": 0}})) {
        Outcome::Failure { code: 400, .. } => {}
        other => panic!("expected bad request, got {other:?}"),
    }
}
