//! Embedding one workflow inside another: shared compensation stack,
//! interleaved unwind, single outer unwind pass.

use std::sync::{Arc, Mutex};

use windlass::{InlineRunner, SagaError, Step, StepOutcome, Workflow};

type EventLog = Arc<Mutex<Vec<String>>>;

fn push(log: &EventLog, event: impl Into<String>) {
    log.lock().expect("lock should not be poisoned").push(event.into());
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().expect("lock should not be poisoned").clone()
}

fn logged_step(log: &EventLog, name: &'static str) -> Step<u32, u32, u32> {
    let forward_log = Arc::clone(log);
    let undo_log = Arc::clone(log);
    Step::hybrid(name, move |_, input: u32| {
        push(&forward_log, format!("do {name}"));
        Ok(StepOutcome::success(input, input))
    })
    .compensate(move |_, _| {
        push(&undo_log, format!("undo {name}"));
        Ok(())
    })
}

/// Child saga with a single compensable step.
fn payment_workflow(log: &EventLog) -> Workflow<u32, u32> {
    let charge = logged_step(log, "charge");
    Workflow::new("payment", move |ctx, input: u32| charge.run(ctx, input))
}

#[test]
fn embedded_compensations_interleave_into_the_callers_stack() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let create_order = logged_step(&log, "create_order");
    let payment = payment_workflow(&log);
    let ship: Step<u32, u32, u32> =
        Step::hybrid("ship", |_, _| Ok(StepOutcome::permanent_failure("no carrier", 0)));

    let order = Workflow::new("order", move |ctx, input: u32| {
        let value = create_order.run(ctx, input)?;
        let value = payment.run_as_step(ctx, value)?;
        ship.run(ctx, value)
    });

    let err = order
        .invoke(Arc::new(InlineRunner), 1)
        .expect_err("saga should fail");
    assert!(err.is_terminal());

    // The charge registered after create_order, so it is undone first even
    // though it belongs to the embedded saga.
    assert_eq!(
        events(&log),
        ["do create_order", "do charge", "undo charge", "undo create_order"]
    );
}

#[test]
fn embedded_failure_unwinds_only_at_the_outermost_workflow() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let create_order = logged_step(&log, "create_order");

    let charge = logged_step(&log, "charge");
    let capture: Step<u32, u32, u32> = Step::hybrid("capture", |_, _| {
        Ok(StepOutcome::permanent_failure("capture rejected", 0))
    });
    let payment = Workflow::new("payment", move |ctx, input: u32| {
        let value = charge.run(ctx, input)?;
        capture.run(ctx, value)
    });

    let order = Workflow::new("order", move |ctx, input: u32| {
        let value = create_order.run(ctx, input)?;
        payment.run_as_step(ctx, value)
    });

    let err = order
        .invoke(Arc::new(InlineRunner), 1)
        .expect_err("saga should fail");
    match &err {
        SagaError::Terminal { step, .. } => assert_eq!(step, "capture"),
        other => panic!("expected Terminal, got {other:?}"),
    }

    // One unwind pass, run by the outer workflow, covering both sagas'
    // registrations in global reverse order.
    assert_eq!(
        events(&log),
        ["do create_order", "do charge", "undo charge", "undo create_order"]
    );
}

#[test]
fn embedded_retryable_failure_passes_through_without_unwinding() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let create_order = logged_step(&log, "create_order");

    let flaky: Step<u32, u32> =
        Step::hybrid("flaky_charge", |_, _| Err("gateway hiccup".into()));
    let payment = Workflow::new("payment", move |ctx, input: u32| flaky.run(ctx, input));

    let order = Workflow::new("order", move |ctx, input: u32| {
        let value = create_order.run(ctx, input)?;
        payment.run_as_step(ctx, value)
    });

    let err = order
        .invoke(Arc::new(InlineRunner), 1)
        .expect_err("saga should fail");
    assert!(err.is_retryable());
    assert_eq!(err.step(), "flaky_charge");
    assert_eq!(events(&log), ["do create_order"]);
}

#[test]
fn embedded_workflow_still_works_standalone() -> anyhow::Result<()> {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let payment = payment_workflow(&log);

    let output = payment.invoke(Arc::new(InlineRunner), 9)?;
    assert_eq!(output, 9);
    assert_eq!(events(&log), ["do charge"]);
    Ok(())
}
