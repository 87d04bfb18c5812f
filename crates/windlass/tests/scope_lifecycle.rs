//! Scoped service sets: creation per top-level invocation, visibility to
//! steps and compensations, and disposal policies.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use windlass::{
    DisposalPolicy, InlineRunner, SagaContext, SagaError, Scope, Step, StepOutcome, Workflow,
};

/// Stand-in for a per-request service set (connection, session, ...).
#[derive(Clone)]
struct Services {
    tenant: String,
}

#[test]
fn scope_is_created_once_per_invocation_and_visible_everywhere() {
    let created = Arc::new(AtomicU32::new(0));
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let counter = Arc::clone(&created);
    let scope: Scope<Services, String> = Scope::new(move |tenant: &String| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Services {
            tenant: tenant.clone(),
        })
    });

    let seen_by_forward = Arc::clone(&seen);
    let seen_by_undo = Arc::clone(&seen);
    let provision: Step<String, (), (), Services> = Step::hybrid("provision", move |ctx: &SagaContext<Services>, _| {
        seen_by_forward
            .lock()
            .expect("lock should not be poisoned")
            .push(format!("provision for {}", ctx.services().tenant));
        Ok(StepOutcome::success((), ()))
    })
    .compensate(move |ctx, _| {
        seen_by_undo
            .lock()
            .expect("lock should not be poisoned")
            .push(format!("deprovision for {}", ctx.services().tenant));
        Ok(())
    });
    let boom: Step<(), (), (), Services> = Step::hybrid("boom", |_, ()| {
        Ok(StepOutcome::permanent_failure("quota refused", ()))
    });

    let workflow = Workflow::scoped("tenant_setup", scope, move |ctx, tenant: String| {
        provision.run(ctx, tenant)?;
        boom.run(ctx, ())
    });

    let err = workflow
        .invoke(Arc::new(InlineRunner), "acme".to_string())
        .expect_err("saga should fail");
    assert!(err.is_terminal());
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(
        *seen.lock().expect("lock should not be poisoned"),
        ["provision for acme", "deprovision for acme"]
    );

    workflow
        .invoke(Arc::new(InlineRunner), "acme".to_string())
        .expect_err("saga should fail");
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[test]
fn default_policy_disposes_after_success_and_failure_alike() {
    let disposed: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&disposed);

    let scope: Scope<Services, bool> = Scope::new(|_| {
        Ok(Services {
            tenant: "acme".to_string(),
        })
    })
    .on_dispose(move |_, failure| {
        sink.lock()
            .expect("lock should not be poisoned")
            .push(failure.is_some());
    });

    let maybe_fail: Step<bool, (), (), Services> = Step::hybrid("maybe_fail", |_, fail: bool| {
        if fail {
            Ok(StepOutcome::permanent_failure("told to fail", ()))
        } else {
            Ok(StepOutcome::success((), ()))
        }
    });
    let workflow = Workflow::scoped("job", scope, move |ctx, fail: bool| {
        maybe_fail.run(ctx, fail)
    });

    workflow
        .invoke(Arc::new(InlineRunner), false)
        .expect("saga should succeed");
    workflow
        .invoke(Arc::new(InlineRunner), true)
        .expect_err("saga should fail");

    // Disposed exactly once per invocation, with the failure handed through.
    assert_eq!(
        *disposed.lock().expect("lock should not be poisoned"),
        [false, true]
    );
}

#[test]
fn on_success_policy_retains_the_scope_across_a_failure() {
    let disposed = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&disposed);

    let scope: Scope<Services, bool> = Scope::new(|_| {
        Ok(Services {
            tenant: "acme".to_string(),
        })
    })
    .on_dispose(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
    .disposal_policy(DisposalPolicy::OnSuccess);

    let maybe_fail: Step<bool, (), (), Services> = Step::hybrid("maybe_fail", |_, fail: bool| {
        if fail {
            Ok(StepOutcome::permanent_failure("told to fail", ()))
        } else {
            Ok(StepOutcome::success((), ()))
        }
    });
    let workflow = Workflow::scoped("job", scope, move |ctx, fail: bool| {
        maybe_fail.run(ctx, fail)
    });

    workflow
        .invoke(Arc::new(InlineRunner), true)
        .expect_err("saga should fail");
    assert_eq!(disposed.load(Ordering::SeqCst), 0);

    workflow
        .invoke(Arc::new(InlineRunner), false)
        .expect("saga should succeed");
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[test]
fn custom_policy_decides_from_the_failure() {
    let disposed = Arc::new(AtomicU32::new(0));
    let sink = Arc::clone(&disposed);

    // Tear down only when the saga finished for good.
    let scope: Scope<Services, bool> = Scope::new(|_| {
        Ok(Services {
            tenant: "acme".to_string(),
        })
    })
    .on_dispose(move |_, _| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
    .disposal_policy(DisposalPolicy::Custom(Arc::new(|failure| {
        failure.is_none_or(SagaError::is_terminal)
    })));

    let retryable: Step<bool, (), (), Services> =
        Step::hybrid("flaky", |_, _| Err("transient".into()));
    let workflow = Workflow::scoped("job", scope, move |ctx, fail: bool| {
        retryable.run(ctx, fail)
    });

    workflow
        .invoke(Arc::new(InlineRunner), true)
        .expect_err("saga should fail");
    assert_eq!(disposed.load(Ordering::SeqCst), 0);
}

#[test]
fn scope_creation_failure_is_terminal_before_any_step_runs() {
    let ran = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&ran);

    let scope: Scope<Services, u32> = Scope::new(|_| Err("database unreachable".into()));
    let step: Step<u32, u32, (), Services> = Step::hybrid("work", move |_, input: u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutcome::success(input, ()))
    });
    let workflow = Workflow::scoped("job", scope, move |ctx, input: u32| step.run(ctx, input));

    let err = workflow
        .invoke(Arc::new(InlineRunner), 1)
        .expect_err("saga should fail");
    match err {
        SagaError::Terminal { step, source } => {
            assert_eq!(step, "scope");
            assert_eq!(source.message, "scope creation failed");
        }
        other => panic!("expected Terminal, got {other:?}"),
    }
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn embedded_invocation_reuses_the_callers_scope() {
    let parent_created = Arc::new(AtomicU32::new(0));
    let child_created = Arc::new(AtomicU32::new(0));

    let child_counter = Arc::clone(&child_created);
    let child_scope: Scope<Services, u32> = Scope::new(move |_| {
        child_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Services {
            tenant: "child".to_string(),
        })
    });
    let audit: Step<u32, String, (), Services> = Step::hybrid("audit", |ctx: &SagaContext<Services>, _| {
        Ok(StepOutcome::success(ctx.services().tenant.clone(), ()))
    });
    let child = Workflow::scoped("audit_trail", child_scope, move |ctx, input: u32| {
        audit.run(ctx, input)
    });

    let parent_counter = Arc::clone(&parent_created);
    let parent_scope: Scope<Services, u32> = Scope::new(move |_| {
        parent_counter.fetch_add(1, Ordering::SeqCst);
        Ok(Services {
            tenant: "parent".to_string(),
        })
    });
    let parent = Workflow::scoped("order", parent_scope, move |ctx, input: u32| {
        child.run_as_step(ctx, input)
    });

    let tenant = parent
        .invoke(Arc::new(InlineRunner), 1)
        .expect("saga should succeed");

    // The embedded handler saw the caller's services; its own scope never ran.
    assert_eq!(tenant, "parent");
    assert_eq!(parent_created.load(Ordering::SeqCst), 1);
    assert_eq!(child_created.load(Ordering::SeqCst), 0);
}
