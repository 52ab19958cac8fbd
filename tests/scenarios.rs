// End-to-end runner scenarios driven through the public API.
//
// Most scenarios run in debug mode so every wait resolves synthetically;
// the ones that need a live collaborator (a blocked thread, an
// outstanding user wait, real timers) drive a ManualScheduler or tokio
// timers on a LocalSet instead.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use serde_json::{json, Value};

use ro_script::{
    callback, Command, CommandHandle, CommandSpec, CommandState, ConcurrencyViolation,
    DebugRecord, KeyVar, LocalScheduler, ManualScheduler, MockDispatcher, RunnerState, ScriptError,
    ScriptHandle, ScriptResult, ScriptRunner,
};

fn scheduler() -> Rc<ManualScheduler> {
    Rc::new(ManualScheduler::new())
}

// =============================================================================
// Debug-mode scenarios
// =============================================================================

#[test]
fn timer_script_completes_in_debug_mode() {
    let sched = scheduler();
    let runner = ScriptRunner::builder("single-wait", sched.clone())
        .debug_mode(true)
        .build_fn(|sr| async move {
            sr.wait_ms(500)?.await;
            Ok(Value::Null)
        });

    runner.start().unwrap();

    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(runner.reason(), "");
    assert_eq!(
        runner.debug_log(),
        vec![DebugRecord::WaitMs(Duration::from_millis(500))]
    );
    assert_eq!(sched.pending(), 0);
}

#[test]
fn script_error_before_first_wait() {
    let runner = ScriptRunner::builder("bad-input", scheduler())
        .debug_mode(true)
        .build_fn(|_sr| async move { Err(ScriptError::new("bad input").into()) });

    runner.start().unwrap();

    let state = runner.full_state();
    assert_eq!(state.state, RunnerState::Failed);
    assert_eq!(state.state_name, "Failed");
    assert_eq!(state.reason, "bad input");
}

async fn script_b(sr: ScriptHandle) -> ScriptResult {
    sr.wait_ms(10)?.await;
    Ok(json!(42))
}

#[test]
fn parent_sees_sub_script_value() {
    let seen = Rc::new(Cell::new(None));
    let sink = seen.clone();
    let runner = ScriptRunner::builder("script-a", scheduler())
        .debug_mode(true)
        .build_fn(move |sr| {
            let sink = sink.clone();
            async move {
                sr.call("script-b", script_b(sr.clone())).await?;
                sink.set(sr.runner()?.value().as_i64());
                sr.wait_ms(5)?.await;
                Ok(Value::Null)
            }
        });

    runner.start().unwrap();

    assert_eq!(seen.get(), Some(42));
    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(
        runner.debug_log(),
        vec![
            DebugRecord::WaitMs(Duration::from_millis(10)),
            DebugRecord::WaitMs(Duration::from_millis(5)),
        ]
    );
}

#[test]
fn pre_failed_command_fails_wait_and_aborts_the_rest() {
    let sched = scheduler();
    let cmd_a = Command::new(CommandSpec::new("tcc", "track 10,20"));
    let cmd_b = Command::new(CommandSpec::new("dis", "expose 5"));
    cmd_b.fail("shutter jammed");

    let handles: Vec<Rc<dyn CommandHandle>> = vec![cmd_a.clone(), cmd_b.clone()];
    let runner = ScriptRunner::builder("cmd-vars", sched.clone())
        .debug_mode(true)
        .build_fn(move |sr| {
            let handles = handles.clone();
            async move {
                sr.wait_cmd_vars(handles, true, Value::Null)?.await;
                Ok(Value::Null)
            }
        });

    runner.start().unwrap();
    // Resolution is deferred to the next tick even though the outcome is known
    assert_eq!(runner.state(), RunnerState::Running);

    sched.run_until_idle();

    assert_eq!(runner.state(), RunnerState::Failed);
    assert!(runner.reason().contains("dis expose 5"));
    assert!(runner.reason().contains("shutter jammed"));
    assert_eq!(cmd_a.abort_count(), 1);
    assert_eq!(cmd_b.abort_count(), 0);
    assert_eq!(
        runner.debug_log(),
        vec![DebugRecord::WaitCmdVars(vec![
            "tcc track 10,20".to_string(),
            "dis expose 5".to_string(),
        ])]
    );
}

// =============================================================================
// Live-collaborator scenarios
// =============================================================================

#[test]
fn late_background_result_is_discarded_after_cancel() {
    let sched = scheduler();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (finished_tx, finished_rx) = mpsc::channel::<()>();
    let task = RefCell::new(Some((release_rx, finished_tx)));

    let runner = ScriptRunner::builder("long-task", sched.clone())
        .thread_poll_interval(Duration::from_millis(100))
        .build_fn(move |sr| {
            let channels = task.borrow_mut().take();
            async move {
                let Some((release_rx, finished_tx)) = channels else {
                    return Ok(Value::Null);
                };
                let value = sr
                    .wait_thread(move || {
                        let _ = release_rx.recv();
                        let _ = finished_tx.send(());
                        Ok(json!("late"))
                    })?
                    .await;
                Ok(value)
            }
        });

    runner.start().unwrap();
    sched.advance(Duration::from_millis(100));
    assert_eq!(runner.state(), RunnerState::Running);

    runner.cancel();
    assert_eq!(runner.state(), RunnerState::Cancelled);
    assert_eq!(sched.pending(), 0, "poll timer must be cancelled");

    release_tx.send(()).unwrap();
    finished_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("background task should finish once released");
    sched.run_until_idle();

    assert_eq!(runner.state(), RunnerState::Cancelled);
    assert_eq!(runner.reason(), "");
    assert_eq!(runner.value(), Value::Null);
}

#[test]
fn second_start_while_running_is_rejected() {
    let runner = ScriptRunner::builder("twice", scheduler()).build_fn(|sr| async move {
        sr.wait_user()?.await;
        Ok(Value::Null)
    });
    runner.start().unwrap();
    let before = runner.full_state();

    assert_eq!(runner.start(), Err(ConcurrencyViolation::AlreadyExecuting));
    assert_eq!(
        ConcurrencyViolation::AlreadyExecuting.to_string(),
        "already executing"
    );
    assert_eq!(runner.full_state(), before);
    assert_eq!(runner.pending_waits(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn runs_against_tokio_timers() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let scheduler = Rc::new(LocalScheduler::new());
            let dispatcher = Rc::new(MockDispatcher::timed(
                scheduler.clone(),
                Duration::from_millis(200),
            ));

            let tracking = ScriptRunner::builder("live", scheduler.clone())
                .dispatcher(dispatcher.clone())
                .build_fn(|sr| async move {
                    sr.wait_cmd(CommandSpec::new("tcc", "track 10,20"), true)?.await;
                    sr.wait_ms(100)?.await;
                    Ok(json!("tracking"))
                });
            let failing = ScriptRunner::builder("live-fail", scheduler.clone())
                .dispatcher(dispatcher.clone())
                .build_fn(|sr| async move {
                    sr.wait_cmd(CommandSpec::new("tcc", "fail slew"), true)?.await;
                    Ok(Value::Null)
                });

            tracking.start().unwrap();
            failing.start().unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            assert_eq!(tracking.state(), RunnerState::Running);
            assert_eq!(failing.state(), RunnerState::Failed);
            assert_eq!(
                failing.reason(),
                "command tcc fail slew failed: simulated failure"
            );

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(tracking.state(), RunnerState::Done);
            assert_eq!(tracking.value(), json!("tracking"));
            assert_eq!(dispatcher.dispatched().len(), 2);
            assert_eq!(scheduler.pending(), 0);
        })
        .await;
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn each_wait_resolves_once() {
    let var = KeyVar::new("tcc.pos");
    let source = var.clone();
    let runner = ScriptRunner::builder("resolve-once", scheduler()).build_fn(move |sr| {
        let source = source.clone();
        async move {
            let pos = sr.wait_key_var(source, None, true)?.await;
            let ack = sr.wait_user()?.await;
            Ok(json!([pos, ack]))
        }
    });

    runner.start().unwrap();
    var.set(json!(1));
    // A second update must not reach the already resumed wait
    var.set(json!(2));
    assert_eq!(var.subscriber_count(), 0);
    assert_eq!(runner.state(), RunnerState::Running);

    runner.resume_user().unwrap();
    assert_eq!(runner.resume_user(), Err(ConcurrencyViolation::NoUserWait));
    assert_eq!(runner.value(), json!([1, null]));
}

#[test]
fn stale_token_does_not_advance_the_script() {
    let steps = Rc::new(Cell::new(0));
    let counter = steps.clone();
    let runner = ScriptRunner::builder("fresh-token", scheduler()).build_fn(move |sr| {
        let counter = counter.clone();
        async move {
            sr.wait_user()?.await;
            counter.set(1);
            sr.wait_user()?.await;
            counter.set(2);
            Ok(Value::Null)
        }
    });

    runner.start().unwrap();
    let first = runner.current_token().unwrap();
    runner.resume_user().unwrap();
    assert_eq!(steps.get(), 1);

    let second = runner.current_token().unwrap();
    assert_ne!(first, second);
    assert!(matches!(
        runner.continue_with(first, json!("duplicate")),
        Err(ConcurrencyViolation::StaleToken { .. })
    ));
    assert_eq!(steps.get(), 1);
    assert_eq!(runner.current_token(), Some(second));

    runner.continue_with(second, Value::Null).unwrap();
    assert_eq!(steps.get(), 2);
    assert_eq!(runner.state(), RunnerState::Done);
}

#[test]
fn cancel_aborts_waits_before_end_hook_and_notification() {
    let sched = scheduler();
    let dispatcher = Rc::new(MockDispatcher::new());
    let events = Rc::new(RefCell::new(Vec::<String>::new()));

    let end_events = events.clone();
    let state_events = events.clone();
    let runner = ScriptRunner::builder("cancel-order", sched.clone())
        .dispatcher(dispatcher.clone())
        .on_end(move |_sr| {
            end_events.borrow_mut().push("end hook".to_string());
            Ok(())
        })
        .on_state_change(callback(move |runner: &ScriptRunner| {
            state_events
                .borrow_mut()
                .push(format!("state {}", runner.state()));
            Ok(())
        }))
        .build_fn(|sr| async move {
            sr.start_cmd(CommandSpec::new("gcam", "expose 1.5"), true)?;
            let tcc = sr.start_cmd(CommandSpec::new("tcc", "track 10,20"), true)?;
            let dis = sr.start_cmd(CommandSpec::new("dis", "expose 5"), true)?;
            let inner = sr.clone();
            sr.call("expose", async move {
                inner.wait_cmd_vars(vec![tcc, dis], true, Value::Null)?.await;
                Ok(Value::Null)
            })
            .await
        });

    runner.start().unwrap();
    assert_eq!(runner.stack_depth(), 2);

    let commands = dispatcher.dispatched();
    let abort_events = events.clone();
    commands[1].add_callback(callback(move |state: &CommandState| {
        abort_events.borrow_mut().push(format!("tcc {state:?}"));
        Ok(())
    }));
    events.borrow_mut().clear();

    runner.cancel();

    assert_eq!(runner.state(), RunnerState::Cancelled);
    assert_eq!(runner.pending_waits(), 0);
    assert_eq!(runner.stack_depth(), 0);
    assert_eq!(commands[0].abort_count(), 0);
    assert_eq!(commands[1].abort_count(), 1);
    assert_eq!(commands[2].abort_count(), 1);
    assert_eq!(
        *events.borrow(),
        vec![
            "tcc Failed(\"aborted\")".to_string(),
            "end hook".to_string(),
            "state Cancelled".to_string(),
        ]
    );

    // Nothing fires again: the started command's failure is no longer watched
    runner.cancel();
    commands[0].fail("guide star lost");
    assert_eq!(runner.state(), RunnerState::Cancelled);
    assert_eq!(runner.reason(), "");
    assert_eq!(commands[1].abort_count(), 1);
    assert_eq!(events.borrow().len(), 3);
}

#[test]
fn terminal_state_is_stable() {
    let runner = ScriptRunner::builder("terminal", scheduler())
        .build_fn(|_sr| async move { Err(ScriptError::new("no target").into()) });
    runner.start().unwrap();
    assert!(runner.is_done());
    let before = runner.full_state();

    runner.pause();
    runner.resume();
    runner.cancel();
    assert_eq!(runner.full_state(), before);
    assert_eq!(
        runner.start(),
        Err(ConcurrencyViolation::Finished {
            state: RunnerState::Failed
        })
    );
    assert_eq!(runner.full_state(), before);
}

async fn focus_sweep(sr: ScriptHandle, steps: u64) -> ScriptResult {
    let mut best = 0;
    for step in 1..=steps {
        sr.wait_ms(20)?.await;
        best = best.max(step * 10);
    }
    Ok(json!(best))
}

async fn focus(sr: ScriptHandle) -> ScriptResult {
    sr.wait_ms(50)?.await;
    let best = sr.call("sweep", focus_sweep(sr.clone(), 3)).await?;
    sr.wait_ms(50)?.await;
    Ok(json!({ "best": best }))
}

#[test]
fn nested_sub_scripts_finish_before_parent_resumes() {
    let sched = scheduler();
    let trace = Rc::new(RefCell::new(Vec::new()));
    let sink = trace.clone();
    let runner = ScriptRunner::builder("observe", sched.clone()).build_fn(move |sr| {
        let sink = sink.clone();
        async move {
            let result = sr.call("focus", focus(sr.clone())).await?;
            sink.borrow_mut().push(sr.runner()?.value());
            sr.wait_ms(10)?.await;
            Ok(json!({ "focus": result }))
        }
    });

    runner.start().unwrap();
    assert_eq!(runner.stack(), vec!["observe".to_string(), "focus".to_string()]);

    sched.advance(Duration::from_millis(50));
    assert_eq!(
        runner.stack(),
        vec![
            "observe".to_string(),
            "focus".to_string(),
            "sweep".to_string()
        ]
    );
    assert_eq!(runner.current_token().map(|t| t.depth), Some(3));

    sched.advance(Duration::from_millis(60));
    assert_eq!(runner.stack_depth(), 2);
    assert!(trace.borrow().is_empty());

    sched.advance(Duration::from_millis(50));
    assert_eq!(*trace.borrow(), vec![json!({ "best": 30 })]);
    assert_eq!(runner.stack_depth(), 1);

    sched.run_until_idle();
    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(runner.value(), json!({ "focus": { "best": 30 } }));
}

#[test]
fn failing_state_subscribers_do_not_affect_others() {
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let runner = ScriptRunner::builder("isolation", scheduler())
        .on_state_change(callback(|_: &ScriptRunner| {
            Err(anyhow::anyhow!("display went away"))
        }))
        .on_state_change(callback(|runner: &ScriptRunner| {
            if runner.is_done() {
                panic!("status widget crashed");
            }
            Ok(())
        }))
        .on_state_change(callback(move |_: &ScriptRunner| {
            counter.set(counter.get() + 1);
            Ok(())
        }))
        .build_fn(|_sr| async move { Ok(json!("ok")) });

    runner.start().unwrap();

    assert_eq!(calls.get(), 2, "Running and Done");
    assert_eq!(runner.state(), RunnerState::Done);
    assert_eq!(runner.reason(), "");
}
