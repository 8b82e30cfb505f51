mod common;

use common::{Log, new_host, new_loop};
use hostloop::{EventLoop, FutureError, HostLoop, LoopError, RunHook};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn test_run_until_complete_returns_output() {
    let event_loop = new_loop();

    let value = event_loop.run_until_complete(async { 6 * 7 }).unwrap();
    assert_eq!(value, 42);
    assert!(!event_loop.is_running());
    assert_eq!(event_loop.pending_tasks(), 0);

    event_loop.close().unwrap();
}

#[test]
fn test_call_soon_runs_in_order() {
    let event_loop = new_loop();
    let log = Log::new();

    for i in 1..=3 {
        let log = log.clone();
        event_loop.call_soon(move || log.push(i));
    }
    let stopper = event_loop.clone();
    event_loop.call_soon(move || stopper.stop());

    assert_eq!(event_loop.run_forever().unwrap(), 0);
    assert_eq!(log.entries(), vec![1, 2, 3]);

    event_loop.close().unwrap();
}

#[test]
fn test_call_later_orders_by_delay() {
    let event_loop = new_loop();
    let log = Log::new();

    let late = log.clone();
    event_loop.call_later(Duration::from_millis(30), move || late.push("late"));
    let early = log.clone();
    event_loop.call_later(Duration::from_millis(5), move || early.push("early"));

    let stopper = event_loop.clone();
    event_loop.call_later(Duration::from_millis(60), move || stopper.stop());

    event_loop.run_forever().unwrap();
    assert_eq!(log.entries(), vec!["early", "late"]);

    event_loop.close().unwrap();
}

#[test]
fn test_cancelled_handle_never_runs() {
    let event_loop = new_loop();
    let log = Log::new();

    let pushed = log.clone();
    let handle = event_loop.call_soon(move || pushed.push("ran"));
    handle.cancel();
    assert!(handle.cancelled());

    let stopper = event_loop.clone();
    event_loop.call_soon(move || stopper.stop());
    event_loop.run_forever().unwrap();

    assert!(log.entries().is_empty());
    event_loop.close().unwrap();
}

#[test]
fn test_stop_when_not_running_is_a_no_op() {
    let event_loop = new_loop();
    event_loop.stop();
    assert!(!event_loop.is_running());

    assert_eq!(event_loop.run_until_complete(async { 1 }).unwrap(), 1);
    event_loop.close().unwrap();
}

#[test]
fn test_reentrant_run_is_rejected() {
    let event_loop = new_loop();
    let log = Log::new();

    let inner = event_loop.clone();
    let seen = log.clone();
    event_loop.call_soon(move || {
        seen.push(matches!(inner.run_forever(), Err(LoopError::AlreadyRunning)));
        seen.push(matches!(inner.close(), Err(LoopError::Running)));
        inner.stop();
        seen.push(matches!(inner.close(), Err(LoopError::Running)));
    });

    event_loop.run_forever().unwrap();
    assert_eq!(log.entries(), vec![true, true, true]);
    assert!(!event_loop.is_closed());

    event_loop.close().unwrap();
}

#[test]
fn test_closed_loop_rejects_work() {
    let event_loop = new_loop();
    event_loop.close().unwrap();
    event_loop.close().unwrap();
    assert!(event_loop.is_closed());

    assert!(matches!(event_loop.run_forever(), Err(LoopError::Closed)));
    assert!(matches!(
        event_loop.run_until_complete(async {}),
        Err(LoopError::Closed)
    ));
    assert!(matches!(
        event_loop.call_soon_threadsafe(|| {}),
        Err(LoopError::Closed)
    ));
    assert!(matches!(event_loop.add_reader(0, || {}), Err(LoopError::Closed)));

    let task = event_loop.spawn(async { 1 });
    assert!(task.is_done());
    assert!(task.is_cancelled());
}

#[test]
fn test_stopped_before_completion_is_incomplete() {
    let event_loop = new_loop();

    let stopper = event_loop.clone();
    event_loop.call_soon(move || stopper.stop());

    let outcome = event_loop.run_until_complete(std::future::pending::<()>());
    assert!(matches!(outcome, Err(LoopError::Incomplete)));
    assert_eq!(event_loop.pending_tasks(), 1);

    event_loop.close().unwrap();
    assert_eq!(event_loop.pending_tasks(), 0);
}

#[test]
fn test_panicking_future_is_reported_as_failure() {
    let event_loop = new_loop();

    let outcome = event_loop.run_until_complete(async {
        if true {
            panic!("task blew up");
        }
    });

    match outcome {
        Err(LoopError::Future(FutureError::Failed(error))) => {
            assert!(error.is_panic());
            assert_eq!(error.to_string(), "callback panicked: task blew up");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    event_loop.close().unwrap();
}

#[test]
fn test_tasks_await_each_other() {
    let event_loop = new_loop();
    let spawner = event_loop.clone();

    let value = event_loop
        .run_until_complete(async move {
            let first = spawner.spawn(async { 5 });
            let second = spawner.spawn(async { 10 });
            first.await.unwrap() + second.await.unwrap()
        })
        .unwrap();

    assert_eq!(value, 15);
    event_loop.close().unwrap();
}

#[test]
fn test_cancelled_task_resolves_cancelled() {
    let event_loop = new_loop();
    let spawner = event_loop.clone();

    let outcome = event_loop
        .run_until_complete(async move {
            let task = spawner.spawn(std::future::pending::<()>());
            assert!(task.cancel());
            let outcome = task.clone().await;
            assert!(task.is_cancelled());
            assert!(!task.cancel());
            outcome
        })
        .unwrap();

    assert!(matches!(outcome, Err(FutureError::Cancelled)));
    event_loop.close().unwrap();
}

#[test]
fn test_done_callback_runs_after_completion() {
    let event_loop = new_loop();
    let log = Log::new();

    let task = event_loop.spawn(async { "done" });
    let seen = log.clone();
    task.add_done_callback(move || seen.push("callback"));
    let removed = task.add_done_callback(|| panic!("removed callback ran"));
    assert!(task.remove_done_callback(removed));

    event_loop.run_until_complete(async {}).unwrap();

    assert_eq!(log.entries(), vec!["callback"]);
    assert_eq!(task.take_result().unwrap(), "done");
    assert!(matches!(
        task.take_result(),
        Err(FutureError::InvalidState(_))
    ));

    event_loop.close().unwrap();
}

#[test]
fn test_current_loop_is_set_while_running() {
    let event_loop = new_loop();
    assert!(EventLoop::current().is_none());

    let id = event_loop.id();
    let seen = event_loop
        .run_until_complete(async { EventLoop::current().map(|l| l.id()) })
        .unwrap();

    assert_eq!(seen, Some(id));
    assert!(EventLoop::current().is_none());
    event_loop.close().unwrap();
}

#[derive(Default)]
struct CountingHook {
    before: Cell<usize>,
    after: Cell<usize>,
}

impl RunHook for CountingHook {
    fn before_run(&self) {
        self.before.set(self.before.get() + 1);
    }

    fn after_run(&self) {
        self.after.set(self.after.get() + 1);
    }
}

#[test]
fn test_attach_to_running_host() {
    let host = new_host();
    let event_loop = EventLoop::new(host.clone());
    let hook = Rc::new(CountingHook::default());
    event_loop.add_run_hook(hook.clone());

    event_loop.attach().unwrap();
    assert!(event_loop.is_running());
    assert_eq!(hook.before.get(), 1);
    assert_eq!(
        EventLoop::current().map(|l| l.id()),
        Some(event_loop.id())
    );

    let log = Log::new();
    let pushed = log.clone();
    event_loop.call_soon(move || pushed.push("attached"));
    host.process_events();
    assert_eq!(log.entries(), vec!["attached"]);

    event_loop.stop();
    assert!(!event_loop.is_running());
    assert_eq!(hook.after.get(), 1);
    assert!(EventLoop::current().is_none());

    event_loop.close().unwrap();
}

#[test]
fn test_run_hooks_wrap_every_run() {
    let event_loop = new_loop();
    let hook = Rc::new(CountingHook::default());
    event_loop.add_run_hook(hook.clone());

    event_loop.run_until_complete(async {}).unwrap();
    event_loop.run_until_complete(async {}).unwrap();

    assert_eq!(hook.before.get(), 2);
    assert_eq!(hook.after.get(), 2);
    event_loop.close().unwrap();
}

#[test]
fn test_debug_flag() {
    let event_loop = new_loop();
    assert!(!event_loop.get_debug());

    event_loop.set_debug(true);
    assert!(event_loop.get_debug());
    assert_eq!(event_loop.run_until_complete(async { 3 }).unwrap(), 3);

    event_loop.close().unwrap();
}

#[test]
fn test_run_helper() {
    common::init_tracing();
    assert_eq!(hostloop::run(async { "ran" }).unwrap(), "ran");
}
