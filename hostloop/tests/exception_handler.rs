mod common;

use common::{Log, new_loop};
use hostloop::{CallbackError, ExceptionContext};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects formatted log output.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Exploding;

impl io::Write for Exploding {
    fn write(&mut self, _: &[u8]) -> io::Result<usize> {
        panic!("log sink exploded");
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_custom_handler_receives_context() {
    let event_loop = new_loop();
    let log = Log::new();

    let seen = log.clone();
    event_loop.set_exception_handler(move |_, context| {
        seen.push((
            context.message.clone(),
            context.details.get("fd").cloned(),
            context.error.as_ref().map(|e| e.to_string()),
        ));
        Ok(())
    });
    assert!(event_loop.exception_handler().is_some());

    event_loop.call_exception_handler(
        &ExceptionContext::new("reader failed")
            .with_detail("fd", "7")
            .with_error(CallbackError::raised(io::Error::other("broken pipe"))),
    );

    assert_eq!(
        log.entries(),
        vec![(
            "reader failed".to_string(),
            Some("7".to_string()),
            Some("broken pipe".to_string())
        )]
    );

    event_loop.clear_exception_handler();
    assert!(event_loop.exception_handler().is_none());
    event_loop.close().unwrap();
}

#[test]
fn test_failing_handler_falls_back_to_default() {
    let event_loop = new_loop();
    event_loop.set_exception_handler(|_, _| Err(anyhow::anyhow!("handler broke")));

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        event_loop.call_exception_handler(&ExceptionContext::new("original failure"));
    });

    let output = capture.contents();
    assert!(output.contains("Unhandled error in custom exception handler"), "{output}");
    assert!(output.contains("context: original failure"), "{output}");
    assert!(output.contains("handler broke"), "{output}");
    event_loop.close().unwrap();
}

#[test]
fn test_panicking_handler_falls_back_to_default() {
    let event_loop = new_loop();
    event_loop.set_exception_handler(|_, _| panic!("handler panicked"));

    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        event_loop.call_exception_handler(&ExceptionContext::new("first"));
    });

    let output = capture.contents();
    assert!(output.contains("Unhandled error in custom exception handler"), "{output}");
    assert!(output.contains("handler panicked"), "{output}");
    event_loop.close().unwrap();
}

#[test]
fn test_exploding_default_handler_is_contained() {
    let event_loop = new_loop();

    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(|| Exploding)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        event_loop.call_exception_handler(&ExceptionContext::new("nobody can log this"));
    });

    assert_eq!(event_loop.run_until_complete(async { 1 }).unwrap(), 1);
    event_loop.close().unwrap();
}

#[test]
fn test_unretrieved_task_failure_is_reported() {
    let event_loop = new_loop();
    let log = Log::new();

    let seen = log.clone();
    event_loop.set_exception_handler(move |_, context| {
        let panicked = context.error.as_ref().is_some_and(CallbackError::is_panic);
        seen.push((context.message.clone(), panicked));
        Ok(())
    });

    drop(event_loop.spawn(async {
        if true {
            panic!("nobody is watching");
        }
    }));

    let inner = event_loop.clone();
    event_loop.call_later(Duration::from_millis(10), move || inner.stop());
    event_loop.run_forever().unwrap();

    assert_eq!(
        log.entries(),
        vec![("Task exception was never retrieved".to_string(), true)]
    );
    event_loop.close().unwrap();
}

#[test]
fn test_observed_task_failure_is_not_reported() {
    let event_loop = new_loop();
    let log = Log::new();

    let seen = log.clone();
    event_loop.set_exception_handler(move |_, context| {
        seen.push(context.message.clone());
        Ok(())
    });

    let task = event_loop.spawn(async {
        if true {
            panic!("observed");
        }
    });

    let inner = event_loop.clone();
    event_loop.call_later(Duration::from_millis(10), move || inner.stop());
    event_loop.run_forever().unwrap();

    let error = task.exception().unwrap().unwrap();
    assert_eq!(error.to_string(), "callback panicked: observed");
    drop(task);

    assert!(log.entries().is_empty());
    event_loop.close().unwrap();
}

#[test]
fn test_report_layout() {
    let context = ExceptionContext::new("")
        .with_detail("fd", "3")
        .with_detail("direction", "read")
        .with_context(ExceptionContext::new("inner").with_detail("step", "2"));

    assert_eq!(
        context.report(),
        "Unhandled exception in event loop\ncontext: inner; step: 2\ndirection: read\nfd: 3"
    );
}
