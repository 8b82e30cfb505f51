//! Exception handler plumbing.
//!
//! Failures that have no future to land in (a panicking callback, a task
//! whose failure nobody retrieved) are described by an
//! [`ExceptionContext`] and passed to the loop's exception handler. The
//! chain never lets a failure escape: a failing custom handler falls back
//! to the default handler, and a failing default handler falls back to
//! writing on stderr.

use super::core::EventLoop;
use super::handle::Handle;
use crate::error::CallbackError;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

/// A custom exception handler installed with
/// [`EventLoop::set_exception_handler`].
pub type ExceptionHandler = Rc<dyn Fn(&EventLoop, &ExceptionContext) -> anyhow::Result<()>>;

/// Description of an unhandled failure.
#[derive(Debug, Clone, Default)]
pub struct ExceptionContext {
    pub message: String,
    pub error: Option<CallbackError>,
    pub handle: Option<Handle>,
    /// The context being handled when a custom handler failed.
    pub context: Option<Box<ExceptionContext>>,
    /// Extra key-value details, logged in key order.
    pub details: BTreeMap<String, String>,
}

impl ExceptionContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: CallbackError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn with_context(mut self, context: ExceptionContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// The multi-line report written by the default handler.
    pub fn report(&self) -> String {
        let mut out = if self.message.is_empty() {
            "Unhandled exception in event loop".to_string()
        } else {
            self.message.clone()
        };

        if let Some(context) = &self.context {
            let _ = write!(out, "\ncontext: {}", context.report().replace('\n', "; "));
        }
        for (key, value) in &self.details {
            let _ = write!(out, "\n{key}: {value}");
        }
        if let Some(handle) = &self.handle {
            let _ = write!(out, "\nhandle: {handle:?}");
        }

        out
    }
}

/// Logs an error, falling back to stderr if logging itself fails.
pub(crate) fn log_error(message: &str, error: Option<&CallbackError>) {
    let logged = catch_unwind(AssertUnwindSafe(|| match error {
        Some(error) => tracing::error!(error = %error, "{message}"),
        None => tracing::error!("{message}"),
    }));

    if logged.is_err() {
        let _ = writeln!(std::io::stderr(), "{message:?}, {error:?}");
    }
}

/// Applies the handler chain to `context`.
pub(crate) fn dispatch(
    event_loop: &EventLoop,
    handler: Option<ExceptionHandler>,
    context: &ExceptionContext,
) {
    let Some(handler) = handler else {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            event_loop.default_exception_handler(context)
        }));
        if let Err(payload) = outcome {
            log_error(
                "Exception in default exception handler",
                Some(&CallbackError::from_panic(payload)),
            );
        }
        return;
    };

    let failure = match catch_unwind(AssertUnwindSafe(|| handler(event_loop, context))) {
        Ok(Ok(())) => return,
        Ok(Err(error)) => CallbackError::raised(error),
        Err(payload) => CallbackError::from_panic(payload),
    };

    let nested = ExceptionContext::new("Unhandled error in custom exception handler")
        .with_error(failure)
        .with_context(context.clone());

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        event_loop.default_exception_handler(&nested)
    }));
    if let Err(payload) = outcome {
        log_error(
            "Exception in default exception handler while handling an unexpected error in \
             custom exception handler",
            Some(&CallbackError::from_panic(payload)),
        );
    }
}
