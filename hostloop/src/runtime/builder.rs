//! Builder for event loops.
//!
//! Configuration sources are merged with figment, later sources
//! overriding earlier ones:
//! 1. Default values
//! 2. Config files (in order added)
//! 3. Environment variables
//! 4. Programmatic overrides

use super::core::EventLoop;
use crate::config::{Backend, LoopConfig};
use crate::error::{ConfigError, LoopError};
use crate::host::HostLoop;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Prefix of the environment variables read by [`LoopBuilder::from_env`].
pub const ENV_PREFIX: &str = "HOSTLOOP_";

/// Builder for an [`EventLoop`].
///
/// # Examples
///
/// ```ignore
/// let event_loop = LoopBuilder::new()
///     .file("hostloop.toml")
///     .from_env()
///     .max_workers(4)
///     .build()?;
/// ```
pub struct LoopBuilder {
    figment: Figment,
    host: Option<Rc<dyn HostLoop>>,
}

impl Default for LoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopBuilder")
            .field("figment", &self.figment)
            .field("host", &self.host.as_ref().map(|_| "<HostLoop>"))
            .finish()
    }
}

impl LoopBuilder {
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(LoopConfig::default())),
            host: None,
        }
    }

    /// Adds a configuration file, TOML unless the extension is `.json`.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Reads `{prefix}{KEY}` environment variables, e.g. `HOSTLOOP_DEBUG`.
    ///
    /// Keys are not split on `_`, so `HOSTLOOP_MAX_WORKERS` sets
    /// `max_workers`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(prefix));
        self
    }

    /// Reads the `HOSTLOOP_*` environment variables.
    pub fn from_env(self) -> Self {
        self.env_prefix(ENV_PREFIX)
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.figment = self.figment.merge(Serialized::default("debug", enabled));
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.figment = self.figment.merge(Serialized::default("backend", backend));
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("max_workers", n));
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("worker_stack_size", bytes));
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("thread_name_prefix", prefix.into()));
        self
    }

    pub fn proactor_poll_ms(mut self, ms: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("proactor_poll_ms", ms));
        self
    }

    /// Attach to an already running host instead of entering it.
    pub fn already_running(mut self, attach: bool) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("already_running", attach));
        self
    }

    /// Drives the loop with `host` instead of a [`PollHost`](crate::PollHost).
    pub fn host(mut self, host: Rc<dyn HostLoop>) -> Self {
        self.host = Some(host);
        self
    }

    /// Extracts the merged configuration.
    pub fn config(&self) -> Result<LoopConfig, ConfigError> {
        Ok(self.figment.extract::<LoopConfig>().map_err(Box::new)?)
    }

    /// Builds the loop.
    ///
    /// Without an explicit host, a [`PollHost`](crate::PollHost) with the
    /// configured backend is created. With `already_running`, the loop is
    /// attached before it is returned.
    pub fn build(self) -> Result<EventLoop, LoopError> {
        let config = self.config()?;

        let host = match self.host {
            Some(host) => host,
            None => default_host(config.backend)?,
        };

        let attach = config.already_running;
        let event_loop = EventLoop::with_config(host, config);
        if attach {
            event_loop.attach()?;
        }

        Ok(event_loop)
    }
}

#[cfg(unix)]
fn default_host(backend: Backend) -> Result<Rc<dyn HostLoop>, LoopError> {
    Ok(Rc::new(crate::host::PollHost::with_backend(backend)?))
}

#[cfg(not(unix))]
fn default_host(_backend: Backend) -> Result<Rc<dyn HostLoop>, LoopError> {
    Err(LoopError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "no built-in host loop on this platform; pass one with LoopBuilder::host",
    )))
}
