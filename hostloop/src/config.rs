//! Configuration types for hostloop.

use crate::error::ConfigError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable naming the reference host backend.
pub const BACKEND_ENV: &str = "HOSTLOOP_BACKEND";

/// Readiness backend of the reference host loop.
///
/// Backends are identified by a short string (`"epoll"`, `"poll"`). Only the
/// backends in [`Backend::registered`] are accepted on a given platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Backend {
    /// Linux `epoll`.
    Epoll,
    /// Portable `poll(2)`.
    Poll,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const REGISTERED: &[Backend] = &[Backend::Epoll, Backend::Poll];

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
const REGISTERED: &[Backend] = &[Backend::Poll];

#[cfg(not(unix))]
const REGISTERED: &[Backend] = &[];

impl Backend {
    /// Backends available on this platform, preferred first.
    pub fn registered() -> &'static [Backend] {
        REGISTERED
    }

    pub const fn id(self) -> &'static str {
        match self {
            Backend::Epoll => "epoll",
            Backend::Poll => "poll",
        }
    }

    /// The backend selected for this process.
    ///
    /// Resolved once from `HOSTLOOP_BACKEND`. An unset or empty variable
    /// selects the first registered backend.
    pub fn selected() -> Result<Backend, ConfigError> {
        static SELECTED: OnceLock<Result<Backend, String>> = OnceLock::new();

        let selected = SELECTED.get_or_init(|| {
            let value = std::env::var(BACKEND_ENV).unwrap_or_default();
            Self::resolve(&value).map_err(|_| value)
        });

        match selected {
            Ok(backend) => Ok(*backend),
            Err(given) => Err(Self::unknown(given)),
        }
    }

    /// Parses `value`, treating an empty string as "use the default".
    pub fn resolve(value: &str) -> Result<Backend, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Backend::default());
        }
        value.parse()
    }

    fn unknown(given: &str) -> ConfigError {
        let registered = REGISTERED
            .iter()
            .map(|b| b.id())
            .collect::<Vec<_>>()
            .join(", ");

        ConfigError::UnknownBackend {
            given: given.to_string(),
            registered,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        REGISTERED.first().copied().unwrap_or(Backend::Poll)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        REGISTERED
            .iter()
            .copied()
            .find(|b| b.id() == wanted)
            .ok_or_else(|| Self::unknown(s))
    }
}

impl TryFrom<String> for Backend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Backend> for String {
    fn from(backend: Backend) -> Self {
        backend.id().to_string()
    }
}

/// Configuration for an [`EventLoop`](crate::EventLoop).
///
/// This struct can be deserialized from TOML, JSON or environment
/// variables using figment; see [`LoopBuilder`](crate::LoopBuilder).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoopConfig {
    /// Emit loop-level debug diagnostics (default: false)
    #[serde(default)]
    pub debug: bool,

    /// Reference host backend (default: first registered backend)
    #[serde(default)]
    pub backend: Backend,

    /// Worker count of the lazily created default executor (default: 10)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Worker stack size in bytes, or the platform default when unset
    #[serde(default = "default_worker_stack_size")]
    pub worker_stack_size: Option<usize>,

    /// Worker thread name prefix (default: "hostloop")
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,

    /// Completion-port drain timeout of the proactor bridge (default: 10)
    #[serde(default = "default_proactor_poll_ms")]
    pub proactor_poll_ms: u64,

    /// Attach to a host that is already running instead of calling `exec`
    #[serde(default)]
    pub already_running: bool,
}

fn default_max_workers() -> usize {
    10
}

fn default_thread_name_prefix() -> String {
    "hostloop".to_string()
}

fn default_proactor_poll_ms() -> u64 {
    10
}

/// Worker stack size for platforms whose native thread stack is too small.
pub fn default_worker_stack_size() -> Option<usize> {
    if cfg!(target_os = "macos") {
        Some(16 * 1024 * 1024)
    } else if cfg!(target_os = "freebsd") {
        Some(4 * 1024 * 1024)
    } else if cfg!(target_os = "aix") {
        Some(2 * 1024 * 1024)
    } else {
        None
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            debug: false,
            backend: Backend::default(),
            max_workers: default_max_workers(),
            worker_stack_size: default_worker_stack_size(),
            thread_name_prefix: default_thread_name_prefix(),
            proactor_poll_ms: default_proactor_poll_ms(),
            already_running: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_default_config() {
        let config = LoopConfig::default();
        assert!(!config.debug);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.thread_name_prefix, "hostloop");
        assert_eq!(config.proactor_poll_ms, 10);
        assert!(!config.already_running);
        assert_eq!(config.backend, Backend::registered()[0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_backend_parsing() {
        assert_eq!("poll".parse::<Backend>().unwrap(), Backend::Poll);
        assert_eq!(" POLL ".parse::<Backend>().unwrap(), Backend::Poll);
        assert_eq!(Backend::resolve("").unwrap(), Backend::default());

        let err = "qt".parse::<Backend>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("`qt`"));
        assert!(message.contains("poll"));
    }

    #[cfg(unix)]
    #[test]
    fn test_config_from_toml() {
        let config: LoopConfig = toml::from_str(
            r#"
            debug = true
            backend = "poll"
            max_workers = 3
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.backend, Backend::Poll);
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.thread_name_prefix, "hostloop");
    }

    #[test]
    fn test_unknown_backend_in_toml() {
        let result: Result<LoopConfig, _> = toml::from_str(r#"backend = "qt""#);
        assert!(result.is_err());
    }
}
