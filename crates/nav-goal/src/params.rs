// params.rs - Runtime parameters, their sources, and atomic reload.
//
// RuntimeParameters is always built whole by a ParameterSource and then
// swapped into the ParameterStore in one assignment, so a reader never
// observes a mix of old and new values. The UpdateGate serializes reload
// requests against each other without holding the store lock while the
// source is being read, which keeps snapshot() cheap for the tick loop.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Node name used when none is given on the command line.
pub const DEFAULT_NODE_NAME: &str = "robot_manager";

/// Tunable settings read by the sequencer every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeParameters {
    /// Topic the goal-set feed is subscribed to.
    pub goals_topic: String,

    /// Tick loop frequency in Hz.
    pub tick_rate: f64,

    /// How long one readiness probe waits for the execution backend.
    pub backend_ready_timeout: Duration,

    /// Consecutive probe timeouts tolerated before giving up.
    pub max_connect_retries: u32,

    /// Name of the reload endpoint: node name + `update_params_service`.
    pub reload_trigger_id: String,
}

impl RuntimeParameters {
    /// Parameters with every option at its documented default.
    pub fn defaults(node_name: &str) -> Self {
        Self {
            goals_topic: default_goals_topic(),
            tick_rate: default_rate(),
            backend_ready_timeout: Duration::from_secs_f64(default_wait_time()),
            max_connect_retries: default_maximum_retry(),
            reload_trigger_id: format!("{}{}", node_name, default_update_params_service()),
        }
    }

    /// Time between two ticks.
    ///
    /// Values built by [`ParameterFile::into_parameters`] always have a
    /// representable period; a hand-built rate that does not falls back to
    /// the default rate.
    pub fn tick_period(&self) -> Duration {
        period_of(self.tick_rate)
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / default_rate()))
    }
}

fn period_of(rate: f64) -> Option<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate).ok()
}

/// On-disk form of the parameters, one key per recognized option.
///
/// Every key is optional; absent keys take their documented default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterFile {
    #[serde(default = "default_goals_topic")]
    pub goals_topic: String,

    /// Hz.
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Seconds.
    #[serde(default = "default_wait_time")]
    pub wait_time: f64,

    #[serde(default = "default_maximum_retry")]
    pub maximum_retry: u32,

    /// Appended to the node name to form the reload endpoint name.
    #[serde(default = "default_update_params_service")]
    pub update_params_service: String,
}

impl Default for ParameterFile {
    fn default() -> Self {
        Self {
            goals_topic: default_goals_topic(),
            rate: default_rate(),
            wait_time: default_wait_time(),
            maximum_retry: default_maximum_retry(),
            update_params_service: default_update_params_service(),
        }
    }
}

impl ParameterFile {
    /// Validate and convert into the in-memory form.
    pub fn into_parameters(self, node_name: &str) -> Result<RuntimeParameters, ConfigError> {
        if period_of(self.rate).is_none() {
            return Err(ConfigError::Invalid {
                option: "rate".to_string(),
                reason: format!(
                    "must be a positive frequency with a representable period, got {}",
                    self.rate
                ),
            });
        }
        let backend_ready_timeout = match Duration::try_from_secs_f64(self.wait_time) {
            Ok(timeout) => timeout,
            Err(e) => {
                return Err(ConfigError::Invalid {
                    option: "wait_time".to_string(),
                    reason: format!(
                        "must be a non-negative duration, got {} ({})",
                        self.wait_time, e
                    ),
                })
            }
        };
        Ok(RuntimeParameters {
            goals_topic: self.goals_topic,
            tick_rate: self.rate,
            backend_ready_timeout,
            max_connect_retries: self.maximum_retry,
            reload_trigger_id: format!("{}{}", node_name, self.update_params_service),
        })
    }
}

// Serde default functions
fn default_goals_topic() -> String {
    "/current_goals".to_string()
}

fn default_rate() -> f64 {
    50.0
}

fn default_wait_time() -> f64 {
    5.0
}

fn default_maximum_retry() -> u32 {
    3
}

fn default_update_params_service() -> String {
    "/update_parameters".to_string()
}

/// Anything that can produce a complete parameter set.
///
/// Implementations must either return a fully built value or an error;
/// the store is only touched after `load` succeeds.
pub trait ParameterSource: Send + Sync {
    fn load(&self) -> Result<RuntimeParameters, ConfigError>;
}

/// Every option at its default.
pub struct DefaultSource {
    node_name: String,
}

impl DefaultSource {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }
}

impl ParameterSource for DefaultSource {
    fn load(&self) -> Result<RuntimeParameters, ConfigError> {
        Ok(RuntimeParameters::defaults(&self.node_name))
    }
}

/// Reads options from a TOML file on every load.
///
/// A missing file means "no overrides" and yields the defaults, the same as
/// a parameter server with nothing set.
pub struct TomlFileSource {
    path: PathBuf,
    node_name: String,
}

impl TomlFileSource {
    pub fn new(path: impl AsRef<Path>, node_name: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            node_name: node_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterSource for TomlFileSource {
    fn load(&self) -> Result<RuntimeParameters, ConfigError> {
        if !self.path.exists() {
            tracing::debug!(
                "parameter file {} not found, using defaults",
                self.path.display()
            );
            return ParameterFile::default().into_parameters(&self.node_name);
        }
        let content = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file: ParameterFile =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        file.into_parameters(&self.node_name)
    }
}

/// Holds the parameters currently in effect.
pub struct ParameterStore {
    current: Mutex<RuntimeParameters>,
}

impl ParameterStore {
    pub fn new(initial: RuntimeParameters) -> Self {
        Self {
            current: Mutex::new(initial),
        }
    }

    /// Copy out the current parameters.
    pub fn snapshot(&self) -> RuntimeParameters {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the parameters wholesale.
    fn swap(&self, next: RuntimeParameters) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// The synchronization boundary between reload requests and readers.
pub struct UpdateGate {
    store: ParameterStore,
    reload_guard: Mutex<()>,
}

impl UpdateGate {
    pub fn new(initial: RuntimeParameters) -> Self {
        Self {
            store: ParameterStore::new(initial),
            reload_guard: Mutex::new(()),
        }
    }

    /// Build a gate from an initial load of `source`.
    pub fn load(source: &dyn ParameterSource) -> Result<Self, ConfigError> {
        Ok(Self::new(source.load()?))
    }

    pub fn snapshot(&self) -> RuntimeParameters {
        self.store.snapshot()
    }

    /// Re-read parameters from `source` and swap them in.
    ///
    /// On error the parameters in effect are left untouched.
    pub fn reload(&self, source: &dyn ParameterSource) -> Result<RuntimeParameters, ConfigError> {
        let _reloading = self
            .reload_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = source.load()?;
        self.store.swap(next.clone());
        Ok(next)
    }
}
