//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::deploy::network::NetworkPatchOptions;
use crate::deploy::reconciler::ReconcilerOptions;
use crate::deploy::waiter::WaiterOptions;
use crate::errors::ReconcileError;
use crate::filesys::file::File;
use crate::logs::{LogLevel, LogOptions};
use crate::utils::RetryOptions;

/// Environment variable naming the settings file
pub const SETTINGS_ENV: &str = "CONVOY_SETTINGS";

/// Environment variable holding the control plane token
pub const TOKEN_ENV: &str = "CONVOY_API_TOKEN";

/// Settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "convoy.json";

/// Upper bound on the convergence deadline (one day)
pub const MAX_CONVERGENCE_TIMEOUT_SECS: u64 = 86_400;

/// Reconciler settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Control plane API configuration
    #[serde(default)]
    pub control_plane: ControlPlaneSettings,

    #[serde(default)]
    pub convergence: ConvergenceSettings,

    /// Retry policy for control plane reads
    #[serde(default)]
    pub probe_retry: ProbeRetrySettings,

    #[serde(default)]
    pub network: NetworkSettings,
}

/// Control plane API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSettings {
    /// Base URL for the control plane API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Never written back out.
    #[serde(default, deserialize_with = "deserialize_token", skip_serializing)]
    pub token: Option<SecretString>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let token = Option::<String>::deserialize(deserializer)?;
    Ok(token
        .filter(|t| !t.trim().is_empty())
        .map(SecretString::from))
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_request_timeout(),
        }
    }
}

impl ControlPlaneSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Convergence wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceSettings {
    #[serde(default = "default_convergence_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_convergence_timeout() -> u64 {
    600
}

fn default_poll_interval() -> u64 {
    15
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_convergence_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Read retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRetrySettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_secs() -> u64 {
    8
}

impl Default for ProbeRetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

/// Logging endpoint ingress settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default = "default_logging_endpoint_service")]
    pub logging_endpoint_service: String,

    #[serde(default = "default_ingress_port")]
    pub ingress_port: u16,
}

fn default_logging_endpoint_service() -> String {
    "logs".to_string()
}

fn default_ingress_port() -> u16 {
    443
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            logging_endpoint_service: default_logging_endpoint_service(),
            ingress_port: default_ingress_port(),
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// An explicit path must exist. Otherwise `CONVOY_SETTINGS` is consulted,
    /// then `./convoy.json`; with neither present the defaults apply. A token
    /// in `CONVOY_API_TOKEN` replaces the one from the file.
    pub async fn load(
        explicit: Option<&str>,
        env_path: Option<String>,
        env_token: Option<String>,
    ) -> Result<Self, ReconcileError> {
        let mut settings = match explicit {
            Some(path) => Self::read(File::new(path)).await?,
            None => {
                let path = env_path
                    .filter(|p| !p.trim().is_empty())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
                let file = File::new(path);
                if file.exists().await {
                    Self::read(file).await?
                } else {
                    Settings::default()
                }
            }
        };

        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            settings.control_plane.token = Some(SecretString::from(token));
        }
        settings.validate()?;
        Ok(settings)
    }

    async fn read(file: File) -> Result<Self, ReconcileError> {
        if !file.exists().await {
            return Err(ReconcileError::Configuration(format!(
                "settings file not found: {}",
                file.path().display()
            )));
        }
        let contents = file.read_string().await?;
        serde_json::from_str(&contents).map_err(|e| {
            ReconcileError::Configuration(format!(
                "invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }

    fn validate(&self) -> Result<(), ReconcileError> {
        if self.control_plane.timeout_secs == 0 {
            return Err(ReconcileError::Configuration(
                "control_plane.timeout_secs must be positive".to_string(),
            ));
        }
        if !(1..=MAX_CONVERGENCE_TIMEOUT_SECS).contains(&self.convergence.timeout_secs) {
            return Err(ReconcileError::Configuration(format!(
                "convergence.timeout_secs must be between 1 and {}, got {}",
                MAX_CONVERGENCE_TIMEOUT_SECS, self.convergence.timeout_secs
            )));
        }
        if self.convergence.poll_interval_secs == 0 {
            return Err(ReconcileError::Configuration(
                "convergence.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.probe_retry.attempts == 0 {
            return Err(ReconcileError::Configuration(
                "probe_retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn log_options(&self, json_override: bool) -> LogOptions {
        LogOptions {
            log_level: self.log_level.clone(),
            json_format: self.json_logs || json_override,
            ..Default::default()
        }
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            retry: RetryOptions {
                attempts: self.probe_retry.attempts,
                base_delay: Duration::from_millis(self.probe_retry.base_delay_ms),
                max_delay: Duration::from_secs(self.probe_retry.max_delay_secs),
                ..Default::default()
            },
            waiter: WaiterOptions {
                timeout: Duration::from_secs(self.convergence.timeout_secs),
                poll_interval: Duration::from_secs(self.convergence.poll_interval_secs),
            },
            network: NetworkPatchOptions {
                logging_endpoint_service: self.network.logging_endpoint_service.clone(),
                ingress_port: self.network.ingress_port,
            },
        }
    }
}
