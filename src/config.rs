use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptLimits {
    #[serde(default = "ScriptLimits::default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "ScriptLimits::default_max_operations")]
    pub max_operations: u64,
    #[serde(default = "ScriptLimits::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default = "ScriptLimits::default_max_expr_depth")]
    pub max_expr_depth: usize,
    #[serde(default = "ScriptLimits::default_max_logs_per_call")]
    pub max_logs_per_call: usize,
}

impl ScriptLimits {
    const fn default_call_timeout_ms() -> u64 {
        32
    }

    const fn default_max_operations() -> u64 {
        500_000
    }

    const fn default_max_call_levels() -> usize {
        64
    }

    const fn default_max_expr_depth() -> usize {
        64
    }

    const fn default_max_logs_per_call() -> usize {
        256
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            call_timeout_ms: Self::default_call_timeout_ms(),
            max_operations: Self::default_max_operations(),
            max_call_levels: Self::default_max_call_levels(),
            max_expr_depth: Self::default_max_expr_depth(),
            max_logs_per_call: Self::default_max_logs_per_call(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// `env_logger` filter syntax, e.g. `"info,script=debug"`. `RUST_LOG` applies when unset.
    #[serde(default)]
    pub filter: Option<String>,
}

impl LogConfig {
    const fn default_buffer_capacity() -> usize {
        256
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { buffer_capacity: Self::default_buffer_capacity(), filter: None }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub scripts: ScriptLimits,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfigOverrides {
    pub call_timeout_ms: Option<u64>,
    pub max_operations: Option<u64>,
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &HostConfigOverrides) {
        if let Some(timeout) = overrides.call_timeout_ms {
            self.scripts.call_timeout_ms = timeout;
        }
        if let Some(max_operations) = overrides.max_operations {
            self.scripts.max_operations = max_operations;
        }
    }
}

impl HostConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.call_timeout_ms.is_none() && self.max_operations.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.call_timeout_ms.is_some() {
            fields.push("call_timeout_ms");
        }
        if self.max_operations.is_some() {
            fields.push("max_operations");
        }
        fields
    }
}
