//! Layered run configuration: built-in defaults, optionally overridden by
//! an `rlm-engine.toml` file, optionally overridden again by `RLM_*`
//! environment variables. Lives only at the CLI boundary — library callers
//! build [`crate::budget::Budget`] and [`crate::executor::ExecutorConfig`]
//! directly.

use crate::budget::Budget;
use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which [`crate::sandbox::Sandbox`] implementation the CLI should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    /// Out-of-process Python interpreter over JSON-RPC.
    Native,
    /// In-process scripted fake, for dry runs and tests.
    Embedded,
}

/// The fully-resolved configuration for one CLI invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub provider: String,
    pub model: String,
    /// Provider/model for bridge-initiated completions (`llm_query` and
    /// the depth-cap fallback). Falls back to `provider`/`model` if unset.
    pub subcall_provider: Option<String>,
    pub subcall_model: Option<String>,
    pub iteration_timeout_ms: u64,
    pub max_completion_tokens: Option<u32>,
    /// Upper bound on concurrent `batch_rlm_query`/`batch_llm_query` fan-out.
    pub batch_concurrency: usize,
    /// Bulleted hints appended to the system prompt's MODEL HINTS section.
    pub prompt_hints: Option<Vec<String>>,
    pub max_cost: f64,
    pub max_tokens: u64,
    pub max_time_ms: u64,
    pub max_depth: u32,
    pub max_iterations: u32,
    pub log_level: String,
    pub sandbox_backend: SandboxBackend,
    /// Path to the Python interpreter, used only by the native backend.
    pub python_path: String,
    /// Directory containing a pre-installed `rlm_sandbox` package. When
    /// unset, the native backend runs its bundled companion script instead.
    pub sandbox_package_path: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let budget = Budget::default();
        Self {
            provider: "mock".to_string(),
            model: "mock-model".to_string(),
            subcall_provider: None,
            subcall_model: None,
            iteration_timeout_ms: 30_000,
            max_completion_tokens: None,
            batch_concurrency: 5,
            prompt_hints: None,
            max_cost: budget.max_cost,
            max_tokens: budget.max_tokens,
            max_time_ms: budget.max_time_ms,
            max_depth: budget.max_depth,
            max_iterations: budget.max_iterations,
            log_level: "info".to_string(),
            sandbox_backend: SandboxBackend::Native,
            python_path: "python3".to_string(),
            sandbox_package_path: None,
        }
    }
}

impl RunConfig {
    pub fn budget(&self) -> Budget {
        Budget {
            max_cost: self.max_cost,
            max_tokens: self.max_tokens,
            max_time_ms: self.max_time_ms,
            max_depth: self.max_depth,
            max_iterations: self.max_iterations,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            provider: self.provider.clone(),
            model: self.model.clone(),
            subcall_provider: self.subcall_provider.clone(),
            subcall_model: self.subcall_model.clone(),
            iteration_timeout_ms: self.iteration_timeout_ms,
            max_completion_tokens: self.max_completion_tokens,
            batch_concurrency: self.batch_concurrency,
            prompt_hints: self.prompt_hints.clone(),
        }
    }
}

/// Resolve a [`RunConfig`]: defaults, then an optional TOML file (either
/// `explicit_path` or, if unset, `./rlm-engine.toml` when present), then
/// `RLM_*` environment variables. Later layers win field-by-field.
pub fn load(explicit_path: Option<&Path>) -> Result<RunConfig> {
    let defaults = RunConfig::default();
    let mut builder = config::Config::builder().add_source(
        config::Config::try_from(&defaults).map_err(|e| Error::Config(e.to_string()))?,
    );

    match explicit_path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        None => {
            builder = builder.add_source(config::File::with_name("rlm-engine").required(false));
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("RLM").separator("_"));

    let resolved = builder.build().map_err(|e| Error::Config(e.to_string()))?;
    resolved
        .try_deserialize()
        .map_err(|e| Error::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_budget_defaults() {
        let config = RunConfig::default();
        let budget = Budget::default();
        assert_eq!(config.max_cost, budget.max_cost);
        assert_eq!(config.max_depth, budget.max_depth);
    }

    #[test]
    fn load_with_no_file_or_env_returns_defaults() {
        // `rlm-engine.toml` is not expected to exist in the test working
        // directory, and no RLM_* env vars are set in this process's env
        // by the test harness, so this should resolve to pure defaults.
        let config = load(None).expect("config should resolve from defaults alone");
        assert_eq!(config.provider, "mock");
        assert_eq!(config.max_iterations, 30);
    }

    #[test]
    fn budget_conversion_round_trips_fields() {
        let config = RunConfig {
            max_iterations: 7,
            ..RunConfig::default()
        };
        assert_eq!(config.budget().max_iterations, 7);
    }
}
