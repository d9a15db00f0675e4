//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`max_op_count(64)`)
//! 2. **Environment variables**: values from `FIBERFX_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FIBERFX_MAX_OP_COUNT` | `usize` | `max_op_count` |
//! | `FIBERFX_MAX_TRACE_COUNT` | `usize` | `max_trace_count` |
//! | `FIBERFX_CONCURRENCY` | `usize` or `unbounded` | `default_concurrency` |
//! | `FIBERFX_FINALIZATION` | `sequential`, `concurrent`, `concurrent:N` | `finalization` |
//! | `FIBERFX_CLOCK` | `wall` or `virtual` | `clock` |

use crate::error::ConfigError;
use crate::runtime::config::{ClockKind, RuntimeConfig};
use crate::scope::FinalizationStrategy;

/// Environment variable name for the cooperative yield threshold.
pub const ENV_MAX_OP_COUNT: &str = "FIBERFX_MAX_OP_COUNT";
/// Environment variable name for the per-fiber trace bound.
pub const ENV_MAX_TRACE_COUNT: &str = "FIBERFX_MAX_TRACE_COUNT";
/// Environment variable name for the root concurrency level.
pub const ENV_CONCURRENCY: &str = "FIBERFX_CONCURRENCY";
/// Environment variable name for the finalization strategy.
pub const ENV_FINALIZATION: &str = "FIBERFX_FINALIZATION";
/// Environment variable name for the clock kind.
pub const ENV_CLOCK: &str = "FIBERFX_CLOCK";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_MAX_OP_COUNT) {
        config.max_op_count = parse_usize(ENV_MAX_OP_COUNT, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_TRACE_COUNT) {
        config.max_trace_count = parse_usize(ENV_MAX_TRACE_COUNT, &val)?;
    }
    if let Some(val) = read_env(ENV_CONCURRENCY) {
        config.default_concurrency = parse_concurrency(ENV_CONCURRENCY, &val)?;
    }
    if let Some(val) = read_env(ENV_FINALIZATION) {
        config.finalization = parse_with::<FinalizationStrategy>(ENV_FINALIZATION, &val)?;
    }
    if let Some(val) = read_env(ENV_CLOCK) {
        config.clock = parse_with::<ClockKind>(ENV_CLOCK, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var_name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var_name.to_string(),
        reason,
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|e| {
        invalid(
            var_name,
            format!("expected unsigned integer, got {val:?} ({e})"),
        )
    })
}

fn parse_concurrency(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "unbounded" | "max" => Ok(usize::MAX),
        _ => parse_usize(var_name, val),
    }
}

fn parse_with<T>(var_name: &str, val: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = String>,
{
    val.parse::<T>().map_err(|reason| invalid(var_name, reason))
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [fiber]
/// max_op_count = 2048
/// max_trace_count = 50
/// concurrency = 16
///
/// [scope]
/// finalization = "concurrent:4"
///
/// [scheduler]
/// clock = "wall"
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Fiber settings.
    #[serde(default)]
    pub fiber: FiberToml,
    /// Scope settings.
    #[serde(default)]
    pub scope: ScopeToml,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
}

/// Fiber section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FiberToml {
    /// Cooperative yield threshold.
    pub max_op_count: Option<usize>,
    /// Trace frames kept per fiber.
    pub max_trace_count: Option<usize>,
    /// Root concurrency level.
    pub concurrency: Option<usize>,
}

/// Scope section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ScopeToml {
    /// Finalization strategy (`sequential`, `concurrent`, `concurrent:N`).
    pub finalization: Option<String>,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Clock kind (`wall` or `virtual`).
    pub clock: Option<String>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are present in the TOML override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(
    config: &mut RuntimeConfig,
    toml: &RuntimeTomlConfig,
) -> Result<(), ConfigError> {
    if let Some(v) = toml.fiber.max_op_count {
        config.max_op_count = v;
    }
    if let Some(v) = toml.fiber.max_trace_count {
        config.max_trace_count = v;
    }
    if let Some(v) = toml.fiber.concurrency {
        config.default_concurrency = v;
    }
    if let Some(ref v) = toml.scope.finalization {
        config.finalization = v
            .parse()
            .map_err(|e| ConfigError::Parse(format!("scope.finalization: {e}")))?;
    }
    if let Some(ref v) = toml.scheduler.clock {
        config.clock = v
            .parse()
            .map_err(|e| ConfigError::Parse(format!("scheduler.clock: {e}")))?;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    // Helper: set env var for the duration of a closure, then unset.
    fn with_env<F, R>(var: &str, val: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            std::env::set_var(var, val);
            let result = f();
            std::env::remove_var(var);
            result
        })
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_MAX_OP_COUNT,
            ENV_MAX_TRACE_COUNT,
            ENV_CONCURRENCY,
            ENV_FINALIZATION,
            ENV_CLOCK,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert_eq!(super::parse_usize("TEST", "0").unwrap(), 0);
    }

    #[test]
    fn parse_usize_invalid() {
        let err = super::parse_usize("TEST", "abc").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "TEST"));
        assert!(super::parse_usize("TEST", "-1").is_err());
    }

    #[test]
    fn parse_concurrency_accepts_unbounded() {
        assert_eq!(super::parse_concurrency("TEST", "unbounded").unwrap(), usize::MAX);
        assert_eq!(super::parse_concurrency("TEST", "8").unwrap(), 8);
        assert!(super::parse_concurrency("TEST", "lots").is_err());
    }

    // --- env overrides ---

    #[test]
    fn env_overrides_max_op_count() {
        with_env(ENV_MAX_OP_COUNT, "64", || {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.max_op_count, 64);
        });
    }

    #[test]
    fn env_overrides_finalization_and_clock() {
        with_envs(
            &[(ENV_FINALIZATION, "concurrent:3"), (ENV_CLOCK, "virtual")],
            || {
                let mut config = RuntimeConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.finalization, FinalizationStrategy::ConcurrentN(3));
                assert_eq!(config.clock, ClockKind::Virtual);
            },
        );
    }

    #[test]
    fn env_invalid_value_is_rejected() {
        with_env(ENV_MAX_TRACE_COUNT, "many", || {
            let mut config = RuntimeConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert!(err.to_string().contains(ENV_MAX_TRACE_COUNT));
        });
    }

    #[test]
    fn env_unset_leaves_defaults() {
        with_clean_env(|| {
            let mut config = RuntimeConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config, RuntimeConfig::default());
        });
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_sections_apply() {
        let toml = parse_toml_str(
            r#"
            [fiber]
            max_op_count = 10
            concurrency = 2

            [scope]
            finalization = "concurrent"
            "#,
        )
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &toml).unwrap();
        assert_eq!(config.max_op_count, 10);
        assert_eq!(config.default_concurrency, 2);
        assert_eq!(config.finalization, FinalizationStrategy::Concurrent);
        assert_eq!(config.max_trace_count, 50);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_bad_strategy_is_parse_error() {
        let toml = parse_toml_str("[scope]\nfinalization = \"eventually\"\n").unwrap();
        let mut config = RuntimeConfig::default();
        let err = apply_toml_config(&mut config, &toml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
