// plait-config/src/env.rs
// Environment variable parsing and override support

use std::collections::BTreeMap;
use std::env;

use crate::config::{ConfigError, ConfigResult, Configuration, StrategyKind, Verbosity};

/// Load PLAIT_* environment variables into a normalized map
///
/// Format: PLAIT_<KEY>=value
/// Examples:
///   PLAIT_STRATEGY=fair-pct
///   PLAIT_SEED=42
///   PLAIT_MAX_ITERATIONS=1000
pub fn load_env_config() -> BTreeMap<String, String> {
    let mut env_config = BTreeMap::new();

    for (key, value) in env::vars() {
        if key.starts_with("PLAIT_") {
            // Normalize key (remove PLAIT_ prefix, convert to lowercase)
            let normalized_key = key.trim_start_matches("PLAIT_").to_lowercase();
            env_config.insert(normalized_key, value);
        }
    }

    env_config
}

/// Apply environment variable overrides to a configuration
///
/// Environment variables override config file values.
pub fn apply_env_overrides(config: &mut Configuration) -> ConfigResult<()> {
    let env_vars = load_env_config();
    apply_overrides_from(config, &env_vars)
}

/// Merge a normalized override map into a configuration
pub fn apply_overrides_from(
    config: &mut Configuration,
    env_vars: &BTreeMap<String, String>,
) -> ConfigResult<()> {
    if let Some(strategy) = env_vars.get("strategy") {
        config.strategy = parse_strategy(strategy)?;
    }

    if let Some(value) = env_vars.get("seed") {
        config.seed = parse_u64("seed", value)?;
    }

    if let Some(value) = env_vars.get("max_iterations") {
        config.max_iterations = parse_u64("max_iterations", value)?;
    }

    if let Some(value) = env_vars.get("max_fair_steps") {
        config.max_fair_steps = parse_u64("max_fair_steps", value)?;
    }

    if let Some(value) = env_vars.get("max_unfair_steps") {
        config.max_unfair_steps = parse_u64("max_unfair_steps", value)?;
    }

    if let Some(value) = env_vars.get("timeout_secs") {
        config.timeout_secs = parse_u64("timeout_secs", value)?;
    }

    if let Some(value) = env_vars.get("liveness") {
        config.is_liveness_checking_enabled = parse_bool("liveness", value)?;
    }

    if let Some(value) = env_vars.get("exhaustive") {
        config.exhaustive = parse_bool("exhaustive", value)?;
    }

    if let Some(value) = env_vars.get("fingerprinting") {
        config.fingerprinting = parse_bool("fingerprinting", value)?;
    }

    if let Some(value) = env_vars.get("fuzzing_fallback") {
        config.systematic_fuzzing_fallback = parse_bool("fuzzing_fallback", value)?;
    }

    if let Some(value) = env_vars.get("verbosity") {
        config.verbosity = match value.to_lowercase().as_str() {
            "quiet" => Verbosity::Quiet,
            "normal" => Verbosity::Normal,
            "detailed" => Verbosity::Detailed,
            other => {
                return Err(ConfigError::Validation(format!(
                    "Invalid verbosity: {}",
                    other
                )))
            }
        };
    }

    Ok(())
}

fn parse_strategy(value: &str) -> ConfigResult<StrategyKind> {
    match value.to_lowercase().as_str() {
        "random" => Ok(StrategyKind::Random),
        "probabilistic" => Ok(StrategyKind::Probabilistic),
        "pct" => Ok(StrategyKind::Pct),
        "fair-pct" | "fairpct" => Ok(StrategyKind::FairPct),
        "dfs-bounded" | "dfs" => Ok(StrategyKind::DfsBounded),
        "replay" => Ok(StrategyKind::Replay),
        other => Err(ConfigError::Validation(format!(
            "Unknown strategy: {}",
            other
        ))),
    }
}

fn parse_u64(key: &str, value: &str) -> ConfigResult<u64> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid {}: {}", key, value)))
}

fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Validation(format!(
            "Invalid {}: {}",
            key, other
        ))),
    }
}
