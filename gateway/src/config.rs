use std::path::{Path, PathBuf};

use anyhow::Context;
use shared_types::ExecutionConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the gateway binds to
    pub bind: String,
    /// Port the gateway listens on
    pub port: u16,
    /// Path of the TOML file describing the worker and dispatcher
    pub execution_path: PathBuf,
    /// Parsed execution configuration with environment overrides applied
    pub execution: ExecutionConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let execution_path = PathBuf::from(env_str("EXECUTION_CONFIG", "execution.toml"));
        let mut execution = load_execution(&execution_path)?;
        apply_overrides(&mut execution)?;

        Ok(Self {
            bind: env_str("GATEWAY_BIND", "0.0.0.0"),
            port: env_parse("GATEWAY_PORT", 8080)?,
            execution_path,
            execution,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

pub fn load_execution(path: &Path) -> anyhow::Result<ExecutionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read execution config {}", path.display()))?;
    parse_execution(&raw)
        .with_context(|| format!("Failed to parse execution config {}", path.display()))
}

fn parse_execution(raw: &str) -> anyhow::Result<ExecutionConfig> {
    Ok(toml::from_str(raw)?)
}

fn apply_overrides(execution: &mut ExecutionConfig) -> anyhow::Result<()> {
    let dispatcher = &mut execution.dispatcher;
    dispatcher.max_workers = env_parse("EXECUTION_MAX_WORKERS", dispatcher.max_workers)?;
    dispatcher.warm_workers = env_parse("EXECUTION_WARM_WORKERS", dispatcher.warm_workers)?;
    execution.worker.persistent = env_parse("EXECUTION_PERSISTENT", execution.worker.persistent)?;
    Ok(())
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{IoMode, Strategy};

    #[test]
    fn test_parse_minimal_execution_config() {
        let config = parse_execution(
            r#"
            [worker]
            mode = "stdio"
            start = { cmd = "python3", args = ["model.py"] }
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.mode, IoMode::Stdio);
        assert_eq!(config.worker.start.args, vec!["model.py".to_string()]);
        assert_eq!(config.dispatcher.strategy, Strategy::Pooled);
        assert_eq!(config.dispatcher.max_workers, 4);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = parse_execution(
            r#"
            [worker]
            start = { cmd = "cat" }

            [dispatcher]
            strategy = "round-robin"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("round-robin"), "{err}");
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = load_execution(&path).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
