// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use quadra_db::RetryPolicy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_VERSION: i64 = 1;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: &str = "1s";
const DEFAULT_KNOWLEDGE_PATH: &str = "data/disc_knowledge.md";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub version: i64,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub retry: Retry,
    #[serde(default)]
    pub report: Report,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage: Storage::default(),
            retry: Retry::default(),
            report: Report::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Retry {
    pub max_attempts: Option<u32>,
    pub backoff: Option<String>,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_RETRY_ATTEMPTS),
            backoff: Some(DEFAULT_RETRY_BACKOFF.to_owned()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Report {
    pub knowledge_path: Option<String>,
    pub output_dir: Option<String>,
}

impl Default for Report {
    fn default() -> Self {
        Self {
            knowledge_path: Some(DEFAULT_KNOWLEDGE_PATH.to_owned()),
            output_dir: None,
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("QUADRA_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set QUADRA_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(quadra_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 1` and move values under [storage], [retry], and [report]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 1",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.version != CONFIG_VERSION {
            bail!(
                "config {} has version {}; expected 1",
                path.display(),
                self.version
            );
        }

        if let Some(db_path) = &self.storage.db_path {
            quadra_db::validate_db_path(db_path)?;
        }

        if let Some(attempts) = self.retry.max_attempts
            && attempts == 0
        {
            bail!(
                "retry.max_attempts in {} must be at least 1",
                path.display()
            );
        }

        // Zero backoff is valid and means retry immediately.
        if let Some(backoff) = &self.retry.backoff {
            parse_duration(backoff)?;
        }

        if let Some(knowledge_path) = &self.report.knowledge_path
            && knowledge_path.trim().is_empty()
        {
            bail!(
                "report.knowledge_path in {} must not be empty",
                path.display()
            );
        }

        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => quadra_db::default_db_path(),
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let attempts = self.retry.max_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS);
        let backoff = parse_duration(self.retry.backoff.as_deref().unwrap_or(DEFAULT_RETRY_BACKOFF))?;
        Ok(RetryPolicy::new(attempts.max(1), backoff))
    }

    pub fn knowledge_path(&self) -> PathBuf {
        PathBuf::from(
            self.report
                .knowledge_path
                .as_deref()
                .unwrap_or(DEFAULT_KNOWLEDGE_PATH),
        )
    }

    pub fn report_dir(&self) -> Result<PathBuf> {
        let dir = match &self.report.output_dir {
            Some(dir) => PathBuf::from(dir),
            None => {
                let data_root = dirs::data_local_dir().ok_or_else(|| {
                    anyhow!(
                        "cannot resolve data directory; set report.output_dir in the config file"
                    )
                })?;
                data_root.join(quadra_db::APP_NAME).join("reports")
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("create report directory {}", dir.display()))?;
        Ok(dir)
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# quadra config\n# Place this file at: {}\n\nversion = 1\n\n[storage]\n# Optional. Default is platform data dir (for example ~/.local/share/quadra/quadra.db)\n# db_path = \"/absolute/path/to/quadra.db\"\n\n[retry]\nmax_attempts = {}\nbackoff = \"{}\"\n\n[report]\nknowledge_path = \"{}\"\n# Optional. Default is platform data dir (for example ~/.local/share/quadra/reports)\n# output_dir = \"/absolute/path/to/reports\"\n",
            path.display(),
            DEFAULT_RETRY_ATTEMPTS,
            DEFAULT_RETRY_BACKOFF,
            DEFAULT_KNOWLEDGE_PATH,
        )
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid backoff duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid backoff duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid backoff duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 5s)")
}

#[cfg(test)]
mod tests {
    use super::{Config, parse_duration};
    use anyhow::Result;
    use quadra_db::RetryPolicy;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    fn write_config(content: &str) -> Result<(tempfile::TempDir, PathBuf)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        Ok((temp, path))
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[test]
    fn missing_config_uses_defaults() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let config = Config::load(&temp.path().join("missing.toml"))?;
        assert_eq!(config.version, 1);
        assert_eq!(config.retry_policy()?, RetryPolicy::default());
        assert!(config.knowledge_path().ends_with("disc_knowledge.md"));
        Ok(())
    }

    #[test]
    fn unversioned_config_is_rejected_with_actionable_message() -> Result<()> {
        let (_temp, path) = write_config("[storage]\ndb_path = \"/tmp/quadra.db\"\n")?;

        let error = Config::load(&path).expect_err("unversioned config should fail");
        let message = error.to_string();
        assert!(message.contains("version = 1"));
        assert!(message.contains("[storage], [retry], and [report]"));
        Ok(())
    }

    #[test]
    fn full_config_parses() -> Result<()> {
        let (_temp, path) = write_config(
            "version = 1\n[storage]\ndb_path = \"/tmp/quadra.db\"\n[retry]\nmax_attempts = 5\nbackoff = \"250ms\"\n[report]\nknowledge_path = \"notes/custom.md\"\n",
        )?;

        let config = Config::load(&path)?;
        assert_eq!(config.db_path()?, PathBuf::from("/tmp/quadra.db"));
        assert_eq!(
            config.retry_policy()?,
            RetryPolicy::new(5, Duration::from_millis(250))
        );
        assert_eq!(config.knowledge_path(), PathBuf::from("notes/custom.md"));
        Ok(())
    }

    #[test]
    fn malformed_config_returns_parse_error() -> Result<()> {
        let (_temp, path) = write_config("{{not toml")?;
        let error = Config::load(&path).expect_err("malformed config should fail");
        assert!(error.to_string().contains("parse TOML config"));
        Ok(())
    }

    #[test]
    fn unsupported_config_version_is_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 2\n")?;
        let error = Config::load(&path).expect_err("v2 config should fail");
        assert!(error.to_string().contains("unsupported config version 2"));
        Ok(())
    }

    #[test]
    fn default_path_honors_env_override() -> Result<()> {
        let _guard = env_lock();
        let temp = tempfile::tempdir()?;
        let override_path = temp.path().join("custom-config.toml");
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("QUADRA_CONFIG_PATH", &override_path);
        }
        let resolved = Config::default_path();
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("QUADRA_CONFIG_PATH");
        }
        assert_eq!(resolved?, override_path);
        Ok(())
    }

    #[test]
    fn default_path_uses_config_toml_suffix_when_no_env_override() -> Result<()> {
        let _guard = env_lock();
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("QUADRA_CONFIG_PATH");
        }
        let path = Config::default_path()?;
        assert!(path.ends_with("config.toml"));
        Ok(())
    }

    #[test]
    fn db_path_prefers_storage_config_over_env_override() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"/explicit/from-config.db\"\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("QUADRA_DB_PATH", "/from/env.db");
        }
        let config = Config::load(&path);
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("QUADRA_DB_PATH");
        }
        assert_eq!(config?.db_path()?, PathBuf::from("/explicit/from-config.db"));
        Ok(())
    }

    #[test]
    fn db_path_uses_env_override_when_storage_db_path_missing() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) = write_config("version = 1\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::set_var("QUADRA_DB_PATH", "/from/env-only.db");
        }
        let config = Config::load(&path);
        let resolved = config.and_then(|config| config.db_path());
        // SAFETY: test cleanup for process-local env mutation.
        unsafe {
            std::env::remove_var("QUADRA_DB_PATH");
        }
        assert_eq!(resolved?, PathBuf::from("/from/env-only.db"));
        Ok(())
    }

    #[test]
    fn db_path_defaults_to_quadra_db_when_unset() -> Result<()> {
        let _guard = env_lock();
        let (_temp, path) = write_config("version = 1\n")?;
        // SAFETY: test-only process-local env mutation.
        unsafe {
            std::env::remove_var("QUADRA_DB_PATH");
        }
        let config = Config::load(&path)?;
        let resolved = config.db_path()?;
        assert!(
            resolved.ends_with("quadra.db"),
            "got {}",
            resolved.display()
        );
        Ok(())
    }

    #[test]
    fn db_path_rejects_uri_style_storage_value() -> Result<()> {
        let (_temp, path) =
            write_config("version = 1\n[storage]\ndb_path = \"https://evil.example/quadra.db\"\n")?;
        let error = Config::load(&path).expect_err("URI db_path should fail validation");
        let message = error.to_string();
        assert!(
            message.contains("looks like a URI") || message.contains("filesystem path"),
            "unexpected message: {message}"
        );
        Ok(())
    }

    #[test]
    fn zero_retry_attempts_are_rejected() -> Result<()> {
        let (_temp, path) = write_config("version = 1\n[retry]\nmax_attempts = 0\n")?;
        let error = Config::load(&path).expect_err("zero attempts should fail");
        assert!(error.to_string().contains("must be at least 1"));
        Ok(())
    }

    #[test]
    fn zero_backoff_means_immediate_retry() -> Result<()> {
        let (_temp, path) =
            write_config("version = 1\n[retry]\nmax_attempts = 4\nbackoff = \"0ms\"\n")?;
        let config = Config::load(&path)?;
        assert_eq!(config.retry_policy()?, RetryPolicy::immediate(4));
        Ok(())
    }

    #[test]
    fn backoff_parses_ms_seconds_and_minutes() -> Result<()> {
        assert_eq!(parse_duration("500ms")?, Duration::from_millis(500));
        assert_eq!(parse_duration("5s")?, Duration::from_secs(5));
        assert_eq!(parse_duration("2m")?, Duration::from_secs(120));
        Ok(())
    }

    #[test]
    fn backoff_rejects_invalid_duration() {
        let error = parse_duration("oops").expect_err("invalid duration should fail");
        let message = error.to_string();
        assert!(
            message.contains("invalid duration") || message.contains("invalid backoff duration"),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn example_config_includes_required_sections() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        let example = Config::example_config(&path);
        assert!(example.contains("version = 1"));
        assert!(example.contains("[storage]"));
        assert!(example.contains("[retry]"));
        assert!(example.contains("[report]"));
        Ok(())
    }
}
