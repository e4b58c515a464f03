use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capabilities::Host;
use crate::notices::DEFAULT_NOTICE_TTL_SECS;

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Engine settings resolved from `FRAMELOOM_*` variables. The CLI layers
/// its flags on top.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Studio API; `None` runs against the offline dryrun studio.
    pub api_base: Option<String>,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub notice_ttl: Duration,
    pub state_path: PathBuf,
    pub events_path: Option<PathBuf>,
    pub export_dir: PathBuf,
    pub host: Host,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub video_model: Option<String>,
    /// Re-fetch the project after every batch.
    pub refresh_after_batch: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let home = frameloom_home();
        Self {
            api_base: None,
            api_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            notice_ttl: Duration::from_secs(DEFAULT_NOTICE_TTL_SECS as u64),
            state_path: home.join("state.json"),
            events_path: None,
            export_dir: home.join("exports"),
            host: Host::Desktop,
            text_model: None,
            image_model: None,
            video_model: None,
            refresh_after_batch: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    /// Resolve from any variable source; unset and blank values keep the
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        config.api_base = lookup("FRAMELOOM_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string());
        config.api_token = lookup("FRAMELOOM_API_TOKEN");
        if let Some(raw) = lookup("FRAMELOOM_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_secs("FRAMELOOM_TIMEOUT_SECS", &raw)?);
        }
        if let Some(raw) = lookup("FRAMELOOM_NOTICE_TTL_SECS") {
            config.notice_ttl =
                Duration::from_secs(parse_secs("FRAMELOOM_NOTICE_TTL_SECS", &raw)?);
        }
        if let Some(path) = lookup("FRAMELOOM_STATE_PATH") {
            config.state_path = PathBuf::from(path);
        }
        config.events_path = lookup("FRAMELOOM_EVENTS_PATH").map(PathBuf::from);
        if let Some(path) = lookup("FRAMELOOM_EXPORT_DIR") {
            config.export_dir = PathBuf::from(path);
        }
        if let Some(host) = lookup("FRAMELOOM_HOST") {
            config.host = host.parse()?;
        }
        config.text_model = lookup("FRAMELOOM_TEXT_MODEL");
        config.image_model = lookup("FRAMELOOM_IMAGE_MODEL");
        config.video_model = lookup("FRAMELOOM_VIDEO_MODEL");
        if let Some(raw) = lookup("FRAMELOOM_REFRESH_AFTER_BATCH") {
            config.refresh_after_batch = !matches!(
                raw.to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }
        Ok(config)
    }

    pub fn chrono_notice_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.notice_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_NOTICE_TTL_SECS))
    }
}

/// Seed the process environment from a `.env` file. Variables already
/// set win. Returns how many were applied; a missing file applies none.
pub fn load_dotenv(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut applied = 0;
    for (key, value) in parse_dotenv(&content) {
        if env::var_os(&key).is_some() {
            continue;
        }
        env::set_var(&key, value);
        applied += 1;
    }
    tracing::debug!(path = %path.display(), applied, "dotenv loaded");
    Ok(applied)
}

pub fn parse_dotenv(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let unquoted = ['"', '\'']
            .iter()
            .find_map(|quote| {
                value
                    .strip_prefix(*quote)
                    .and_then(|rest| rest.strip_suffix(*quote))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), unquoted.to_string());
    }
    vars
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'"))
}

fn frameloom_home() -> PathBuf {
    non_empty_env("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".frameloom")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn defaults_run_offline_on_desktop() -> Result<()> {
        let config = EngineConfig::from_lookup(|_| None)?;
        assert_eq!(config.api_base, None);
        assert_eq!(config.host, Host::Desktop);
        assert_eq!(config.notice_ttl, Duration::from_secs(5));
        assert!(config.refresh_after_batch);
        assert!(config.state_path.ends_with(".frameloom/state.json"));
        Ok(())
    }

    #[test]
    fn variables_override_defaults() -> Result<()> {
        let pairs = [
            ("FRAMELOOM_API_BASE", "https://studio.example/"),
            ("FRAMELOOM_TIMEOUT_SECS", "30"),
            ("FRAMELOOM_NOTICE_TTL_SECS", "9"),
            ("FRAMELOOM_HOST", "browser"),
            ("FRAMELOOM_IMAGE_MODEL", "flux-pro"),
            ("FRAMELOOM_REFRESH_AFTER_BATCH", "off"),
            ("FRAMELOOM_EVENTS_PATH", "/tmp/events.jsonl"),
        ];
        let config = EngineConfig::from_lookup(lookup(&pairs))?;
        assert_eq!(config.api_base.as_deref(), Some("https://studio.example"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.chrono_notice_ttl(), chrono::Duration::seconds(9));
        assert_eq!(config.host, Host::Browser);
        assert_eq!(config.image_model.as_deref(), Some("flux-pro"));
        assert!(!config.refresh_after_batch);
        assert_eq!(config.events_path, Some(PathBuf::from("/tmp/events.jsonl")));
        Ok(())
    }

    #[test]
    fn bad_numbers_are_reported() {
        let pairs = [("FRAMELOOM_TIMEOUT_SECS", "soon")];
        let err = EngineConfig::from_lookup(lookup(&pairs))
            .err()
            .map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("FRAMELOOM_TIMEOUT_SECS must be a whole number of seconds, got 'soon'")
        );
    }

    #[test]
    fn dotenv_parsing_handles_exports_quotes_and_comments() {
        let vars = parse_dotenv(
            "# studio\nexport FRAMELOOM_API_BASE=\"https://studio.example\"\nFRAMELOOM_HOST='web'\n=skipped\nnot a pair\nFRAMELOOM_TEXT_MODEL = gpt-4o\n",
        );
        assert_eq!(vars.len(), 3);
        assert_eq!(vars["FRAMELOOM_API_BASE"], "https://studio.example");
        assert_eq!(vars["FRAMELOOM_HOST"], "web");
        assert_eq!(vars["FRAMELOOM_TEXT_MODEL"], "gpt-4o");
    }

    #[test]
    fn missing_dotenv_applies_nothing() -> Result<()> {
        let temp = tempfile::tempdir()?;
        assert_eq!(load_dotenv(&temp.path().join(".env"))?, 0);
        Ok(())
    }
}
