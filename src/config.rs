#![forbid(unsafe_code)]

//! Process-level configuration. The operator-editable backend settings live
//! in the database (see [`crate::model::Settings`]); this module only covers
//! knobs that are fixed for the lifetime of the process.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DATABASE: &str = "channel_dvr.db";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 60;
pub const DEFAULT_CHANNEL_DELAY_SECS: u64 = 2;
pub const DEFAULT_FEED_URL: &str = "https://www.youtube.com/feeds/videos.xml";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_YTDLP: &str = "yt-dlp";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    pub check_interval: Duration,
    pub initial_delay: Duration,
    pub channel_delay: Duration,
    pub feed_url: String,
    pub fetch_timeout: Duration,
    pub backend_timeout: Duration,
    pub resolve_timeout: Duration,
    pub ytdlp: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub database: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_config(&file_vars, env_var_string, overrides))
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeConfig {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let secs = |key: &str, default: u64| {
        Duration::from_secs(
            lookup(key)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(default),
        )
    };

    let database = overrides
        .database
        .or_else(|| lookup("DVR_DATABASE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("DVR_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("DVR_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);

    RuntimeConfig {
        database,
        host,
        port,
        check_interval: secs("DVR_CHECK_INTERVAL_SECS", DEFAULT_CHECK_INTERVAL_SECS),
        initial_delay: secs("DVR_INITIAL_DELAY_SECS", DEFAULT_INITIAL_DELAY_SECS),
        channel_delay: secs("DVR_CHANNEL_DELAY_SECS", DEFAULT_CHANNEL_DELAY_SECS),
        feed_url: lookup("DVR_FEED_URL").unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
        fetch_timeout: secs("DVR_FETCH_TIMEOUT_SECS", DEFAULT_FETCH_TIMEOUT_SECS),
        backend_timeout: secs("DVR_BACKEND_TIMEOUT_SECS", DEFAULT_BACKEND_TIMEOUT_SECS),
        resolve_timeout: secs("DVR_RESOLVE_TIMEOUT_SECS", DEFAULT_RESOLVE_TIMEOUT_SECS),
        ytdlp: lookup("DVR_YTDLP")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP)),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

/// Parses a dotenv-style file. Unknown syntax is skipped rather than
/// rejected so a hand-edited file never prevents startup.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default())
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let config = config_from("");
        assert_eq!(config.database, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.check_interval, Duration::from_secs(1800));
        assert_eq!(config.initial_delay, Duration::from_secs(60));
        assert_eq!(config.channel_delay, Duration::from_secs(2));
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.ytdlp, PathBuf::from("yt-dlp"));
    }

    #[test]
    fn file_values_are_used() {
        let config = config_from(
            "DVR_DATABASE=\"/var/lib/dvr.db\"\nDVR_PORT=\"4242\"\nDVR_CHECK_INTERVAL_SECS=600\n",
        );
        assert_eq!(config.database, PathBuf::from("/var/lib/dvr.db"));
        assert_eq!(config.port, 4242);
        assert_eq!(config.check_interval, Duration::from_secs(600));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from("DVR_PORT=\"nope\"\nDVR_CHANNEL_DELAY_SECS=soon\n");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.channel_delay, Duration::from_secs(2));
    }

    #[test]
    fn env_wins_over_file_and_overrides_win_over_env() {
        let vars = read_env_file(
            make_config("DVR_DATABASE=\"/file.db\"\nDVR_HOST=\"file-host\"\nDVR_PORT=7000\n")
                .path(),
        )
        .unwrap();

        let config = build_runtime_config(
            &vars,
            |key| match key {
                "DVR_DATABASE" => Some("/env.db".to_string()),
                "DVR_PORT" => Some("8000".to_string()),
                _ => None,
            },
            RuntimeOverrides {
                port: Some(9000),
                ..RuntimeOverrides::default()
            },
        );

        assert_eq!(config.database, PathBuf::from("/env.db"));
        assert_eq!(config.host, "file-host");
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let config = build_runtime_config(
            &HashMap::new(),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export DVR_DATABASE="/data/dvr.db"
            DVR_FEED_URL='http://127.0.0.1:9/feed'
            DVR_HOST =  "0.0.0.0"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DVR_DATABASE").unwrap(), "/data/dvr.db");
        assert_eq!(vars.get("DVR_FEED_URL").unwrap(), "http://127.0.0.1:9/feed");
        assert_eq!(vars.get("DVR_HOST").unwrap(), "0.0.0.0");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
