use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};

use crate::service::KillSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub credentials_file: Option<PathBuf>,
    /// Users granted every capability when running in dev mode.
    pub dev_admins: Vec<String>,
    pub kill: KillSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("CORRAL_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8081".to_string())
            .parse()
            .context("invalid CORRAL_LISTEN_ADDR")?;

        let log_level = lookup("CORRAL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let dev_mode = lookup("CORRAL_DEV")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let credentials_file = lookup("CORRAL_CREDENTIALS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let dev_admins = lookup("CORRAL_DEV_ADMINS")
            .unwrap_or_else(|| "root".to_string())
            .split(',')
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(String::from)
            .collect();

        let defaults = KillSettings::default();
        let kill = KillSettings {
            initial_backoff: millis(&lookup, "CORRAL_KILL_TASK_INITIAL_BACKOFF_MS")?
                .unwrap_or(defaults.initial_backoff),
            max_backoff: millis(&lookup, "CORRAL_KILL_TASK_MAX_BACKOFF_MS")?
                .unwrap_or(defaults.max_backoff),
            max_attempts: match lookup("CORRAL_KILL_TASK_MAX_ATTEMPTS") {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("invalid CORRAL_KILL_TASK_MAX_ATTEMPTS: {raw}"))?,
                None => defaults.max_attempts,
            },
        };

        if kill.initial_backoff.is_zero() {
            bail!("kill task initial backoff must be positive");
        }
        if kill.max_backoff < kill.initial_backoff {
            bail!(
                "kill task max backoff ({:?}) is below the initial backoff ({:?})",
                kill.max_backoff,
                kill.initial_backoff
            );
        }
        if kill.max_attempts == 0 {
            bail!("kill task max attempts must be positive");
        }

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            credentials_file,
            dev_admins,
            kill,
        })
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    lookup(key)
        .map(|raw| {
            raw.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("invalid {key}: {raw}"))
        })
        .transpose()
}
