use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use reqwest::Url;

use crate::{errors::Error, welcome::DEFAULT_SITE_URL, Result};

/// Typed configuration read from the process environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub titorelli_host: Url,
    pub client_id: String,
    pub access_token: String,

    // Titorelli services
    pub cas_origin: Url,
    pub model_origin: Url,

    // Transmitter
    pub transmitter_enabled: bool,
    pub transmitter_origin: Option<Url>,

    // Behavior flags
    pub dry_run: bool,
    pub site_url: String,
    pub static_dir: PathBuf,

    // Timings
    pub liveness_interval: Duration,
    pub liveness_backoff: Duration,
    pub startup_timeout: Duration,
    pub update_retention: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).and_then(non_empty);
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                Error::Config(format!("{key} environment variable must be provided"))
            })
        };

        let bot_token = required("BOT_TOKEN")?;
        let titorelli_host = parse_url("TITORELLI_HOST", &required("TITORELLI_HOST")?)?;
        let client_id = required("TITORELLI_CLIENT_ID")?;
        let access_token = required("TITORELLI_ACCESS_TOKEN")?;

        let cas_origin = match var("CAS_ORIGIN") {
            Some(v) => parse_url("CAS_ORIGIN", &v)?,
            None => titorelli_host.clone(),
        };
        let model_origin = match var("MODEL_ORIGIN") {
            Some(v) => parse_url("MODEL_ORIGIN", &v)?,
            None => titorelli_host.clone(),
        };

        let transmitter_enabled = var("FEAT_TRANSMITTER")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);
        let transmitter_origin = var("TRANSMITTER_ORIGIN")
            .map(|v| parse_url("TRANSMITTER_ORIGIN", &v))
            .transpose()?;
        if let Some(origin) = &transmitter_origin {
            if !matches!(origin.scheme(), "ws" | "wss") {
                return Err(Error::Config(format!(
                    "TRANSMITTER_ORIGIN must be a ws:// or wss:// URL, got {origin}"
                )));
            }
        }
        if transmitter_enabled && transmitter_origin.is_none() {
            return Err(Error::Config(
                "TRANSMITTER_ORIGIN is required when FEAT_TRANSMITTER is enabled".to_string(),
            ));
        }

        let dry_run = var("DRY_RUN").map(|v| parse_bool(&v)).unwrap_or(false);
        let site_url = var("SITE_URL").unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let static_dir = PathBuf::from(var("STATIC_DIR").unwrap_or_else(|| "static".to_string()));

        let millis = |key: &str, default: u64| -> Result<Duration> {
            let Some(raw) = var(key) else {
                return Ok(Duration::from_millis(default));
            };
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
                _ => Err(Error::Config(format!(
                    "{key} must be a positive number of milliseconds, got {raw:?}"
                ))),
            }
        };

        Ok(Self {
            bot_token,
            titorelli_host,
            client_id,
            access_token,
            cas_origin,
            model_origin,
            transmitter_enabled,
            transmitter_origin,
            dry_run,
            site_url,
            static_dir,
            liveness_interval: millis("LIVENESS_INTERVAL_MS", 20_000)?,
            liveness_backoff: millis("LIVENESS_BACKOFF_MS", 60_000)?,
            startup_timeout: millis("STARTUP_TIMEOUT_MS", 12_000)?,
            update_retention: millis("UPDATE_RETENTION_MS", 3_600_000)?,
        })
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url> {
    Url::parse(raw.trim()).map_err(|e| Error::Config(format!("{key} is not a valid URL: {e}")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
