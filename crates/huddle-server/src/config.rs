//! Server configuration, read from `HUDDLE_*` environment variables (a
//! `.env` file is loaded first if present).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} is still the placeholder value; pick a real secret")]
    Placeholder(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub blob_dir: PathBuf,
    /// Base URL clients reach the server at; used in invite links and file
    /// URLs.
    pub public_url: String,
    pub invite_ttl_days: u32,
    pub unfurl_timeout: Duration,
}

const PLACEHOLDER_SECRETS: &[&str] = &["", "dev-secret-change-me", "change-me", "secret"];

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = get("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&get, "HUDDLE_PORT", 3000)?;
        let addr = format!("{host}:{port}").parse().map_err(|_| ConfigError::Invalid {
            name: "HUDDLE_HOST",
            value: host.clone(),
        })?;

        let jwt_secret = get("HUDDLE_JWT_SECRET").ok_or(ConfigError::Missing("HUDDLE_JWT_SECRET"))?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            return Err(ConfigError::Placeholder("HUDDLE_JWT_SECRET"));
        }

        let public_url = get("HUDDLE_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let invite_ttl_days: u32 = parse(&get, "HUDDLE_INVITE_TTL_DAYS", 7)?;
        if invite_ttl_days == 0 {
            return Err(ConfigError::Invalid {
                name: "HUDDLE_INVITE_TTL_DAYS",
                value: "0".into(),
            });
        }

        Ok(Self {
            addr,
            db_path: get("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into()).into(),
            jwt_secret,
            blob_dir: get("HUDDLE_BLOB_DIR").unwrap_or_else(|| "./blobs".into()).into(),
            public_url,
            invite_ttl_days,
            unfurl_timeout: Duration::from_secs(parse(&get, "HUDDLE_UNFURL_TIMEOUT_SECS", 5)?),
        })
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}
