use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use stockfolio_core::constants::{DEFAULT_PERSIST_BATCH_SIZE, DEFAULT_REFRESH_INTERVAL_SECS};
use stockfolio_core::settings::RefreshSettings;

/// Which market the quote source talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteProviderKind {
    Twse,
    Yahoo,
}

impl FromStr for QuoteProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "twse" => Ok(Self::Twse),
            "yahoo" => Ok(Self::Yahoo),
            other => Err(anyhow!("Unknown quote provider '{}'", other)),
        }
    }
}

pub struct Config {
    pub listen_addr: SocketAddr,
    /// Holds `ledger.csv` and `quotes.json`
    pub data_dir: PathBuf,
    pub quote_provider: QuoteProviderKind,
    /// Appended to codes for Yahoo lookups, e.g. `.TW`
    pub yahoo_symbol_suffix: Option<String>,
    pub refresh: RefreshSettings,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub cors_allow: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let listen_addr: SocketAddr = env_or("SF_LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .context("Invalid SF_LISTEN_ADDR")?;
        let data_dir = PathBuf::from(env_or("SF_DATA_DIR", "./data"));
        let quote_provider: QuoteProviderKind = env_or("SF_QUOTE_PROVIDER", "twse").parse()?;
        let yahoo_symbol_suffix = std::env::var("SF_YAHOO_SYMBOL_SUFFIX")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let refresh = RefreshSettings {
            interval_secs: env_parse("SF_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS),
            persist_batch_size: env_parse("SF_PERSIST_BATCH_SIZE", DEFAULT_PERSIST_BATCH_SIZE),
        };
        refresh
            .validate()
            .map_err(|e| anyhow!("Invalid refresh settings: {}", e))?;
        let cors_allow = env_or("SF_CORS_ALLOW_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            listen_addr,
            data_dir,
            quote_provider,
            yahoo_symbol_suffix,
            refresh,
            fetch_timeout: Duration::from_millis(env_parse("SF_FETCH_TIMEOUT_MS", 5000)),
            fetch_concurrency: env_parse("SF_FETCH_CONCURRENCY", 8),
            cors_allow,
        })
    }

    /// Local defaults rooted at `data_dir`, without reading the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: data_dir.into(),
            quote_provider: QuoteProviderKind::Twse,
            yahoo_symbol_suffix: None,
            refresh: RefreshSettings::default(),
            fetch_timeout: Duration::from_secs(5),
            fetch_concurrency: 8,
            cors_allow: vec!["*".to_string()],
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.csv")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("quotes.json")
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Falls back to `default` when the variable is unset or unparseable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
