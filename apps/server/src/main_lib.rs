use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::{Config, QuoteProviderKind},
    ledger_file::LedgerFile,
};
use stockfolio_core::{
    portfolio::{PortfolioFeed, PortfolioSnapshot, PortfolioView},
    quotes::{JsonFileSnapshotStore, QuoteCache, RefreshScheduler},
    settings::RefreshSettingsHandle,
    transactions::{InMemoryLedgerRepository, LedgerRepositoryTrait},
};
use stockfolio_market_data::{
    FetchPolicy, QuoteSource, TradingSession, TwseProvider, YahooProvider,
};
use tokio::sync::watch;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub struct AppState {
    pub ledger: Arc<dyn LedgerRepositoryTrait>,
    pub ledger_file: Arc<LedgerFile>,
    pub scheduler: Arc<RefreshScheduler>,
    pub view: Arc<PortfolioView>,
    pub settings: RefreshSettingsHandle,
    /// Latest pushed portfolio snapshot; cloned per SSE subscriber
    pub portfolio_feed: watch::Receiver<Arc<PortfolioSnapshot>>,
}

impl AppState {
    pub fn quotes(&self) -> &QuoteCache {
        self.scheduler.cache()
    }
}

pub fn init_tracing() {
    let log_format = std::env::var("SF_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

fn build_quote_source(config: &Config) -> anyhow::Result<Arc<dyn QuoteSource>> {
    let policy = FetchPolicy::new(config.fetch_concurrency, config.fetch_timeout);
    let source: Arc<dyn QuoteSource> = match config.quote_provider {
        QuoteProviderKind::Twse => Arc::new(TwseProvider::new(policy)?),
        QuoteProviderKind::Yahoo => match &config.yahoo_symbol_suffix {
            // Taiwan listings (.TW, .TWO) trade on the TWSE clock
            Some(suffix) if suffix.to_ascii_uppercase().starts_with(".TW") => Arc::new(
                YahooProvider::with_session(TradingSession::twse(), policy)?
                    .with_symbol_suffix(suffix.clone()),
            ),
            Some(suffix) => Arc::new(YahooProvider::new(policy)?.with_symbol_suffix(suffix.clone())),
            None => Arc::new(YahooProvider::new(policy)?),
        },
    };
    tracing::info!("Quote source: {}", source.id());
    Ok(source)
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let source = build_quote_source(config)?;
    build_state_with_source(config, source).await
}

/// Wires the services around an explicit quote source.
pub async fn build_state_with_source(
    config: &Config,
    source: Arc<dyn QuoteSource>,
) -> anyhow::Result<Arc<AppState>> {
    tokio::fs::create_dir_all(&config.data_dir).await?;
    tracing::info!("Data directory in use: {}", config.data_dir.display());

    let ledger: Arc<dyn LedgerRepositoryTrait> = Arc::new(InMemoryLedgerRepository::new());
    let ledger_file = Arc::new(LedgerFile::new(config.ledger_path(), ledger.clone()));
    let load = ledger_file.load().await?;
    if let Some(backup) = &load.backup {
        tracing::warn!(
            "{} ledger row(s) could not be read; the original file is kept at {}",
            load.skipped.len(),
            backup.display()
        );
    }
    // Subscribe after the initial load so it does not trigger a rewrite
    ledger_file.spawn_writer();

    let cache = QuoteCache::new();
    let store = Arc::new(JsonFileSnapshotStore::new(config.snapshot_path()));
    let settings = RefreshSettingsHandle::new(config.refresh);
    let scheduler = Arc::new(RefreshScheduler::new(
        source,
        ledger.clone(),
        cache.clone(),
        store,
        settings.clone(),
    ));
    scheduler.restore_snapshot().await;
    log_settings_changes(&settings);

    let view = Arc::new(PortfolioView::new(ledger.clone(), cache));
    let PortfolioFeed { receiver, .. } = view.spawn_publisher();

    Ok(Arc::new(AppState {
        ledger,
        ledger_file,
        scheduler,
        view,
        settings,
        portfolio_feed: receiver,
    }))
}

fn log_settings_changes(settings: &RefreshSettingsHandle) {
    let mut rx = settings.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            tracing::info!(
                "Refresh interval now {:?}, persisting every {} fetches",
                Duration::from_secs(current.interval_secs),
                current.persist_batch_size
            );
        }
    });
}
