use crate::cache::SnapshotCache;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::nse::client::NseClient;
use crate::signal::levels::ChainLevels;
use crate::signal::{Recommendation, SignalResult, Snapshot};
use portable_atomic::{AtomicU64, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

// ── Messages INTO the engine (bounded channel) ──

#[derive(Debug, Clone)]
pub enum EngineEvent {
    ChainSnapshot {
        symbol: String,
        snapshot: Arc<Snapshot>,
        fetched_at: String,
    },
    FetchFailed {
        symbol: String,
        error: String,
    },
}

// ── Per-symbol view served to the dashboard ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolView {
    pub symbol: String,
    pub expiry: String,
    pub expiries: Vec<String>,
    pub underlying: Option<f64>,
    pub pcr: Option<f64>,
    pub recommendation: Recommendation,
    pub signal: SignalResult,
    #[serde(flatten)]
    pub levels: ChainLevels,
    pub updated_at: String,
}

impl SymbolView {
    pub fn new(
        symbol: &str,
        snapshot: &Snapshot,
        signal: SignalResult,
        levels: ChainLevels,
        updated_at: String,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            expiry: signal.selected_expiry.clone(),
            expiries: snapshot.expiries.clone(),
            underlying: snapshot.underlying_value,
            pcr: signal.put_call_ratio,
            recommendation: signal.recommendation,
            signal,
            levels,
            updated_at,
        }
    }
}

// ── Messages OUT of the engine ──

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "signal_update")]
    SignalUpdate(Box<SymbolView>),

    #[serde(rename = "feed_error")]
    FeedError {
        symbol: String,
        error: String,
        timestamp: String,
    },
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertSignal {
        id: String,
        symbol: String,
        timestamp: String,
        expiry: String,
        underlying: Option<f64>,
        total_call_oi: i64,
        total_put_oi: i64,
        pcr: Option<f64>,
        near_pcr: Option<f64>,
        trend: String,
        momentum: String,
        recommendation: String,
    },
}

impl DbCommand {
    pub fn from_view(view: &SymbolView) -> Self {
        let s = &view.signal;
        DbCommand::InsertSignal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: view.symbol.clone(),
            timestamp: view.updated_at.clone(),
            expiry: s.selected_expiry.clone(),
            underlying: view.underlying,
            total_call_oi: i64::try_from(s.total_call_oi).unwrap_or(i64::MAX),
            total_put_oi: i64::try_from(s.total_put_oi).unwrap_or(i64::MAX),
            pcr: s.put_call_ratio,
            near_pcr: s.near_window_put_call_ratio,
            trend: s.trend.to_string(),
            momentum: s.momentum.to_string(),
            recommendation: s.recommendation.to_string(),
        }
    }
}

// ── Dashboard snapshot (sent via watch channel) ──

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DashboardState {
    pub symbols: BTreeMap<String, SymbolView>,
    pub last_errors: BTreeMap<String, String>,
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub snapshots_received: AtomicU64,
    pub signals_computed: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub signal_errors: AtomicU64,
    pub cache_hits: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            snapshots_received: AtomicU64::new(0),
            signals_computed: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            signal_errors: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub client: NseClient,
    pub cache: SnapshotCache,

    // Engine -> Dashboard: latest per-symbol views
    pub snapshot_tx: watch::Sender<DashboardState>,
    pub snapshot_rx: watch::Receiver<DashboardState>,

    // Engine -> Dashboard: event stream for WS clients
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Engine -> DB Writer
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        client: NseClient,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(DashboardState::default());
        let cache = SnapshotCache::new(config.cache_ttl_secs);

        Arc::new(Self {
            config,
            db,
            client,
            cache,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
