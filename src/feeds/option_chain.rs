use crate::errors::EngineResult;
use crate::signal::Snapshot;
use crate::state::{AppState, EngineEvent};
use portable_atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Returns the snapshot for `symbol` in the current cache bucket, fetching and
/// decoding it from NSE on a miss.
pub async fn fetch_snapshot(state: &AppState, symbol: &str) -> EngineResult<Arc<Snapshot>> {
    let now = chrono::Utc::now().timestamp();
    if let Some(hit) = state.cache.get(symbol, now) {
        state.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok(hit);
    }

    let chain = state.client.fetch_option_chain(symbol).await?;
    let snapshot = chain.into_snapshot(state.config.fallback_for(symbol));

    tracing::debug!(
        symbol = %symbol,
        expiries = snapshot.expiries.len(),
        records = snapshot.records.len(),
        underlying = ?snapshot.underlying_value,
        "option chain decoded"
    );

    Ok(state.cache.insert(symbol, now, snapshot))
}

/// Per-symbol poll bookkeeping: what was last delivered and how many fetches
/// in a row have failed.
#[derive(Default)]
struct FeedCursor {
    last_sent: Option<Arc<Snapshot>>,
    consecutive_errors: u32,
}

impl FeedCursor {
    /// Event for one poll result. `None` when the snapshot is the cached one
    /// already delivered.
    fn next_event(&mut self, symbol: &str, fetched: EngineResult<Arc<Snapshot>>) -> Option<EngineEvent> {
        match fetched {
            Ok(snapshot) => {
                self.consecutive_errors = 0;
                if self.last_sent.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, &snapshot)) {
                    return None;
                }
                self.last_sent = Some(Arc::clone(&snapshot));
                Some(EngineEvent::ChainSnapshot {
                    symbol: symbol.to_string(),
                    snapshot,
                    fetched_at: chrono::Utc::now().to_rfc3339(),
                })
            }
            Err(e) => {
                self.consecutive_errors += 1;
                tracing::warn!(
                    symbol = %symbol,
                    error = %e,
                    consecutive = self.consecutive_errors,
                    "option chain fetch failed"
                );
                Some(EngineEvent::FetchFailed {
                    symbol: symbol.to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    /// Extra pause after repeated failures (cap at 5 min).
    fn backoff(&self) -> Option<Duration> {
        (self.consecutive_errors > 3)
            .then(|| Duration::from_secs(std::cmp::min(self.consecutive_errors as u64 * 15, 300)))
    }
}

/// Polls the option chain for one symbol at the configured interval.
/// Sends ChainSnapshot / FetchFailed events to the engine via bounded channel.
pub async fn run_chain_feed(state: Arc<AppState>, symbol: String, engine_tx: mpsc::Sender<EngineEvent>) {
    tracing::info!(symbol = %symbol, "option chain feed started");

    let mut interval = tokio::time::interval(Duration::from_secs(state.config.poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cursor = FeedCursor::default();

    loop {
        interval.tick().await;

        let fetched = fetch_snapshot(&state, &symbol).await;
        if fetched.is_err() {
            state.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
        }
        let Some(event) = cursor.next_event(&symbol, fetched) else {
            continue;
        };

        if engine_tx.send(event).await.is_err() {
            tracing::error!(symbol = %symbol, "engine channel closed, chain feed shutting down");
            return;
        }

        if let Some(pause) = cursor.backoff() {
            tokio::time::sleep(pause).await;
        }
    }
}
