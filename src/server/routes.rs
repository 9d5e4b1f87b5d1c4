use crate::db;
use crate::feeds::option_chain;
use crate::signal::levels::ChainLevels;
use crate::signal::{self, Momentum};
use crate::state::{AppState, DashboardState, SymbolView};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use std::sync::Arc;

#[derive(serde::Deserialize)]
pub struct DataQuery {
    pub symbol: Option<String>,
    pub expiry: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub symbol: String,
    pub limit: Option<usize>,
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn api_error(status: StatusCode, msg: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": msg.to_string() })))
}

/// GET /api/data?symbol=NIFTY[&expiry=...] -- one symbol's view.
///
/// Polled symbols on their default expiry come straight from the watch channel.
/// Anything else is computed here from the cached snapshot. Price history lives
/// in the engine task, so momentum is the symbol's last published reading, or
/// neutral for symbols that are not polled.
pub async fn get_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DataQuery>,
) -> ApiResult {
    let symbol = params
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| state.config.symbols.first().map(String::as_str))
        .map(str::to_ascii_uppercase)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "symbol required"))?;

    if params.expiry.is_none() {
        let current = state.snapshot_rx.borrow().symbols.get(&symbol).cloned();
        if let Some(view) = current {
            return Ok(Json(serde_json::json!(view)));
        }
    }

    let snapshot = option_chain::fetch_snapshot(&state, &symbol)
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e))?;

    let momentum = state
        .snapshot_rx
        .borrow()
        .symbols
        .get(&symbol)
        .map(|v| v.signal.momentum)
        .unwrap_or(Momentum::Neutral);

    let result = signal::evaluate(
        &snapshot,
        params.expiry.as_deref(),
        &state.config.signal_params(),
        momentum,
    )
    .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))?;

    let levels = ChainLevels::derive(
        &snapshot,
        &result.selected_expiry,
        state.config.near_window_points,
        state.config.top_levels,
    );
    let view = SymbolView::new(&symbol, &snapshot, result, levels, chrono::Utc::now().to_rfc3339());
    Ok(Json(serde_json::json!(view)))
}

/// GET /api/state -- every polled symbol (from watch channel, no lock)
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<DashboardState> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

/// GET /api/history?symbol=NIFTY&limit=100 -- logged signals (cold path)
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> ApiResult {
    let limit = params.limit.unwrap_or(100).min(2000);
    let symbol = params.symbol.to_ascii_uppercase();
    let rows = db::get_recent_signals(&state.db, &symbol, limit)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(serde_json::json!({ "symbol": symbol, "signals": rows })))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    Json(serde_json::json!({
        "snapshots_received": state.counters.snapshots_received.load(Relaxed),
        "signals_computed": state.counters.signals_computed.load(Relaxed),
        "fetch_errors": state.counters.fetch_errors.load(Relaxed),
        "signal_errors": state.counters.signal_errors.load(Relaxed),
        "cache_hits": state.counters.cache_hits.load(Relaxed),
        "cache_entries": state.cache.len(),
        "ws_messages_sent": state.counters.ws_messages_sent.load(Relaxed),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::tests::record;
    use crate::signal::{SignalParams, Snapshot};
    use crate::state::tests::offline_state;
    use crate::state::DbCommand;

    fn two_expiry_chain() -> Snapshot {
        Snapshot {
            underlying_value: Some(22_000.0),
            underlying_is_fallback: false,
            expiries: vec!["E1".into(), "E2".into()],
            records: vec![
                record(22_000.0, "E1", 500, 100),
                record(22_000.0, "E2", 100, 300),
                record(22_100.0, "E2", 100, 50),
            ],
        }
    }

    fn seeded_state() -> (Arc<AppState>, tokio::sync::mpsc::Receiver<DbCommand>) {
        let mut cfg = crate::config::tests::base();
        cfg.cache_ttl_secs = 1_000_000_000;
        let (state, db_rx) = offline_state(cfg);
        let now = chrono::Utc::now().timestamp();
        state.cache.insert("NIFTY", now, two_expiry_chain());
        state.cache.insert(
            "TCS",
            now,
            Snapshot {
                underlying_value: Some(4_000.0),
                underlying_is_fallback: false,
                expiries: vec![],
                records: vec![],
            },
        );
        (state, db_rx)
    }

    fn publish(state: &AppState, momentum: Momentum) {
        let chain = two_expiry_chain();
        let result = signal::evaluate(&chain, None, &SignalParams::default(), momentum).unwrap();
        let levels = ChainLevels::derive(&chain, &result.selected_expiry, 200.0, 3);
        let view = SymbolView::new("NIFTY", &chain, result, levels, "t0".into());
        state.snapshot_tx.send_modify(|dash| {
            dash.symbols.insert("NIFTY".into(), view);
        });
    }

    fn query(symbol: Option<&str>, expiry: Option<&str>) -> Query<DataQuery> {
        Query(DataQuery {
            symbol: symbol.map(String::from),
            expiry: expiry.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_data_requested_expiry_uses_published_momentum() {
        let (state, _db_rx) = seeded_state();
        publish(&state, Momentum::Bullish);

        let Json(body) = get_data(State(state.clone()), query(Some("nifty"), Some("E2")))
            .await
            .unwrap();
        assert_eq!(body["symbol"], "NIFTY");
        assert_eq!(body["expiry"], "E2");
        assert_eq!(body["pcr"], 1.75);
        assert_eq!(body["signal"]["momentum"], "BULLISH");
        assert_eq!(body["recommendation"], "BUY_CALL");
        assert_eq!(body["strikesWindow"].as_array().map(Vec::len), Some(2));
        assert_eq!(state.counters.cache_hits.load(portable_atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_data_default_expiry_returns_published_view() {
        let (state, _db_rx) = seeded_state();
        publish(&state, Momentum::Bearish);

        let Json(body) = get_data(State(state.clone()), query(None, None)).await.unwrap();
        assert_eq!(body["expiry"], "E1");
        assert_eq!(body["updatedAt"], "t0");
        assert_eq!(body["signal"]["momentum"], "BEARISH");
        assert_eq!(state.counters.cache_hits.load(portable_atomic::Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_data_unpolled_symbol_is_neutral() {
        let (state, _db_rx) = seeded_state();
        let mut chain = two_expiry_chain();
        chain.records.truncate(1);
        state.cache.insert("BANKNIFTY", chrono::Utc::now().timestamp(), chain);

        let Json(body) = get_data(State(state), query(Some("BANKNIFTY"), None)).await.unwrap();
        assert_eq!(body["expiry"], "E1");
        assert_eq!(body["pcr"], 0.2);
        assert_eq!(body["signal"]["momentum"], "NEUTRAL");
        assert_eq!(body["recommendation"], "SIDEWAYS");
    }

    #[tokio::test]
    async fn test_data_error_statuses() {
        let (state, _db_rx) = seeded_state();
        let status = |r: ApiResult| r.err().map(|(status, _)| status);

        let empty = get_data(State(state.clone()), query(Some("TCS"), None)).await;
        assert_eq!(status(empty), Some(StatusCode::UNPROCESSABLE_ENTITY));

        let unreachable = get_data(State(state.clone()), query(Some("FINNIFTY"), None)).await;
        assert_eq!(status(unreachable), Some(StatusCode::BAD_GATEWAY));

        let mut cfg = crate::config::tests::base();
        cfg.symbols.clear();
        let (bare, _bare_rx) = offline_state(cfg);
        let missing = get_data(State(bare), query(Some("  "), None)).await;
        assert_eq!(status(missing), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn test_history_database_failure_is_500() {
        let (state, _db_rx) = seeded_state();
        let ok = get_history(
            State(state.clone()),
            Query(HistoryQuery { symbol: "nifty".into(), limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(ok.0["symbol"], "NIFTY");
        assert_eq!(ok.0["signals"].as_array().map(Vec::len), Some(0));

        state.db.lock().unwrap().execute_batch("DROP TABLE signals").unwrap();
        let err = get_history(
            State(state.clone()),
            Query(HistoryQuery { symbol: "NIFTY".into(), limit: Some(5) }),
        )
        .await;
        assert_eq!(err.err().map(|(status, _)| status), Some(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
