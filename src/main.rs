mod cache;
mod config;
mod db;
mod engine;
mod errors;
mod feeds;
mod nse;
mod server;
mod signal;
mod state;

use crate::engine::SignalEngine;
use crate::state::*;
use portable_atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("pcr_pulse starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        symbols = ?cfg.symbols,
        poll_secs = cfg.poll_interval_secs,
        bullish = cfg.bullish_pcr_threshold,
        bearish = cfg.bearish_pcr_threshold,
        "config loaded"
    );

    // Init database
    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Create bounded channels
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(128);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(512);

    let nse_client = nse::client::NseClient::new(
        &cfg.nse_base_url,
        std::time::Duration::from_secs(cfg.request_timeout_secs),
        cfg.fetch_max_retries,
    );

    // Create shared state
    let app_state = AppState::new(cfg.clone(), db_pool.clone(), nse_client, db_tx);

    // ── Spawn tasks ──

    // 1. DB writer task (dedicated, owns writes)
    let db_pool_writer = db_pool.clone();
    tokio::spawn(async move {
        db::run_db_writer(db_pool_writer, db_rx).await;
    });

    // 2. One option chain feed per symbol
    for symbol in cfg.symbols.iter().cloned() {
        let feed_state = app_state.clone();
        let feed_tx = engine_tx.clone();
        tokio::spawn(async move {
            feeds::option_chain::run_chain_feed(feed_state, symbol, feed_tx).await;
        });
    }
    drop(engine_tx);

    // 3. Engine task
    let engine_state = app_state.clone();
    let engine_cfg = cfg.clone();
    tokio::spawn(async move {
        run_engine(engine_state, engine_cfg, engine_rx).await;
    });

    // 4. Axum HTTP + WS server
    let port = cfg.server_port;

    let app = axum::Router::new()
        .route("/api/data", axum::routing::get(server::routes::get_data))
        .route("/api/state", axum::routing::get(server::routes::get_state))
        .route("/api/history", axum::routing::get(server::routes::get_history))
        .route("/api/counters", axum::routing::get(server::routes::get_counters))
        .route("/ws", axum::routing::get(server::ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}

/// Engine loop. Receives snapshots, evaluates signals, publishes views.
/// The signal computation itself is pure; all IO happens after it returns.
async fn run_engine(
    state: Arc<AppState>,
    config: config::AppConfig,
    mut rx: mpsc::Receiver<EngineEvent>,
) {
    tracing::info!("engine task started");

    let mut engine = SignalEngine::new(&config);

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::ChainSnapshot { symbol, snapshot, fetched_at } => {
                state.counters.snapshots_received.fetch_add(1, Ordering::Relaxed);

                match engine.on_snapshot(&symbol, &snapshot, fetched_at.clone()) {
                    Ok(view) => {
                        state.counters.signals_computed.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(
                            symbol = %symbol,
                            expiry = %view.expiry,
                            underlying = ?view.underlying,
                            pcr = ?view.pcr,
                            near_pcr = ?view.signal.near_window_put_call_ratio,
                            trend = %view.signal.trend,
                            momentum = %view.signal.momentum,
                            recommendation = %view.recommendation,
                            history = engine.history_len(&symbol),
                            "signal computed"
                        );

                        if state.db_tx.send(DbCommand::from_view(&view)).await.is_err() {
                            tracing::error!("db writer channel closed");
                        }

                        state.snapshot_tx.send_modify(|dash| {
                            dash.last_errors.remove(&symbol);
                            dash.symbols.insert(symbol.clone(), view.clone());
                        });
                        state.broadcast(WsMessage::SignalUpdate(Box::new(view)));
                    }
                    Err(e) => {
                        state.counters.signal_errors.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(symbol = %symbol, error = %e, "snapshot rejected");
                        publish_error(&state, symbol, e.to_string(), fetched_at);
                    }
                }
            }

            EngineEvent::FetchFailed { symbol, error } => {
                publish_error(&state, symbol, error, chrono::Utc::now().to_rfc3339());
            }
        }
    }

    tracing::info!("engine task shutting down");
}

fn publish_error(state: &AppState, symbol: String, error: String, timestamp: String) {
    state.snapshot_tx.send_modify(|dash| {
        dash.last_errors.insert(symbol.clone(), error.clone());
    });
    state.broadcast(WsMessage::FeedError { symbol, error, timestamp });
}
