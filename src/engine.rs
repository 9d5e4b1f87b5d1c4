use crate::config::AppConfig;
use crate::errors::SignalError;
use crate::signal::ema::ema_crossover_signal;
use crate::signal::levels::ChainLevels;
use crate::signal::{self, Momentum, SignalParams, Snapshot};
use crate::state::SymbolView;
use std::collections::{HashMap, VecDeque};

/// Engine-task state: per-symbol underlying history feeding the momentum signal.
/// Owned by the engine task alone, so no locks.
pub struct SignalEngine {
    params: SignalParams,
    fast_span: usize,
    slow_span: usize,
    history_len: usize,
    top_levels: usize,
    history: HashMap<String, VecDeque<f64>>,
}

impl SignalEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            params: config.signal_params(),
            fast_span: config.ema_fast_span,
            slow_span: config.ema_slow_span,
            history_len: config.price_history_len.max(2),
            top_levels: config.top_levels,
            history: HashMap::new(),
        }
    }

    /// Appends the snapshot's underlying to the symbol's history and returns
    /// the momentum over it. Fewer than two observations reads as neutral.
    pub fn record_price(&mut self, symbol: &str, underlying: Option<f64>) -> Momentum {
        let prices = self.history.entry(symbol.to_string()).or_default();
        if let Some(px) = underlying.filter(|p| p.is_finite() && *p > 0.0) {
            if prices.len() >= self.history_len {
                prices.pop_front();
            }
            prices.push_back(px);
        }

        match ema_crossover_signal(&*prices, self.fast_span, self.slow_span) {
            Ok(m) => m,
            Err(SignalError::InsufficientData { points }) => {
                tracing::debug!(symbol = %symbol, points, "momentum warming up");
                Momentum::Neutral
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "momentum unavailable");
                Momentum::Neutral
            }
        }
    }

    /// Evaluates one fresh snapshot for `symbol`.
    pub fn on_snapshot(
        &mut self,
        symbol: &str,
        snapshot: &Snapshot,
        updated_at: String,
    ) -> Result<SymbolView, SignalError> {
        // refuse before touching history so an empty payload leaves no trace
        signal::select_expiry(snapshot, None)?;

        // a configured stand-in is not a market observation
        let observed = snapshot.underlying_value.filter(|_| !snapshot.underlying_is_fallback);
        let momentum = self.record_price(symbol, observed);
        let result = signal::evaluate(snapshot, None, &self.params, momentum)?;
        let levels = ChainLevels::derive(
            snapshot,
            &result.selected_expiry,
            self.params.window_points,
            self.top_levels,
        );
        Ok(SymbolView::new(symbol, snapshot, result, levels, updated_at))
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.history.get(symbol).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::tests::record;
    use crate::signal::{Recommendation, Trend};
    use std::path::PathBuf;

    fn config() -> AppConfig {
        AppConfig {
            nse_base_url: "http://localhost".into(),
            symbols: vec!["NIFTY".into()],
            poll_interval_secs: 60,
            cache_ttl_secs: 30,
            request_timeout_secs: 10,
            fetch_max_retries: 1,
            near_window_points: 200.0,
            bullish_pcr_threshold: 1.2,
            bearish_pcr_threshold: 0.8,
            ema_fast_span: 2,
            ema_slow_span: 4,
            price_history_len: 5,
            top_levels: 2,
            fallback_underlying: HashMap::new(),
            data_dir: PathBuf::from("data"),
            server_port: 0,
        }
    }

    fn put_heavy(underlying: f64) -> Snapshot {
        Snapshot {
            underlying_value: Some(underlying),
            underlying_is_fallback: false,
            expiries: vec!["E1".into()],
            records: vec![
                record(underlying - 100.0, "E1", 100, 400),
                record(underlying, "E1", 100, 100),
            ],
        }
    }

    #[test]
    fn test_first_snapshot_is_neutral_sideways() {
        let mut engine = SignalEngine::new(&config());
        let view = engine.on_snapshot("NIFTY", &put_heavy(22_000.0), "t0".into()).unwrap();
        assert_eq!(view.signal.momentum, Momentum::Neutral);
        assert_eq!(view.signal.put_call_ratio, Some(2.5));
        assert_eq!(view.signal.trend, Trend::Bullish);
        assert_eq!(view.recommendation, Recommendation::Sideways);
        assert_eq!(view.levels.supports.as_slice(), &[21_900.0, 22_000.0]);
    }

    #[test]
    fn test_rising_underlying_turns_buy_call() {
        let mut engine = SignalEngine::new(&config());
        let mut last = None;
        for (i, px) in [22_000.0, 22_050.0, 22_100.0, 22_150.0].into_iter().enumerate() {
            last = Some(engine.on_snapshot("NIFTY", &put_heavy(px), format!("t{i}")).unwrap());
        }
        let view = last.unwrap();
        assert_eq!(view.signal.momentum, Momentum::Bullish);
        assert_eq!(view.recommendation, Recommendation::BuyCall);
    }

    #[test]
    fn test_fallback_underlying_not_recorded() {
        let mut engine = SignalEngine::new(&config());
        for (i, px) in [23_500.0, 23_550.0, 23_600.0].into_iter().enumerate() {
            engine.on_snapshot("NIFTY", &put_heavy(px), format!("t{i}")).unwrap();
        }
        let mut stale = put_heavy(22_000.0);
        stale.underlying_is_fallback = true;
        let view = engine.on_snapshot("NIFTY", &stale, "t3".into()).unwrap();
        assert_eq!(engine.history_len("NIFTY"), 3);
        assert_eq!(view.signal.momentum, Momentum::Bullish);
        assert_eq!(view.underlying, Some(22_000.0));
    }

    #[test]
    fn test_history_capped_and_per_symbol() {
        let mut engine = SignalEngine::new(&config());
        for i in 0..8 {
            engine.record_price("NIFTY", Some(100.0 + i as f64));
        }
        engine.record_price("BANKNIFTY", Some(48_000.0));
        engine.record_price("BANKNIFTY", None);
        assert_eq!(engine.history_len("NIFTY"), 5);
        assert_eq!(engine.history_len("BANKNIFTY"), 1);
    }

    #[test]
    fn test_empty_snapshot_rejected_without_history() {
        let mut engine = SignalEngine::new(&config());
        let empty = Snapshot {
            underlying_value: Some(22_000.0),
            underlying_is_fallback: false,
            expiries: vec![],
            records: vec![],
        };
        let err = engine.on_snapshot("NIFTY", &empty, "t0".into()).unwrap_err();
        assert_eq!(err, SignalError::EmptySnapshot);
        assert_eq!(engine.history_len("NIFTY"), 0);
    }
}
