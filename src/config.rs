use crate::errors::{EngineError, EngineResult};
use crate::signal::{PcrThresholds, SignalParams};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub nse_base_url: String,
    pub symbols: Vec<String>,
    pub poll_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub fetch_max_retries: u32,
    pub near_window_points: f64,
    pub bullish_pcr_threshold: f64,
    pub bearish_pcr_threshold: f64,
    pub ema_fast_span: usize,
    pub ema_slow_span: usize,
    pub price_history_len: usize,
    pub top_levels: usize,
    /// Spot used when a payload carries no underlying, keyed by upper-case symbol.
    pub fallback_underlying: HashMap<String, f64>,
    pub data_dir: PathBuf,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let cfg = Self {
            nse_base_url: env_var_or("NSE_BASE_URL", "https://www.nseindia.com"),
            symbols: parse_symbols(&env_var_or("SYMBOLS", "NIFTY,BANKNIFTY")),
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", "60")?,
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", "30")?,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", "10")?,
            fetch_max_retries: env_parse("FETCH_MAX_RETRIES", "3")?,
            near_window_points: env_parse("NEAR_WINDOW_POINTS", "200")?,
            bullish_pcr_threshold: env_parse("BULLISH_PCR_THRESHOLD", "1.2")?,
            bearish_pcr_threshold: env_parse("BEARISH_PCR_THRESHOLD", "0.8")?,
            ema_fast_span: env_parse("EMA_FAST_SPAN", "9")?,
            ema_slow_span: env_parse("EMA_SLOW_SPAN", "21")?,
            price_history_len: env_parse("PRICE_HISTORY_LEN", "500")?,
            top_levels: env_parse("TOP_LEVELS", "3")?,
            fallback_underlying: parse_fallbacks(&env_var_or("FALLBACK_UNDERLYING", ""))?,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
            server_port: env_parse("SERVER_PORT", "3001")?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.symbols.is_empty() {
            return Err(EngineError::Config("SYMBOLS: at least one symbol required".into()));
        }
        if self.ema_fast_span == 0 || self.ema_fast_span >= self.ema_slow_span {
            return Err(EngineError::Config(format!(
                "EMA spans: need 1 <= fast < slow, got fast={} slow={}",
                self.ema_fast_span, self.ema_slow_span
            )));
        }
        if !(self.bearish_pcr_threshold <= self.bullish_pcr_threshold) {
            return Err(EngineError::Config(format!(
                "PCR thresholds: bearish {} above bullish {}",
                self.bearish_pcr_threshold, self.bullish_pcr_threshold
            )));
        }
        if !self.near_window_points.is_finite() || self.near_window_points < 0.0 {
            return Err(EngineError::Config(format!(
                "NEAR_WINDOW_POINTS: invalid {}",
                self.near_window_points
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(EngineError::Config("POLL_INTERVAL_SECS: must be > 0".into()));
        }
        Ok(())
    }

    pub fn signal_params(&self) -> SignalParams {
        SignalParams {
            window_points: self.near_window_points,
            thresholds: PcrThresholds {
                bullish: self.bullish_pcr_threshold,
                bearish: self.bearish_pcr_threshold,
            },
        }
    }

    #[inline]
    pub fn fallback_for(&self, symbol: &str) -> Option<f64> {
        self.fallback_underlying.get(&symbol.to_ascii_uppercase()).copied()
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var_or(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

/// `"nifty, BANKNIFTY,,"` -> `["NIFTY", "BANKNIFTY"]`, duplicates removed.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in raw.split(',').map(|s| s.trim().to_ascii_uppercase()).filter(|s| !s.is_empty()) {
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// `"NIFTY=22000,BANKNIFTY=48000"` -> map keyed by upper-case symbol.
pub fn parse_fallbacks(raw: &str) -> EngineResult<HashMap<String, f64>> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (sym, val) = pair
            .split_once('=')
            .ok_or_else(|| EngineError::Config(format!("FALLBACK_UNDERLYING: expected SYM=price, got {pair}")))?;
        let price: f64 = val
            .trim()
            .parse()
            .map_err(|e| EngineError::Config(format!("FALLBACK_UNDERLYING {sym}: {e}")))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(EngineError::Config(format!("FALLBACK_UNDERLYING {sym}: invalid price {price}")));
        }
        map.insert(sym.trim().to_ascii_uppercase(), price);
    }
    Ok(map)
}
