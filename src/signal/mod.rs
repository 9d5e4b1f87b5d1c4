//! Option-chain signal engine.
//!
//! Every function here is pure: output depends only on the arguments, nothing
//! is cached or retained between calls. Zero call open interest is a valid
//! market state and surfaces as `None` ratios, never as an error.

pub mod ema;
pub mod levels;

use crate::errors::SignalError;

// ── Input shapes ──

/// One strike of one expiry. Absent CE/PE sides are carried as zero OI.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct OptionRecord {
    pub strike: f64,
    pub expiry: String,
    pub call_open_interest: u64,
    pub put_open_interest: u64,
    pub call_change_in_open_interest: Option<i64>,
    pub put_change_in_open_interest: Option<i64>,
}

/// Decoded option-chain snapshot handed to the engine by the ingestor.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Snapshot {
    pub underlying_value: Option<f64>,
    /// Set when `underlying_value` is the configured stand-in, not a quote.
    #[serde(skip)]
    pub underlying_is_fallback: bool,
    /// Earliest first.
    pub expiries: Vec<String>,
    pub records: Vec<OptionRecord>,
}

// ── Classifications ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Unknown,
}

/// Direction of an externally computed momentum indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Momentum {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    BuyCall,
    BuyPut,
    Sideways,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::fmt::Display for Momentum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuyCall => write!(f, "BUY_CALL"),
            Self::BuyPut => write!(f, "BUY_PUT"),
            Self::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

// ── Parameters ──

/// PCR levels the recommendation table compares against (both strict).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PcrThresholds {
    pub bullish: f64,
    pub bearish: f64,
}

impl Default for PcrThresholds {
    fn default() -> Self {
        Self {
            bullish: 1.2,
            bearish: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParams {
    /// Max distance in index points from the underlying for the near-window PCR.
    pub window_points: f64,
    pub thresholds: PcrThresholds,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            window_points: 200.0,
            thresholds: PcrThresholds::default(),
        }
    }
}

// ── Output ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct OiTotals {
    pub call: u64,
    pub put: u64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResult {
    pub selected_expiry: String,
    pub total_call_oi: u64,
    pub total_put_oi: u64,
    pub put_call_ratio: Option<f64>,
    pub near_window_put_call_ratio: Option<f64>,
    pub trend: Trend,
    pub momentum: Momentum,
    pub recommendation: Recommendation,
}

// ── Operations ──

/// Returns `requested` when the snapshot lists it, otherwise the earliest expiry.
pub fn select_expiry<'a>(snapshot: &'a Snapshot, requested: Option<&str>) -> Result<&'a str, SignalError> {
    if let Some(req) = requested {
        if let Some(found) = snapshot.expiries.iter().find(|e| e.as_str() == req) {
            return Ok(found.as_str());
        }
    }
    snapshot
        .expiries
        .first()
        .map(String::as_str)
        .ok_or(SignalError::EmptySnapshot)
}

/// Sums call and put OI over records of `expiry`.
pub fn aggregate_open_interest<'a, I>(records: I, expiry: &str) -> OiTotals
where
    I: IntoIterator<Item = &'a OptionRecord>,
{
    records
        .into_iter()
        .filter(|r| r.expiry == expiry)
        .fold(OiTotals::default(), |acc, r| OiTotals {
            call: acc.call.saturating_add(r.call_open_interest),
            put: acc.put.saturating_add(r.put_open_interest),
        })
}

/// `put / call` rounded to 2 decimals. `None` when there is no call OI.
#[inline]
pub fn compute_ratio(total_put_oi: u64, total_call_oi: u64) -> Option<f64> {
    if total_call_oi == 0 {
        return None;
    }
    let ratio = total_put_oi as f64 / total_call_oi as f64;
    Some((ratio * 100.0).round() / 100.0)
}

/// PCR over strikes within `window_points` of the underlying (inclusive).
pub fn near_window_ratio(
    snapshot: &Snapshot,
    expiry: &str,
    underlying: Option<f64>,
    window_points: f64,
) -> Option<f64> {
    let spot = underlying?;
    let totals = aggregate_open_interest(
        snapshot
            .records
            .iter()
            .filter(|r| (r.strike - spot).abs() <= window_points),
        expiry,
    );
    compute_ratio(totals.put, totals.call)
}

/// A ratio of exactly 1.0 counts as bullish.
#[inline]
pub fn classify_trend(ratio: Option<f64>) -> Trend {
    match ratio {
        None => Trend::Unknown,
        Some(r) if r >= 1.0 => Trend::Bullish,
        Some(_) => Trend::Bearish,
    }
}

/// Decision table:
///   ratio > bullish threshold && momentum bullish => BUY_CALL
///   ratio < bearish threshold && momentum bearish => BUY_PUT
///   anything else                                 => SIDEWAYS
pub fn recommend(
    ratio: Option<f64>,
    trend: Trend,
    momentum: Momentum,
    thresholds: &PcrThresholds,
) -> Recommendation {
    let Some(r) = ratio else {
        return Recommendation::Sideways;
    };
    if trend == Trend::Unknown {
        return Recommendation::Sideways;
    }
    match momentum {
        Momentum::Bullish if r > thresholds.bullish => Recommendation::BuyCall,
        Momentum::Bearish if r < thresholds.bearish => Recommendation::BuyPut,
        _ => Recommendation::Sideways,
    }
}

/// Full pipeline for one snapshot.
pub fn evaluate(
    snapshot: &Snapshot,
    requested_expiry: Option<&str>,
    params: &SignalParams,
    momentum: Momentum,
) -> Result<SignalResult, SignalError> {
    let expiry = select_expiry(snapshot, requested_expiry)?;
    let totals = aggregate_open_interest(&snapshot.records, expiry);
    let put_call_ratio = compute_ratio(totals.put, totals.call);
    let near_window_put_call_ratio =
        near_window_ratio(snapshot, expiry, snapshot.underlying_value, params.window_points);
    let trend = classify_trend(put_call_ratio);
    let recommendation = recommend(put_call_ratio, trend, momentum, &params.thresholds);

    Ok(SignalResult {
        selected_expiry: expiry.to_string(),
        total_call_oi: totals.call,
        total_put_oi: totals.put,
        put_call_ratio,
        near_window_put_call_ratio,
        trend,
        momentum,
        recommendation,
    })
}
