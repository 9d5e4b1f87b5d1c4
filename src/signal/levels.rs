use super::{OptionRecord, Snapshot};
use smallvec::SmallVec;

/// Which leg of a strike to rank on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Call,
    Put,
}

impl Side {
    #[inline]
    fn open_interest(self, r: &OptionRecord) -> u64 {
        match self {
            Side::Call => r.call_open_interest,
            Side::Put => r.put_open_interest,
        }
    }
}

/// Signed day-over-day OI change summed per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ChangeTotals {
    pub call: i64,
    pub put: i64,
}

/// One row of the strike table around the money.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeRow {
    pub strike: f64,
    #[serde(rename = "callOI")]
    pub call_oi: u64,
    #[serde(rename = "putOI")]
    pub put_oi: u64,
}

/// Dashboard-facing levels derived from a single expiry of a snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainLevels {
    pub atm_strike: Option<f64>,
    /// Heaviest put OI strikes, strongest first.
    pub supports: SmallVec<[f64; 4]>,
    /// Heaviest call OI strikes, strongest first.
    pub resistances: SmallVec<[f64; 4]>,
    pub change_in_oi: ChangeTotals,
    pub strikes_window: Vec<StrikeRow>,
}

impl ChainLevels {
    pub fn derive(snapshot: &Snapshot, expiry: &str, window_points: f64, top_n: usize) -> Self {
        let underlying = snapshot.underlying_value;
        Self {
            atm_strike: underlying.and_then(|u| atm_strike(&snapshot.records, expiry, u)),
            supports: top_strikes_by(&snapshot.records, expiry, Side::Put, top_n),
            resistances: top_strikes_by(&snapshot.records, expiry, Side::Call, top_n),
            change_in_oi: change_in_oi_totals(&snapshot.records, expiry),
            strikes_window: underlying
                .map(|u| strike_window(&snapshot.records, expiry, u, window_points))
                .unwrap_or_default(),
        }
    }
}

/// Sums change-in-OI per side; absent values count as 0.
pub fn change_in_oi_totals(records: &[OptionRecord], expiry: &str) -> ChangeTotals {
    records
        .iter()
        .filter(|r| r.expiry == expiry)
        .fold(ChangeTotals::default(), |acc, r| ChangeTotals {
            call: acc.call.saturating_add(r.call_change_in_open_interest.unwrap_or(0)),
            put: acc.put.saturating_add(r.put_change_in_open_interest.unwrap_or(0)),
        })
}

/// Strike nearest the underlying. Equidistant strikes resolve to the lower one.
pub fn atm_strike(records: &[OptionRecord], expiry: &str, underlying: f64) -> Option<f64> {
    records
        .iter()
        .filter(|r| r.expiry == expiry && r.strike.is_finite())
        .map(|r| r.strike)
        .min_by(|a, b| {
            let da = (a - underlying).abs();
            let db = (b - underlying).abs();
            da.total_cmp(&db).then(a.total_cmp(b))
        })
}

/// Top `n` strikes by OI on `side`, descending. Zero-OI strikes never qualify;
/// equal OI ranks the lower strike first.
pub fn top_strikes_by(records: &[OptionRecord], expiry: &str, side: Side, n: usize) -> SmallVec<[f64; 4]> {
    let mut ranked: Vec<(u64, f64)> = records
        .iter()
        .filter(|r| r.expiry == expiry)
        .map(|r| (side.open_interest(r), r.strike))
        .filter(|(oi, _)| *oi > 0)
        .collect();

    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.total_cmp(&b.1)));
    ranked.into_iter().take(n).map(|(_, strike)| strike).collect()
}

/// Rows within `window_points` of the underlying (inclusive), ascending by strike.
pub fn strike_window(records: &[OptionRecord], expiry: &str, underlying: f64, window_points: f64) -> Vec<StrikeRow> {
    let mut rows: Vec<StrikeRow> = records
        .iter()
        .filter(|r| r.expiry == expiry && (r.strike - underlying).abs() <= window_points)
        .map(|r| StrikeRow {
            strike: r.strike,
            call_oi: r.call_open_interest,
            put_oi: r.put_open_interest,
        })
        .collect();
    rows.sort_by(|a, b| a.strike.total_cmp(&b.strike));
    rows
}
