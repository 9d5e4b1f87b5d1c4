use crate::signal::{OptionRecord, Snapshot};
use serde::Deserialize;

// ── Option chain payload ──
//
// {
//   "records": {
//     "expiryDates": ["26-Dec-2024", "02-Jan-2025", ...],
//     "timestamp": "20-Dec-2024 15:30:00",
//     "underlyingValue": 23587.5,
//     "data": [
//       {
//         "strikePrice": 23500,
//         "expiryDate": "26-Dec-2024",
//         "CE": { "openInterest": 81234, "changeinOpenInterest": -1520, "lastPrice": 152.4, ... },
//         "PE": { "openInterest": 99871, "changeinOpenInterest": 4310, "lastPrice": 61.1, ... }
//       }
//     ]
//   },
//   "filtered": { ... }
// }
//
// A throttled session gets `{}` back with HTTP 200, so every level defaults.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OptionChainResponse {
    #[serde(default)]
    pub records: Records,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Records {
    #[serde(default)]
    pub expiry_dates: Vec<String>,
    #[allow(dead_code)]
    pub timestamp: Option<String>,
    pub underlying_value: Option<f64>,
    #[serde(default)]
    pub data: Vec<StrikeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeEntry {
    pub strike_price: Option<f64>,
    pub expiry_date: Option<String>,
    #[serde(rename = "CE")]
    pub ce: Option<LegData>,
    #[serde(rename = "PE")]
    pub pe: Option<LegData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegData {
    pub open_interest: Option<f64>,
    #[serde(rename = "changeinOpenInterest")]
    pub change_in_open_interest: Option<f64>,
    #[allow(dead_code)]
    pub last_price: Option<f64>,
    pub underlying_value: Option<f64>,
}

impl LegData {
    #[inline]
    fn oi(&self) -> u64 {
        self.open_interest
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|v| v.round() as u64)
            .unwrap_or(0)
    }

    #[inline]
    fn change_oi(&self) -> Option<i64> {
        self.change_in_open_interest
            .filter(|v| v.is_finite())
            .map(|v| v.round() as i64)
    }
}

impl OptionChainResponse {
    /// Underlying from the records block, else from any leg that carries it.
    pub fn underlying(&self) -> Option<f64> {
        self.records
            .underlying_value
            .or_else(|| {
                self.records
                    .data
                    .iter()
                    .flat_map(|e| [e.ce.as_ref(), e.pe.as_ref()])
                    .flatten()
                    .find_map(|leg| leg.underlying_value)
            })
            .filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Converts the wire payload into an engine snapshot.
    ///
    /// `fallback_underlying` stands in when the payload has no usable spot.
    /// Entries without a strike, or whose expiry is not listed, are dropped.
    pub fn into_snapshot(self, fallback_underlying: Option<f64>) -> Snapshot {
        let observed = self.underlying();
        let underlying_is_fallback = observed.is_none() && fallback_underlying.is_some();
        let underlying_value = observed.or(fallback_underlying);
        let Records { expiry_dates, data, .. } = self.records;

        let records = data
            .into_iter()
            .filter_map(|entry| {
                let strike = entry.strike_price.filter(|s| s.is_finite())?;
                let expiry = entry.expiry_date?;
                if !expiry_dates.contains(&expiry) {
                    return None;
                }
                Some(OptionRecord {
                    strike,
                    expiry,
                    call_open_interest: entry.ce.as_ref().map(LegData::oi).unwrap_or(0),
                    put_open_interest: entry.pe.as_ref().map(LegData::oi).unwrap_or(0),
                    call_change_in_open_interest: entry.ce.as_ref().and_then(LegData::change_oi),
                    put_change_in_open_interest: entry.pe.as_ref().and_then(LegData::change_oi),
                })
            })
            .collect();

        Snapshot {
            underlying_value,
            underlying_is_fallback,
            expiries: expiry_dates,
            records,
        }
    }
}
