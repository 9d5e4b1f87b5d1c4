use super::types::OptionChainResponse;
use crate::errors::{EngineError, EngineResult};
use portable_atomic::{AtomicBool, Ordering};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Index underlyings served by the `option-chain-indices` endpoint.
const INDEX_SYMBOLS: [&str; 5] = ["NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY", "NIFTYNXT50"];

#[inline]
pub fn is_index_symbol(symbol: &str) -> bool {
    INDEX_SYMBOLS.iter().any(|s| s.eq_ignore_ascii_case(symbol))
}

/// NSE option-chain client. All methods return Result, never panic.
///
/// The API rejects requests without the session cookies the public
/// option-chain page sets, so the client keeps a cookie store and visits
/// that page once before the first API call (and again after a 401/403).
#[derive(Clone)]
pub struct NseClient {
    client: Client,
    base_url: String,
    max_retries: u32,
    warmed: Arc<AtomicBool>,
}

impl NseClient {
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            ),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let base_url = base_url.trim_end_matches('/').to_string();
        if let Ok(referer) = HeaderValue::from_str(&format!("{base_url}/option-chain")) {
            headers.insert(REFERER, referer);
        }

        Self {
            client: Client::builder()
                .timeout(timeout)
                .cookie_store(true)
                .default_headers(headers)
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url,
            max_retries: max_retries.max(1),
            warmed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn chain_path(symbol: &str) -> &'static str {
        if is_index_symbol(symbol) {
            "/api/option-chain-indices"
        } else {
            "/api/option-chain-equities"
        }
    }

    async fn warm_up(&self) -> EngineResult<()> {
        let url = format!("{}/option-chain", self.base_url);
        let resp = self.client.get(&url).send().await?;
        tracing::debug!(status = %resp.status(), "session warm-up");
        self.warmed.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> EngineResult<T> {
        if !self.warmed.load(Ordering::Relaxed) {
            self.warm_up().await?;
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).query(query).send().await?;

        let status = resp.status();
        if !status.is_success() {
            if matches!(status.as_u16(), 401 | 403) {
                // cookies expired; next attempt re-primes the session
                self.warmed.store(false, Ordering::Relaxed);
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::UpstreamApi {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<T>().await.map_err(|e| EngineError::Parse(format!("GET {path}: {e}")))
    }

    /// Fetch the full option chain for `symbol`, retrying with linear backoff.
    pub async fn fetch_option_chain(&self, symbol: &str) -> EngineResult<OptionChainResponse> {
        let path = Self::chain_path(symbol);
        let symbol = symbol.to_ascii_uppercase();
        let query = [("symbol", symbol.as_str())];
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_json::<OptionChainResponse>(path, &query).await {
                Ok(chain) => return Ok(chain),
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(symbol = %symbol, attempt, error = %e, "option chain fetch retry");
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
