//! Signed REST gateway for Bybit V5 plus the premium-index funding feed.

use crate::endpoints::Endpoints;
use crate::error::{BybitError, Result};
use crate::signing::RequestSigner;
use async_trait::async_trait;
use chrono::Utc;
use funding_sniper_core::{
    AccountGateway, FundingSnapshot, Instrument, MarginMode, MarketDataGateway, RestConfig,
};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::form_urlencoded;

const LINEAR_PERPETUAL: &str = "LinearPerpetual";
const SETTLEMENT_COIN: &str = "USDT";

/// "Leverage not modified" is reported when the requested leverage is already set.
const LEVERAGE_NOT_MODIFIED: i64 = 110_043;

const INSTRUMENTS_PAGE_LIMIT: &str = "1000";
const MAX_INSTRUMENT_PAGES: usize = 20;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self, accepted: &[i64]) -> Result<Option<T>> {
        if self.ret_code == 0 || accepted.contains(&self.ret_code) {
            Ok(self.result)
        } else {
            Err(BybitError::api(self.ret_code, self.ret_msg))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletBalanceResult {
    list: Vec<WalletAccount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletAccount {
    total_equity: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentsPage {
    list: Vec<RawInstrument>,
    #[serde(default)]
    next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstrument {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    quote_coin: String,
    price_filter: RawPriceFilter,
    lot_size_filter: RawLotSizeFilter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPriceFilter {
    #[serde(default)]
    min_price: String,
    #[serde(default)]
    tick_size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLotSizeFilter {
    #[serde(default)]
    max_order_qty: String,
    #[serde(default)]
    min_order_qty: String,
    #[serde(default)]
    qty_step: String,
}

impl RawInstrument {
    fn into_instrument(self) -> Result<Instrument> {
        let min_price = parse_decimal_or_zero("minPrice", &self.price_filter.min_price)?;
        let tick = parse_decimal_or_zero("tickSize", &self.price_filter.tick_size)?;
        let min_qty = parse_decimal_or_zero("minOrderQty", &self.lot_size_filter.min_order_qty)?;
        let step = parse_decimal_or_zero("qtyStep", &self.lot_size_filter.qty_step)?;
        let max_qty = parse_decimal_or_zero("maxOrderQty", &self.lot_size_filter.max_order_qty)?;

        Ok(Instrument {
            symbol: self.symbol,
            contract_type: self.contract_type,
            quote_asset: self.quote_coin,
            tick_size: if tick > Decimal::ZERO { tick } else { min_price },
            qty_step: if step > Decimal::ZERO { step } else { min_qty },
            min_qty,
            max_qty,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    mark_price: String,
    last_funding_rate: String,
    next_funding_time: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetLeverageRequest<'a> {
    category: &'static str,
    symbol: &'a str,
    buy_leverage: String,
    sell_leverage: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetMarginModeRequest {
    set_margin_mode: &'static str,
}

/// Parses an exchange decimal string, accepting scientific notation.
fn parse_decimal(field: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| BybitError::Decode(format!("{field}: invalid decimal {raw:?}: {e}")))
}

fn parse_decimal_or_zero(field: &str, raw: &str) -> Result<Decimal> {
    if raw.is_empty() {
        Ok(Decimal::ZERO)
    } else {
        parse_decimal(field, raw)
    }
}

/// REST client for account setup, instrument metadata and funding snapshots.
///
/// Every request waits on a shared rate limiter and uses a fixed timeout.
pub struct BybitRestClient {
    http: Client,
    endpoints: Endpoints,
    signer: Arc<RequestSigner>,
    rate_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for BybitRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitRestClient")
            .field("rest_url", &self.endpoints.rest_url)
            .field("funding_feed_url", &self.endpoints.funding_feed_url)
            .finish_non_exhaustive()
    }
}

impl BybitRestClient {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(endpoints: Endpoints, signer: Arc<RequestSigner>, config: &RestConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BybitError::Network(format!("failed to build HTTP client: {e}")))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            http,
            endpoints,
            signer,
            rate_limiter,
        })
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<Envelope<T>> {
        self.rate_limiter.until_ready().await;

        let headers = self.signer.rest_headers(Utc::now().timestamp_millis(), query)?;
        let url = format!("{}{}?{}", self.endpoints.rest_url, path, query);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &headers.api_key)
            .header("X-BAPI-SIGN", &headers.signature)
            .header("X-BAPI-TIMESTAMP", &headers.timestamp)
            .header("X-BAPI-RECV-WINDOW", &headers.recv_window)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn signed_post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Envelope<T>> {
        self.rate_limiter.until_ready().await;

        let body_json = serde_json::to_string(body)?;
        let headers = self.signer.rest_headers(Utc::now().timestamp_millis(), &body_json)?;
        let url = format!("{}{}", self.endpoints.rest_url, path);
        tracing::debug!("POST {} body={}", url, body_json);

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-BAPI-API-KEY", &headers.api_key)
            .header("X-BAPI-SIGN", &headers.signature)
            .header("X-BAPI-TIMESTAMP", &headers.timestamp)
            .header("X-BAPI-RECV-WINDOW", &headers.recv_window)
            .body(body_json)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BybitError::http(status.as_u16(), text));
        }

        serde_json::from_str(&text).map_err(|e| BybitError::Decode(format!("{e}: {text}")))
    }

    /// Total equity of the unified trading account.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, a non-zero `retCode`, or an empty account list.
    pub async fn wallet_equity(&self) -> Result<Decimal> {
        let envelope: Envelope<WalletBalanceResult> = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;

        let account = envelope
            .into_result(&[])?
            .and_then(|r| r.list.into_iter().next())
            .ok_or_else(|| BybitError::Decode("no balance data found".to_string()))?;

        parse_decimal("totalEquity", &account.total_equity)
    }

    /// All linear instruments, following `nextPageCursor` until exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if any page fails to load or decode.
    pub async fn instruments(&self) -> Result<Vec<Instrument>> {
        let mut instruments = Vec::new();
        let mut cursor = String::new();

        for _ in 0..MAX_INSTRUMENT_PAGES {
            // The serializer is not Send; it must be gone before the await.
            let query = {
                let mut serializer = form_urlencoded::Serializer::new(String::new());
                serializer.append_pair("category", "linear");
                serializer.append_pair("limit", INSTRUMENTS_PAGE_LIMIT);
                if !cursor.is_empty() {
                    serializer.append_pair("cursor", &cursor);
                }
                serializer.finish()
            };

            let envelope: Envelope<InstrumentsPage> =
                self.signed_get("/v5/market/instruments-info", &query).await?;
            let page = envelope
                .into_result(&[])?
                .ok_or_else(|| BybitError::Decode("instruments-info result missing".to_string()))?;

            for raw in page.list {
                instruments.push(raw.into_instrument()?);
            }

            if page.next_page_cursor.is_empty() || page.next_page_cursor == cursor {
                return Ok(instruments);
            }
            cursor = page.next_page_cursor;
        }

        tracing::warn!(
            pages = MAX_INSTRUMENT_PAGES,
            count = instruments.len(),
            "instrument listing truncated at page limit"
        );
        Ok(instruments)
    }

    /// Mark price, last funding rate and next funding time for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure or an unexpected payload.
    pub async fn premium_index(&self, symbol: &str) -> Result<FundingSnapshot> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/fapi/v1/premiumIndex", self.endpoints.funding_feed_url);
        let response = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;
        let index: PremiumIndex = Self::decode(response).await?;

        Ok(FundingSnapshot {
            mark_price: parse_decimal("markPrice", &index.mark_price)?,
            funding_rate: parse_decimal("lastFundingRate", &index.last_funding_rate)?,
            next_funding_time: index.next_funding_time,
        })
    }

    /// Sets both buy and sell leverage for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns error unless the exchange accepts the change or reports it as already set.
    pub async fn update_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let body = SetLeverageRequest {
            category: "linear",
            symbol,
            buy_leverage: leverage.to_string(),
            sell_leverage: leverage.to_string(),
        };

        let envelope: Envelope<serde_json::Value> =
            self.signed_post("/v5/position/set-leverage", &body).await?;
        envelope.into_result(&[LEVERAGE_NOT_MODIFIED])?;

        tracing::info!(symbol, leverage, "leverage set");
        Ok(())
    }

    /// Switches the account margin mode.
    ///
    /// # Errors
    ///
    /// Returns error if the exchange rejects the mode.
    pub async fn update_margin_mode(&self, mode: MarginMode) -> Result<()> {
        let body = SetMarginModeRequest {
            set_margin_mode: mode.as_api_str(),
        };

        let envelope: Envelope<serde_json::Value> =
            self.signed_post("/v5/account/set-margin-mode", &body).await?;
        envelope.into_result(&[])?;

        tracing::info!(mode = mode.as_api_str(), "margin mode set");
        Ok(())
    }
}

fn is_tradeable(instrument: &Instrument) -> bool {
    instrument.contract_type == LINEAR_PERPETUAL && instrument.quote_asset == SETTLEMENT_COIN
}

#[async_trait]
impl MarketDataGateway for BybitRestClient {
    async fn list_instruments(&self) -> anyhow::Result<Vec<Instrument>> {
        let mut instruments = self.instruments().await?;
        instruments.retain(is_tradeable);
        Ok(instruments)
    }

    async fn funding_snapshot(&self, symbol: &str) -> anyhow::Result<FundingSnapshot> {
        Ok(self.premium_index(symbol).await?)
    }
}

#[async_trait]
impl AccountGateway for BybitRestClient {
    async fn wallet_balance(&self) -> anyhow::Result<Decimal> {
        Ok(self.wallet_equity().await?)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()> {
        Ok(self.update_leverage(symbol, leverage).await?)
    }

    async fn set_margin_mode(&self, mode: MarginMode) -> anyhow::Result<()> {
        Ok(self.update_margin_mode(mode).await?)
    }
}
