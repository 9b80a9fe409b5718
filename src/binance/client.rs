// =============================================================================
// Binance USDⓈ-M Futures REST client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// carry X-MBX-APIKEY as a header and a recvWindow (default 5 000 ms) to
// tolerate minor clock drift between the guard and Binance servers.
//
// Every call is bounded by the reqwest client timeout and checked against the
// local rate-limit tracker before it leaves the process.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tracing::{debug, instrument};

use super::models::{ApiErrorBody, NewOrderResponse, OpenOrderEntry, PositionRiskEntry};
use super::rate_limit::RateLimitTracker;
use crate::gateway::{ExchangeGateway, GatewayError, GatewayResult, OrderAck, OrderRequest};
use crate::runtime_config::{Credentials, RuntimeConfig};
use crate::types::{OrderType, Position, RestingOrder};

type HmacSha256 = Hmac<Sha256>;

// Request weights from the USDⓈ-M futures docs.
const WEIGHT_OPEN_ORDERS: u32 = 1;
const WEIGHT_CANCEL: u32 = 1;
const WEIGHT_NEW_ORDER: u32 = 1;
const WEIGHT_POSITION_RISK: u32 = 5;

/// Signed REST client for the endpoints the guard uses.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    secret: String,
    base_url: String,
    recv_window_ms: u64,
    quantity_precision: usize,
    price_precision: usize,
    client: reqwest::Client,
    rate_limits: Arc<RateLimitTracker>,
}

impl BinanceFuturesClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a client for `config.base_url`.  The API key is installed as a
    /// default header and never appears in query strings.
    pub fn new(credentials: &Credentials, config: &RuntimeConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        let key = HeaderValue::from_str(&credentials.api_key)
            .context("API key contains characters not allowed in a header")?;
        default_headers.insert("X-MBX-APIKEY", key);

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %config.base_url, "BinanceFuturesClient initialised");

        Ok(Self {
            secret: credentials.secret_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            recv_window_ms: config.recv_window_ms,
            quantity_precision: config.protection.quantity_precision,
            price_precision: config.protection.price_precision,
            client,
            rate_limits: Arc::new(RateLimitTracker::new()),
        })
    }

    pub fn rate_limits(&self) -> Arc<RateLimitTracker> {
        Arc::clone(&self.rate_limits)
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> GatewayResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| GatewayError::Rejected(format!("invalid signing key: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Append timestamp, recvWindow and signature to `params`.
    fn signed_query(&self, params: &str) -> GatewayResult<String> {
        let ts = Self::timestamp_ms();
        let recv = self.recv_window_ms;
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={recv}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={recv}")
        };
        let sig = self.sign(&base)?;
        Ok(format!("{base}&signature={sig}"))
    }

    /// Query parameters for `POST /fapi/v1/order`.  Quantities and prices are
    /// printed with the configured precision.
    pub fn order_params(&self, request: &OrderRequest) -> String {
        let qp = self.quantity_precision;
        let pp = self.price_precision;

        let mut params = format!(
            "symbol={}&side={}&positionSide={}&type={}&quantity={:.qp$}",
            request.symbol,
            request.side.as_str(),
            request.position_side.as_str(),
            request.order_type.as_str(),
            request.quantity,
        );
        if let Some(p) = request.price {
            params.push_str(&format!("&price={p:.pp$}"));
        }
        if let Some(sp) = request.stop_price {
            params.push_str(&format!("&stopPrice={sp:.pp$}"));
        }
        if request.order_type == OrderType::StopMarket {
            params.push_str("&workingType=CONTRACT_PRICE");
        }
        if let Some(tif) = request.time_in_force {
            params.push_str(&format!("&timeInForce={}", tif.as_str()));
        }
        // Hedge-mode accounts reject the reduceOnly parameter outright, so it
        // is only sent when set.
        if request.reduce_only {
            params.push_str("&reduceOnly=true");
        }
        if let Some(coid) = &request.client_order_id {
            params.push_str(&format!("&newClientOrderId={coid}"));
        }
        params
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &str,
        weight: u32,
    ) -> GatewayResult<T> {
        if !self.rate_limits.can_send_request(weight) {
            return Err(GatewayError::RateLimited(format!(
                "{method} {path} would exceed the request weight budget"
            )));
        }

        let qs = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, qs);

        let resp = self.client.request(method.clone(), &url).send().await?;
        self.rate_limits.update_from_headers(resp.headers());

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(venue_error(status, &body));
        }

        debug!(%method, path, %status, "binance request ok");
        Ok(serde_json::from_str(&body)?)
    }
}

/// Map a non-2xx response to a `GatewayError`, decoding the `{code,msg}` body
/// when Binance sent one.
fn venue_error(status: StatusCode, body: &str) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return GatewayError::RateLimited(format!("HTTP {status}: {body}"));
    }
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => GatewayError::Venue {
            status: status.as_u16(),
            code: err.code,
            msg: err.msg,
        },
        Err(_) => GatewayError::Venue {
            status: status.as_u16(),
            code: 0,
            msg: body.to_string(),
        },
    }
}

// -----------------------------------------------------------------------------
// Gateway implementation
// -----------------------------------------------------------------------------

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    /// GET /fapi/v1/openOrders (signed).
    #[instrument(skip(self), name = "binance::list_open_orders")]
    async fn list_open_orders(&self, symbol: &str) -> GatewayResult<Vec<RestingOrder>> {
        let entries: Vec<OpenOrderEntry> = self
            .send_signed(
                Method::GET,
                "/fapi/v1/openOrders",
                &format!("symbol={symbol}"),
                WEIGHT_OPEN_ORDERS,
            )
            .await?;
        debug!(symbol, count = entries.len(), "open orders retrieved");
        Ok(entries.into_iter().map(OpenOrderEntry::into_resting).collect())
    }

    /// DELETE /fapi/v1/order (signed).
    #[instrument(skip(self), name = "binance::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> GatewayResult<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/order",
                &format!("symbol={symbol}&orderId={order_id}"),
                WEIGHT_CANCEL,
            )
            .await?;
        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }

    /// DELETE /fapi/v1/allOpenOrders (signed).
    #[instrument(skip(self), name = "binance::cancel_all_open_orders")]
    async fn cancel_all_open_orders(&self, symbol: &str) -> GatewayResult<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &format!("symbol={symbol}"),
                WEIGHT_CANCEL,
            )
            .await?;
        debug!(symbol, "all open orders cancelled");
        Ok(())
    }

    /// POST /fapi/v1/order (signed).
    #[instrument(
        skip(self, request),
        name = "binance::create_order",
        fields(symbol = %request.symbol, side = %request.side, order_type = %request.order_type)
    )]
    async fn create_order(&self, request: &OrderRequest) -> GatewayResult<OrderAck> {
        if !self.rate_limits.can_place_order() {
            return Err(GatewayError::RateLimited("order count limit reached".into()));
        }
        let params = self.order_params(request);
        self.rate_limits.record_order_sent();

        let resp: NewOrderResponse = self
            .send_signed(Method::POST, "/fapi/v1/order", &params, WEIGHT_NEW_ORDER)
            .await?;
        debug!(order_id = resp.order_id, status = %resp.status, "order placed");
        Ok(OrderAck {
            order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            status: resp.status,
        })
    }

    /// GET /fapi/v2/positionRisk (signed).
    #[instrument(skip(self), name = "binance::position_risk")]
    async fn position_risk(&self) -> GatewayResult<Vec<Position>> {
        let entries: Vec<PositionRiskEntry> = self
            .send_signed(Method::GET, "/fapi/v2/positionRisk", "", WEIGHT_POSITION_RISK)
            .await?;
        Ok(entries.into_iter().map(PositionRiskEntry::into_position).collect())
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("recv_window_ms", &self.recv_window_ms)
            .finish()
    }
}
