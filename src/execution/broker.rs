// =============================================================================
// Broker — exchange REST surface behind a trait, Bybit v5 implementation
// =============================================================================
//
// The order manager talks to `dyn Broker` so execution logic is testable
// against a scripted mock.  `BybitClient` is the production implementation:
// HMAC-SHA256 signed requests against the v5 unified-trading API.
//
// SECURITY: the secret key is never logged or serialized.  Signed requests
// carry a 5000 ms recv-window to tolerate minor clock drift.
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use crate::types::OrderSide;

type HmacSha256 = Hmac<Sha256>;

/// Recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: &str = "5000";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "Market"),
            Self::Limit => write!(f, "Limit"),
        }
    }
}

/// A new-order request for linear perpetuals.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub qty: f64,
    /// Required for limit orders.
    pub price: Option<f64>,
    pub reduce_only: bool,
}

/// Acknowledgement of a placed order.  Market orders may report fills
/// immediately; limit orders usually only return the id.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub cum_exec_qty: Option<f64>,
    pub avg_price: Option<f64>,
}

/// Exchange-side life-cycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl FillState {
    fn parse(s: &str) -> Self {
        match s {
            "Filled" => Self::Filled,
            "PartiallyFilled" => Self::PartiallyFilled,
            "Cancelled" | "Deactivated" => Self::Cancelled,
            "Rejected" => Self::Rejected,
            _ => Self::New,
        }
    }
}

/// Result of an order-status query.
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub state: FillState,
    pub cum_exec_qty: Option<f64>,
    pub avg_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

/// Minimal exchange surface the engine needs.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Last traded price from the public tickers endpoint.
    async fn last_price(&self, symbol: &str) -> Result<f64>;

    /// Total available balance of the unified account, in USDT.
    async fn wallet_balance(&self) -> Result<f64>;

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Status by order id.  `None` means the order is no longer open
    /// (typically: it filled and left the open-orders book).
    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<Option<OrderStatus>>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Bybit v5 client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BybitClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BybitClient {
    /// Create a client against production or testnet.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let base_url = if testnet {
            "https://api-testnet.bybit.com".to_string()
        } else {
            "https://api.bybit.com".to_string()
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, "BybitClient initialised");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url,
            client,
        }
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// HMAC-SHA256 hex signature of `timestamp + api_key + recv_window + payload`.
    fn sign(&self, timestamp: u64, payload: &str) -> String {
        let message = format!("{timestamp}{}{RECV_WINDOW}{payload}", self.api_key);
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signed GET; `query` must already be url-encoded.
    async fn signed_get(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        let timestamp = Self::timestamp_ms();
        let signature = self.sign(timestamp, query);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;
        Self::check_ret_code(path, body)
    }

    /// Signed POST with a JSON body.
    async fn signed_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let timestamp = Self::timestamp_ms();
        let payload = body.to_string();
        let signature = self.sign(timestamp, &payload);
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;
        Self::check_ret_code(path, body)
    }

    /// Public (unsigned) GET.
    async fn public_get(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;
        Self::check_ret_code(path, body)
    }

    fn check_ret_code(path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let ret_code = body["retCode"].as_i64().unwrap_or(-1);
        if ret_code != 0 {
            let ret_msg = body["retMsg"].as_str().unwrap_or("unknown");
            anyhow::bail!("Bybit {path} returned retCode {ret_code}: {ret_msg}");
        }
        Ok(body)
    }

    fn parse_opt_f64(val: &serde_json::Value) -> Option<f64> {
        val.as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| *v > 0.0)
    }
}

#[async_trait]
impl Broker for BybitClient {
    #[instrument(skip(self), name = "bybit::last_price")]
    async fn last_price(&self, symbol: &str) -> Result<f64> {
        let body = self
            .public_get(
                "/v5/market/tickers",
                &format!("category=linear&symbol={symbol}"),
            )
            .await?;

        let price = body["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
            .and_then(|entry| entry["lastPrice"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .context("tickers response missing lastPrice")?;

        debug!(symbol, price, "last price fetched");
        Ok(price)
    }

    #[instrument(skip(self), name = "bybit::wallet_balance")]
    async fn wallet_balance(&self) -> Result<f64> {
        let body = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;

        let balance = body["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
            .and_then(|entry| entry["totalAvailableBalance"].as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .context("wallet-balance response missing totalAvailableBalance")?;

        debug!(balance, "wallet balance fetched");
        Ok(balance)
    }

    #[instrument(skip(self, request), name = "bybit::place_order")]
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let mut body = serde_json::json!({
            "category": "linear",
            "symbol": request.symbol,
            "side": request.side.to_string(),
            "orderType": request.order_type.to_string(),
            "qty": request.qty.to_string(),
            "timeInForce": "GTC",
            "reduceOnly": request.reduce_only,
            "orderLinkId": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(price) = request.price {
            body["price"] = serde_json::Value::String(price.to_string());
        }

        debug!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            qty = request.qty,
            reduce_only = request.reduce_only,
            "placing order"
        );

        let resp = self.signed_post("/v5/order/create", body).await?;
        let result = &resp["result"];

        let order_id = result["orderId"]
            .as_str()
            .context("order response missing orderId")?
            .to_string();

        Ok(OrderAck {
            order_id,
            cum_exec_qty: Self::parse_opt_f64(&result["cumExecQty"]),
            avg_price: Self::parse_opt_f64(&result["avgPrice"]),
        })
    }

    #[instrument(skip(self), name = "bybit::order_status")]
    async fn order_status(&self, symbol: &str, order_id: &str) -> Result<Option<OrderStatus>> {
        let body = self
            .signed_get(
                "/v5/order/realtime",
                &format!("category=linear&symbol={symbol}&orderId={order_id}"),
            )
            .await?;

        let Some(entry) = body["result"]["list"]
            .as_array()
            .and_then(|list| list.first())
        else {
            // Not in the open-order book any more: treated as filled upstream.
            return Ok(None);
        };

        let state = FillState::parse(entry["orderStatus"].as_str().unwrap_or(""));
        Ok(Some(OrderStatus {
            state,
            cum_exec_qty: Self::parse_opt_f64(&entry["cumExecQty"]),
            avg_price: Self::parse_opt_f64(&entry["avgPrice"]),
        }))
    }

    #[instrument(skip(self), name = "bybit::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        });
        self.signed_post("/v5/order/cancel", body).await?;
        debug!(symbol, order_id, "order cancelled");
        Ok(())
    }
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Scripted mock broker for execution tests
// =============================================================================
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    /// Scripted outcome for one `place_order` call.
    pub(crate) enum PlaceOutcome {
        Ok,
        Err(String),
    }

    /// A broker whose responses are queued by the test.
    ///
    /// Defaults when a queue is empty: `place_order` succeeds with a fresh
    /// id, `order_status` reports a full fill with no price override.
    pub(crate) struct MockBroker {
        prices: Mutex<HashMap<String, f64>>,
        balance: Mutex<f64>,
        place_script: Mutex<VecDeque<PlaceOutcome>>,
        status_script: Mutex<VecDeque<Option<OrderStatus>>>,
        next_id: Mutex<u64>,
        pub placed: Mutex<Vec<OrderRequest>>,
        pub cancelled: Mutex<Vec<String>>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self {
                prices: Mutex::new(HashMap::new()),
                balance: Mutex::new(10_000.0),
                place_script: Mutex::new(VecDeque::new()),
                status_script: Mutex::new(VecDeque::new()),
                next_id: Mutex::new(0),
                placed: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        pub fn set_price(&self, symbol: &str, price: f64) {
            self.prices.lock().insert(symbol.to_string(), price);
        }

        pub fn script_place(&self, outcome: PlaceOutcome) {
            self.place_script.lock().push_back(outcome);
        }

        pub fn script_status(&self, status: Option<OrderStatus>) {
            self.status_script.lock().push_back(status);
        }

        pub fn placed_orders(&self) -> Vec<OrderRequest> {
            self.placed.lock().clone()
        }

        pub fn cancel_count(&self) -> usize {
            self.cancelled.lock().len()
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        async fn last_price(&self, symbol: &str) -> Result<f64> {
            self.prices
                .lock()
                .get(symbol)
                .copied()
                .with_context(|| format!("no mock price for {symbol}"))
        }

        async fn wallet_balance(&self) -> Result<f64> {
            Ok(*self.balance.lock())
        }

        async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
            self.placed.lock().push(request.clone());
            let outcome = self
                .place_script
                .lock()
                .pop_front()
                .unwrap_or(PlaceOutcome::Ok);
            match outcome {
                PlaceOutcome::Ok => {
                    let mut id = self.next_id.lock();
                    *id += 1;
                    Ok(OrderAck {
                        order_id: format!("mock-{}", *id),
                        cum_exec_qty: Some(request.qty),
                        avg_price: request.price,
                    })
                }
                PlaceOutcome::Err(msg) => anyhow::bail!(msg),
            }
        }

        async fn order_status(&self, _symbol: &str, _order_id: &str) -> Result<Option<OrderStatus>> {
            Ok(self
                .status_script
                .lock()
                .pop_front()
                .unwrap_or(Some(OrderStatus {
                    state: FillState::Filled,
                    cum_exec_qty: None,
                    avg_price: None,
                })))
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
            self.cancelled.lock().push(order_id.to_string());
            Ok(())
        }
    }
}
