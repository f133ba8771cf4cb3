use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::RwLock;

use super::Exchange;
use crate::config::BinanceSection;
use crate::error::BotError;
use crate::models::{pair_symbol, Fill, TradeSide};
use crate::Result;

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW_MS: u64 = 5000;

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    executed_qty: String,
    cummulative_quote_qty: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance spot REST client (USDT quote)
///
/// Signed endpoints use HMAC-SHA256 over the query string. Transient
/// failures are retried `retry_count` times with exponential back-off; a
/// market order keeps the same client order id across retries.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
    retry_count: u32,
    backoff: Duration,
    lot_steps: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl BinanceClient {
    pub fn new(settings: &BinanceSection, retry_count: u32, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BotError::ConfigInvalid(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retry_count,
            backoff: Duration::from_millis(settings.backoff_millis),
            lot_steps: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// `query&signature=<hex hmac>` for a signed request
    fn sign(&self, query: &str) -> Result<String> {
        let signature = sign_query(&self.api_secret, query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    /// Issue a request, retrying transient failures.
    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let mut last_error = BotError::ExchangeTransient("no attempt made".to_string());

        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                let wait = self.backoff * 2u32.pow(attempt - 1);
                tracing::warn!(
                    "Binance {} {}: {}, retrying in {}ms (attempt {}/{})",
                    method,
                    path,
                    last_error,
                    wait.as_millis(),
                    attempt,
                    self.retry_count
                );
                tokio::time::sleep(wait).await;
            }

            match self.send_once(method.clone(), path, params, signed).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => last_error = e,
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    async fn send_once<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let mut query = encode_params(params);
        if signed {
            let timestamp = chrono::Utc::now().timestamp_millis();
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("recvWindow={}&timestamp={}", RECV_WINDOW_MS, timestamp));
            query = self.sign(&query)?;
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| BotError::ExchangeTransient(format!("{}: {}", path, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| BotError::ExchangePermanent(format!("{}: unparseable response: {}", path, e)));
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ApiError>(&body)
            .map(|e| format!("code {}: {}", e.code, e.msg))
            .unwrap_or(body);

        if is_transient_status(status) {
            Err(BotError::ExchangeTransient(format!("{} HTTP {} {}", path, status.as_u16(), detail)))
        } else {
            Err(BotError::ExchangePermanent(format!("{} HTTP {} {}", path, status.as_u16(), detail)))
        }
    }

    /// LOT_SIZE step for a trading pair, cached after the first lookup
    async fn lot_step(&self, symbol: &str) -> Result<Decimal> {
        if let Some(step) = self.lot_steps.read().await.get(symbol) {
            return Ok(*step);
        }

        let info: ExchangeInfo = self
            .request(Method::GET, "/api/v3/exchangeInfo", &[("symbol", symbol.to_string())], false)
            .await?;

        let step = info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .and_then(|s| {
                s.filters
                    .iter()
                    .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some("LOT_SIZE"))
            })
            .and_then(|f| f.get("stepSize")?.as_str().map(str::to_string))
            .and_then(|s| Decimal::from_str(&s).ok())
            .ok_or_else(|| BotError::ExchangePermanent(format!("no LOT_SIZE filter for {}", symbol)))?;

        self.lot_steps.write().await.insert(symbol.to_string(), step);
        Ok(step)
    }

    async fn market_order(
        &self,
        asset: &str,
        side: TradeSide,
        amount_param: (&str, String),
    ) -> Result<Fill> {
        let symbol = pair_symbol(asset);
        let client_order_id = uuid::Uuid::new_v4().simple().to_string();
        let side_str = match side {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        };

        let params = [
            ("symbol", symbol.clone()),
            ("side", side_str.to_string()),
            ("type", "MARKET".to_string()),
            amount_param,
            ("newClientOrderId", client_order_id),
        ];

        let order: OrderResponse = self.request(Method::POST, "/api/v3/order", &params, true).await?;

        let qty = parse_amount(&order.executed_qty)?;
        let quote_qty = parse_amount(&order.cummulative_quote_qty)?;
        if qty <= 0.0 {
            return Err(BotError::ExchangePermanent(format!(
                "order {} for {} was not filled",
                order.order_id, symbol
            )));
        }

        tracing::info!(
            "💱 {} {} {:.8} @ {:.8} (quote {:.2}, order {})",
            side_str,
            symbol,
            qty,
            quote_qty / qty,
            quote_qty,
            order.order_id
        );

        Ok(Fill {
            asset: asset.to_string(),
            side,
            qty,
            avg_price: quote_qty / qty,
            quote_qty,
            order_id: order.order_id.to_string(),
        })
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn balances(&self) -> Result<BTreeMap<String, f64>> {
        let account: AccountResponse = self.request(Method::GET, "/api/v3/account", &[], true).await?;

        let mut balances = BTreeMap::new();
        for entry in account.balances {
            let total = parse_amount(&entry.free)? + parse_amount(&entry.locked)?;
            if total > 0.0 {
                balances.insert(entry.asset, total);
            }
        }
        Ok(balances)
    }

    async fn price(&self, asset: &str) -> Result<f64> {
        let ticker: TickerPrice = self
            .request(Method::GET, "/api/v3/ticker/price", &[("symbol", pair_symbol(asset))], false)
            .await?;
        parse_amount(&ticker.price)
    }

    async fn market_buy(&self, asset: &str, quote_amount: f64) -> Result<Fill> {
        let amount = Decimal::from_f64(quote_amount)
            .ok_or_else(|| BotError::ExchangePermanent(format!("invalid quote amount {}", quote_amount)))?
            .round_dp_with_strategy(2, RoundingStrategy::ToZero)
            .normalize();
        self.market_order(asset, TradeSide::Buy, ("quoteOrderQty", amount.to_string()))
            .await
    }

    async fn market_sell(&self, asset: &str, qty: f64) -> Result<Fill> {
        let step = self.lot_step(&pair_symbol(asset)).await?;
        let quantity = floor_to_step(qty, step)
            .ok_or_else(|| BotError::ExchangePermanent(format!("quantity {} of {} below lot size", qty, asset)))?;
        self.market_order(asset, TradeSide::Sell, ("quantity", quantity.to_string()))
            .await
    }
    async fn sellable_qty(&self, asset: &str, qty: f64) -> Result<f64> {
        let step = self.lot_step(&pair_symbol(asset)).await?;
        Ok(floor_to_step(qty, step).and_then(|q| q.to_f64()).unwrap_or(0.0))
    }
}

/// Hex HMAC-SHA256 of `query` under `secret`
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::ConfigInvalid(format!("failed to init signer: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Floor `qty` to a multiple of `step`; `None` when that leaves nothing to sell
pub fn floor_to_step(qty: f64, step: Decimal) -> Option<Decimal> {
    let qty = Decimal::from_f64(qty)?;
    if step <= Decimal::ZERO {
        return Some(qty.normalize());
    }
    let floored = ((qty / step).floor() * step).normalize();
    (floored > Decimal::ZERO).then_some(floored)
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_amount(raw: &str) -> Result<f64> {
    Decimal::from_str(raw)
        .ok()
        .and_then(|d| d.to_f64())
        .ok_or_else(|| BotError::ExchangePermanent(format!("unparseable amount '{}'", raw)))
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 418 | 429) || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(base_url: String, retry_count: u32) -> BinanceClient {
        let settings = BinanceSection {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            base_url,
            backoff_millis: 0,
        };
        BinanceClient::new(&settings, retry_count, 5).unwrap()
    }

    #[test]
    fn test_signature_matches_reference_vector() {
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign_query(secret, query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_floor_to_step() {
        let step = Decimal::from_str("0.01000000").unwrap();
        assert_eq!(floor_to_step(1.23456, step).unwrap().to_string(), "1.23");
        assert_eq!(floor_to_step(0.004, step), None);

        let whole = Decimal::from_str("1").unwrap();
        assert_eq!(floor_to_step(7.9, whole).unwrap().to_string(), "7");
    }

    #[tokio::test]
    async fn test_price_lookup() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::UrlEncoded("symbol".into(), "SOLUSDT".into()))
            .with_status(200)
            .with_body(r#"{"symbol":"SOLUSDT","price":"142.55000000"}"#)
            .create_async()
            .await;

        let price = client(server.url(), 0).price("SOL").await.unwrap();
        mock.assert_async().await;
        assert_eq!(price, 142.55);
    }

    #[tokio::test]
    async fn test_balances_sum_free_and_locked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/account")
            .match_query(Matcher::Regex("signature=[0-9a-f]{64}".into()))
            .match_header("X-MBX-APIKEY", "key")
            .with_status(200)
            .with_body(
                r#"{"balances":[
                    {"asset":"USDT","free":"250.5","locked":"0"},
                    {"asset":"SOL","free":"1.5","locked":"0.5"},
                    {"asset":"DOGE","free":"0","locked":"0"}
                ]}"#,
            )
            .create_async()
            .await;

        let balances = client(server.url(), 0).balances().await.unwrap();
        assert_eq!(balances.get("USDT"), Some(&250.5));
        assert_eq!(balances.get("SOL"), Some(&2.0));
        assert!(!balances.contains_key("DOGE"));
    }

    #[tokio::test]
    async fn test_market_sell_floors_to_lot_size() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v3/exchangeInfo")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"symbols":[{"symbol":"SOLUSDT","filters":[
                    {"filterType":"PRICE_FILTER","tickSize":"0.01"},
                    {"filterType":"LOT_SIZE","stepSize":"0.01000000","minQty":"0.01"}
                ]}]}"#,
            )
            .create_async()
            .await;
        let order = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "SOLUSDT".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("quantity".into(), "1.23".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":42,"executedQty":"1.23","cummulativeQuoteQty":"123.0"}"#)
            .create_async()
            .await;

        let fill = client(server.url(), 0).market_sell("SOL", 1.23456).await.unwrap();
        order.assert_async().await;
        assert_eq!(fill.qty, 1.23);
        assert!((fill.avg_price - 100.0).abs() < 1e-9);
        assert_eq!(fill.order_id, "42");
    }

    #[tokio::test]
    async fn test_sellable_qty_below_one_step_is_zero() {
        let mut server = mockito::Server::new_async().await;
        let info = server
            .mock("GET", "/api/v3/exchangeInfo")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"symbols":[{"symbol":"ETHUSDT","filters":[
                    {"filterType":"LOT_SIZE","stepSize":"0.01000000","minQty":"0.01"}
                ]}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client(server.url(), 0);
        assert_eq!(client.sellable_qty("ETH", 0.009).await.unwrap(), 0.0);
        assert_eq!(client.sellable_qty("ETH", 1.009).await.unwrap(), 1.0);
        info.assert_async().await;
    }

    #[tokio::test]
    async fn test_insufficient_balance_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v3/order")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"code":-2010,"msg":"Account has insufficient balance for requested action."}"#)
            .expect(1)
            .create_async()
            .await;

        let result = client(server.url(), 3).market_buy("SOL", 100.0).await;
        mock.assert_async().await;

        let err = result.unwrap_err();
        assert!(matches!(err, BotError::ExchangePermanent(_)));
        assert!(err.to_string().contains("-2010"));
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_transient() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/ticker/price")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let result = client(server.url(), 2).price("SOL").await;
        mock.assert_async().await;
        assert!(matches!(result, Err(BotError::ExchangeTransient(_))));
    }
}
