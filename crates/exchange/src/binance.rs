use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{Balance, Candle, Decision, Error, ExchangeClient, OrderAck, Result};

const BASE_URL: &str = "https://api.binance.com";

/// How many candles one `get_candles` call asks for.
const CANDLE_LIMIT: usize = 500;

/// REST API client for Binance spot trading.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_base_url(api_key, secret, BASE_URL)
    }

    /// Point the client at a different endpoint, e.g. the spot testnet.
    pub fn with_base_url(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            http: Client::builder()
                .use_rustls_tls()
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    fn sign(&self, query: &str) -> String {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = if params.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{params}", self.base_url)
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query);
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query);
        let body = format!("{query}&signature={signature}");
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn get_candles(&self, symbol: &str, timeframe: &str) -> Result<Vec<Candle>> {
        let params = format!("symbol={symbol}&interval={timeframe}&limit={CANDLE_LIMIT}");
        let body = self.public_get("/api/v3/klines", &params).await?;
        parse_klines(&body)
    }

    async fn create_order(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
        side: Decision,
    ) -> Result<OrderAck> {
        // Immediate-or-cancel limit order at the decision price.
        let params = format!(
            "symbol={symbol}&side={side}&type=LIMIT&timeInForce=IOC&quantity={quantity}&price={price}"
        );
        debug!(symbol, %side, %quantity, %price, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;

        let resp: OrderResponse =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;
        Ok(OrderAck {
            symbol: resp.symbol,
            order_id: resp.order_id,
            client_order_id: resp.client_order_id,
            status: resp.status,
        })
    }

    async fn list_symbols(&self) -> Result<Vec<String>> {
        let body = self.public_get("/api/v3/exchangeInfo", "").await?;
        let info: ExchangeInfo =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;
        Ok(info.symbols.into_iter().map(|s| s.symbol).collect())
    }

    async fn get_balances(&self, assets: &[String]) -> Result<Vec<Balance>> {
        let body = self.signed_get("/api/v3/account", "").await?;
        let account: AccountResponse =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;

        let balances = account
            .balances
            .into_iter()
            .filter(|b| assets.iter().any(|a| *a == b.asset))
            .map(|b| {
                Ok(Balance {
                    asset: b.asset,
                    free: b.free.parse::<Decimal>()?,
                    locked: b.locked.parse::<Decimal>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(balances)
    }
}

/// Parse the kline endpoint's response: an array of 12-element rows mixing
/// integers and decimal strings.
pub(crate) fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    type Row = (
        i64,    // open time (ms)
        String, // open
        String, // high
        String, // low
        String, // close
        String, // volume
        i64,    // close time (ms)
        String, // quote asset volume
        i64,    // number of trades
        String, // taker buy base volume
        String, // taker buy quote volume
        serde_json::Value, // unused
    );

    let rows: Vec<Row> = serde_json::from_str(body).map_err(|e| Error::Exchange(e.to_string()))?;
    rows.into_iter()
        .map(|row| {
            Ok(Candle {
                open_time: timestamp_from_ms(row.0)?,
                open: row.1.parse::<Decimal>()?,
                high: row.2.parse::<Decimal>()?,
                low: row.3.parse::<Decimal>()?,
                close: row.4.parse::<Decimal>()?,
                volume: row.5.parse::<Decimal>()?,
                close_time: timestamp_from_ms(row.6)?,
            })
        })
        .collect()
}

pub(crate) fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::Exchange(format!("bad timestamp: {ms}")))
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    client_order_id: String,
    status: String,
}

#[derive(Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Deserialize)]
struct SymbolInfo {
    symbol: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_kline_rows() {
        let body = r#"[
            [1654041600000,"5","6","4","5.5","100",1654041659999,"550",42,"60","330","0"],
            [1654041660000,"5.5","7","5","6","80",1654041719999,"480",17,"40","240","0"]
        ]"#;

        let candles = parse_klines(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, dec!(5));
        assert_eq!(candles[0].close, dec!(5.5));
        assert_eq!(candles[1].high, dec!(7));
        assert_eq!(
            candles[0].open_time,
            Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_kline_payload() {
        assert!(parse_klines("not json").is_err());
        assert!(parse_klines(r#"[[1,"x"]]"#).is_err());
    }
}
