use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::time_util;
use crate::trading::adapter::{LastQuote, QuoteProvider};
use crate::Bar;

const QUOTE_TIMEOUT_SECS: u64 = 5;

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaBarDto {
    t: String, // RFC3339
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaBarsResp {
    #[serde(default)]
    bars: Vec<AlpacaBarDto>,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaTradeDto {
    t: String,
    p: f64,
    s: f64,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaLatestTradeResp {
    trade: AlpacaTradeDto,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaQuoteDto {
    #[serde(default)]
    ap: f64, // ask
    #[serde(default)]
    bp: f64, // bid
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaLatestQuoteResp {
    quote: AlpacaQuoteDto,
}

/// Alpaca 行情适配器（数据面）。30秒K线 + 最新成交/报价。
/// 请求超时5秒；宽松DTO在边界收成严格的内部 Bar
pub struct AlpacaQuotesProvider {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl AlpacaQuotesProvider {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("ALPACA_API_KEY")
            .map_err(|_| anyhow::anyhow!("ALPACA_API_KEY must be set"))?;
        let api_secret = env::var("ALPACA_API_SECRET")
            .map_err(|_| anyhow::anyhow!("ALPACA_API_SECRET must be set"))?;
        let base_url = env::var("ALPACA_DATA_URL")
            .unwrap_or_else(|_| "https://data.alpaca.markets".to_string());
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(QUOTE_TIMEOUT_SECS))
                .build()
                .expect("reqwest client build failed"),
            base_url,
            api_key,
            api_secret,
        })
    }

    async fn get_json<T: for<'a> Deserialize<'a>>(&self, path: &str) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(Method::GET, &url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .send()
            .await
            .map_err(|e| AppError::QuoteApiError(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::QuoteApiError(e.to_string()))?;
        if status != StatusCode::OK {
            return Err(AppError::QuoteApiError(format!(
                "行情请求失败 {} {}: {}",
                path, status, text
            )));
        }
        serde_json::from_str::<T>(&text)
            .map_err(|e| AppError::QuoteApiError(format!("行情响应解析失败 {}: {}", path, e)))
    }

    fn rfc3339_to_ms(t: &str) -> Result<i64, AppError> {
        chrono::DateTime::parse_from_rfc3339(t)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| AppError::QuoteApiError(format!("时间戳非法 {}: {}", t, e)))
    }
}

#[async_trait]
impl QuoteProvider for AlpacaQuotesProvider {
    async fn get_bars(&self, ticker: &str, since_ts: i64) -> Result<Vec<Bar>, AppError> {
        let start = chrono::DateTime::from_timestamp_millis(since_ts)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        let path = format!(
            "/v2/stocks/{}/bars?timeframe=30Sec&start={}&limit=200&feed=iex",
            ticker, start
        );
        let resp: AlpacaBarsResp = self.get_json(&path).await?;
        debug!("get_bars {}: {}根", ticker, resp.bars.len());

        let mut bars = Vec::with_capacity(resp.bars.len());
        for dto in resp.bars {
            let ts = Self::rfc3339_to_ms(&dto.t)?;
            // 严格校验，坏K线直接报错让本tick失败重试
            let bar = Bar::builder()
                .ts(time_util::align_bar_ts(ts))
                .o(dto.o)
                .h(dto.h)
                .l(dto.l)
                .c(dto.c)
                .v(dto.v)
                .build()
                .map_err(|e| AppError::QuoteApiError(format!("K线非法 {}: {}", ticker, e)))?;
            bars.push(bar);
        }
        Ok(bars)
    }

    async fn get_last_price(&self, ticker: &str) -> Result<LastQuote, AppError> {
        let trade_path = format!("/v2/stocks/{}/trades/latest?feed=iex", ticker);
        let trade: AlpacaLatestTradeResp = self.get_json(&trade_path).await?;
        let ts = Self::rfc3339_to_ms(&trade.trade.t)?;

        // 点差估计尽力而为，拿不到就记0
        let spread_est = match self
            .get_json::<AlpacaLatestQuoteResp>(&format!(
                "/v2/stocks/{}/quotes/latest?feed=iex",
                ticker
            ))
            .await
        {
            Ok(q) if q.quote.ap > 0.0 && q.quote.bp > 0.0 => (q.quote.ap - q.quote.bp).max(0.0),
            _ => 0.0,
        };

        Ok(LastQuote {
            price: trade.trade.p,
            ts,
            spread_est,
        })
    }
}
