use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::trading::adapter::{
    AccountSummary, Bracket, BrokerPosition, OrderAck, OrderStatus, Side, TradingAdapter,
};

const BROKER_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaOrderResp {
    id: String,
    status: String,
    #[serde(default)]
    filled_avg_price: Option<String>,
    #[serde(default)]
    filled_qty: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaPositionResp {
    symbol: String,
    qty: String,
    avg_entry_price: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaAccountResp {
    equity: String,
    cash: String,
    buying_power: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct AlpacaErrorResp {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Alpaca 纸面交易适配器。凭证走环境变量，请求超时10秒。
/// client_order_id 即幂等键，券商侧对重复键返回已有订单
pub struct AlpacaBrokerAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl AlpacaBrokerAdapter {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("ALPACA_API_KEY")
            .map_err(|_| anyhow::anyhow!("ALPACA_API_KEY must be set"))?;
        let api_secret = env::var("ALPACA_API_SECRET")
            .map_err(|_| anyhow::anyhow!("ALPACA_API_SECRET must be set"))?;
        let base_url = env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(BROKER_TIMEOUT_SECS))
                .build()
                .expect("reqwest client build failed"),
            base_url,
            api_key,
            api_secret,
        })
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, String), AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .client
            .request(method, &url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
            .header("Content-Type", "application/json");
        if let Some(b) = body {
            builder = builder.json(&b);
        }
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    fn parse_error(text: &str) -> String {
        serde_json::from_str::<AlpacaErrorResp>(text)
            .map(|e| e.message)
            .unwrap_or_else(|_| text.to_string())
    }
}

#[async_trait]
impl TradingAdapter for AlpacaBrokerAdapter {
    async fn submit_market_order(
        &self,
        ticker: &str,
        side: Side,
        qty: f64,
        idempotency_key: &str,
        bracket: Option<Bracket>,
    ) -> Result<OrderAck, AppError> {
        let mut body = json!({
            "symbol": ticker,
            "qty": format!("{}", qty),
            "side": side.as_str(),
            "type": "market",
            "time_in_force": "day",
            "client_order_id": idempotency_key,
        });
        if let Some(br) = bracket {
            body["order_class"] = json!("bracket");
            body["stop_loss"] = json!({ "stop_price": format!("{:.2}", br.stop) });
            body["take_profit"] = json!({ "limit_price": format!("{:.2}", br.target) });
        }

        let (status, text) = self
            .send_request(Method::POST, "/v2/orders", Some(body))
            .await?;
        info!("alpaca submit_order {} {}: {}", ticker, status, text);

        if status.is_success() {
            let resp: AlpacaOrderResp = serde_json::from_str(&text)
                .map_err(|e| AppError::BrokerApiError(format!("下单响应解析失败: {}", e)))?;
            return Ok(OrderAck {
                order_id: resp.id,
                status: OrderStatus::Accepted,
                fill_price: resp
                    .filled_avg_price
                    .as_deref()
                    .and_then(|s| s.parse::<f64>().ok()),
                filled_qty: resp
                    .filled_qty
                    .as_deref()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0),
            });
        }

        let msg = Self::parse_error(&text);
        let lowered = msg.to_lowercase();
        // 边界收敛：把券商侧错误映射为内部状态
        if lowered.contains("client_order_id") && lowered.contains("unique") {
            warn!("重复幂等键被券商拒绝: {}", idempotency_key);
            return Ok(OrderAck {
                order_id: String::new(),
                status: OrderStatus::Duplicate,
                fill_price: None,
                filled_qty: 0.0,
            });
        }
        if lowered.contains("market is closed") || lowered.contains("market closed") {
            return Ok(OrderAck {
                order_id: String::new(),
                status: OrderStatus::MarketClosed,
                fill_price: None,
                filled_qty: 0.0,
            });
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(OrderAck {
                order_id: String::new(),
                status: OrderStatus::Rejected,
                fill_price: None,
                filled_qty: 0.0,
            });
        }
        Err(AppError::BrokerApiError(format!(
            "下单失败 {}: {}",
            status, msg
        )))
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, AppError> {
        let (status, text) = self.send_request(Method::GET, "/v2/positions", None).await?;
        if !status.is_success() {
            return Err(AppError::BrokerApiError(format!(
                "查询持仓失败 {}: {}",
                status,
                Self::parse_error(&text)
            )));
        }
        let raw: Vec<AlpacaPositionResp> = serde_json::from_str(&text)
            .map_err(|e| AppError::BrokerApiError(format!("持仓响应解析失败: {}", e)))?;
        let mut positions = Vec::with_capacity(raw.len());
        for p in raw {
            // 宽松记录转严格内部类型，坏数据当场报错
            let qty = p
                .qty
                .parse::<f64>()
                .map_err(|e| AppError::BrokerApiError(format!("持仓数量非法 {}: {}", p.symbol, e)))?;
            let avg_price = p.avg_entry_price.parse::<f64>().map_err(|e| {
                AppError::BrokerApiError(format!("持仓均价非法 {}: {}", p.symbol, e))
            })?;
            positions.push(BrokerPosition {
                ticker: p.symbol,
                qty,
                avg_price,
            });
        }
        Ok(positions)
    }

    async fn get_account(&self) -> Result<AccountSummary, AppError> {
        let (status, text) = self.send_request(Method::GET, "/v2/account", None).await?;
        if !status.is_success() {
            return Err(AppError::BrokerApiError(format!(
                "查询账户失败 {}: {}",
                status,
                Self::parse_error(&text)
            )));
        }
        let raw: AlpacaAccountResp = serde_json::from_str(&text)
            .map_err(|e| AppError::BrokerApiError(format!("账户响应解析失败: {}", e)))?;
        Ok(AccountSummary {
            equity: raw.equity.parse::<f64>().unwrap_or(0.0),
            cash: raw.cash.parse::<f64>().unwrap_or(0.0),
            buying_power: raw.buying_power.parse::<f64>().unwrap_or(0.0),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), AppError> {
        let path = format!("/v2/orders/{}", order_id);
        let (status, text) = self.send_request(Method::DELETE, &path, None).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(AppError::BrokerApiError(format!(
            "撤单失败 {}: {}",
            status,
            Self::parse_error(&text)
        )))
    }
}
