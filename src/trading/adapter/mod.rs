pub mod alpaca_broker;
pub mod alpaca_quotes;
pub mod insight_client;
pub mod paper_ledger;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::Bar;

/// 买卖方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// 账户概要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
}

/// 券商侧持仓（qty 带符号，空头为负）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub ticker: String,
    pub qty: f64,
    pub avg_price: f64,
}

/// 下单回执状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Accepted,
    Rejected,
    MarketClosed,
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
    pub filled_qty: f64,
}

/// 市价单附带的止损/止盈括号
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bracket {
    pub stop: f64,
    pub target: f64,
}

/// 最新报价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastQuote {
    pub price: f64,
    pub ts: i64,
    pub spread_est: f64,
}

/// 券商适配器。幂等：同一 idempotency_key 的重复提交返回 Duplicate 且无副作用
#[async_trait]
pub trait TradingAdapter: Send + Sync {
    async fn submit_market_order(
        &self,
        ticker: &str,
        side: Side,
        qty: f64,
        idempotency_key: &str,
        bracket: Option<Bracket>,
    ) -> Result<OrderAck, AppError>;

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, AppError>;

    async fn get_account(&self) -> Result<AccountSummary, AppError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), AppError>;
}

/// 行情提供方。30秒对齐的K线 + 最新价
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn get_bars(&self, ticker: &str, since_ts: i64) -> Result<Vec<Bar>, AppError>;

    async fn get_last_price(&self, ticker: &str) -> Result<LastQuote, AppError>;
}

/// LLM 分析上下文
#[derive(Debug, Clone)]
pub struct InsightContext {
    pub ticker: String,
    pub event_type: String,
}

/// LLM 返回的情绪结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightResult {
    pub sentiment: f64,
    pub trigger: String,
    pub horizon_minutes: i64,
    pub summary: String,
}

impl InsightResult {
    /// 边界收紧：sentiment ∈ [-1,1]，horizon ∈ [15,480]
    pub fn normalized(mut self) -> Self {
        self.sentiment = self.sentiment.max(-1.0).min(1.0);
        self.horizon_minutes = self.horizon_minutes.max(15).min(480);
        self
    }

    pub fn neutral() -> Self {
        Self {
            sentiment: 0.0,
            trigger: String::new(),
            horizon_minutes: 120,
            summary: String::new(),
        }
    }
}

/// 文本分析服务（外部门控，自身无状态）
#[async_trait]
pub trait InsightProvider: Send + Sync {
    async fn analyze(&self, text: &str, ctx: &InsightContext) -> Result<InsightResult, AppError>;
}
