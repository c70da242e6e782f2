use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::time_util::Clock;
use crate::trading::adapter::{
    AccountSummary, Bracket, BrokerPosition, OrderAck, OrderStatus, Side, TradingAdapter,
};

#[derive(Debug, Clone)]
pub struct PaperTrade {
    pub order_id: String,
    pub idempotency_key: String,
    pub ticker: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub ts: i64,
    pub bracket: Option<Bracket>,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    qty: f64, // 带符号
    avg_price: f64,
}

struct LedgerState {
    cash: f64,
    positions: HashMap<String, PaperPosition>,
    seen_keys: HashSet<String>,
    marks: HashMap<String, f64>,
    trades: Vec<PaperTrade>,
}

/// 进程内纸面台账。AUTO_MODE 关闭与测试时替代真实券商：
/// 即刻按标记价成交，幂等键重复提交返回 Duplicate 且无副作用
pub struct PaperLedgerAdapter {
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl PaperLedgerAdapter {
    pub fn new(clock: Arc<dyn Clock>, initial_cash: f64) -> Self {
        info!("纸面台账初始化: 初始资金 ${:.0}", initial_cash);
        Self {
            clock,
            state: Mutex::new(LedgerState {
                cash: initial_cash,
                positions: HashMap::new(),
                seen_keys: HashSet::new(),
                marks: HashMap::new(),
                trades: Vec::new(),
            }),
        }
    }

    /// 更新标记价（行情摄取侧调用）
    pub async fn set_mark(&self, ticker: &str, price: f64) {
        let mut state = self.state.lock().await;
        state.marks.insert(ticker.to_string(), price);
    }

    /// 测试与报表用：全部成交记录
    pub async fn trades(&self) -> Vec<PaperTrade> {
        self.state.lock().await.trades.clone()
    }

    pub async fn position_qty(&self, ticker: &str) -> f64 {
        self.state
            .lock()
            .await
            .positions
            .get(ticker)
            .map(|p| p.qty)
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl TradingAdapter for PaperLedgerAdapter {
    async fn submit_market_order(
        &self,
        ticker: &str,
        side: Side,
        qty: f64,
        idempotency_key: &str,
        bracket: Option<Bracket>,
    ) -> Result<OrderAck, AppError> {
        if qty <= 0.0 {
            return Err(AppError::ContractViolation(format!(
                "下单数量非法: {} {}",
                ticker, qty
            )));
        }
        let mut state = self.state.lock().await;

        // 幂等：同键只成交一次
        if state.seen_keys.contains(idempotency_key) {
            return Ok(OrderAck {
                order_id: String::new(),
                status: OrderStatus::Duplicate,
                fill_price: None,
                filled_qty: 0.0,
            });
        }

        let mark = match state.marks.get(ticker) {
            Some(p) => *p,
            None => {
                return Ok(OrderAck {
                    order_id: String::new(),
                    status: OrderStatus::Rejected,
                    fill_price: None,
                    filled_qty: 0.0,
                })
            }
        };

        let signed_qty = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };

        // 现金与持仓即时更新
        state.cash -= signed_qty * mark;
        let entry = state
            .positions
            .entry(ticker.to_string())
            .or_insert(PaperPosition {
                qty: 0.0,
                avg_price: mark,
            });
        let new_qty = entry.qty + signed_qty;
        if entry.qty == 0.0 || entry.qty.signum() == signed_qty.signum() {
            // 加仓：均价按量加权
            let total = entry.qty.abs() + qty;
            if total > 0.0 {
                entry.avg_price = (entry.avg_price * entry.qty.abs() + mark * qty) / total;
            }
        }
        entry.qty = new_qty;
        if entry.qty == 0.0 {
            state.positions.remove(ticker);
        }

        let order_id = format!("paper-{}", Uuid::new_v4());
        state.seen_keys.insert(idempotency_key.to_string());
        let trade = PaperTrade {
            order_id: order_id.clone(),
            idempotency_key: idempotency_key.to_string(),
            ticker: ticker.to_string(),
            side,
            qty,
            price: mark,
            ts: self.clock.now_ms(),
            bracket,
        };
        info!(
            "纸面成交: {} {} {} @ {:.2}",
            trade.ticker,
            side.as_str(),
            qty,
            mark
        );
        state.trades.push(trade);

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Accepted,
            fill_price: Some(mark),
            filled_qty: qty,
        })
    }

    async fn get_positions(&self) -> Result<Vec<BrokerPosition>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .iter()
            .map(|(ticker, p)| BrokerPosition {
                ticker: ticker.clone(),
                qty: p.qty,
                avg_price: p.avg_price,
            })
            .collect())
    }

    async fn get_account(&self) -> Result<AccountSummary, AppError> {
        let state = self.state.lock().await;
        let mut equity = state.cash;
        for (ticker, p) in state.positions.iter() {
            let mark = state.marks.get(ticker).copied().unwrap_or(p.avg_price);
            equity += p.qty * mark;
        }
        Ok(AccountSummary {
            equity,
            cash: state.cash,
            buying_power: state.cash.max(0.0),
        })
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<(), AppError> {
        // 纸面市价单即刻成交，无在途可撤
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;

    #[tokio::test]
    async fn fills_update_cash_and_positions() {
        let clock = FixedClock::new(0);
        let ledger = PaperLedgerAdapter::new(clock, 100_000.0);
        ledger.set_mark("AAPL", 100.0).await;

        let ack = ledger
            .submit_market_order("AAPL", Side::Buy, 10.0, "k1", None)
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Accepted);
        assert_eq!(ledger.position_qty("AAPL").await, 10.0);

        let acct = ledger.get_account().await.unwrap();
        assert!((acct.cash - 99_000.0).abs() < 1e-9);
        assert!((acct.equity - 100_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_key_has_no_side_effects() {
        let clock = FixedClock::new(0);
        let ledger = PaperLedgerAdapter::new(clock, 100_000.0);
        ledger.set_mark("AAPL", 100.0).await;

        let first = ledger
            .submit_market_order("AAPL", Side::Buy, 10.0, "dup", None)
            .await
            .unwrap();
        assert_eq!(first.status, OrderStatus::Accepted);
        let second = ledger
            .submit_market_order("AAPL", Side::Buy, 10.0, "dup", None)
            .await
            .unwrap();
        assert_eq!(second.status, OrderStatus::Duplicate);
        assert_eq!(ledger.position_qty("AAPL").await, 10.0);
        assert_eq!(ledger.trades().await.len(), 1);
    }

    #[tokio::test]
    async fn closing_position_removes_it() {
        let clock = FixedClock::new(0);
        let ledger = PaperLedgerAdapter::new(clock, 100_000.0);
        ledger.set_mark("SQQQ", 20.0).await;

        ledger
            .submit_market_order("SQQQ", Side::Buy, 30.0, "open", None)
            .await
            .unwrap();
        ledger
            .submit_market_order("SQQQ", Side::Sell, 30.0, "close", None)
            .await
            .unwrap();
        assert_eq!(ledger.position_qty("SQQQ").await, 0.0);
        assert!(ledger.get_positions().await.unwrap().is_empty());
    }
}
