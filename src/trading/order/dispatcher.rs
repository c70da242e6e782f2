use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::app_config::redis as keys;
use crate::time_util::{self, Clock};
use crate::trading::adapter::{Bracket, OrderAck, OrderStatus, Side, TradingAdapter};
use crate::trading::cache::kv::KvStore;

/// 重试上限与退避基数
const MAX_ATTEMPTS: u32 = 3;

/// 下单意图（信号或篮子聚合产生）
#[derive(Debug, Clone)]
pub struct OrderIntent {
    /// 幂等指纹的来源ID：信号ID或篮子聚合键
    pub source_id: String,
    pub exec_symbol: String,
    pub side: Side,
    pub qty: f64,
    pub entry_ref_price: f64,
    pub bracket: Option<Bracket>,
}

/// 派发结果
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// 已提交并拿到回执
    Submitted(OrderAck),
    /// 幂等拒绝（同键已提交过），无副作用
    Duplicate,
    /// 休市被丢弃
    MarketClosed,
    /// 重试耗尽
    Failed(String),
    /// AUTO_MODE 关闭，只记录不提交
    LoggedOnly,
}

/// 订单派发器。幂等键 = 日期+标的+来源ID；
/// 先占键再发券商，瞬时错误指数退避重试，休市按配置丢弃
pub struct OrderDispatcher {
    broker: Arc<dyn TradingAdapter>,
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    auto_mode: bool,
    queue_on_market_closed: bool,
}

impl OrderDispatcher {
    pub fn new(
        broker: Arc<dyn TradingAdapter>,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        auto_mode: bool,
    ) -> Self {
        Self {
            broker,
            kv,
            clock,
            auto_mode,
            queue_on_market_closed: false,
        }
    }

    pub fn idempotency_fingerprint(&self, intent: &OrderIntent) -> String {
        let day = time_util::day_key(self.clock.now_ms());
        format!("{}:{}:{}", day, intent.exec_symbol, intent.source_id)
    }

    pub async fn dispatch(&self, intent: &OrderIntent) -> anyhow::Result<DispatchOutcome> {
        if intent.qty <= 0.0 {
            return Ok(DispatchOutcome::Failed(format!(
                "数量非法: {}",
                intent.qty
            )));
        }

        if !self.auto_mode {
            info!(
                "AUTO_MODE 关闭，仅记录意图: {} {} {}股 @ {:.2}",
                intent.exec_symbol,
                intent.side.as_str(),
                intent.qty,
                intent.entry_ref_price
            );
            return Ok(DispatchOutcome::LoggedOnly);
        }

        // 幂等占位：同键第二次进来直接拒绝，不打券商
        let fingerprint = self.idempotency_fingerprint(intent);
        let guard_key = keys::idempotency_key(&fingerprint);
        let ttl = time_util::secs_until_next_eastern_midnight(self.clock.now_ms());
        if !self.kv.set_nx_ex(&guard_key, "1", ttl).await? {
            info!("重复下单意图被幂等拒绝: {}", fingerprint);
            return Ok(DispatchOutcome::Duplicate);
        }

        // 有限重试 + 指数退避
        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                sleep(Duration::from_secs(1u64 << attempt)).await;
            }
            match self
                .broker
                .submit_market_order(
                    &intent.exec_symbol,
                    intent.side,
                    intent.qty,
                    &fingerprint,
                    intent.bracket,
                )
                .await
            {
                Ok(ack) => match ack.status {
                    OrderStatus::Accepted => {
                        info!(
                            "下单成功: {} {} {}股 (order_id={})",
                            intent.exec_symbol,
                            intent.side.as_str(),
                            intent.qty,
                            ack.order_id
                        );
                        return Ok(DispatchOutcome::Submitted(ack));
                    }
                    OrderStatus::Duplicate => {
                        return Ok(DispatchOutcome::Duplicate);
                    }
                    OrderStatus::MarketClosed => {
                        if self.queue_on_market_closed {
                            warn!("休市排队未启用实现，丢弃: {}", intent.exec_symbol);
                        }
                        // 释放幂等占位，开盘后的新意图可重新提交
                        self.kv.del(&guard_key).await?;
                        return Ok(DispatchOutcome::MarketClosed);
                    }
                    OrderStatus::Rejected => {
                        self.kv.del(&guard_key).await?;
                        return Ok(DispatchOutcome::Failed("券商拒单".to_string()));
                    }
                },
                Err(e) => {
                    last_err = e.to_string();
                    warn!(
                        "下单尝试{}失败: {} {}",
                        attempt + 1,
                        intent.exec_symbol,
                        last_err
                    );
                }
            }
        }

        // 重试耗尽：释放占位，审计记 external_error
        error!(
            "下单重试耗尽: {} {} ({})",
            intent.exec_symbol,
            intent.side.as_str(),
            last_err
        );
        self.kv.del(&guard_key).await?;
        Ok(DispatchOutcome::Failed(last_err))
    }
}
