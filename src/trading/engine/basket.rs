use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::app_config::settings::{BasketConfig, Settings};
use crate::time_util::Clock;
use crate::trading::adapter::BrokerPosition;
use crate::trading::cache::locks::EtfLockGuard;
use crate::trading::engine::suppression::SuppressReason;

/// 窗口内一条做空信号（每 (ticker, tick) 至多一条）
#[derive(Debug, Clone)]
struct BasketEntry {
    ticker: String,
    score: f64,
    tick_ts: i64,
}

#[derive(Debug, Default)]
struct BasketWindow {
    entries: Vec<BasketEntry>,
    /// 聚合条件连续满足的tick数，防一次性毛刺
    consecutive_ticks: u32,
}

/// 篮子聚合后的反向ETF进场
#[derive(Debug, Clone)]
pub struct BasketFire {
    pub basket_id: String,
    pub exec_symbol: String,
    pub mean_score: f64,
    pub distinct_tickers: usize,
    pub contributing: Vec<String>,
    pub lock_token: String,
}

/// 单个篮子在一个tick的评估结果
#[derive(Debug, Clone)]
pub enum BasketOutcome {
    /// 条件达成两个连续tick，锁已持有，可下单
    Fired(BasketFire),
    /// 本tick条件满足但还差连续性
    Waiting,
    /// 条件不满足（正常累计中）
    Idle,
    /// 条件满足但被挡（锁被占/已持仓/成分股多头冲突）
    Blocked(SuppressReason),
}

/// 篮子聚合器：个股做空信号不直接下单，只进窗口；
/// 四个条件在两个连续tick都成立才换成一笔反向ETF买入。
/// 窗口由本组件独占持有
pub struct BasketAggregator {
    baskets: Vec<BasketConfig>,
    member_index: HashMap<String, Vec<usize>>,
    windows: Mutex<HashMap<String, BasketWindow>>,
    etf_lock: EtfLockGuard,
    etf_lock_ttl_seconds: i64,
    clock: Arc<dyn Clock>,
}

impl BasketAggregator {
    pub fn new(settings: &Settings, etf_lock: EtfLockGuard, clock: Arc<dyn Clock>) -> Self {
        let mut member_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, basket) in settings.baskets.iter().enumerate() {
            for member in &basket.members {
                member_index.entry(member.clone()).or_default().push(idx);
            }
        }
        info!(
            "篮子聚合器初始化: {}个篮子",
            settings.baskets.len()
        );
        Self {
            baskets: settings.baskets.clone(),
            member_index,
            windows: Mutex::new(HashMap::new()),
            etf_lock,
            etf_lock_ttl_seconds: settings.etf_lock_ttl_seconds,
            clock,
        }
    }

    /// 该票是否某个篮子的成员
    pub fn is_basket_member(&self, ticker: &str) -> bool {
        self.member_index.contains_key(ticker)
    }

    /// 该票是否指定篮子的成员
    pub fn is_member_of(&self, basket_id: &str, ticker: &str) -> bool {
        self.baskets
            .iter()
            .any(|b| b.basket_id == basket_id && b.members.iter().any(|m| m == ticker))
    }

    /// 接收一条个股做空信号。返回是否进入了任一篮子窗口
    pub async fn observe_short(&self, ticker: &str, score: f64, tick_ts: i64) -> bool {
        let basket_idxs = match self.member_index.get(ticker) {
            Some(v) => v.clone(),
            None => return false,
        };
        let mut windows = self.windows.lock().await;
        for idx in basket_idxs {
            let basket = &self.baskets[idx];
            let window = windows.entry(basket.basket_id.clone()).or_default();
            // 同 (ticker, tick) 去重
            if window
                .entries
                .iter()
                .any(|e| e.ticker == ticker && e.tick_ts == tick_ts)
            {
                continue;
            }
            window.entries.push(BasketEntry {
                ticker: ticker.to_string(),
                score,
                tick_ts,
            });
            debug!(
                "篮子吸收做空信号: {} <- {} ({:.3})",
                basket.basket_id, ticker, score
            );
        }
        true
    }

    fn conditions_met(basket: &BasketConfig, window: &BasketWindow) -> (bool, f64, usize) {
        if window.entries.is_empty() {
            return (false, 0.0, 0);
        }
        let mut distinct: Vec<&str> = window.entries.iter().map(|e| e.ticker.as_str()).collect();
        distinct.sort();
        distinct.dedup();
        let distinct_count = distinct.len();

        let total = window.entries.len() as f64;
        let neg = window.entries.iter().filter(|e| e.score < 0.0).count() as f64;
        let mean = window.entries.iter().map(|e| e.score).sum::<f64>() / total;

        let ok = distinct_count >= basket.min_signals
            && neg / total >= basket.neg_fraction
            && mean <= basket.mean_threshold;
        (ok, mean, distinct_count)
    }

    /// 每个信号tick结束时调用一次。内部推进连续tick计数并尝试发射
    pub async fn evaluate_tick(
        &self,
        tick_ts: i64,
        positions: &[BrokerPosition],
    ) -> Vec<(String, BasketOutcome)> {
        let mut outcomes = Vec::new();
        let mut windows = self.windows.lock().await;

        for basket in &self.baskets {
            let window = windows.entry(basket.basket_id.clone()).or_default();

            // 窗口滑动：只留 window_seconds 内的条目
            let horizon = tick_ts - basket.window_seconds * 1000;
            window.entries.retain(|e| e.tick_ts > horizon);

            let (ok, mean, distinct) = Self::conditions_met(basket, window);
            if !ok {
                window.consecutive_ticks = 0;
                outcomes.push((basket.basket_id.clone(), BasketOutcome::Idle));
                continue;
            }

            // 条件 (d)：未被单飞锁占用（锁优先于持仓判定，刚发射完的篮子归因到锁）
            match self.etf_lock.is_locked(&basket.target_etf).await {
                Ok(true) => {
                    window.consecutive_ticks = 0;
                    outcomes.push((
                        basket.basket_id.clone(),
                        BasketOutcome::Blocked(SuppressReason::EtfLock),
                    ));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    debug!("ETF锁查询失败: {} {}", basket.target_etf, e);
                    outcomes.push((
                        basket.basket_id.clone(),
                        BasketOutcome::Blocked(SuppressReason::ExternalError),
                    ));
                    continue;
                }
            }

            // 条件 (d)：目标ETF未持仓
            let held = positions
                .iter()
                .any(|p| p.ticker == basket.target_etf && p.qty != 0.0);
            if held {
                window.consecutive_ticks = 0;
                outcomes.push((
                    basket.basket_id.clone(),
                    BasketOutcome::Blocked(SuppressReason::ConflictingPosition),
                ));
                continue;
            }

            window.consecutive_ticks += 1;
            if window.consecutive_ticks < 2 {
                debug!(
                    "篮子条件首次满足，等连续确认: {} mean={:.3} distinct={}",
                    basket.basket_id, mean, distinct
                );
                outcomes.push((basket.basket_id.clone(), BasketOutcome::Waiting));
                continue;
            }

            // 两个连续tick成立 → 抢锁发射
            let token = match self
                .etf_lock
                .acquire(&basket.target_etf, self.etf_lock_ttl_seconds)
                .await
            {
                Ok(Some(t)) => t,
                Ok(None) => {
                    window.consecutive_ticks = 0;
                    outcomes.push((
                        basket.basket_id.clone(),
                        BasketOutcome::Blocked(SuppressReason::EtfLock),
                    ));
                    continue;
                }
                Err(e) => {
                    debug!("ETF锁获取失败: {} {}", basket.target_etf, e);
                    outcomes.push((
                        basket.basket_id.clone(),
                        BasketOutcome::Blocked(SuppressReason::ExternalError),
                    ));
                    continue;
                }
            };

            // 成分股仍有多头 → 冲突，释放锁
            let conflicting_long = positions
                .iter()
                .any(|p| p.qty > 0.0 && basket.members.iter().any(|m| m == &p.ticker));
            if conflicting_long {
                let _ = self.etf_lock.release(&basket.target_etf, &token).await;
                window.consecutive_ticks = 0;
                outcomes.push((
                    basket.basket_id.clone(),
                    BasketOutcome::Blocked(SuppressReason::ConflictingPosition),
                ));
                continue;
            }

            let contributing: Vec<String> = {
                let mut v: Vec<String> =
                    window.entries.iter().map(|e| e.ticker.clone()).collect();
                v.sort();
                v.dedup();
                v
            };
            info!(
                "篮子聚合发射: {} -> 买入 {} (mean={:.3}, {}票)",
                basket.basket_id, basket.target_etf, mean, distinct
            );
            // 发射后清窗口与计数，等下一轮积累
            window.entries.clear();
            window.consecutive_ticks = 0;
            outcomes.push((
                basket.basket_id.clone(),
                BasketOutcome::Fired(BasketFire {
                    basket_id: basket.basket_id.clone(),
                    exec_symbol: basket.target_etf.clone(),
                    mean_score: mean,
                    distinct_tickers: distinct,
                    contributing,
                    lock_token: token,
                }),
            ));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;
    use crate::trading::cache::kv::MemoryKvStore;

    fn aggregator() -> (BasketAggregator, Arc<FixedClock>) {
        let clock = FixedClock::new(1_900_000_000_000);
        let kv: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new(clock.clone()));
        let settings = Settings::from_env();
        (
            BasketAggregator::new(&settings, EtfLockGuard::new(kv), clock.clone()),
            clock,
        )
    }

    async fn feed_megatech(agg: &BasketAggregator, tick: i64) {
        agg.observe_short("AAPL", -0.3, tick).await;
        agg.observe_short("MSFT", -0.4, tick).await;
        agg.observe_short("TSLA", -0.5, tick).await;
        agg.observe_short("META", -0.2, tick).await;
    }

    fn outcome_of<'a>(
        outcomes: &'a [(String, BasketOutcome)],
        basket: &str,
    ) -> &'a BasketOutcome {
        &outcomes.iter().find(|(b, _)| b == basket).unwrap().1
    }

    #[tokio::test]
    async fn fires_once_after_two_consecutive_ticks() {
        let (agg, clock) = aggregator();
        let t1 = clock.now_ms();
        feed_megatech(&agg, t1).await;

        // 第一个tick：条件满足但等连续确认
        let outcomes = agg.evaluate_tick(t1, &[]).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Waiting
        ));

        // 第二个tick：发射
        clock.advance_secs(30);
        let t2 = clock.now_ms();
        feed_megatech(&agg, t2).await;
        let outcomes = agg.evaluate_tick(t2, &[]).await;
        match outcome_of(&outcomes, "MEGATECH") {
            BasketOutcome::Fired(fire) => {
                assert_eq!(fire.exec_symbol, "SQQQ");
                assert!(fire.mean_score < -0.12);
                assert!(fire.distinct_tickers >= 3);
            }
            other => panic!("应当发射, 实际 {:?}", other),
        }

        // 锁持有期内后续tick被挡
        clock.advance_secs(30);
        let t3 = clock.now_ms();
        feed_megatech(&agg, t3).await;
        let outcomes = agg.evaluate_tick(t3, &[]).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Blocked(SuppressReason::EtfLock)
        ));
    }

    #[tokio::test]
    async fn one_tick_fluke_does_not_fire() {
        let (agg, clock) = aggregator();
        let t1 = clock.now_ms();
        feed_megatech(&agg, t1).await;
        let outcomes = agg.evaluate_tick(t1, &[]).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Waiting
        ));

        // 窗口过期后条件不再满足，连续计数归零
        clock.advance_secs(400);
        let t2 = clock.now_ms();
        let outcomes = agg.evaluate_tick(t2, &[]).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn insufficient_distinct_tickers_is_idle() {
        let (agg, clock) = aggregator();
        let t1 = clock.now_ms();
        agg.observe_short("AAPL", -0.5, t1).await;
        agg.observe_short("MSFT", -0.5, t1).await;
        let outcomes = agg.evaluate_tick(t1, &[]).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Idle
        ));
    }

    #[tokio::test]
    async fn held_etf_blocks_fire() {
        let (agg, clock) = aggregator();
        let held = vec![BrokerPosition {
            ticker: "SQQQ".to_string(),
            qty: 30.0,
            avg_price: 20.0,
        }];
        let t1 = clock.now_ms();
        feed_megatech(&agg, t1).await;
        let outcomes = agg.evaluate_tick(t1, &held).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Blocked(SuppressReason::ConflictingPosition)
        ));
    }

    #[tokio::test]
    async fn member_long_position_conflicts() {
        let (agg, clock) = aggregator();
        let longs = vec![BrokerPosition {
            ticker: "AAPL".to_string(),
            qty: 10.0,
            avg_price: 150.0,
        }];
        let t1 = clock.now_ms();
        feed_megatech(&agg, t1).await;
        agg.evaluate_tick(t1, &longs).await;

        clock.advance_secs(30);
        let t2 = clock.now_ms();
        feed_megatech(&agg, t2).await;
        let outcomes = agg.evaluate_tick(t2, &longs).await;
        assert!(matches!(
            outcome_of(&outcomes, "MEGATECH"),
            BasketOutcome::Blocked(SuppressReason::ConflictingPosition)
        ));
    }

    #[tokio::test]
    async fn dedup_per_ticker_per_tick() {
        let (agg, clock) = aggregator();
        let t1 = clock.now_ms();
        // 同tick重复喂同一票
        agg.observe_short("AAPL", -0.3, t1).await;
        agg.observe_short("AAPL", -0.3, t1).await;
        agg.observe_short("AAPL", -0.3, t1).await;
        let windows = agg.windows.lock().await;
        assert_eq!(windows.get("MEGATECH").unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn non_member_ignored() {
        let (agg, _clock) = aggregator();
        assert!(!agg.observe_short("XOM", -0.5, 0).await);
        assert!(agg.is_basket_member("NVDA"));
        assert!(!agg.is_basket_member("XOM"));
    }
}
