use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::time_util::Clock;
use crate::trading::adapter::QuoteProvider;
use crate::trading::cache::rate_limiter::ApiRateLimiter;
use crate::trading::market::bar_store::BarStore;
use crate::trading::market::tier::{TickerTier, UniversePartition};

/// 回看窗口：首次拉取时补最近30分钟
const BACKFILL_MS: i64 = 30 * 60 * 1000;

/// 行情摄取器。分层节奏轮询，先过令牌桶再发请求；
/// 失败（网络/空结果）不推进摄取时间戳，下个tick自动重试
pub struct QuoteIngestor {
    provider: Arc<dyn QuoteProvider>,
    bar_store: Arc<BarStore>,
    limiter: Arc<ApiRateLimiter>,
    clock: Arc<dyn Clock>,
    universe: UniversePartition,
    last_ingest_ms: DashMap<String, i64>,
}

impl QuoteIngestor {
    pub fn new(
        provider: Arc<dyn QuoteProvider>,
        bar_store: Arc<BarStore>,
        limiter: Arc<ApiRateLimiter>,
        clock: Arc<dyn Clock>,
        universe: UniversePartition,
    ) -> Self {
        Self {
            provider,
            bar_store,
            limiter,
            clock,
            universe,
            last_ingest_ms: DashMap::new(),
        }
    }

    pub fn universe(&self) -> &UniversePartition {
        &self.universe
    }

    fn due(&self, ticker: &str, cadence_secs: i64, now_ms: i64) -> bool {
        match self.last_ingest_ms.get(ticker) {
            Some(last) => now_ms - *last >= cadence_secs * 1000,
            None => true,
        }
    }

    /// 一轮轮询。返回成功更新的标的数
    pub async fn poll_tick(&self) -> usize {
        let now = self.clock.now_ms();
        let mut updated = 0;

        for (ticker, tier) in self.universe.polled_tickers() {
            let cadence = match self.universe.cadence_secs(tier) {
                Some(c) => c,
                None => continue,
            };
            if !self.due(&ticker, cadence, now) {
                continue;
            }

            // 令牌不足：跳过本tick，不重试不阻塞
            match self.limiter.try_consume(tier.token_tier(), 1).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("限流跳过: {} ({})", ticker, tier.as_str());
                    continue;
                }
                Err(e) => {
                    warn!("令牌桶异常: {} {}", ticker, e);
                    continue;
                }
            }

            if self.ingest_once(&ticker).await {
                updated += 1;
            }
        }
        updated
    }

    /// Bench 标的事件驱动拉取（EDGAR 等触发）
    pub async fn ingest_on_event(&self, ticker: &str) -> bool {
        let tier = match self.universe.tier_of(ticker) {
            Some(t) => t,
            None => return false,
        };
        match self.limiter.try_consume(tier.token_tier(), 1).await {
            Ok(true) => self.ingest_once(ticker).await,
            _ => {
                debug!("事件拉取被限流: {}", ticker);
                false
            }
        }
    }

    /// 单票拉取一次。成功才推进摄取时间戳
    async fn ingest_once(&self, ticker: &str) -> bool {
        let now = self.clock.now_ms();
        let since = self
            .bar_store
            .latest_bar(ticker)
            .map(|b| b.ts())
            .unwrap_or(now - BACKFILL_MS);

        match self.provider.get_bars(ticker, since).await {
            Ok(bars) if !bars.is_empty() => {
                for bar in bars {
                    self.bar_store.append_bar(ticker, bar);
                }
                self.last_ingest_ms.insert(ticker.to_string(), now);
                true
            }
            Ok(_) => {
                // 空结果不算成功，时间戳不动，下个tick重试
                debug!("行情为空: {}", ticker);
                false
            }
            Err(e) => {
                warn!("行情拉取失败: {} {}", ticker, e);
                false
            }
        }
    }
}
