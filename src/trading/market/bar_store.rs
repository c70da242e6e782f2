use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::time_util;
use crate::trading::indicator::snapshot::{self, IndicatorSnapshot};
use crate::Bar;

/// 每票保留的K线根数（30秒粒度，至少覆盖1小时）
pub const BAR_RETENTION: usize = 240;

/// 滚动K线仓。单写者（行情摄取任务）多读者；
/// 按票独占一条 VecDeque，时间戳严格递增，迟到数据直接丢弃
pub struct BarStore {
    windows: DashMap<String, VecDeque<Bar>>,
    retention: usize,
}

impl BarStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            windows: DashMap::new(),
            retention: BAR_RETENTION,
        })
    }

    pub fn with_retention(retention: usize) -> Arc<Self> {
        Arc::new(Self {
            windows: DashMap::new(),
            retention,
        })
    }

    /// 追加一根完整K线。ts 未对齐的先落到30秒边界；
    /// 与现存同边界K线合并高低收量，旧于末根的丢弃
    pub fn append_bar(&self, ticker: &str, bar: Bar) {
        let aligned_ts = time_util::align_bar_ts(bar.ts());
        let mut window = self.windows.entry(ticker.to_string()).or_default();

        if let Some(last) = window.back_mut() {
            if aligned_ts < last.ts() {
                // 迟到数据，时间戳必须单调递增
                debug!(
                    "丢弃迟到K线: {} ts={} < last={}",
                    ticker,
                    aligned_ts,
                    last.ts()
                );
                return;
            }
            if aligned_ts == last.ts() {
                // 同一根K线内更新
                last.merge_bar(&bar);
                return;
            }
        }

        // 新边界开新K线
        let bar = match Bar::builder()
            .ts(aligned_ts)
            .o(bar.o())
            .h(bar.h())
            .l(bar.l())
            .c(bar.c())
            .v(bar.v())
            .spread_est(bar.spread_est())
            .build()
        {
            Ok(b) => b,
            Err(e) => {
                debug!("非法K线被拒: {} {}", ticker, e);
                return;
            }
        };
        window.push_back(bar);
        while window.len() > self.retention {
            window.pop_front();
        }
    }

    /// 单tick价格更新：落到对应30秒桶
    pub fn append_tick(&self, ticker: &str, ts_ms: i64, price: f64, volume: f64, spread_est: f64) {
        let bar = match Bar::builder()
            .ts(time_util::align_bar_ts(ts_ms))
            .o(price)
            .h(price)
            .l(price)
            .c(price)
            .v(volume)
            .spread_est(spread_est)
            .build()
        {
            Ok(b) => b,
            Err(_) => return,
        };
        self.append_bar(ticker, bar);
    }

    /// 借出窗口快照（克隆，读者之间无锁争用）
    pub fn window(&self, ticker: &str) -> Vec<Bar> {
        self.windows
            .get(ticker)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn window_len(&self, ticker: &str) -> usize {
        self.windows.get(ticker).map(|w| w.len()).unwrap_or(0)
    }

    pub fn latest_bar(&self, ticker: &str) -> Option<Bar> {
        self.windows.get(ticker).and_then(|w| w.back().cloned())
    }

    pub fn latest_price(&self, ticker: &str) -> Option<f64> {
        self.latest_bar(ticker).map(|b| b.c())
    }

    /// 指标快照，窗口不足返回 None
    pub fn indicators(&self, ticker: &str) -> Option<IndicatorSnapshot> {
        let window = self.window(ticker);
        snapshot::compute_snapshot(&window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bar(ts: i64, price: f64, vol: f64) -> Bar {
        Bar::builder()
            .ts(ts)
            .o(price)
            .h(price + 0.1)
            .l(price - 0.1)
            .c(price)
            .v(vol)
            .build()
            .unwrap()
    }

    #[test]
    fn bars_align_and_merge_within_boundary() {
        let store = BarStore::new();
        store.append_bar("AAPL", mk_bar(90_001, 100.0, 10.0));
        // 同一30秒桶内的tick合并
        store.append_bar("AAPL", mk_bar(119_000, 101.0, 5.0));
        assert_eq!(store.window_len("AAPL"), 1);
        let last = store.latest_bar("AAPL").unwrap();
        assert_eq!(last.ts(), 90_000);
        assert_eq!(last.c(), 101.0);
        assert_eq!(last.v(), 15.0);

        // 新边界开新K线
        store.append_bar("AAPL", mk_bar(120_000, 102.0, 7.0));
        assert_eq!(store.window_len("AAPL"), 2);
    }

    #[test]
    fn late_bars_are_discarded() {
        let store = BarStore::new();
        store.append_bar("AAPL", mk_bar(120_000, 100.0, 10.0));
        store.append_bar("AAPL", mk_bar(90_000, 99.0, 10.0));
        assert_eq!(store.window_len("AAPL"), 1);
        assert_eq!(store.latest_bar("AAPL").unwrap().ts(), 120_000);
    }

    #[test]
    fn retention_evicts_oldest() {
        let store = BarStore::with_retention(3);
        for i in 0..5 {
            store.append_bar("AAPL", mk_bar(i * 30_000, 100.0 + i as f64, 10.0));
        }
        assert_eq!(store.window_len("AAPL"), 3);
        let window = store.window("AAPL");
        assert_eq!(window[0].ts(), 2 * 30_000);
    }

    #[test]
    fn indicators_none_until_enough_bars() {
        let store = BarStore::new();
        for i in 0..10 {
            store.append_bar("AAPL", mk_bar(i * 30_000, 100.0, 10.0));
        }
        assert!(store.indicators("AAPL").is_none());
        for i in 10..60 {
            store.append_bar("AAPL", mk_bar(i * 30_000, 100.0 + i as f64 * 0.1, 10.0));
        }
        assert!(store.indicators("AAPL").is_some());
    }
}
