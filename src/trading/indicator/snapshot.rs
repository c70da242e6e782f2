use ta::indicators::{BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence};
use ta::Next;

use crate::trading::indicator::adx::Adx;
use crate::trading::indicator::atr::Atr;
use crate::trading::indicator::rsi_indicator::RsiIndicator;
use crate::trading::indicator::volume_indicator::{VolumeRatioIndicator, VolumeZScoreIndicator};
use crate::trading::indicator::vwap_indicator;
use crate::Bar;

/// 指标齐备所需的最少K线数（受 EMA26/MACD 约束）
pub const MIN_BARS_FOR_SNAPSHOT: usize = 30;

pub const EMA_FAST_PERIOD: usize = 12;
pub const EMA_SLOW_PERIOD: usize = 26;
pub const RSI_PERIOD: usize = 14;
pub const BB_PERIOD: usize = 20;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const VOLUME_Z_PERIOD: usize = 20;

/// 单票单tick的指标快照。窗口不足时整体为 None，上游以 insufficient_history 拦截
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub bar_ts: i64,
    pub current_price: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd_histogram: f64,
    pub rsi: f64,
    /// 布林带内位置 0=下轨 0.5=中轨 1=上轨（可越界）
    pub bb_position: f64,
    pub atr: f64,
    pub adx: f64,
    pub vwap_deviation: f64,
    pub volume_z: f64,
    pub volume_ratio: f64,
    /// 近10根K线收益率标准差（未年化）
    pub realized_volatility: f64,
    pub price_change_1m: f64,
    pub price_change_5m: f64,
    /// 近5分钟成交额（美元）
    pub dollar_vol_5m: f64,
    /// 点差估计（基点）
    pub spread_bp: f64,
}

/// 从K线窗口重算全部指标。纯函数：不持久化任何状态
pub fn compute_snapshot(bars: &[Bar]) -> Option<IndicatorSnapshot> {
    if bars.len() < MIN_BARS_FOR_SNAPSHOT {
        return None;
    }

    let mut ema_fast_ind = ExponentialMovingAverage::new(EMA_FAST_PERIOD).ok()?;
    let mut ema_slow_ind = ExponentialMovingAverage::new(EMA_SLOW_PERIOD).ok()?;
    let mut macd_ind =
        MovingAverageConvergenceDivergence::new(EMA_FAST_PERIOD, EMA_SLOW_PERIOD, 9).ok()?;
    let mut bb_ind = BollingerBands::new(BB_PERIOD, 2.0).ok()?;
    let mut rsi_ind = RsiIndicator::new(RSI_PERIOD);
    let mut atr_ind = Atr::new(ATR_PERIOD);
    let mut adx_ind = Adx::new(ADX_PERIOD);
    let mut vol_ratio_ind = VolumeRatioIndicator::new(VOLUME_Z_PERIOD);
    let mut vol_z_ind = VolumeZScoreIndicator::new(VOLUME_Z_PERIOD);

    let mut ema_fast = 0.0;
    let mut ema_slow = 0.0;
    let mut macd_histogram = 0.0;
    let mut rsi = 50.0;
    let mut bb_position = 0.5;
    let mut atr = 0.0;
    let mut adx = 0.0;
    let mut volume_z = 0.0;
    let mut volume_ratio = 1.0;

    for bar in bars {
        let close = bar.c();
        ema_fast = ema_fast_ind.next(close);
        ema_slow = ema_slow_ind.next(close);
        let macd_out = macd_ind.next(close);
        macd_histogram = macd_out.histogram;
        let bb = bb_ind.next(close);
        let band_width = bb.upper - bb.lower;
        bb_position = if band_width > 0.0 {
            (close - bb.lower) / band_width
        } else {
            0.5
        };
        rsi = rsi_ind.next(close);
        atr = atr_ind.next(bar.h(), bar.l(), close);
        adx = adx_ind.next(bar.h(), bar.l(), close);
        volume_ratio = vol_ratio_ind.next(bar.v());
        volume_z = vol_z_ind.next(bar.v());
    }

    let last = bars.last()?;
    let current_price = last.c();

    // 近10根（5分钟）收益率波动
    let tail = &bars[bars.len().saturating_sub(11)..];
    let mut returns = Vec::with_capacity(tail.len());
    for w in tail.windows(2) {
        if w[0].c() > 0.0 {
            returns.push(w[1].c() / w[0].c() - 1.0);
        }
    }
    let realized_volatility = if returns.len() >= 2 {
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let var = returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>()
            / returns.len() as f64;
        var.sqrt() * (returns.len() as f64).sqrt()
    } else {
        0.0
    };

    let price_n_bars_ago = |n: usize| -> f64 {
        if bars.len() > n {
            bars[bars.len() - 1 - n].c()
        } else {
            bars[0].c()
        }
    };
    let p1 = price_n_bars_ago(2);
    let p5 = price_n_bars_ago(10);
    let price_change_1m = if p1 > 0.0 { current_price / p1 - 1.0 } else { 0.0 };
    let price_change_5m = if p5 > 0.0 { current_price / p5 - 1.0 } else { 0.0 };

    let dollar_vol_5m: f64 = bars[bars.len().saturating_sub(10)..]
        .iter()
        .map(|b| b.c() * b.v())
        .sum();

    let spread_bp = if current_price > 0.0 {
        last.spread_est() / current_price * 10_000.0
    } else {
        0.0
    };

    Some(IndicatorSnapshot {
        bar_ts: last.ts(),
        current_price,
        ema_fast,
        ema_slow,
        macd_histogram,
        rsi,
        bb_position,
        atr,
        adx,
        vwap_deviation: vwap_indicator::vwap_deviation(bars).unwrap_or(0.0),
        volume_z,
        volume_ratio,
        realized_volatility,
        price_change_1m,
        price_change_5m,
        dollar_vol_5m,
        spread_bp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bars(n: usize, f: impl Fn(usize) -> (f64, f64)) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let (price, vol) = f(i);
                Bar::builder()
                    .ts(i as i64 * 30_000)
                    .o(price)
                    .h(price + 0.2)
                    .l(price - 0.2)
                    .c(price)
                    .v(vol)
                    .spread_est(0.02)
                    .build()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn too_short_window_has_no_snapshot() {
        let bars = mk_bars(MIN_BARS_FOR_SNAPSHOT - 1, |_| (100.0, 1000.0));
        assert!(compute_snapshot(&bars).is_none());
    }

    #[test]
    fn uptrend_snapshot_shape() {
        let bars = mk_bars(60, |i| (100.0 + i as f64 * 0.5, 1000.0));
        let snap = compute_snapshot(&bars).unwrap();
        assert!(snap.ema_fast > snap.ema_slow);
        assert!(snap.rsi > 60.0);
        assert!(snap.price_change_5m > 0.0);
        assert_eq!(snap.bar_ts, 59 * 30_000);
    }

    #[test]
    fn volume_spike_visible_in_zscore() {
        let bars = mk_bars(60, |i| {
            let vol = if i == 59 {
                8000.0
            } else if i % 2 == 0 {
                900.0
            } else {
                1100.0
            };
            (100.0, vol)
        });
        let snap = compute_snapshot(&bars).unwrap();
        assert!(snap.volume_z > 3.0);
    }
}
