use serde::{Deserialize, Serialize};

use crate::trading::indicator::snapshot::IndicatorSnapshot;

fn clamp1(v: f64) -> f64 {
    v.max(-1.0).min(1.0)
}

/// 线性映射到 [-1,1]
fn normalize(value: f64, min_val: f64, max_val: f64) -> f64 {
    if max_val <= min_val {
        return 0.0;
    }
    clamp1((value - min_val) / (max_val - min_val) * 2.0 - 1.0)
}

/// 技术面得分（[-1,1]）及各分量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechScore {
    pub score: f64,
    pub ema_score: f64,
    pub macd_score: f64,
    pub rsi_score: f64,
    pub vwap_score: f64,
    pub bollinger_score: f64,
    pub volume_score: f64,
}

impl TechScore {
    /// 分量一致性：分歧越小越可信（0~1）
    pub fn consistency(&self) -> f64 {
        let comps = [
            self.ema_score,
            self.macd_score,
            self.rsi_score,
            self.vwap_score,
        ];
        let max = comps.iter().cloned().fold(f64::MIN, f64::max);
        let min = comps.iter().cloned().fold(f64::MAX, f64::min);
        (1.0 - (max - min) / 2.0).max(0.0)
    }
}

/// 技术面打分引擎：EMA差/MACD/RSI/VWAP偏差/布林位置/量能的加权和
pub struct TechScoreEngine {
    w_ema: f64,
    w_macd: f64,
    w_rsi: f64,
    w_vwap: f64,
    w_bollinger: f64,
    w_volume: f64,
}

impl TechScoreEngine {
    pub fn new() -> Self {
        Self {
            w_ema: 0.25,
            w_macd: 0.20,
            w_rsi: 0.20,
            w_vwap: 0.15,
            w_bollinger: 0.10,
            w_volume: 0.10,
        }
    }

    pub fn calculate(&self, snap: &IndicatorSnapshot) -> TechScore {
        // EMA 快慢线差，±5% 拉满
        let ema_ratio = if snap.ema_slow > 0.0 {
            (snap.ema_fast - snap.ema_slow) / snap.ema_slow
        } else {
            0.0
        };
        let ema_score = normalize(ema_ratio, -0.05, 0.05);

        // MACD 柱，按价格比例化后 ±0.5% 拉满
        let macd_rel = if snap.current_price > 0.0 {
            snap.macd_histogram / snap.current_price
        } else {
            0.0
        };
        let macd_score = normalize(macd_rel, -0.005, 0.005);

        // RSI 以50为中心
        let rsi_score = clamp1((snap.rsi - 50.0) / 50.0);

        // VWAP 偏差 ±3% 拉满
        let vwap_score = normalize(snap.vwap_deviation, -0.03, 0.03);

        // 布林位置 0..1 → -1..1
        let bollinger_score = clamp1((snap.bb_position - 0.5) * 2.0);

        // 量能方向化：放量顺着5分钟价格方向加分
        let direction = if snap.price_change_5m > 0.0 {
            1.0
        } else if snap.price_change_5m < 0.0 {
            -1.0
        } else {
            0.0
        };
        let volume_score = clamp1((snap.volume_z / 4.0).max(0.0).min(1.0) * direction);

        let score = clamp1(
            ema_score * self.w_ema
                + macd_score * self.w_macd
                + rsi_score * self.w_rsi
                + vwap_score * self.w_vwap
                + bollinger_score * self.w_bollinger
                + volume_score * self.w_volume,
        );

        TechScore {
            score,
            ema_score,
            macd_score,
            rsi_score,
            vwap_score,
            bollinger_score,
            volume_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap_with(f: impl Fn(&mut IndicatorSnapshot)) -> IndicatorSnapshot {
        let mut snap = IndicatorSnapshot {
            bar_ts: 0,
            current_price: 100.0,
            ema_fast: 100.0,
            ema_slow: 100.0,
            macd_histogram: 0.0,
            rsi: 50.0,
            bb_position: 0.5,
            atr: 0.5,
            adx: 15.0,
            vwap_deviation: 0.0,
            volume_z: 0.0,
            volume_ratio: 1.0,
            realized_volatility: 0.01,
            price_change_1m: 0.0,
            price_change_5m: 0.0,
            dollar_vol_5m: 1_000_000.0,
            spread_bp: 5.0,
        };
        f(&mut snap);
        snap
    }

    #[test]
    fn neutral_inputs_score_near_zero() {
        let engine = TechScoreEngine::new();
        let score = engine.calculate(&snap_with(|_| {}));
        assert!(score.score.abs() < 0.05);
    }

    #[test]
    fn bullish_inputs_score_positive_bearish_negative() {
        let engine = TechScoreEngine::new();
        let bull = engine.calculate(&snap_with(|s| {
            s.ema_fast = 103.0;
            s.ema_slow = 100.0;
            s.macd_histogram = 0.6;
            s.rsi = 70.0;
            s.vwap_deviation = 0.02;
            s.bb_position = 0.85;
            s.volume_z = 3.0;
            s.price_change_5m = 0.01;
        }));
        let bear = engine.calculate(&snap_with(|s| {
            s.ema_fast = 97.0;
            s.ema_slow = 100.0;
            s.macd_histogram = -0.6;
            s.rsi = 28.0;
            s.vwap_deviation = -0.02;
            s.bb_position = 0.1;
            s.volume_z = 3.0;
            s.price_change_5m = -0.01;
        }));
        assert!(bull.score > 0.3);
        assert!(bear.score < -0.3);
        assert!(bull.score > bear.score);
    }

    #[test]
    fn score_clamped_to_unit_range() {
        let engine = TechScoreEngine::new();
        let extreme = engine.calculate(&snap_with(|s| {
            s.ema_fast = 150.0;
            s.ema_slow = 100.0;
            s.macd_histogram = 10.0;
            s.rsi = 100.0;
            s.vwap_deviation = 0.2;
            s.bb_position = 1.5;
            s.volume_z = 10.0;
            s.price_change_5m = 0.05;
        }));
        assert!(extreme.score <= 1.0);
        assert!(extreme.score > 0.8);
    }
}
