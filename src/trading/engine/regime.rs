use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::trading::indicator::snapshot::IndicatorSnapshot;

/// 市场状态（每票每tick恰好一个标签）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeType {
    Trend,
    VolSpike,
    MeanRevert,
    Sideways,
}

impl RegimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegimeType::Trend => "trend",
            RegimeType::VolSpike => "vol_spike",
            RegimeType::MeanRevert => "mean_revert",
            RegimeType::Sideways => "sideways",
        }
    }
}

/// 状态检测结果
#[derive(Debug, Clone)]
pub struct RegimeResult {
    pub regime: RegimeType,
    pub confidence: f64, // 0~1
}

/// 状态检测阈值
#[derive(Debug, Clone)]
pub struct RegimeThresholds {
    pub adx_min: f64,
    pub ema_ratio_min: f64,
    pub realized_vol_min: f64,
    pub volume_z_min: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            adx_min: 20.0,
            ema_ratio_min: 0.005,
            realized_vol_min: 0.05,
            volume_z_min: 2.0,
            rsi_oversold: 25.0,
            rsi_overbought: 75.0,
        }
    }
}

/// 规则式状态检测器：trend / vol_spike / mean_revert 各打分，取最高者；都不沾边就是 sideways
pub struct RegimeDetector {
    thresholds: RegimeThresholds,
}

impl RegimeDetector {
    pub fn new() -> Self {
        Self {
            thresholds: RegimeThresholds::default(),
        }
    }

    pub fn with_thresholds(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn detect(&self, snap: &IndicatorSnapshot) -> RegimeResult {
        let trend = self.trend_score(snap);
        let vol_spike = self.vol_spike_score(snap);
        let mean_revert = self.mean_revert_score(snap);

        let (regime, confidence) = [
            (RegimeType::Trend, trend),
            (RegimeType::VolSpike, vol_spike),
            (RegimeType::MeanRevert, mean_revert),
        ]
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or((RegimeType::Sideways, 0.0));

        let result = if confidence > 0.0 {
            RegimeResult { regime, confidence }
        } else {
            RegimeResult {
                regime: RegimeType::Sideways,
                confidence: 0.0,
            }
        };
        debug!(
            "状态检测: {} (置信度 {:.2})",
            result.regime.as_str(),
            result.confidence
        );
        result
    }

    /// 趋势：ADX>20 且快线高于慢线0.5%以上，两个条件缺一不可
    fn trend_score(&self, snap: &IndicatorSnapshot) -> f64 {
        if snap.adx <= self.thresholds.adx_min {
            return 0.0;
        }
        let adx_score = ((snap.adx - 20.0) / 30.0).min(1.0);

        if snap.ema_slow <= 0.0 {
            return 0.0;
        }
        let ema_ratio = (snap.ema_fast - snap.ema_slow).abs() / snap.ema_slow;
        if ema_ratio <= self.thresholds.ema_ratio_min {
            return 0.0;
        }
        let ema_score = (ema_ratio / 0.02).min(1.0);

        adx_score * 0.5 + ema_score * 0.5
    }

    /// 波动尖峰：实现波动率过线为主，量能z分辅助
    fn vol_spike_score(&self, snap: &IndicatorSnapshot) -> f64 {
        if snap.realized_volatility < self.thresholds.realized_vol_min {
            return 0.0;
        }
        let vol_score = (snap.realized_volatility / 0.1).min(1.0);

        let mut score = vol_score * 0.7;
        let mut weights = 0.7;
        if snap.volume_z > 0.0 {
            score += (snap.volume_z / 4.0).min(1.0) * 0.3;
            weights += 0.3;
        }
        score / weights
    }

    /// 均值回归：RSI 极端后开始往带内回
    fn mean_revert_score(&self, snap: &IndicatorSnapshot) -> f64 {
        let rsi = snap.rsi;
        let oversold = rsi <= self.thresholds.rsi_oversold;
        let overbought = rsi >= self.thresholds.rsi_overbought;
        if !oversold && !overbought {
            return 0.0;
        }

        let mut score = (rsi - 50.0).abs() / 50.0 * 0.4;
        let mut weights = 0.4;

        // 带内回归信号
        if oversold && snap.bb_position > 0.3 {
            score += (snap.bb_position / 0.5).min(1.0) * 0.3;
            weights += 0.3;
        } else if overbought && snap.bb_position < 0.7 {
            score += ((1.0 - snap.bb_position) / 0.5).min(1.0) * 0.3;
            weights += 0.3;
        }

        // 短中期变化方向相反 → 反转迹象
        if snap.price_change_1m * snap.price_change_5m < 0.0 && snap.price_change_1m.abs() > 0.005 {
            score += (snap.price_change_1m.abs() / 0.02).min(1.0) * 0.3;
            weights += 0.3;
        }

        score / weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            bar_ts: 0,
            current_price: 100.0,
            ema_fast: 100.0,
            ema_slow: 100.0,
            macd_histogram: 0.0,
            rsi: 50.0,
            bb_position: 0.5,
            atr: 0.5,
            adx: 10.0,
            vwap_deviation: 0.0,
            volume_z: 0.0,
            volume_ratio: 1.0,
            realized_volatility: 0.01,
            price_change_1m: 0.0,
            price_change_5m: 0.0,
            dollar_vol_5m: 1_000_000.0,
            spread_bp: 5.0,
        }
    }

    #[test]
    fn quiet_market_is_sideways() {
        let detector = RegimeDetector::new();
        let result = detector.detect(&base_snapshot());
        assert_eq!(result.regime, RegimeType::Sideways);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn strong_trend_detected() {
        let detector = RegimeDetector::new();
        let mut snap = base_snapshot();
        snap.adx = 35.0;
        snap.ema_fast = 102.0;
        snap.ema_slow = 100.0;
        let result = detector.detect(&snap);
        assert_eq!(result.regime, RegimeType::Trend);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn volume_and_vol_burst_is_vol_spike() {
        let detector = RegimeDetector::new();
        let mut snap = base_snapshot();
        snap.realized_volatility = 0.08;
        snap.volume_z = 4.0;
        let result = detector.detect(&snap);
        assert_eq!(result.regime, RegimeType::VolSpike);
        assert!(result.confidence > 0.5);
    }

    #[test]
    fn rsi_extreme_with_band_reentry_is_mean_revert() {
        let detector = RegimeDetector::new();
        let mut snap = base_snapshot();
        snap.rsi = 20.0;
        snap.bb_position = 0.4;
        snap.price_change_1m = 0.01;
        snap.price_change_5m = -0.02;
        let result = detector.detect(&snap);
        assert_eq!(result.regime, RegimeType::MeanRevert);
        assert!(result.confidence > 0.3);
    }
}
