use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app_config::settings::Settings;
use crate::error::AppError;
use crate::time_util::Clock;
use crate::trading::adapter::{InsightResult, Side};
use crate::trading::engine::regime::{RegimeResult, RegimeType};
use crate::trading::engine::tech_score::TechScore;

/// EDGAR 公告（news 扫描侧解析出来的最小结构）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgarFiling {
    pub form_type: String,
    pub items: Vec<String>,
    pub snippet: String,
    pub url: String,
}

/// 候选信号。由混合器发射，经抑制链与路由后进入风控
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: String,
    pub ticker: String,
    pub side: Side,
    pub score: f64,
    pub tech_score: f64,
    pub sentiment_score: f64,
    pub confidence: f64,
    pub regime: RegimeType,
    pub horizon_minutes: i64,
    pub entry_ref_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub trigger_tag: String,
    pub edgar_override: bool,
    pub bar_ts: i64,
    pub created_at: i64,
}

impl CandidateSignal {
    /// 不变式检查：分数界内、止损在正确一侧、持有时长为正。
    /// 违反只作废本候选，不影响其他票
    pub fn validate(&self) -> Result<(), AppError> {
        if self.score.abs() > 1.0 {
            return Err(AppError::ContractViolation(format!(
                "分数越界: {} {}",
                self.ticker, self.score
            )));
        }
        if self.horizon_minutes <= 0 {
            return Err(AppError::ContractViolation(format!(
                "持有时长非法: {} {}",
                self.ticker, self.horizon_minutes
            )));
        }
        let stop_ok = match self.side {
            Side::Buy => self.stop_price < self.entry_ref_price,
            Side::Sell => self.stop_price > self.entry_ref_price,
        };
        if !stop_ok {
            return Err(AppError::ContractViolation(format!(
                "止损方向错误: {} {} entry={} stop={}",
                self.ticker,
                self.side.as_str(),
                self.entry_ref_price,
                self.stop_price
            )));
        }
        Ok(())
    }

    pub fn risk_per_share(&self) -> f64 {
        (self.entry_ref_price - self.stop_price).abs()
    }
}

/// 状态相关的混合权重与止损/止盈比例
fn regime_weights(regime: RegimeType) -> (f64, f64) {
    match regime {
        RegimeType::Trend => (0.75, 0.25),
        RegimeType::VolSpike => (0.30, 0.70),
        RegimeType::MeanRevert => (0.60, 0.40),
        RegimeType::Sideways => (0.50, 0.50),
    }
}

fn regime_stop_target(regime: RegimeType) -> (f64, f64) {
    match regime {
        RegimeType::Trend => (0.015, 0.03),
        RegimeType::VolSpike => (0.02, 0.04),
        RegimeType::MeanRevert => (0.01, 0.02),
        RegimeType::Sideways => (0.012, 0.025),
    }
}

fn regime_default_horizon(regime: RegimeType) -> i64 {
    match regime {
        RegimeType::Trend => 240,
        RegimeType::VolSpike => 60,
        RegimeType::MeanRevert => 120,
        RegimeType::Sideways => 180,
    }
}

/// 信号混合器：技术分与情绪分按状态加权，EDGAR 重要公告加方向奖励。
/// |score| >= 发射阈值（含等号）才产出候选
pub struct SignalMixer {
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl SignalMixer {
    pub fn new(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        info!(
            "信号混合器初始化: 发射阈值 {}, EDGAR奖励 {}",
            settings.mixer_threshold, settings.edgar_bonus
        );
        Self { settings, clock }
    }

    /// EDGAR 基准情绪（无LLM时的兜底）
    fn edgar_sentiment(&self, filing: &EdgarFiling) -> f64 {
        if filing.form_type == "8-K" {
            let mut max_score: f64 = 0.3;
            for item in &filing.items {
                let s = match item.as_str() {
                    "2.02" => 0.8, // 业绩
                    "1.01" => 0.6, // 重大合同
                    "2.03" => 0.3,
                    "2.04" => 0.2,
                    "2.05" => 0.1, // 重组
                    "2.06" => 0.2,
                    _ => 0.3,
                };
                max_score = max_score.max(s);
            }
            return max_score;
        }
        if filing.form_type == "4" {
            return 0.5;
        }
        0.5
    }

    /// 是否触发 EDGAR 覆盖：指定条目命中且不含监管风险词
    fn is_important_edgar(&self, filing: &EdgarFiling) -> bool {
        let snippet_lower = filing.snippet.to_lowercase();
        for word in &self.settings.regulatory_block_words {
            if snippet_lower.contains(&word.to_lowercase()) {
                debug!("EDGAR 含监管风险词，放弃覆盖: {}", word);
                return false;
            }
        }
        if filing.form_type == "8-K" {
            return filing
                .items
                .iter()
                .any(|i| self.settings.edgar_override_items.contains(i));
        }
        filing.form_type == "4"
    }

    fn build_trigger_tag(
        &self,
        regime: RegimeType,
        tech: &TechScore,
        insight: Option<&InsightResult>,
        filing: Option<&EdgarFiling>,
    ) -> String {
        let mut parts: Vec<String> = vec![regime.as_str().to_string()];
        if tech.ema_score.abs() > 0.7 {
            parts.push("ema_trend".to_string());
        }
        if tech.volume_score.abs() > 0.7 {
            parts.push("volume_surge".to_string());
        }
        if let Some(ins) = insight {
            if !ins.trigger.is_empty() {
                parts.push(ins.trigger.clone());
            }
        }
        if let Some(f) = filing {
            parts.push(format!("edgar_{}", f.form_type.to_lowercase().replace('-', "")));
        }
        parts.join("+")
    }

    fn confidence(
        &self,
        regime: &RegimeResult,
        tech: &TechScore,
        insight: Option<&InsightResult>,
        edgar_override: bool,
    ) -> f64 {
        let mut confidence = regime.confidence * 0.3 + tech.consistency() * 0.3;
        let mut weights = 0.6;
        if insight.is_some() {
            // LLM 有结果本身就是一层确认
            confidence += 0.7 * 0.2;
            weights += 0.2;
        }
        if edgar_override {
            confidence += 0.2;
            weights += 0.2;
        }
        if weights > 0.0 {
            (confidence / weights).min(1.0)
        } else {
            0.5
        }
    }

    /// 混合产出候选。None 表示按兵不动
    pub fn mix(
        &self,
        ticker: &str,
        regime: &RegimeResult,
        tech: &TechScore,
        insight: Option<&InsightResult>,
        filing: Option<&EdgarFiling>,
        current_price: f64,
        bar_ts: i64,
    ) -> Option<CandidateSignal> {
        if current_price <= 0.0 {
            return None;
        }

        let sentiment_score = match (insight, filing) {
            (Some(ins), _) => ins.sentiment,
            (None, Some(f)) => self.edgar_sentiment(f),
            (None, None) => 0.0,
        };

        let (w_tech, w_sent) = regime_weights(regime.regime);
        let mut final_score = tech.score * w_tech + sentiment_score * w_sent;

        // EDGAR 覆盖：按情绪方向加减奖励
        let edgar_override = filing.map(|f| self.is_important_edgar(f)).unwrap_or(false);
        if edgar_override {
            if sentiment_score >= 0.0 {
                final_score += self.settings.edgar_bonus;
            } else {
                final_score -= self.settings.edgar_bonus;
            }
        }
        final_score = final_score.max(-1.0).min(1.0);

        // 发射阈值（等号放行），阈值单一来源
        let side = if final_score >= self.settings.mixer_threshold {
            Side::Buy
        } else if final_score <= -self.settings.mixer_threshold {
            Side::Sell
        } else {
            return None;
        };

        let (stop_pct, target_pct) = regime_stop_target(regime.regime);
        let (stop_price, target_price) = match side {
            Side::Buy => (
                current_price * (1.0 - stop_pct),
                current_price * (1.0 + target_pct),
            ),
            Side::Sell => (
                current_price * (1.0 + stop_pct),
                current_price * (1.0 - target_pct),
            ),
        };

        // EDGAR 覆盖时采用LLM给的持有时长
        let horizon_minutes = match insight {
            Some(ins) if edgar_override => ins.horizon_minutes,
            Some(ins) => ins.horizon_minutes.min(regime_default_horizon(regime.regime)),
            None => regime_default_horizon(regime.regime),
        };

        let candidate = CandidateSignal {
            id: Uuid::new_v4().to_string(),
            ticker: ticker.to_string(),
            side,
            score: final_score,
            tech_score: tech.score,
            sentiment_score,
            confidence: self.confidence(regime, tech, insight, edgar_override),
            regime: regime.regime,
            horizon_minutes,
            entry_ref_price: current_price,
            stop_price,
            target_price,
            trigger_tag: self.build_trigger_tag(regime.regime, tech, insight, filing),
            edgar_override,
            bar_ts,
            created_at: self.clock.now_ms(),
        };

        info!(
            "信号生成: {} {} 分数{:.3} (tech={:.2} sent={:.2} {} conf={:.2})",
            candidate.ticker,
            candidate.side.as_str(),
            candidate.score,
            candidate.tech_score,
            candidate.sentiment_score,
            candidate.regime.as_str(),
            candidate.confidence
        );
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::FixedClock;

    fn tech(score: f64) -> TechScore {
        TechScore {
            score,
            ema_score: score,
            macd_score: score,
            rsi_score: score,
            vwap_score: score,
            bollinger_score: score,
            volume_score: score,
        }
    }

    fn mixer() -> SignalMixer {
        SignalMixer::new(Settings::from_env(), FixedClock::new(1_900_000_000_000))
    }

    fn regime(r: RegimeType, conf: f64) -> RegimeResult {
        RegimeResult {
            regime: r,
            confidence: conf,
        }
    }

    #[test]
    fn weak_score_emits_nothing() {
        let m = mixer();
        let c = m.mix(
            "AAPL",
            &regime(RegimeType::Sideways, 0.2),
            &tech(0.1),
            None,
            None,
            150.0,
            0,
        );
        assert!(c.is_none());
    }

    #[test]
    fn score_exactly_at_threshold_emits() {
        let m = mixer();
        // sideways 权重 0.5/0.5，tech=0.4, sent=0 → score=0.2 == 阈值
        let c = m.mix(
            "AAPL",
            &regime(RegimeType::Sideways, 0.5),
            &tech(0.4),
            None,
            None,
            150.0,
            0,
        );
        let c = c.expect("等于阈值应当发射");
        assert_eq!(c.side, Side::Buy);
        assert!((c.score - 0.2).abs() < 1e-9);
        c.validate().unwrap();
    }

    #[test]
    fn trend_regime_weights_tech_heavier() {
        let m = mixer();
        let strong_tech = tech(0.6);
        let trend = m
            .mix(
                "NVDA",
                &regime(RegimeType::Trend, 0.8),
                &strong_tech,
                None,
                None,
                100.0,
                0,
            )
            .unwrap();
        // trend: 0.6*0.75 = 0.45
        assert!((trend.score - 0.45).abs() < 1e-9);
        assert_eq!(trend.horizon_minutes, 240);
        // 止损在进场价下方1.5%
        assert!((trend.stop_price - 98.5).abs() < 1e-9);
        assert!((trend.target_price - 103.0).abs() < 1e-9);
    }

    #[test]
    fn sell_side_stop_above_entry() {
        let m = mixer();
        let c = m
            .mix(
                "TSLA",
                &regime(RegimeType::Trend, 0.8),
                &tech(-0.6),
                None,
                None,
                200.0,
                0,
            )
            .unwrap();
        assert_eq!(c.side, Side::Sell);
        assert!(c.stop_price > c.entry_ref_price);
        assert!(c.target_price < c.entry_ref_price);
        c.validate().unwrap();
    }

    #[test]
    fn edgar_override_adds_bonus_and_llm_horizon() {
        let m = mixer();
        let filing = EdgarFiling {
            form_type: "8-K".to_string(),
            items: vec!["2.02".to_string()],
            snippet: "quarterly results beat expectations".to_string(),
            url: String::new(),
        };
        let insight = InsightResult {
            sentiment: 0.5,
            trigger: "earnings_beat".to_string(),
            horizon_minutes: 300,
            summary: String::new(),
        };
        let c = m
            .mix(
                "AAPL",
                &regime(RegimeType::VolSpike, 0.7),
                &tech(0.2),
                Some(&insight),
                Some(&filing),
                150.0,
                0,
            )
            .unwrap();
        // vol_spike: 0.2*0.3 + 0.5*0.7 = 0.41, +0.1 EDGAR = 0.51
        assert!((c.score - 0.51).abs() < 1e-9);
        assert!(c.edgar_override);
        assert_eq!(c.horizon_minutes, 300);
    }

    #[test]
    fn regulatory_words_block_override() {
        let m = mixer();
        let filing = EdgarFiling {
            form_type: "8-K".to_string(),
            items: vec!["2.02".to_string()],
            snippet: "DoJ antitrust investigation update".to_string(),
            url: String::new(),
        };
        let c = m
            .mix(
                "GOOGL",
                &regime(RegimeType::VolSpike, 0.7),
                &tech(0.2),
                None,
                Some(&filing),
                150.0,
                0,
            )
            .unwrap();
        assert!(!c.edgar_override);
    }
}
