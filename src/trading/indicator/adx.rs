use crate::trading::indicator::atr::Atr;
use crate::trading::indicator::rma::Rma;

/// ADX（Wilder）：趋势强度，>20 视为有趋势
pub struct Adx {
    plus_dm: Rma,
    minus_dm: Rma,
    adx: Rma,
    atr: Atr,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            plus_dm: Rma::new(period),
            minus_dm: Rma::new(period),
            adx: Rma::new(period),
            atr: Atr::new(period),
            prev_high: None,
            prev_low: None,
        }
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let (up_move, down_move) = match (self.prev_high, self.prev_low) {
            (Some(ph), Some(pl)) => (high - ph, pl - low),
            _ => (0.0, 0.0),
        };
        self.prev_high = Some(high);
        self.prev_low = Some(low);

        let plus = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        let atr = self.atr.next(high, low, close);
        let plus_sm = self.plus_dm.next(plus);
        let minus_sm = self.minus_dm.next(minus);

        if atr <= 0.0 {
            return self.adx.next(0.0);
        }
        let plus_di = 100.0 * plus_sm / atr;
        let minus_di = 100.0 * minus_sm / atr;
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };
        self.adx.next(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_uptrend_has_strong_adx() {
        let mut adx = Adx::new(14);
        let mut v = 0.0;
        for i in 0..60 {
            let base = 100.0 + i as f64;
            v = adx.next(base + 0.5, base - 0.5, base);
        }
        assert!(v > 20.0);
    }

    #[test]
    fn flat_market_has_weak_adx() {
        let mut adx = Adx::new(14);
        let mut v = 100.0;
        for i in 0..60 {
            // 来回震荡，无方向
            let wiggle = if i % 2 == 0 { 0.2 } else { -0.2 };
            v = adx.next(100.0 + wiggle + 0.3, 100.0 + wiggle - 0.3, 100.0 + wiggle);
        }
        assert!(v < 20.0);
    }
}
