use crate::trading::indicator::rma::Rma;

/// RSI indicator that uses RMA for calculations (TradingView-style)
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    avg_gain: Rma,
    avg_loss: Rma,
    prev_price: Option<f64>,
    overbought_level: f64,
    oversold_level: f64,
}

impl RsiIndicator {
    pub fn new(length: usize) -> Self {
        Self {
            avg_gain: Rma::new(length),
            avg_loss: Rma::new(length),
            prev_price: None,
            overbought_level: 70.0,
            oversold_level: 30.0,
        }
    }

    /// Create a new RSI indicator with custom overbought and oversold levels
    pub fn new_with_levels(length: usize, overbought: f64, oversold: f64) -> Self {
        let mut ind = Self::new(length);
        ind.overbought_level = overbought;
        ind.oversold_level = oversold;
        ind
    }

    /// Calculate the next RSI value
    pub fn next(&mut self, price: f64) -> f64 {
        let rsi = match self.prev_price {
            None => 50.0,
            Some(prev) => {
                let change = price - prev;
                let gain = self.avg_gain.next(change.max(0.0));
                let loss = self.avg_loss.next((-change).max(0.0));
                if loss == 0.0 && gain == 0.0 {
                    // 完全无波动，中性
                    50.0
                } else if loss == 0.0 {
                    100.0
                } else {
                    let rs = gain / loss;
                    100.0 - 100.0 / (1.0 + rs)
                }
            }
        };
        self.prev_price = Some(price);
        rsi
    }

    /// Check if RSI is in overbought territory
    pub fn is_overbought(&self, value: f64) -> bool {
        value >= self.overbought_level
    }

    /// Check if RSI is in oversold territory
    pub fn is_oversold(&self, value: f64) -> bool {
        value <= self.oversold_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_prices_push_rsi_high() {
        let mut rsi = RsiIndicator::new(14);
        let mut last = 50.0;
        for i in 0..30 {
            last = rsi.next(100.0 + i as f64);
        }
        assert!(last > 90.0);
    }

    #[test]
    fn falling_prices_push_rsi_low() {
        let mut rsi = RsiIndicator::new(14);
        let mut last = 50.0;
        for i in 0..30 {
            last = rsi.next(100.0 - i as f64);
        }
        assert!(last < 10.0);
    }
}
