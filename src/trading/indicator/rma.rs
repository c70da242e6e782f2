/// RMA（Wilder 平滑移动平均，TradingView 同款）。
/// 前 period 个值内返回简单平均做种子，之后用递归平滑
#[derive(Debug, Clone)]
pub struct Rma {
    period: usize,
    alpha: f64, // 平滑因子 1/period
    count: usize,
    seed_sum: f64,
    prev_rma: Option<f64>,
}

impl Rma {
    pub fn new(length: usize) -> Self {
        Self {
            period: length.max(1),
            alpha: 1.0 / length.max(1) as f64,
            count: 0,
            seed_sum: 0.0,
            prev_rma: None,
        }
    }

    pub fn next(&mut self, value: f64) -> f64 {
        match self.prev_rma {
            None => {
                // 种子阶段：累计SMA
                self.count += 1;
                self.seed_sum += value;
                let avg = self.seed_sum / self.count as f64;
                if self.count >= self.period {
                    self.prev_rma = Some(avg);
                }
                avg
            }
            Some(prev) => {
                let rma = self.alpha * value + (1.0 - self.alpha) * prev;
                self.prev_rma = Some(rma);
                rma
            }
        }
    }

    /// 是否已经吃满一个周期的数据
    pub fn is_warm(&self) -> bool {
        self.prev_rma.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_phase_is_simple_average() {
        let mut rma = Rma::new(3);
        assert_eq!(rma.next(3.0), 3.0);
        assert_eq!(rma.next(6.0), 4.5);
        assert_eq!(rma.next(9.0), 6.0);
        assert!(rma.is_warm());
    }

    #[test]
    fn smoothing_after_seed() {
        let mut rma = Rma::new(2);
        rma.next(2.0);
        rma.next(4.0); // seed = 3.0
        let v = rma.next(6.0); // 0.5*6 + 0.5*3
        assert!((v - 4.5).abs() < 1e-9);
    }
}
