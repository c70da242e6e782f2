/// 成交量比率指标
/// 当前成交量与历史n根K线平均值的比值
#[derive(Debug, Clone)]
pub struct VolumeRatioIndicator {
    prev_volumes: Vec<f64>,
    volume_bar_num: usize,
}

impl VolumeRatioIndicator {
    pub fn new(length: usize) -> Self {
        Self {
            prev_volumes: vec![],
            volume_bar_num: length,
        }
    }

    pub fn next(&mut self, current_volume: f64) -> f64 {
        let ratio = if self.prev_volumes.is_empty() {
            1.0
        } else {
            let avg = self.avg_volume();
            if avg > 0.0 {
                current_volume / avg
            } else {
                1.0
            }
        };
        self.prev_volumes.push(current_volume);
        //只保留前N根K线的成交量
        if self.prev_volumes.len() > self.volume_bar_num {
            self.prev_volumes.remove(0);
        }
        ratio
    }

    pub fn avg_volume(&self) -> f64 {
        if self.prev_volumes.is_empty() {
            return 0.0;
        }
        self.prev_volumes.iter().sum::<f64>() / self.prev_volumes.len() as f64
    }
}

/// 成交量 z-score：当前量相对窗口均值偏离多少个标准差
#[derive(Debug, Clone)]
pub struct VolumeZScoreIndicator {
    window: Vec<f64>,
    length: usize,
}

impl VolumeZScoreIndicator {
    pub fn new(length: usize) -> Self {
        Self {
            window: vec![],
            length,
        }
    }

    pub fn next(&mut self, current_volume: f64) -> f64 {
        let z = if self.window.len() >= 2 {
            let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
            let var = self
                .window
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / self.window.len() as f64;
            let std = var.sqrt();
            if std > 0.0 {
                (current_volume - mean) / std
            } else {
                0.0
            }
        } else {
            0.0
        };
        self.window.push(current_volume);
        if self.window.len() > self.length {
            self.window.remove(0);
        }
        z
    }

    pub fn is_warm(&self) -> bool {
        self.window.len() >= self.length.min(2)
    }
}
