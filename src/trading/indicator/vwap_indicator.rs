use crate::Bar;

/// 窗口 VWAP：典型价按量加权
pub fn window_vwap(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let mut total_pv = 0.0;
    let mut total_v = 0.0;
    for bar in bars {
        let typical = (bar.h() + bar.l() + bar.c()) / 3.0;
        total_pv += typical * bar.v();
        total_v += bar.v();
    }
    if total_v <= 0.0 {
        return Some(bars.last().map(|b| b.c())?);
    }
    Some(total_pv / total_v)
}

/// 现价对 VWAP 的偏差（比例）
pub fn vwap_deviation(bars: &[Bar]) -> Option<f64> {
    let vwap = window_vwap(bars)?;
    let last = bars.last()?.c();
    if vwap <= 0.0 {
        return None;
    }
    Some((last - vwap) / vwap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bar(ts: i64, price: f64, vol: f64) -> Bar {
        Bar::builder()
            .ts(ts)
            .o(price)
            .h(price)
            .l(price)
            .c(price)
            .v(vol)
            .build()
            .unwrap()
    }

    #[test]
    fn vwap_weights_by_volume() {
        let bars = vec![mk_bar(0, 100.0, 100.0), mk_bar(30_000, 110.0, 300.0)];
        let vwap = window_vwap(&bars).unwrap();
        assert!((vwap - 107.5).abs() < 1e-9);
    }

    #[test]
    fn deviation_positive_above_vwap() {
        let bars = vec![mk_bar(0, 100.0, 100.0), mk_bar(30_000, 104.0, 100.0)];
        assert!(vwap_deviation(&bars).unwrap() > 0.0);
    }
}
