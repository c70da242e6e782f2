mod common;

use common::{build_harness, eod_window_ts};
use equity_quant::trading::adapter::{Side, TradingAdapter};

/// 收盘前窗口平掉全部持仓；窗口内重复执行是空操作
#[tokio::test]
async fn eod_flatten_closes_all_and_second_run_is_noop() {
    let h = build_harness(|_| {});
    h.broker.set_mark("AAPL", 150.0).await;
    h.broker.set_mark("SQQQ", 20.0).await;

    // 建仓：AAPL 10股、SQQQ 30股
    h.broker
        .submit_market_order("AAPL", Side::Buy, 10.0, "open-aapl", None)
        .await
        .unwrap();
    h.broker
        .submit_market_order("SQQQ", Side::Buy, 30.0, "open-sqqq", None)
        .await
        .unwrap();
    assert_eq!(h.broker.get_positions().await.unwrap().len(), 2);

    // 收盘前5分钟：两笔平仓
    h.clock.set(eod_window_ts());
    let closed = h.eod.run_eod_flatten().await.unwrap();
    assert_eq!(closed, 2);
    assert!(h.broker.get_positions().await.unwrap().is_empty());
    assert_eq!(h.broker.trades().await.len(), 4); // 2开 + 2平

    // 60秒后再跑：零新订单
    h.clock.advance_secs(60);
    let closed_again = h.eod.run_eod_flatten().await.unwrap();
    assert_eq!(closed_again, 0);
    assert_eq!(h.broker.trades().await.len(), 4);
}

/// 窗口之外EOD平仓是空操作
#[tokio::test]
async fn flatten_outside_window_is_noop() {
    let h = build_harness(|_| {});
    h.broker.set_mark("AAPL", 150.0).await;
    h.broker
        .submit_market_order("AAPL", Side::Buy, 10.0, "open", None)
        .await
        .unwrap();

    // 10:00 美东远离收盘
    let closed = h.eod.run_eod_flatten().await.unwrap();
    assert_eq!(closed, 0);
    assert_eq!(h.broker.get_positions().await.unwrap().len(), 1);
}

/// 断路器触发后新信号被拒，但EOD平仓照常执行
#[tokio::test]
async fn kill_switch_blocks_new_risk_but_eod_still_runs() {
    let h = build_harness(|_| {});
    h.broker.set_mark("AAPL", 150.0).await;
    h.broker
        .submit_market_order("AAPL", Side::Buy, 10.0, "open", None)
        .await
        .unwrap();

    // 当日亏损推到 -2%：断路器触发
    h.risk.add_realized_pnl(-2_000.0).await;
    assert!(h.risk.kill_switch_active().await);

    // 新候选被断路器拦截
    common::seed_bars(&h, "MSFT", 60, 100.0, 0.5);
    h.broker.set_mark("MSFT", 129.5).await;
    let summary = h.pipeline.run_signal_pass(&["MSFT".to_string()]).await;
    assert_eq!(summary.emitted, 0);
    assert_eq!(summary.suppressed, 1);

    // EOD平仓不受断路器影响
    h.clock.set(eod_window_ts());
    let closed = h.eod.run_eod_flatten().await.unwrap();
    assert_eq!(closed, 1);
    assert!(h.broker.get_positions().await.unwrap().is_empty());
}
