mod common;

use common::{advance_tick, build_harness, seed_bars};

/// 多头直通全链路：趋势行情 → 候选 → 风控定量 → 纸面成交，
/// 紧接着的同向信号被冷却拦下，限额只记实际发射
#[tokio::test]
async fn long_signal_flows_to_paper_fill_and_cooldown_blocks_repeat() {
    let h = build_harness(|_| {});
    seed_bars(&h, "AAPL", 60, 100.0, 0.5);
    h.broker.set_mark("AAPL", 129.5).await;

    let summary = h
        .pipeline
        .run_signal_pass(&["AAPL".to_string()])
        .await;
    assert_eq!(summary.emitted, 1, "趋势行情应当发射一笔多头");

    let trades = h.broker.trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].ticker, "AAPL");
    assert!(trades[0].qty >= 1.0);
    assert!(trades[0].bracket.is_some());

    // 限额计数 = 实际发射数
    assert_eq!(h.counters.emission_count("AAPL").await.unwrap(), 1);

    // 下一tick同向信号：冷却期内且分数没有显著改善 → 不再下单
    advance_tick(&h, &[("AAPL", 130.0)], 30);
    let summary2 = h
        .pipeline
        .run_signal_pass(&["AAPL".to_string()])
        .await;
    assert_eq!(summary2.emitted, 0);
    assert_eq!(h.broker.trades().await.len(), 1);
    assert_eq!(h.counters.emission_count("AAPL").await.unwrap(), 1);
}

/// 历史不足的票不产生任何候选
#[tokio::test]
async fn insufficient_history_emits_nothing() {
    let h = build_harness(|_| {});
    seed_bars(&h, "MSFT", 10, 100.0, 0.5);
    h.broker.set_mark("MSFT", 105.0).await;

    let summary = h
        .pipeline
        .run_signal_pass(&["MSFT".to_string()])
        .await;
    assert_eq!(summary.candidates, 0);
    assert_eq!(summary.emitted, 0);
    assert!(h.broker.trades().await.is_empty());
}

/// 横盘行情分数到不了发射线，什么都不发生
#[tokio::test]
async fn flat_market_emits_nothing() {
    let h = build_harness(|_| {});
    seed_bars(&h, "NVDA", 60, 100.0, 0.0);
    h.broker.set_mark("NVDA", 100.0).await;

    let summary = h
        .pipeline
        .run_signal_pass(&["NVDA".to_string()])
        .await;
    assert_eq!(summary.emitted, 0);
    assert!(h.broker.trades().await.is_empty());
}

/// K线重放决定论：同样的K线序列与时钟，发射结果一致
#[tokio::test]
async fn replaying_bars_produces_same_emissions() {
    let run = || async {
        let h = build_harness(|_| {});
        seed_bars(&h, "AAPL", 60, 100.0, 0.5);
        h.broker.set_mark("AAPL", 129.5).await;
        let summary = h
            .pipeline
            .run_signal_pass(&["AAPL".to_string()])
            .await;
        let trades = h.broker.trades().await;
        (summary.emitted, trades.len(), trades[0].qty, trades[0].ticker.clone())
    };
    let first = run().await;
    let second = run().await;
    assert_eq!(first, second);
}
