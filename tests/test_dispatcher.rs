mod common;

use common::build_harness;
use equity_quant::trading::adapter::{Bracket, Side};
use equity_quant::trading::order::dispatcher::{DispatchOutcome, OrderIntent};

/// 同一候选两次投递派发器：券商只见一笔，第二次幂等拒绝且无副作用
#[tokio::test]
async fn duplicate_delivery_yields_single_broker_call() {
    let h = build_harness(|_| {});
    h.broker.set_mark("AAPL", 150.0).await;

    let intent = OrderIntent {
        source_id: "signal-X".to_string(),
        exec_symbol: "AAPL".to_string(),
        side: Side::Buy,
        qty: 10.0,
        entry_ref_price: 150.0,
        bracket: Some(Bracket {
            stop: 147.75,
            target: 154.5,
        }),
    };

    let first = h.dispatcher.dispatch(&intent).await.unwrap();
    assert!(matches!(first, DispatchOutcome::Submitted(_)));

    let second = h.dispatcher.dispatch(&intent).await.unwrap();
    assert!(matches!(second, DispatchOutcome::Duplicate));

    let trades = h.broker.trades().await;
    assert_eq!(trades.len(), 1);
    assert_eq!(h.broker.position_qty("AAPL").await, 10.0);
}

/// 不同来源ID的意图互不影响
#[tokio::test]
async fn distinct_sources_both_submit() {
    let h = build_harness(|_| {});
    h.broker.set_mark("AAPL", 150.0).await;

    for id in ["signal-A", "signal-B"] {
        let intent = OrderIntent {
            source_id: id.to_string(),
            exec_symbol: "AAPL".to_string(),
            side: Side::Buy,
            qty: 5.0,
            entry_ref_price: 150.0,
            bracket: None,
        };
        let outcome = h.dispatcher.dispatch(&intent).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Submitted(_)));
    }
    assert_eq!(h.broker.trades().await.len(), 2);
}
