//! S2: requesting a take-profit closer than the minimum configured percent
//! gets silently floored to the minimum, and the adjustment is idempotent.

mod common;

use trade_core::broker::base::OrderDraft;
use trade_core::db::orders::{GoodFor, OrderType};
use trade_core::db::transactions::Side;

#[tokio::test]
async fn tp_request_below_minimum_is_enforced_to_the_floor() {
    let acc = common::account().await;
    acc.mock.set_price("AAPL", 100.0);

    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();
    let tx = acc.db.create_transaction("AAPL", 10.0, Side::Buy, 100.0, instance.id).await.unwrap();

    let entry = OrderDraft {
        transaction_id: Some(tx.id),
        expert_instance_id: None,
        symbol: "AAPL".to_string(),
        side: Side::Buy,
        quantity: 10.0,
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        depends_on_order: None,
        depends_order_status_trigger: None,
        good_for: GoodFor::Gtc,
        comment: "entry".to_string(),
        is_closing_order: false,
        tp_percent: None,
        sl_percent: None,
    };
    acc.broker.submit_order(entry).await.unwrap();

    // Requesting a 1% TP (101.0) when the minimum is 3% should be floored to 103.0.
    acc.broker.adjust_tp(tx.id, 101.0).await.unwrap();

    let tx = acc.db.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.take_profit, Some(103.0));

    let orders = acc.db.orders_for_transaction(tx.id).await.unwrap();
    let tp_order = orders.iter().find(|o| o.limit_price.is_some()).expect("tp leg should exist");
    assert!((tp_order.limit_price.unwrap() - 103.0).abs() < 0.001);

    let enforcement = acc.db.list_recent_activity(50).await.unwrap();
    assert!(enforcement.iter().any(|e| e.kind == "tp_enforcement" && e.description.contains("TP enforcement (LONG)")));

    // A second call with the already-enforced price is a no-op: no new leg,
    // same order id.
    let tp_order_id = tp_order.id;
    acc.broker.adjust_tp(tx.id, 103.0).await.unwrap();
    let orders_after = acc.db.orders_for_transaction(tx.id).await.unwrap();
    let tp_orders: Vec<_> = orders_after.iter().filter(|o| o.limit_price.is_some()).collect();
    assert_eq!(tp_orders.len(), 1);
    assert_eq!(tp_orders[0].id, tp_order_id);
}
