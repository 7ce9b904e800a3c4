//! S5: once an entry and its dependent (TP/SL) order have both filled, the
//! reconciler closes the transaction using the dependent order's fill price.

mod common;

use trade_core::db::orders::{GoodFor, OrderStatus, OrderType, TradingOrder};
use trade_core::db::transactions::{Side, TransactionStatus};

#[tokio::test]
async fn transaction_closes_when_entry_and_dependent_both_fill() {
    let acc = common::account().await;
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();
    let tx = acc.db.create_transaction("AAPL", 10.0, Side::Buy, 150.0, instance.id).await.unwrap();

    let entry = TradingOrder {
        id: 0,
        account_id: acc.account_id,
        transaction_id: Some(tx.id),
        symbol: "AAPL".to_string(),
        side: Side::Buy,
        quantity: 10.0,
        order_type: OrderType::Market,
        limit_price: None,
        stop_price: None,
        status: OrderStatus::Filled,
        filled_quantity: 10.0,
        open_price: Some(150.0),
        broker_order_id: Some("entry-1".to_string()),
        depends_on_order: None,
        depends_order_status_trigger: None,
        good_for: GoodFor::Gtc,
        comment: "entry".to_string(),
        data: serde_json::json!({}),
        created_at: trade_core::db::now_iso(),
    };
    let entry = acc.db.insert_order(&entry).await.unwrap();

    let take_profit = TradingOrder {
        id: 0,
        account_id: acc.account_id,
        transaction_id: Some(tx.id),
        symbol: "AAPL".to_string(),
        side: Side::Sell,
        quantity: 10.0,
        order_type: OrderType::LimitSell,
        limit_price: Some(157.5),
        stop_price: None,
        status: OrderStatus::Filled,
        filled_quantity: 10.0,
        open_price: Some(165.0),
        broker_order_id: Some("tp-1".to_string()),
        depends_on_order: Some(entry.id),
        depends_order_status_trigger: Some(OrderStatus::Filled),
        good_for: GoodFor::Gtc,
        comment: "take profit".to_string(),
        data: serde_json::json!({}),
        created_at: trade_core::db::now_iso(),
    };
    acc.db.insert_order(&take_profit).await.unwrap();

    acc.broker.refresh_transactions().await.unwrap();

    let tx = acc.db.get_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Closed);
    assert_eq!(tx.close_price, Some(165.0));
    assert_eq!(tx.close_reason.as_deref(), Some("tp_sl_filled"));
}
