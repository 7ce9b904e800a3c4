//! S1: a bullish recommendation fires a rule that buys, then sets TP and SL
//! on the position opened by that same rule firing.

mod common;

use trade_core::db::analysis::AnalysisUseCase;
use trade_core::db::transactions::{Side, TransactionStatus};
use trade_core::queue::task::TaskStatus;
use trade_core::rules::actions::ActionDescriptor;
use trade_core::rules::conditions::{Condition, FlagCondition};

#[tokio::test]
async fn bullish_rule_buys_then_sets_tp_and_sl() {
    let pipe = common::pipeline().await;
    pipe.mock.set_price("AAPL", 150.0);

    let ruleset = pipe.db.create_ruleset("momentum-entry", "ENTRY", "ENTER_MARKET").await.unwrap();
    pipe.db
        .add_event_action(
            ruleset.id,
            "ENTER_MARKET",
            vec![Condition::Flag { flag: FlagCondition::Bullish }],
            vec![
                ActionDescriptor::Buy { quantity: 10.0 },
                ActionDescriptor::SetTp { percent: 5.0 },
                ActionDescriptor::SetSl { percent: 3.0 },
            ],
            false,
        )
        .await
        .unwrap();

    let instance = pipe
        .db
        .add_expert_instance(pipe.account_id, "momentum", 100.0, Some(ruleset.id), Some("s1"))
        .await
        .unwrap();

    let task = pipe
        .job_manager
        .submit_manual(instance.id, "AAPL", AnalysisUseCase::EnterMarket)
        .await
        .unwrap();

    let status = common::wait_for_completion(&pipe.queue, &task.id).await;
    assert_eq!(status, TaskStatus::Completed);

    let transactions = pipe.db.list_transactions().await.unwrap();
    let tx = transactions
        .iter()
        .find(|t| t.symbol == "AAPL" && t.expert_instance_id == instance.id)
        .expect("rule firing should have opened a transaction");

    assert_eq!(tx.side, Side::Buy);
    assert_eq!(tx.quantity, 10.0);
    assert_eq!(tx.open_price, Some(150.0));
    // refresh_transactions() is never invoked by this flow, so the
    // transaction stays WAITING even though the entry order already filled.
    assert_eq!(tx.status, TransactionStatus::Waiting);

    let orders = pipe.db.orders_for_transaction(tx.id).await.unwrap();
    assert_eq!(orders.len(), 3, "entry + take-profit + stop-loss legs");

    let tp = orders
        .iter()
        .find(|o| o.limit_price.is_some())
        .expect("a take-profit limit order should have been submitted");
    assert!((tp.limit_price.unwrap() - 157.5).abs() < 0.01);

    let sl = orders
        .iter()
        .find(|o| o.stop_price.is_some())
        .expect("a stop-loss stop order should have been submitted");
    assert!((sl.stop_price.unwrap() - 145.5).abs() < 0.01);

    assert_eq!(tx.take_profit, Some(157.5));
    assert_eq!(tx.stop_loss, Some(145.5));
}
