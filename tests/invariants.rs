//! Quantified invariants and boundary behaviors that don't belong to any one
//! named scenario: order validation, TP/SL enforcement on both sides,
//! tracking-comment shape, recommendation confidence clamping, and ruleset
//! reordering.

mod common;

use trade_core::broker::base::{enforce_min_sl, enforce_min_tp, OrderDraft};
use trade_core::db::orders::{GoodFor, OrderType};
use trade_core::db::recommendations::{NewRecommendation, RecommendedAction, RiskLevel, TimeHorizon};
use trade_core::db::transactions::Side;
use trade_core::error::CoreError;

fn base_draft() -> OrderDraft {
    OrderDraft::market_entry("AAPL", Side::Buy, 10.0, 1)
}

#[tokio::test]
async fn zero_or_negative_quantity_is_rejected() {
    let acc = common::account().await;
    acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();
    acc.mock.set_price("AAPL", 100.0);

    let mut draft = base_draft();
    draft.quantity = 0.0;
    let err = acc.broker.submit_order(draft).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let mut draft = base_draft();
    draft.quantity = -5.0;
    let err = acc.broker.submit_order(draft).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn limit_and_stop_orders_require_their_trigger_price() {
    let acc = common::account().await;
    acc.mock.set_price("AAPL", 100.0);

    let mut draft = base_draft();
    draft.order_type = OrderType::LimitBuy;
    draft.limit_price = None;
    draft.transaction_id = Some(1); // non-market orders also require a transaction
    let err = acc.broker.submit_order(draft).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let mut draft = base_draft();
    draft.order_type = OrderType::StopSell;
    draft.stop_price = None;
    draft.transaction_id = Some(1);
    let err = acc.broker.submit_order(draft).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn submitted_order_comment_matches_tracking_format_and_length_cap() {
    let acc = common::account().await;
    acc.mock.set_price("AAPL", 100.0);
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();

    let mut draft = OrderDraft::market_entry("AAPL", Side::Buy, 10.0, instance.id);
    draft.comment = "a".repeat(200);
    let order = acc.broker.submit_order(draft).await.unwrap();

    assert!(order.comment.chars().count() <= 128);
    let bracket_open = order.comment.find('[').expect("comment should carry a tracking prefix");
    let bracket_close = order.comment.find(']').expect("tracking prefix should be closed");
    let (epoch_part, rest) = order.comment.split_at(bracket_open);
    assert!(epoch_part.ends_with('-'), "expected `<epoch>-[...]`, got `{}`", order.comment);
    assert!(epoch_part[..epoch_part.len() - 1].chars().all(|c| c.is_ascii_digit()), "epoch prefix should be numeric");

    let tags = &rest[1..bracket_close - bracket_open];
    assert!(tags.starts_with("ACC:"), "expected ACC tag first, got `{tags}`");
    assert!(tags.contains("/TR:"), "expected a TR tag, got `{tags}`");
    assert!(tags.contains("/ORD:"), "expected an ORD tag, got `{tags}`");
}

#[tokio::test]
async fn closing_orders_bypass_the_position_size_cap() {
    let acc = common::account().await;
    acc.mock.set_price("AAPL", 100.0);
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();
    acc.db
        .set_setting(trade_core::db::settings::SettingOwner::Expert(instance.id), "max_virtual_equity_per_instrument_percent", trade_core::db::settings::SettingValue::Float(0.01))
        .await
        .unwrap();

    let mut draft = OrderDraft::market_entry("AAPL", Side::Buy, 1000.0, instance.id);
    draft.is_closing_order = true;
    acc.broker.submit_order(draft).await.expect("closing orders must skip the position-size cap");
}

#[test]
fn minimum_tp_sl_enforced_symmetrically_on_both_sides() {
    // LONG: TP floored above entry, SL ceilinged below entry.
    assert_eq!(enforce_min_tp(Side::Buy, 100.0, 101.0, 3.0), 103.0);
    assert_eq!(enforce_min_tp(Side::Buy, 100.0, 110.0, 3.0), 110.0);
    assert_eq!(enforce_min_sl(Side::Buy, 100.0, 99.0, 3.0), 97.0);
    assert_eq!(enforce_min_sl(Side::Buy, 100.0, 90.0, 3.0), 90.0);

    // SHORT: TP ceilinged below entry, SL floored above entry.
    assert_eq!(enforce_min_tp(Side::Sell, 100.0, 99.0, 3.0), 97.0);
    assert_eq!(enforce_min_tp(Side::Sell, 100.0, 90.0, 3.0), 90.0);
    assert_eq!(enforce_min_sl(Side::Sell, 100.0, 101.0, 3.0), 103.0);
    assert_eq!(enforce_min_sl(Side::Sell, 100.0, 110.0, 3.0), 110.0);
}

#[tokio::test]
async fn recommendation_confidence_is_clamped_to_0_100() {
    let acc = common::account().await;
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();
    let analysis = acc
        .db
        .create_market_analysis("AAPL", instance.id, trade_core::db::analysis::AnalysisUseCase::EnterMarket)
        .await
        .unwrap();

    let too_high = acc
        .db
        .add_recommendation(NewRecommendation {
            expert_instance_id: instance.id,
            market_analysis_id: analysis.id,
            symbol: "AAPL".to_string(),
            action: RecommendedAction::Buy,
            expected_profit_percent: 5.0,
            price_at_issue: 100.0,
            confidence: 150.0,
            risk_level: RiskLevel::Medium,
            time_horizon: TimeHorizon::ShortTerm,
            details: "test".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(too_high.confidence, 100.0);

    let too_low = acc
        .db
        .add_recommendation(NewRecommendation {
            expert_instance_id: instance.id,
            market_analysis_id: analysis.id,
            symbol: "AAPL".to_string(),
            action: RecommendedAction::Sell,
            expected_profit_percent: 5.0,
            price_at_issue: 100.0,
            confidence: -20.0,
            risk_level: RiskLevel::Low,
            time_horizon: TimeHorizon::LongTerm,
            details: "test".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(too_low.confidence, 0.0);
}

#[tokio::test]
async fn ruleset_event_actions_can_be_reordered() {
    let acc = common::account().await;
    let ruleset = acc.db.create_ruleset("ordering", "ENTRY", "ENTER_MARKET").await.unwrap();
    let first = acc.db.add_event_action(ruleset.id, "ENTER_MARKET", vec![], vec![], false).await.unwrap();
    let second = acc.db.add_event_action(ruleset.id, "ENTER_MARKET", vec![], vec![], false).await.unwrap();

    acc.db.reorder(ruleset.id, vec![second.id, first.id]).await.unwrap();

    let ordered = acc.db.event_actions_for_ruleset(ruleset.id).await.unwrap();
    assert_eq!(ordered.iter().map(|a| a.id).collect::<Vec<_>>(), vec![second.id, first.id]);
}
