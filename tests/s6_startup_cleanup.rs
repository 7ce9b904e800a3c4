//! S6: an analysis left RUNNING across a restart is marked FAILED with a
//! `startup_cleanup` marker in its state, instead of staying RUNNING forever.

mod common;

use trade_core::db::analysis::{AnalysisStatus, AnalysisUseCase};

#[tokio::test]
async fn stuck_running_analysis_is_failed_on_startup_reconciliation() {
    let acc = common::account().await;
    let instance = acc.db.add_expert_instance(acc.account_id, "momentum", 100.0, None, None).await.unwrap();

    let analysis = acc.db.create_market_analysis("AAPL", instance.id, AnalysisUseCase::EnterMarket).await.unwrap();
    acc.db.update_market_analysis_status(analysis.id, AnalysisStatus::Running, None).await.unwrap();

    // A second analysis that completed normally must be left untouched.
    let settled = acc.db.create_market_analysis("MSFT", instance.id, AnalysisUseCase::EnterMarket).await.unwrap();
    acc.db.update_market_analysis_status(settled.id, AnalysisStatus::Completed, None).await.unwrap();

    let stuck = acc.db.fail_stuck_running_analyses().await.unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].id, analysis.id);

    let reloaded = acc.db.get_market_analysis(analysis.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status, AnalysisStatus::Failed);
    assert_eq!(reloaded.state["startup_cleanup"], serde_json::json!(true));
    assert!(reloaded.state["failure_reason"].as_str().unwrap().contains("restart"));

    let settled_reloaded = acc.db.get_market_analysis(settled.id).await.unwrap().unwrap();
    assert_eq!(settled_reloaded.status, AnalysisStatus::Completed);
}
