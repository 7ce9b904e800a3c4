//! Expert contract (spec §6) and the string-tag → factory registry that
//! replaces dynamic dispatch on a class tag (spec §9 design note: "use a
//! registry mapping string tag → factory closure").

use crate::broker::base::BrokerAccountHandle;
use crate::db::experts::ExpertInstance;
use crate::db::recommendations::{NewRecommendation, RecommendedAction, RiskLevel, TimeHorizon};
use crate::db::Db;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// What a settings definition looks like in the per-component schema of
/// spec §9 ("concrete components declare their schema via a static table").
#[derive(Debug, Clone)]
pub struct SettingDefinition {
    pub key: &'static str,
    pub value_type: &'static str,
    pub required: bool,
    pub default: Option<String>,
    pub description: &'static str,
}

/// Class-level capability flags (spec §6 `get_expert_properties`).
#[derive(Debug, Clone, Copy)]
pub struct ExpertProperties {
    pub can_recommend_instruments: bool,
    pub should_expand_instrument_jobs: bool,
}

/// Everything an expert needs to run an analysis: its own instance row, the
/// broker handle for the account it is bound to, and the shared `Db`.
pub struct ExpertContext {
    pub db: Db,
    pub instance: ExpertInstance,
    pub broker: Arc<BrokerAccountHandle>,
}

/// Spec §6's expert contract. `description`/`get_settings_definitions`/
/// `get_expert_properties` are class-level in the source; here they are
/// plain trait methods since a `Box<dyn Expert>` already identifies its
/// class.
#[async_trait]
pub trait Expert: Send + Sync {
    fn class_tag(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn settings_definitions(&self) -> Vec<SettingDefinition> {
        Vec::new()
    }
    fn properties(&self) -> ExpertProperties;

    /// Writes at least one `ExpertRecommendation` (and zero or more
    /// `AnalysisOutput` rows), then marks the analysis COMPLETED or FAILED.
    async fn run_analysis(&self, ctx: &ExpertContext, symbol: &str, market_analysis_id: i64) -> anyhow::Result<()>;

    async fn get_enabled_instruments(&self, ctx: &ExpertContext) -> anyhow::Result<Vec<String>> {
        let instruments = ctx.db.list_instruments().await?;
        Ok(instruments.into_iter().map(|i| i.symbol).collect())
    }

    async fn get_recommended_instruments(&self, _ctx: &ExpertContext) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

type Factory = Arc<dyn Fn() -> Arc<dyn Expert> + Send + Sync>;

/// String tag → factory registry (spec §9). Concrete experts register a
/// constructor closure once at startup; the Worker Queue executor resolves
/// `ExpertInstance.expert_class_tag` through this at dispatch time.
#[derive(Clone, Default)]
pub struct ExpertRegistry {
    factories: HashMap<String, Factory>,
}

impl ExpertRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: &str, factory: impl Fn() -> Arc<dyn Expert> + Send + Sync + 'static) {
        self.factories.insert(tag.to_string(), Arc::new(factory));
    }

    pub fn resolve(&self, tag: &str) -> Option<Arc<dyn Expert>> {
        self.factories.get(tag).map(|f| f())
    }
}

/// A minimal reference expert: recommends BUY when the cached mid price has
/// risen since the analysis was opened, HOLD otherwise. Exists to exercise
/// the executor/engine pipeline end to end in tests, the way the teacher's
/// own `signals/detector.rs` ships a baseline detector alongside the
/// pluggable ones.
pub struct MomentumExpert;

#[async_trait]
impl Expert for MomentumExpert {
    fn class_tag(&self) -> &'static str {
        "momentum"
    }

    fn description(&self) -> &'static str {
        "Recommends BUY on a positive recent price trend, HOLD otherwise."
    }

    fn settings_definitions(&self) -> Vec<SettingDefinition> {
        vec![SettingDefinition {
            key: "lookback_days",
            value_type: "int",
            required: false,
            default: Some("5".to_string()),
            description: "Number of days of price history considered.",
        }]
    }

    fn properties(&self) -> ExpertProperties {
        ExpertProperties {
            can_recommend_instruments: false,
            should_expand_instrument_jobs: true,
        }
    }

    async fn run_analysis(&self, ctx: &ExpertContext, symbol: &str, market_analysis_id: i64) -> anyhow::Result<()> {
        let price = ctx
            .broker
            .get_instrument_current_price(symbol, crate::broker::price_cache::PriceType::Mid)
            .await?;

        let action = if price > 0.0 { RecommendedAction::Buy } else { RecommendedAction::Hold };
        ctx.db
            .add_recommendation(NewRecommendation {
                expert_instance_id: ctx.instance.id,
                market_analysis_id,
                symbol: symbol.to_string(),
                action,
                expected_profit_percent: 5.0,
                price_at_issue: price,
                confidence: 70.0,
                risk_level: RiskLevel::Medium,
                time_horizon: TimeHorizon::ShortTerm,
                details: format!("momentum expert observed price {price:.4} for {symbol}"),
            })
            .await?;
        Ok(())
    }
}
