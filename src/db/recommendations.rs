use super::{now_iso, Db};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Buy,
    Sell,
    Hold,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Buy => "BUY",
            RecommendedAction::Sell => "SELL",
            RecommendedAction::Hold => "HOLD",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "SELL" => RecommendedAction::Sell,
            "HOLD" => RecommendedAction::Hold,
            _ => RecommendedAction::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "LOW" => RiskLevel::Low,
            "HIGH" => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeHorizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl TimeHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeHorizon::ShortTerm => "SHORT_TERM",
            TimeHorizon::MediumTerm => "MEDIUM_TERM",
            TimeHorizon::LongTerm => "LONG_TERM",
        }
    }
    pub fn from_str(s: &str) -> Self {
        match s {
            "SHORT_TERM" => TimeHorizon::ShortTerm,
            "LONG_TERM" => TimeHorizon::LongTerm,
            _ => TimeHorizon::MediumTerm,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertRecommendation {
    pub id: i64,
    pub expert_instance_id: i64,
    pub market_analysis_id: i64,
    pub symbol: String,
    pub action: RecommendedAction,
    pub expected_profit_percent: f64,
    pub price_at_issue: f64,
    /// Always in `[0, 100]` — clamped at write time (Open Question 1, see SPEC_FULL §4.1).
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub time_horizon: TimeHorizon,
    pub details: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewRecommendation {
    pub expert_instance_id: i64,
    pub market_analysis_id: i64,
    pub symbol: String,
    pub action: RecommendedAction,
    pub expected_profit_percent: f64,
    pub price_at_issue: f64,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub time_horizon: TimeHorizon,
    pub details: String,
}

impl Db {
    pub async fn add_recommendation(&self, rec: NewRecommendation) -> rusqlite::Result<ExpertRecommendation> {
        let confidence = rec.confidence.clamp(0.0, 100.0);
        let now = now_iso();
        self.with_conn("add_recommendation", move |conn| {
            conn.execute(
                "INSERT INTO expert_recommendations
                 (expert_instance_id, market_analysis_id, symbol, action, expected_profit_percent,
                  price_at_issue, confidence, risk_level, time_horizon, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    rec.expert_instance_id,
                    rec.market_analysis_id,
                    rec.symbol,
                    rec.action.as_str(),
                    rec.expected_profit_percent,
                    rec.price_at_issue,
                    confidence,
                    rec.risk_level.as_str(),
                    rec.time_horizon.as_str(),
                    rec.details,
                    now,
                ],
            )?;
            let id = conn.last_insert_rowid();
            Ok(ExpertRecommendation {
                id,
                expert_instance_id: rec.expert_instance_id,
                market_analysis_id: rec.market_analysis_id,
                symbol: rec.symbol,
                action: rec.action,
                expected_profit_percent: rec.expected_profit_percent,
                price_at_issue: rec.price_at_issue,
                confidence,
                risk_level: rec.risk_level,
                time_horizon: rec.time_horizon,
                details: rec.details,
                created_at: now,
            })
        })
        .await
    }

    pub async fn get_recommendation(&self, id: i64) -> rusqlite::Result<Option<ExpertRecommendation>> {
        self.with_conn("get_recommendation", move |conn| {
            conn.query_row(
                "SELECT id, expert_instance_id, market_analysis_id, symbol, action, expected_profit_percent,
                        price_at_issue, confidence, risk_level, time_horizon, details, created_at
                 FROM expert_recommendations WHERE id = ?1",
                params![id],
                row_to_rec,
            )
            .optional()
        })
        .await
    }

    pub async fn latest_recommendation_for_analysis(&self, market_analysis_id: i64) -> rusqlite::Result<Option<ExpertRecommendation>> {
        self.with_conn("latest_recommendation_for_analysis", move |conn| {
            conn.query_row(
                "SELECT id, expert_instance_id, market_analysis_id, symbol, action, expected_profit_percent,
                        price_at_issue, confidence, risk_level, time_horizon, details, created_at
                 FROM expert_recommendations WHERE market_analysis_id = ?1 ORDER BY id DESC LIMIT 1",
                params![market_analysis_id],
                row_to_rec,
            )
            .optional()
        })
        .await
    }
}

fn row_to_rec(row: &rusqlite::Row) -> rusqlite::Result<ExpertRecommendation> {
    let action: String = row.get(4)?;
    let risk: String = row.get(8)?;
    let horizon: String = row.get(9)?;
    Ok(ExpertRecommendation {
        id: row.get(0)?,
        expert_instance_id: row.get(1)?,
        market_analysis_id: row.get(2)?,
        symbol: row.get(3)?,
        action: RecommendedAction::from_str(&action),
        expected_profit_percent: row.get(5)?,
        price_at_issue: row.get(6)?,
        confidence: row.get(7)?,
        risk_level: RiskLevel::from_str(&risk),
        time_horizon: TimeHorizon::from_str(&horizon),
        details: row.get(10)?,
        created_at: row.get(11)?,
    })
}
