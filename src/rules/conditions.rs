//! Trigger conditions (spec §4.C.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
}

impl Operator {
    pub fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Gte => lhs >= rhs,
            Operator::Lt => lhs < rhs,
            Operator::Lte => lhs <= rhs,
            Operator::Eq => (lhs - rhs).abs() < 1e-9,
            Operator::Neq => (lhs - rhs).abs() >= 1e-9,
        }
    }
}

/// Flag conditions: boolean, no operand (spec §4.C.2 "Flag conditions").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagCondition {
    Bullish,
    Bearish,
    HasNoPosition,
    HasPosition,
    HasNoPositionAccountWide,
    HasPositionAccountWide,
    ShortTerm,
    MediumTerm,
    LongTerm,
    HighRisk,
    MediumRisk,
    LowRisk,
    CurrentRatingPositive,
    CurrentRatingNeutral,
    CurrentRatingNegative,
}

/// Comparison conditions: numeric, with an operator and a value (spec §4.C.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonField {
    Confidence,
    ExpectedProfitTargetPercent,
    DaysOpened,
    ProfitLossPercent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "condition_kind")]
pub enum Condition {
    Flag { flag: FlagCondition },
    Comparison {
        field: ComparisonField,
        operator: Operator,
        value: f64,
    },
}

/// Everything a condition needs to evaluate against, assembled by the caller
/// before invoking the engine (spec §4.C.2: "an existing order" for
/// `days_opened`; position state "for this expert on this symbol" and
/// "account-wide").
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub bullish: bool,
    pub bearish: bool,
    pub has_position: bool,
    pub has_position_account_wide: bool,
    pub confidence: f64,
    pub expected_profit_target_percent: f64,
    pub risk_level: Option<crate::db::recommendations::RiskLevel>,
    pub time_horizon: Option<crate::db::recommendations::TimeHorizon>,
    pub current_rating: Option<crate::db::recommendations::RecommendedAction>,
    /// Age, in days, of a referenced existing order/transaction. `None` if
    /// there is none to compare against — any `days_opened` condition then
    /// evaluates false rather than erroring.
    pub days_opened: Option<f64>,
    pub profit_loss_percent: Option<f64>,
}

impl Condition {
    pub fn evaluate(&self, ctx: &EvaluationContext) -> bool {
        match self {
            Condition::Flag { flag } => evaluate_flag(*flag, ctx),
            Condition::Comparison { field, operator, value } => {
                let Some(lhs) = comparison_value(*field, ctx) else {
                    return false;
                };
                operator.apply(lhs, *value)
            }
        }
    }
}

fn evaluate_flag(flag: FlagCondition, ctx: &EvaluationContext) -> bool {
    use crate::db::recommendations::{RecommendedAction, RiskLevel, TimeHorizon};
    match flag {
        FlagCondition::Bullish => ctx.bullish,
        FlagCondition::Bearish => ctx.bearish,
        FlagCondition::HasNoPosition => !ctx.has_position,
        FlagCondition::HasPosition => ctx.has_position,
        FlagCondition::HasNoPositionAccountWide => !ctx.has_position_account_wide,
        FlagCondition::HasPositionAccountWide => ctx.has_position_account_wide,
        FlagCondition::ShortTerm => ctx.time_horizon == Some(TimeHorizon::ShortTerm),
        FlagCondition::MediumTerm => ctx.time_horizon == Some(TimeHorizon::MediumTerm),
        FlagCondition::LongTerm => ctx.time_horizon == Some(TimeHorizon::LongTerm),
        FlagCondition::HighRisk => ctx.risk_level == Some(RiskLevel::High),
        FlagCondition::MediumRisk => ctx.risk_level == Some(RiskLevel::Medium),
        FlagCondition::LowRisk => ctx.risk_level == Some(RiskLevel::Low),
        FlagCondition::CurrentRatingPositive => ctx.current_rating == Some(RecommendedAction::Buy),
        FlagCondition::CurrentRatingNeutral => ctx.current_rating == Some(RecommendedAction::Hold),
        FlagCondition::CurrentRatingNegative => ctx.current_rating == Some(RecommendedAction::Sell),
    }
}

fn comparison_value(field: ComparisonField, ctx: &EvaluationContext) -> Option<f64> {
    match field {
        ComparisonField::Confidence => Some(ctx.confidence),
        ComparisonField::ExpectedProfitTargetPercent => Some(ctx.expected_profit_target_percent),
        ComparisonField::DaysOpened => ctx.days_opened,
        ComparisonField::ProfitLossPercent => ctx.profit_loss_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_flag_matches_context() {
        let ctx = EvaluationContext {
            bullish: true,
            ..Default::default()
        };
        assert!(Condition::Flag { flag: FlagCondition::Bullish }.evaluate(&ctx));
        assert!(!Condition::Flag { flag: FlagCondition::Bearish }.evaluate(&ctx));
    }

    #[test]
    fn comparison_respects_operator() {
        let ctx = EvaluationContext {
            confidence: 80.0,
            ..Default::default()
        };
        let cond = Condition::Comparison {
            field: ComparisonField::Confidence,
            operator: Operator::Gte,
            value: 75.0,
        };
        assert!(cond.evaluate(&ctx));
        let cond2 = Condition::Comparison {
            field: ComparisonField::Confidence,
            operator: Operator::Gt,
            value: 90.0,
        };
        assert!(!cond2.evaluate(&ctx));
    }

    #[test]
    fn missing_days_opened_evaluates_false() {
        let ctx = EvaluationContext::default();
        let cond = Condition::Comparison {
            field: ComparisonField::DaysOpened,
            operator: Operator::Gt,
            value: 3.0,
        };
        assert!(!cond.evaluate(&ctx));
    }
}
