//! Trade Action Engine (spec §4.C): evaluates a ruleset's ordered
//! event-actions against a recommendation context and emits action
//! descriptors. Pure and synchronous — grounded in `risk.rs`'s computational
//! style in the teacher (no I/O, no async, every error becomes a result
//! value rather than a panic or a bubbled error).

pub mod actions;
pub mod conditions;

use crate::db::rulesets::EventAction;
use actions::ActionDescriptor;
use conditions::EvaluationContext;

/// One event-action's contribution, or the single error entry the engine
/// emits instead of throwing (spec §4.C.4).
#[derive(Debug, Clone)]
pub enum EngineResult {
    Actions {
        event_action_id: i64,
        actions: Vec<ActionDescriptor>,
    },
    Error(String),
}

/// Evaluates `event_actions` (already loaded, in `order_index` order) against
/// `ctx`. Stops at the first matching event-action unless its
/// `continue_processing` flag is set (spec §4.C.3).
pub fn evaluate(event_actions: &[EventAction], ctx: &EvaluationContext) -> Vec<EngineResult> {
    let mut results = Vec::new();
    for event_action in event_actions {
        let matched = event_action.triggers.iter().all(|c| c.evaluate(ctx));
        if matched {
            results.push(EngineResult::Actions {
                event_action_id: event_action.id,
                actions: event_action.actions.clone(),
            });
            if !event_action.continue_processing {
                break;
            }
        }
    }
    results
}

/// Loads a ruleset's event-actions and evaluates them; a missing ruleset
/// produces a single error entry rather than propagating (spec §4.C edge
/// policies).
pub async fn evaluate_ruleset(db: &crate::db::Db, ruleset_id: i64, ctx: &EvaluationContext) -> Vec<EngineResult> {
    match db.get_ruleset(ruleset_id).await {
        Ok(Some(_)) => match db.event_actions_for_ruleset(ruleset_id).await {
            Ok(event_actions) => evaluate(&event_actions, ctx),
            Err(e) => vec![EngineResult::Error(format!("failed to load event actions: {e}"))],
        },
        Ok(None) => vec![EngineResult::Error(format!("ruleset {ruleset_id} not found"))],
        Err(e) => vec![EngineResult::Error(format!("failed to load ruleset: {e}"))],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::actions::ActionDescriptor;
    use crate::rules::conditions::{Condition, FlagCondition};

    fn event_action(id: i64, order_index: i64, triggers: Vec<Condition>, actions: Vec<ActionDescriptor>, continue_processing: bool) -> EventAction {
        EventAction {
            id,
            ruleset_id: 1,
            kind: "enter_market".to_string(),
            order_index,
            triggers,
            actions,
            continue_processing,
        }
    }

    #[test]
    fn first_match_wins_and_stops() {
        let event_actions = vec![
            event_action(
                1,
                0,
                vec![Condition::Flag { flag: FlagCondition::Bullish }],
                vec![ActionDescriptor::Buy { quantity: 10.0 }],
                false,
            ),
            event_action(
                2,
                1,
                vec![Condition::Flag { flag: FlagCondition::Bullish }],
                vec![ActionDescriptor::SetTp { percent: 5.0 }],
                false,
            ),
        ];
        let ctx = EvaluationContext {
            bullish: true,
            ..Default::default()
        };
        let results = evaluate(&event_actions, &ctx);
        assert_eq!(results.len(), 1);
        match &results[0] {
            EngineResult::Actions { event_action_id, .. } => assert_eq!(*event_action_id, 1),
            _ => panic!("expected actions"),
        }
    }

    #[test]
    fn continue_processing_accumulates_multiple_matches() {
        let event_actions = vec![
            event_action(
                1,
                0,
                vec![Condition::Flag { flag: FlagCondition::Bullish }],
                vec![ActionDescriptor::Buy { quantity: 10.0 }],
                true,
            ),
            event_action(
                2,
                1,
                vec![Condition::Flag { flag: FlagCondition::Bullish }],
                vec![ActionDescriptor::SetTp { percent: 5.0 }],
                false,
            ),
        ];
        let ctx = EvaluationContext {
            bullish: true,
            ..Default::default()
        };
        let results = evaluate(&event_actions, &ctx);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn empty_ruleset_yields_empty_actions() {
        let results = evaluate(&[], &EvaluationContext::default());
        assert!(results.is_empty());
    }

    #[test]
    fn no_match_yields_empty_results() {
        let event_actions = vec![event_action(
            1,
            0,
            vec![Condition::Flag { flag: FlagCondition::Bearish }],
            vec![ActionDescriptor::Sell { quantity: 1.0 }],
            false,
        )];
        let ctx = EvaluationContext {
            bullish: true,
            ..Default::default()
        };
        assert!(evaluate(&event_actions, &ctx).is_empty());
    }
}
