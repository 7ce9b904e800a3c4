//! AI instrument selector (spec §4.D: a `DYNAMIC` expansion "asks an AI
//! instrument selector (an injected service) with the expert's configured
//! prompt and model; cap at `max_instruments`").
//!
//! Thin hook trait in the same shape as `BrokerAccount` (`broker/mod.rs`): one
//! async method, no shared logic, a concrete implementation is a provider the
//! executor is merely wired to call. No concrete LLM-calling provider ships in
//! this crate — see DESIGN.md's dependency notes and Open Question 6 for why
//! the `DYNAMIC` expansion path falls back to `Expert::get_recommended_instruments`
//! when none is injected, the same gap `reqwest`'s removal documents for
//! `BrokerAccount` providers.

use crate::expert::ExpertContext;
use async_trait::async_trait;

#[async_trait]
pub trait AiInstrumentSelector: Send + Sync {
    /// Reads the expert's configured prompt/model from its settings (owner
    /// `SettingOwner::Expert(instance.id)`) and returns at most
    /// `max_instruments` symbols.
    async fn select_instruments(&self, ctx: &ExpertContext, max_instruments: usize) -> anyhow::Result<Vec<String>>;
}
