//! Action descriptors emitted by the Trade Action Engine (spec §4.C.5).
//!
//! The engine only emits these; turning them into submitted orders is the
//! caller's job (the Worker Queue executor, backed by `broker::BrokerAccount`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action_type")]
pub enum ActionDescriptor {
    Buy { quantity: f64 },
    Sell { quantity: f64 },
    SetTp { percent: f64 },
    SetSl { percent: f64 },
    Close,
    AdjustTpSl { tp_percent: f64, sl_percent: f64 },
}
