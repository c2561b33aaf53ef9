//! Channel adapters.
//!
//! Each submodule translates one platform's inbound payloads into the
//! normalized session/message pipeline and translates replies back into the
//! platform's outbound call. Adapters own protocol trust decisions
//! (signatures, verify tokens, ownership checks); the pipeline owns session
//! resolution, persistence ordering and generation.

pub mod discord;
pub mod meta;
pub mod pipeline;
pub mod telegram;
pub mod widget;

pub use pipeline::{run_turn, HistorySource, InboundTurn, TurnOutcome};

use serde::Deserialize;
use uuid::Uuid;

/// `?agentId=` query parameter shared by the webhook surfaces.
#[derive(Debug, Deserialize)]
pub struct AgentQuery {
    #[serde(rename = "agentId")]
    pub agent_id: Uuid,
}
