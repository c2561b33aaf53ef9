//! Knowledge context assembly.
//!
//! Renders an agent's most recent knowledge entries into a plain-text block
//! appended after the system prompt. The block is untrusted user-adjacent
//! content (uploaded documents/URLs); it is never interpreted as
//! instructions by this layer.

use uuid::Uuid;

use crate::error::RelayError;
use crate::store::KnowledgeStore;

/// Fixed cap on entries pulled into one generation context.
pub const KNOWLEDGE_LIMIT: usize = 20;

/// Render up to `limit` newest entries as `- <input>: <output>` lines.
/// Returns an empty string when the agent has no entries, so callers can
/// skip the section header entirely.
pub async fn build_context_block(
    store: &dyn KnowledgeStore,
    agent_id: Uuid,
    limit: usize,
) -> Result<String, RelayError> {
    let entries = store.recent_entries(agent_id, limit).await?;
    if entries.is_empty() {
        return Ok(String::new());
    }

    let mut block = String::new();
    for entry in entries {
        // Entries ingested from odd sources can carry empty fields; render
        // them as blanks instead of failing the turn.
        let input = entry.input.trim();
        let output = entry.output.trim();
        block.push_str("- ");
        block.push_str(input);
        block.push_str(": ");
        block.push_str(output);
        block.push('\n');
    }
    Ok(block)
}

/// System prompt plus knowledge section, with the header only present when
/// there are entries to show.
pub fn compose_system_prompt(system_prompt: &str, knowledge_block: &str) -> String {
    if knowledge_block.is_empty() {
        return system_prompt.to_string();
    }
    format!("{system_prompt}\n\nRelevant knowledge:\n{knowledge_block}")
}
