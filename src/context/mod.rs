//! Context Compactor: importance-tagged conversation compaction (§4.7).
//!
//! Grounded directly in the teacher's `engine/context.rs`
//! (`maybe_compact_model_messages`, `MessageImportance`, soft-limit
//! thresholds), generalized onto the abstract `Conversation`/`Turn` model
//! from SPEC_FULL.md §3 instead of the engine's concrete message structs.

use crate::ledger::TokenLedger;
use crate::model_client::small_model::SmallModelClient;

/// `Low < Normal < High < Critical`, matching `engine/types.rs`'s
/// `MessageImportance` derive order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Importance {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: crate::model_client::Role,
    pub content: String,
    pub importance: Importance,
}

impl Turn {
    pub fn new(role: crate::model_client::Role, content: impl Into<String>, importance: Importance) -> Self {
        Self { role, content: content.into(), importance }
    }
}

const HIGH_WATER_FRACTION: f64 = 0.8;
const LOW_WATER_FRACTION: f64 = 0.5;
const VIRTUAL_TOKEN_LIMIT: u64 = 80_000;
const DEFAULT_KEEP_TAIL: usize = 4;
const OMITTED_MARKER: &str = "[earlier context omitted]";
const CHARS_PER_TOKEN: usize = 4;

fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() + 3) / CHARS_PER_TOKEN) as u64
}

pub fn high_water_mark(declared_context_window: Option<u64>) -> u64 {
    let window = declared_context_window.unwrap_or(VIRTUAL_TOKEN_LIMIT);
    (window as f64 * HIGH_WATER_FRACTION) as u64
}

fn low_water_mark(declared_context_window: Option<u64>) -> u64 {
    let window = declared_context_window.unwrap_or(VIRTUAL_TOKEN_LIMIT);
    (window as f64 * LOW_WATER_FRACTION) as u64
}

pub fn total_tokens(turns: &[Turn]) -> u64 {
    turns.iter().map(|t| estimate_tokens(&t.content)).sum()
}

pub fn should_compact(turns: &[Turn], declared_context_window: Option<u64>) -> bool {
    total_tokens(turns) > high_water_mark(declared_context_window)
}

/// Runs the four-step algorithm from §4.7. Never removes the latest user
/// message or the latest tool result; the system prompt (turn 0) is always
/// preserved.
pub async fn compact(
    turns: &mut Vec<Turn>,
    declared_context_window: Option<u64>,
    keep_tail: Option<usize>,
    small_model: &SmallModelClient,
    ledger: &mut TokenLedger,
) {
    if turns.len() < 3 {
        return;
    }
    let keep_tail = keep_tail.unwrap_or(DEFAULT_KEEP_TAIL).max(2);
    let low_water = low_water_mark(declared_context_window);

    // Step 1: find the droppable window — everything after the system
    // prompt and before the preserved tail — whose removal would bring the
    // total under the low-water mark.
    let end = turns.len().saturating_sub(keep_tail).max(1);
    if end <= 1 {
        deterministic_truncate(turns, 1, turns.len().saturating_sub(keep_tail).max(1));
        return;
    }

    let droppable: Vec<usize> = (1..end).collect();
    let (keep_indices, drop_indices): (Vec<usize>, Vec<usize>) =
        droppable.into_iter().partition(|&idx| turns[idx].importance >= Importance::High);

    if drop_indices.is_empty() {
        return;
    }

    let window_text = drop_indices
        .iter()
        .map(|&idx| format!("[{:?}] {}", turns[idx].role, turns[idx].content))
        .collect::<Vec<_>>()
        .join("\n");
    let window_bytes = window_text.len() as u64;

    // Step 2 + 3: summarise and replace, falling back to deterministic
    // truncation when the small model is unavailable or returns null.
    let summary_text = small_model.summarise_conversation_window(&window_text, ledger).await;

    let mut new_turns = Vec::with_capacity(turns.len());
    new_turns.push(turns[0].clone());
    match summary_text {
        Some(summary) => {
            new_turns.push(Turn::new(crate::model_client::Role::Assistant, summary, Importance::High));
        }
        None => {
            new_turns.push(Turn::new(crate::model_client::Role::Assistant, OMITTED_MARKER, Importance::Normal));
        }
    }
    for idx in keep_indices {
        new_turns.push(turns[idx].clone());
    }
    new_turns.extend(turns[end..].iter().cloned());

    // Step 4: record bytes saved.
    let new_text_len: u64 = new_turns.iter().skip(1).take(1).map(|t| t.content.len() as u64).sum();
    let saved = window_bytes.saturating_sub(new_text_len);
    if saved > 0 {
        ledger.record(crate::ledger::Provider::LocalRunner, "context_compaction_savings", 0, 0, "n/a", saved);
    }

    *turns = new_turns;
    debug_assert!(total_tokens(turns) <= low_water || low_water == 0);
}

/// Deterministic fallback: drop the middle half of the droppable range and
/// insert the fixed marker.
fn deterministic_truncate(turns: &mut Vec<Turn>, start: usize, end: usize) {
    if end <= start {
        return;
    }
    let span = end - start;
    let drop_start = start + span / 4;
    let drop_end = end - span / 4;
    if drop_end <= drop_start {
        return;
    }
    let mut new_turns = Vec::with_capacity(turns.len());
    new_turns.extend(turns[..drop_start].iter().cloned());
    new_turns.push(Turn::new(crate::model_client::Role::Assistant, OMITTED_MARKER, Importance::Normal));
    new_turns.extend(turns[drop_end..].iter().cloned());
    *turns = new_turns;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{PriceTable, TokenLedger};
    use crate::model_client::{ModelClient, OnDeviceClient};

    fn ledger() -> TokenLedger {
        TokenLedger::new(PriceTable::default())
    }

    fn small_model_always_unavailable() -> SmallModelClient {
        SmallModelClient::new(None, ModelClient::OnDeviceSmall(OnDeviceClient::new(Some("http://127.0.0.1:1".to_string()), "x")))
    }

    #[tokio::test]
    async fn compaction_preserves_system_and_tail() {
        let mut turns = vec![
            Turn::new(crate::model_client::Role::System, "system prompt", Importance::Critical),
            Turn::new(crate::model_client::Role::User, "task", Importance::Critical),
        ];
        for i in 0..30 {
            turns.push(Turn::new(crate::model_client::Role::Assistant, format!("filler {i}").repeat(50), Importance::Low));
        }
        turns.push(Turn::new(crate::model_client::Role::User, "final user message", Importance::Critical));
        turns.push(Turn::new(crate::model_client::Role::Tool, "final tool result", Importance::Critical));

        let last_user = turns[turns.len() - 2].content.clone();
        let last_tool = turns[turns.len() - 1].content.clone();
        let system_prompt = turns[0].content.clone();

        let small_model = small_model_always_unavailable();
        let mut ledger_inst = ledger();
        compact(&mut turns, Some(10_000), Some(4), &small_model, &mut ledger_inst).await;

        assert_eq!(turns[0].content, system_prompt);
        assert_eq!(turns[turns.len() - 2].content, last_user);
        assert_eq!(turns[turns.len() - 1].content, last_tool);
    }

    #[test]
    fn should_compact_respects_high_water_mark() {
        let small = vec![Turn::new(crate::model_client::Role::User, "hi", Importance::Normal)];
        assert!(!should_compact(&small, Some(1000)));

        let big_content = "x".repeat(20_000);
        let large = vec![Turn::new(crate::model_client::Role::User, big_content, Importance::Normal)];
        assert!(should_compact(&large, Some(1000)));
    }
}
