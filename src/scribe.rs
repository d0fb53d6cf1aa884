//! Markovian Scribe: a rolling compressed session summary.
//!
//! Instead of replaying conversation history into every prompt, the engine
//! keeps one bounded summary of the session so far. Each update folds the
//! most recent turns into a fresh summary through the generator; the new
//! summary **replaces** the old. There is no history of summaries, only the
//! current state.
//!
//! A generator failure or timeout leaves the previous state untouched; the
//! next turn proceeds with stale state rather than none.

use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::generator::Generator;
use crate::models::SessionState;
use crate::store::Store;

/// Hard cap on the stored summary, in characters.
pub const SUMMARY_CHAR_CAP: usize = 1200;

/// Only this many most-recent turns feed a state update.
const MAX_TURNS: usize = 10;

/// Serializes state updates; reads go straight to the store.
pub struct Scribe {
    update_lock: tokio::sync::Mutex<()>,
}

impl Default for Scribe {
    fn default() -> Self {
        Self::new()
    }
}

impl Scribe {
    pub fn new() -> Self {
        Self {
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Compress the most recent turns into a new session state.
    ///
    /// Returns the stored summary. On generator failure the previous state
    /// survives and the error propagates to the caller.
    pub async fn update_state(
        &self,
        store: &Store,
        generator: &dyn Generator,
        turns: &[(String, String)],
    ) -> EngineResult<String> {
        if turns.is_empty() {
            return Err(EngineError::BadRequest("history must not be empty".into()));
        }

        let _guard = self.update_lock.lock().await;

        let previous = store
            .get_session_state()
            .await?
            .map(|s| s.summary)
            .unwrap_or_default();

        let recent = &turns[turns.len().saturating_sub(MAX_TURNS)..];
        let prompt = compression_prompt(&previous, recent);

        let raw = generator.generate(&prompt).await?;
        let summary = truncate_chars(raw.trim(), SUMMARY_CHAR_CAP);

        store
            .put_session_state(&SessionState {
                summary: summary.clone(),
                updated_at: chrono::Utc::now().timestamp_millis(),
            })
            .await?;

        info!("session state updated ({} chars)", summary.chars().count());
        Ok(summary)
    }

    /// Current summary, or empty when no state exists.
    pub async fn get_state(&self, store: &Store) -> EngineResult<String> {
        Ok(store
            .get_session_state()
            .await?
            .map(|s| s.summary)
            .unwrap_or_default())
    }

    pub async fn clear_state(&self, store: &Store) -> EngineResult<()> {
        store.clear_session_state().await
    }
}

/// Context Weaving: prepend the session state to a generation prompt.
///
/// Token-budget priority runs system prompt > session state > user message >
/// retrieved context; the state block is capped at [`SUMMARY_CHAR_CAP`] so
/// it can never crowd out the message itself.
pub fn weave(state: &str, user_message: &str) -> String {
    if state.is_empty() {
        return user_message.to_string();
    }
    format!(
        "[SESSION STATE]\n{}\n[/SESSION STATE]\n\n{}",
        state, user_message
    )
}

fn compression_prompt(previous: &str, turns: &[(String, String)]) -> String {
    let mut transcript = String::new();
    for (role, content) in turns {
        transcript.push_str(&format!("{}: {}\n", role, content));
    }

    let mut prompt = String::from(
        "Compress the conversation below into a single running summary of at \
         most 200 words. Preserve names, decisions, open questions, and task \
         state. Output only the summary text.\n\n",
    );
    if !previous.is_empty() {
        prompt.push_str(&format!("Previous summary:\n{}\n\n", previous));
    }
    prompt.push_str(&format!("Recent turns:\n{}", transcript));
    prompt
}

/// Truncate to a character count without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weave_wraps_state_around_message() {
        let woven = weave("user is debugging the ingest path", "what changed?");
        assert!(woven.starts_with("[SESSION STATE]\n"));
        assert!(woven.contains("[/SESSION STATE]\n\nwhat changed?"));
    }

    #[test]
    fn weave_without_state_is_passthrough() {
        assert_eq!(weave("", "hello"), "hello");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(2000);
        let truncated = truncate_chars(&text, SUMMARY_CHAR_CAP);
        assert_eq!(truncated.chars().count(), SUMMARY_CHAR_CAP);
    }

    #[test]
    fn compression_prompt_includes_previous_state_and_turns() {
        let prompt = compression_prompt(
            "old summary",
            &[("user".to_string(), "hi".to_string())],
        );
        assert!(prompt.contains("old summary"));
        assert!(prompt.contains("user: hi"));
    }
}
