//! Round summary sent with `done` and stored on the block

use crate::round::RoundState;
use parley_core::{ConversationId, HandlerError, SessionStats, SummaryStatus, UsageStats, UserId};
use std::collections::BTreeSet;

/// Inputs of a summary besides the round counters
#[derive(Debug, Clone, Copy)]
pub struct SummaryContext<'a> {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub handler: &'a str,
    pub usage: &'a UsageStats,
    pub error: Option<&'a HandlerError>,
}

/// Session id reported for a conversation
#[must_use]
pub fn session_id(conversation_id: ConversationId) -> String {
    format!("conv_{conversation_id}")
}

/// Build the final statistics of a round.
///
/// Tool calls observed on the stream take precedence over tools the
/// handler reported; file paths are the union of both.
#[must_use]
pub fn build(state: &RoundState, ctx: &SummaryContext<'_>) -> SessionStats {
    let observed = state.tools();
    let tools_used = if observed.is_empty() {
        ctx.usage.tools_used.clone()
    } else {
        observed
    };
    let files: BTreeSet<String> = state
        .files()
        .into_iter()
        .chain(ctx.usage.file_paths.iter().cloned())
        .collect();

    SessionStats {
        session_id: session_id(ctx.conversation_id),
        user_id: ctx.user_id,
        handler: ctx.handler.to_string(),
        total_duration_ms: u64::try_from(state.elapsed().as_millis()).unwrap_or(u64::MAX),
        thinking_duration_ms: ctx.usage.thinking_duration_ms,
        tool_duration_ms: ctx.usage.tool_duration_ms,
        generation_duration_ms: ctx.usage.generation_duration_ms,
        input_tokens: ctx.usage.input_tokens,
        output_tokens: ctx.usage.output_tokens,
        cache_read_tokens: ctx.usage.cache_read_tokens,
        cache_write_tokens: ctx.usage.cache_write_tokens,
        total_cost_usd: ctx.usage.cost_usd,
        tool_call_count: tools_used.len(),
        tools_used,
        files_modified: files.len(),
        file_paths: files.into_iter().collect(),
        status: if ctx.error.is_some() {
            SummaryStatus::Error
        } else {
            SummaryStatus::Success
        },
        error_message: ctx.error.map(ToString::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::HandlerEvent;

    #[test]
    fn summary_combines_observed_and_reported() {
        let state = RoundState::new();
        state.record(&HandlerEvent::tool_use("calendar", "list"));
        let usage = UsageStats {
            input_tokens: 100,
            output_tokens: 40,
            cost_usd: 0.5,
            tools_used: vec!["ignored".into()],
            file_paths: ["notes/a.md".to_string()].into(),
            ..UsageStats::default()
        };

        let summary = build(
            &state,
            &SummaryContext {
                conversation_id: ConversationId(12),
                user_id: UserId(3),
                handler: "schedule",
                usage: &usage,
                error: None,
            },
        );

        assert_eq!(summary.session_id, "conv_12");
        assert_eq!(summary.tools_used, vec!["calendar".to_string()]);
        assert_eq!(summary.tool_call_count, 1);
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.total_tokens(), 140);
        assert_eq!(summary.status, SummaryStatus::Success);
    }

    #[test]
    fn errors_mark_the_summary() {
        let error = HandlerError::Failed("backend down".into());
        let summary = build(
            &RoundState::new(),
            &SummaryContext {
                conversation_id: ConversationId::NEW,
                user_id: UserId(3),
                handler: "memo",
                usage: &UsageStats::default(),
                error: Some(&error),
            },
        );
        assert_eq!(summary.status, SummaryStatus::Error);
        assert_eq!(summary.error_message.as_deref(), Some("handler failed: backend down"));
        assert_eq!(summary.session_id, "conv_0");
    }
}
