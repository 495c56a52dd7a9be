//! Transcript compaction.
//!
//! When the running transcript crosses the configured share of the model's
//! context window, everything but the trailing window is folded into one
//! synthetic summary message via a nested model call. The summary is a
//! system-role message carrying a content prefix so later passes and the UI
//! can tell it apart from operator-authored system prompts.

use crate::error::Result;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::types::{ContentPart, GenerationSettings, ModelMessage, Role};

/// Content prefix marking a synthetic summary message.
pub const SUMMARY_PREFIX: &str = "[conversation-summary]";

const SUMMARIZER_PROMPT: &str = "Summarize the conversation below into a compact brief. \
Preserve facts, decisions, open tasks, and tool results the assistant may still need. \
Respond with the summary only.";

/// Rough token estimate over a transcript. Four characters per token is
/// coarse but errs on the side of compacting early.
pub fn estimate_tokens(messages: &[ModelMessage]) -> u64 {
    messages
        .iter()
        .map(|message| {
            let chars: usize = message
                .content
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::Reasoning { text } => text.len(),
                    ContentPart::ToolCall(call) => {
                        call.name.len() + call.arguments.to_string().len()
                    }
                    ContentPart::ToolResult(result) => result.result.to_string().len(),
                    ContentPart::Image(_) => 4_000,
                })
                .sum();
            (chars / 4 + 4) as u64
        })
        .sum()
}

/// Whether the transcript has crossed the compaction threshold.
pub fn over_threshold(messages: &[ModelMessage], context_length: usize, threshold: f64) -> bool {
    estimate_tokens(messages) as f64 > context_length as f64 * threshold
}

/// Fold all but the trailing `keep_recent` messages into one summary message.
///
/// A leading operator system prompt is never folded. Returns the number of
/// messages summarized, or 0 when the transcript is too short to compact.
/// Callers treat an error as "skip compaction this turn", not as fatal.
pub async fn compact(
    provider: &dyn ModelProvider,
    transcript: &mut Vec<ModelMessage>,
    keep_recent: usize,
) -> Result<usize> {
    let head = usize::from(
        transcript
            .first()
            .map(|m| m.role == Role::System && !m.text().starts_with(SUMMARY_PREFIX))
            .unwrap_or(false),
    );
    if transcript.len() <= head + keep_recent + 1 {
        return Ok(0);
    }
    let fold_end = transcript.len() - keep_recent;
    let folded = &transcript[head..fold_end];

    let rendered = folded
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    let request = ProviderRequest {
        messages: vec![
            ModelMessage::system(SUMMARIZER_PROMPT),
            ModelMessage::user(rendered),
        ],
        settings: GenerationSettings::default(),
        tools: None,
    };
    let response = provider.generate_text(&request).await?;

    let summarized = folded.len();
    let summary = ModelMessage::system(format!("{SUMMARY_PREFIX} {}", response.text.trim()));
    transcript.splice(head..fold_end, std::iter::once(summary));
    Ok(summarized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelCapabilities;
    use crate::provider::ProviderResponse;
    use crate::types::{TextStreamDelta, Usage};
    use async_trait::async_trait;
    use futures::stream::BoxStream;

    struct Summarizer;

    #[async_trait]
    impl ModelProvider for Summarizer {
        fn provider_name(&self) -> &str {
            "stub"
        }
        fn model_id(&self) -> &str {
            "stub-model"
        }
        fn capabilities(&self) -> &ModelCapabilities {
            static CAPS: ModelCapabilities = ModelCapabilities {
                supports_tools: true,
                supports_reasoning: false,
                context_length: 128_000,
                max_output_tokens: None,
            };
            &CAPS
        }
        async fn generate_text(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderResponse> {
            Ok(ProviderResponse {
                text: "the gist".to_string(),
                usage: Usage::new(100, 5),
                tool_calls: vec![],
                finish_reason: None,
            })
        }
        async fn stream_text(
            &self,
            _request: &ProviderRequest,
        ) -> Result<BoxStream<'static, Result<TextStreamDelta>>> {
            Ok(Box::pin(futures::stream::iter(vec![Ok(
                TextStreamDelta::done(),
            )])))
        }
    }

    fn transcript(n: usize) -> Vec<ModelMessage> {
        let mut messages = vec![ModelMessage::system("You are helpful.")];
        for i in 0..n {
            messages.push(ModelMessage::user(format!("question {i}")));
            messages.push(ModelMessage::assistant(format!("answer {i}")));
        }
        messages
    }

    #[tokio::test]
    async fn keeps_prompt_plus_summary_plus_recent_window() {
        let mut messages = transcript(15); // 1 system + 30 turns
        let folded = compact(&Summarizer, &mut messages, 10).await.unwrap();

        assert_eq!(folded, 20);
        assert_eq!(messages.len(), 12); // prompt + summary + 10 recent
        assert_eq!(messages[0].text(), "You are helpful.");
        assert!(messages[1].text().starts_with(SUMMARY_PREFIX));
        assert_eq!(messages[2].text(), "question 10");
        assert_eq!(messages.last().unwrap().text(), "answer 14");
    }

    #[tokio::test]
    async fn second_pass_never_refolds_kept_messages_alone() {
        let mut messages = transcript(15);
        compact(&Summarizer, &mut messages, 10).await.unwrap();
        // prompt + summary + 10: the 10 kept originals are inside the window,
        // so there is exactly one foldable message and compaction is a no-op.
        let folded = compact(&Summarizer, &mut messages, 10).await.unwrap();
        assert_eq!(folded, 0);
        assert_eq!(messages.len(), 12);
    }

    #[tokio::test]
    async fn short_transcript_is_untouched() {
        let mut messages = transcript(3);
        let folded = compact(&Summarizer, &mut messages, 10).await.unwrap();
        assert_eq!(folded, 0);
        assert_eq!(messages.len(), 7);
    }

    #[test]
    fn threshold_uses_share_of_context_window() {
        let messages = vec![ModelMessage::user("x".repeat(4_000))];
        assert!(over_threshold(&messages, 1_000, 0.8));
        assert!(!over_threshold(&messages, 10_000, 0.8));
    }
}
