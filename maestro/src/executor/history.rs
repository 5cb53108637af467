//! Session history compression.
//!
//! When a conversation grows past the threshold, everything but the
//! recent window is summarized by one LLM call and replaced by a single
//! system entry. The summary is cached against a content hash so the
//! same slice is never summarized twice.

use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{ChatOptions, LlmClient, LlmMessage};
use crate::message::{Message, MessageKind};
use crate::util::{fnv1a, truncate};

/// Cached summary state, persisted in the session config.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SummaryCache {
    /// Summary of the compressed slice.
    pub summary: String,
    /// Hash of the compressed slice the summary belongs to.
    pub hash: String,
}

/// Output of a compression pass.
#[derive(Debug)]
pub struct CompressedHistory {
    /// Messages to feed the LLM (summary entry + recent window, or the
    /// original history when below threshold).
    pub effective: Vec<Message>,
    /// New cache state, when a summary was produced or reused.
    pub cache: Option<SummaryCache>,
}

/// Compress `history` when it exceeds `threshold`, keeping the last
/// `recent_window` messages verbatim.
pub async fn compress_history(
    llm: &LlmClient,
    history: Vec<Message>,
    project_name: &str,
    threshold: usize,
    recent_window: usize,
    cached: Option<&SummaryCache>,
) -> Result<CompressedHistory> {
    if history.len() <= threshold {
        return Ok(CompressedHistory {
            effective: history,
            cache: None,
        });
    }

    let split = history.len() - recent_window;
    let older = &history[..split];
    let recent = history[split..].to_vec();
    let hash = hash_messages(older);

    if let Some(cache) = cached
        && cache.hash == hash
        && !cache.summary.is_empty()
    {
        debug!(chars = cache.summary.len(), "reusing cached history summary");
        return Ok(CompressedHistory {
            effective: with_summary(&history[0].session_id, &cache.summary, recent),
            cache: Some(cache.clone()),
        });
    }

    match summarize(llm, older, project_name).await {
        Ok(summary) if !summary.is_empty() => {
            debug!(compressed = older.len(), chars = summary.len(), "history compressed");
            let cache = SummaryCache {
                summary: summary.clone(),
                hash,
            };
            Ok(CompressedHistory {
                effective: with_summary(&history[0].session_id, &summary, recent),
                cache: Some(cache),
            })
        }
        Ok(_) | Err(_) => {
            warn!("history compression failed, truncating to recent window");
            Ok(CompressedHistory {
                effective: recent,
                cache: None,
            })
        }
    }
}

fn with_summary(session_id: &str, summary: &str, recent: Vec<Message>) -> Vec<Message> {
    let mut out = vec![Message::new(
        session_id,
        "system",
        "all",
        MessageKind::System,
        format!("[Conversation summary]\n{summary}"),
    )];
    out.extend(recent);
    out
}

async fn summarize(llm: &LlmClient, messages: &[Message], project_name: &str) -> Result<String> {
    let conversation = messages
        .iter()
        .map(|m| {
            let content = if m.content.len() > 600 {
                format!("{}\n... ({} chars total)", truncate(&m.content, 500), m.content.len())
            } else {
                m.content.clone()
            };
            format!("**{}**: {content}", m.from_agent)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let prompt = format!(
        "Summarize this conversation about the project '{project_name}' into a \
         concise context summary. Preserve:\n\
         - Key decisions made\n\
         - Important facts discovered about the codebase\n\
         - Questions asked and answers given\n\
         - Any tool results or findings\n\
         Keep it under 500 words. Use bullet points.\n\n\
         Conversation:\n{conversation}"
    );

    let options = ChatOptions {
        temperature: Some(0.2),
        max_tokens: Some(800),
        ..ChatOptions::default()
    };
    let response = llm.chat(&[LlmMessage::user(prompt)], &options).await?;
    Ok(response.content.trim().to_owned())
}

/// Hash the first 200 chars of each message, for cache comparison.
fn hash_messages(messages: &[Message]) -> String {
    let mut bytes = Vec::new();
    for m in messages {
        bytes.extend_from_slice(truncate(&m.content, 200).as_bytes());
    }
    format!("{:012x}", fnv1a(&bytes) & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use std::sync::Arc;

    fn msg(i: usize) -> Message {
        Message::new("s1", format!("agent-{}", i % 3), "all", MessageKind::Text, format!("message {i}"))
    }

    fn client(content: &str) -> LlmClient {
        LlmClient::new(Arc::new(MockProvider::always(content)), 2)
    }

    #[tokio::test]
    async fn below_threshold_is_passthrough() {
        let history: Vec<Message> = (0..10).map(msg).collect();
        let out = compress_history(&client("summary"), history.clone(), "proj", 16, 10, None)
            .await
            .unwrap();
        assert_eq!(out.effective.len(), 10);
        assert!(out.cache.is_none());
    }

    #[tokio::test]
    async fn above_threshold_compresses_older() {
        let history: Vec<Message> = (0..20).map(msg).collect();
        let out = compress_history(&client("- decided X"), history, "proj", 16, 10, None)
            .await
            .unwrap();
        // one summary entry + 10 recent
        assert_eq!(out.effective.len(), 11);
        assert!(out.effective[0].content.starts_with("[Conversation summary]"));
        assert!(out.cache.is_some());
    }

    #[tokio::test]
    async fn cache_hit_skips_llm() {
        let history: Vec<Message> = (0..20).map(msg).collect();
        let first = compress_history(&client("- decided X"), history.clone(), "proj", 16, 10, None)
            .await
            .unwrap();
        let cache = first.cache.unwrap();

        let provider = Arc::new(MockProvider::always("should not be called"));
        let llm = LlmClient::new(Arc::clone(&provider) as Arc<dyn crate::llm::ChatProvider>, 2);
        let second = compress_history(&llm, history, "proj", 16, 10, Some(&cache))
            .await
            .unwrap();
        assert_eq!(provider.calls(), 0);
        assert!(second.effective[0].content.contains("decided X"));
    }
}
