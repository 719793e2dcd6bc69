//! The shared result shape returned by every search orchestrator (spec §4.14):
//! local/basic live in `retrieval-pipeline`, global/drift in
//! `composite-retrieval`; both depend on `common` so the shape lives here
//! rather than being duplicated per crate.
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;

/// Token/call accounting every search mode must report (spec §4.14 invariant:
/// "every call into the chat model is logged and counted").
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchMetrics {
    pub llm_calls: u32,
    pub prompt_tokens: u32,
    pub output_tokens: u32,
}

impl SearchMetrics {
    pub fn add(&mut self, other: SearchMetrics) {
        self.llm_calls += other.llm_calls;
        self.prompt_tokens += other.prompt_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The context assembled before the final chat call, surfaced both in the
/// non-streaming result and to the `on_context` callback of the streaming
/// variant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchContext {
    /// Rendered text snippets that were packed into the prompt, in the order
    /// they were assembled.
    pub context_chunks: Vec<String>,
    /// The underlying records behind `context_chunks`, keyed by table name
    /// (`"entities"`, `"relationships"`, `"text_units"`, `"community_reports"`),
    /// each a JSON array of rows.
    pub context_records: Value,
}

/// The result of one non-streaming `search()` call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub response: String,
    pub context: SearchContext,
    pub completion_time_secs: f64,
    pub metrics: SearchMetrics,
}

/// Invoked exactly once, as soon as context assembly finishes and before the
/// final chat call is issued, so a streaming caller can render "sources"
/// ahead of the response text arriving.
pub type OnContext = Box<dyn FnOnce(SearchContext) + Send>;

/// The stream half of a streaming search: response-text deltas. Metrics are
/// not known until the stream is drained, so callers that need them should
/// accumulate `ChatResponse.metrics` themselves from the underlying call, or
/// use the non-streaming variant.
pub type ResponseStream = BoxStream<'static, Result<String, AppError>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_accumulate() {
        let mut total = SearchMetrics::default();
        total.add(SearchMetrics {
            llm_calls: 1,
            prompt_tokens: 10,
            output_tokens: 5,
        });
        total.add(SearchMetrics {
            llm_calls: 2,
            prompt_tokens: 20,
            output_tokens: 15,
        });
        assert_eq!(total.llm_calls, 3);
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.output_tokens, 20);
    }
}
