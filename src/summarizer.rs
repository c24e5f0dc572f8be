use crate::error::Result;
use crate::types::InteractionEvent;
use async_trait::async_trait;

/// Condenses an ordered batch of interactions into one summary string
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn summarize(&self, events: &[InteractionEvent]) -> Result<String>;
}

/// Joins the turns as `User: ... AI: ...` and truncates at a character limit.
///
/// A stand-in for an LLM summarizer; deterministic for tests.
#[derive(Debug, Clone)]
pub struct TranscriptSummarizer {
    max_chars: usize,
}

impl TranscriptSummarizer {
    pub const ELLIPSIS: &'static str = "...";

    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn transcript(events: &[InteractionEvent]) -> String {
        events
            .iter()
            .flat_map(|ev| [format!("User: {}", ev.input_text), format!("AI: {}", ev.output_text)])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for TranscriptSummarizer {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl Summarizer for TranscriptSummarizer {
    fn name(&self) -> &'static str {
        "transcript"
    }

    async fn summarize(&self, events: &[InteractionEvent]) -> Result<String> {
        let joined = Self::transcript(events);

        match joined.char_indices().nth(self.max_chars) {
            Some((cut, _)) => Ok(format!("{}{}", &joined[..cut], Self::ELLIPSIS)),
            None => Ok(joined),
        }
    }
}
