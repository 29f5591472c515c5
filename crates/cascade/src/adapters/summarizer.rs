//! Summarizer trait used by consolidation
//!
//! A summarizer turns the payloads of a group of aging records into one
//! denser payload. Linguistic quality is the implementation's business; the
//! cache only cares that the call either succeeds or fails cleanly.

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Payload;

#[derive(Error, Debug)]
pub enum SummarizerError {
    #[error("Summarizer unavailable: {0}")]
    Unavailable(String),
    #[error("Summarization failed: {0}")]
    Failed(String),
    #[error("Nothing to summarize")]
    EmptyInput,
}

/// Output of a summarizer call
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub content: Vec<u8>,
    /// Embedding for the summary, if the summarizer produces one
    pub embedding: Option<Vec<f32>>,
}

impl From<Summary> for Payload {
    fn from(summary: Summary) -> Self {
        Payload {
            content: summary.content,
            embedding: summary.embedding,
        }
    }
}

/// Trait for summarization backends (local model, remote API, extractive)
///
/// Implementations must not retry internally; the consolidation engine treats
/// any error as "skip this group until the next tick".
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize payloads given in chronological order
    async fn summarize(&self, payloads: &[Payload]) -> Result<Summary, SummarizerError>;

    /// Summarizer name for logging
    fn name(&self) -> &'static str;
}

/// Deterministic summarizer keeping the leading sentences of every payload.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    /// Sentences kept per payload
    pub max_sentences: usize,
    /// Fallback truncation when a payload has no sentence breaks
    pub max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_sentences: 2,
            max_chars: 200,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences,
            ..Default::default()
        }
    }

    /// Leading sentences of `content`, or a truncated prefix when there are none
    fn extract(&self, content: &str) -> String {
        let sentences: Vec<&str> = content
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(self.max_sentences)
            .collect();

        if sentences.len() > 1 || content.trim_end().ends_with(['.', '!', '?']) {
            return sentences.join(". ") + ".";
        }

        let trimmed = content.trim();
        let truncated: String = trimmed.chars().take(self.max_chars).collect();
        if truncated.len() < trimmed.len() {
            format!("{truncated}...")
        } else {
            truncated
        }
    }
}

/// Element-wise mean of the embeddings, if every payload has one of equal width
fn mean_embedding(payloads: &[Payload]) -> Option<Vec<f32>> {
    let first = payloads.first()?.embedding.as_ref()?;
    let dims = first.len();
    if dims == 0 {
        return None;
    }

    let mut sum = vec![0.0f32; dims];
    for payload in payloads {
        let embedding = payload.embedding.as_ref()?;
        if embedding.len() != dims {
            return None;
        }
        for (acc, v) in sum.iter_mut().zip(embedding) {
            *acc += v;
        }
    }

    let n = payloads.len() as f32;
    Some(sum.into_iter().map(|v| v / n).collect())
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, payloads: &[Payload]) -> Result<Summary, SummarizerError> {
        if payloads.is_empty() {
            return Err(SummarizerError::EmptyInput);
        }

        let lines: Vec<String> = payloads
            .iter()
            .map(|p| self.extract(&p.text()))
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Summary {
            content: lines.join("\n").into_bytes(),
            embedding: mean_embedding(payloads),
        })
    }

    fn name(&self) -> &'static str {
        "extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_keeps_leading_sentences() {
        let summarizer = ExtractiveSummarizer::new(2);
        let payloads = vec![
            Payload::new("User asked about Rust. Assistant explained ownership. Then lifetimes."),
            Payload::new("Tool returned 3 results!"),
        ];

        let summary = summarizer.summarize(&payloads).await.unwrap();
        let text = String::from_utf8(summary.content).unwrap();
        assert_eq!(
            text,
            "User asked about Rust. Assistant explained ownership.\nTool returned 3 results."
        );
    }

    #[tokio::test]
    async fn test_truncates_unpunctuated_content() {
        let summarizer = ExtractiveSummarizer {
            max_sentences: 2,
            max_chars: 10,
        };
        let payloads = vec![Payload::new("abcdefghijklmnopqrstuvwxyz")];

        let summary = summarizer.summarize(&payloads).await.unwrap();
        assert_eq!(summary.content, b"abcdefghij...".to_vec());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let summarizer = ExtractiveSummarizer::default();
        assert!(matches!(
            summarizer.summarize(&[]).await,
            Err(SummarizerError::EmptyInput)
        ));
    }

    mod embeddings {
        use super::*;

        #[tokio::test]
        async fn test_mean_of_inputs() {
            let summarizer = ExtractiveSummarizer::default();
            let payloads = vec![
                Payload::new("a.").with_embedding(vec![1.0, 0.0]),
                Payload::new("b.").with_embedding(vec![0.0, 1.0]),
            ];

            let summary = summarizer.summarize(&payloads).await.unwrap();
            assert_eq!(summary.embedding, Some(vec![0.5, 0.5]));
        }

        #[tokio::test]
        async fn test_missing_embedding_yields_none() {
            let summarizer = ExtractiveSummarizer::default();
            let payloads = vec![
                Payload::new("a.").with_embedding(vec![1.0, 0.0]),
                Payload::new("b."),
            ];

            let summary = summarizer.summarize(&payloads).await.unwrap();
            assert!(summary.embedding.is_none());
        }

        #[tokio::test]
        async fn test_mismatched_width_yields_none() {
            let summarizer = ExtractiveSummarizer::default();
            let payloads = vec![
                Payload::new("a.").with_embedding(vec![1.0, 0.0]),
                Payload::new("b.").with_embedding(vec![1.0]),
            ];

            let summary = summarizer.summarize(&payloads).await.unwrap();
            assert!(summary.embedding.is_none());
        }
    }
}
