//! Retrieval-augmented questions over the similarity index.

use crate::config::CriticConfig;
use crate::error::CriticError;
use crate::index::{Embedder, VectorIndex};
use crate::model::Document;
use crate::pipeline::llm::LlmClient;
use crate::prompts::qa_prompt;
use async_trait::async_trait;
use tracing::debug;

/// Chat model answering a fully built prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn ask(&self, prompt: String) -> Result<String, CriticError>;
}

/// [`ChatModel`] backed by the shared LLM client.
#[derive(Debug, Clone)]
pub struct LlmChat {
    client: LlmClient,
    temperature: f32,
}

impl LlmChat {
    pub fn new(client: LlmClient, config: &CriticConfig) -> Self {
        Self {
            client,
            temperature: config.qa_temperature,
        }
    }
}

#[async_trait]
impl ChatModel for LlmChat {
    async fn ask(&self, prompt: String) -> Result<String, CriticError> {
        self.client
            .prompt("qa", prompt, self.temperature)
            .await
            .map_err(|e| CriticError::LlmApiError {
                stage: "qa".to_string(),
                message: e.to_string(),
            })
    }
}

/// An answer and the segments it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Document>,
}

/// Retrieve the `k` nearest segments and answer `question` from them.
pub async fn answer_question(
    index: &VectorIndex,
    embedder: &dyn Embedder,
    model: &dyn ChatModel,
    question: &str,
    k: usize,
) -> Result<Answer, CriticError> {
    if index.is_empty() {
        return Err(CriticError::NoSegments {
            reason: "the similarity index is empty; run `collect` or `index` first".to_string(),
        });
    }

    let hits = index.search_text(embedder, question, k.max(1)).await?;
    let sources: Vec<Document> = hits.into_iter().map(|h| h.document.clone()).collect();
    debug!(
        "Question answered from {} segments: {:?}",
        sources.len(),
        sources
            .iter()
            .map(|d| format!("{}#{}", d.metadata.website, d.metadata.segment_index))
            .collect::<Vec<_>>()
    );

    let context: Vec<&str> = sources.iter().map(|d| d.page_content.as_str()).collect();
    let text = model.ask(qa_prompt(&context, question)).await?;
    Ok(Answer { text, sources })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentMetadata;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// One-hot embedding on the first letter.
    struct FirstLetter;

    #[async_trait]
    impl Embedder for FirstLetter {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CriticError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let c = t.bytes().next().unwrap_or(b'a');
                    (b'a'..=b'z').map(|l| if l == c { 1.0 } else { 0.0 }).collect()
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CapturingChat {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for CapturingChat {
        async fn ask(&self, prompt: String) -> Result<String, CriticError> {
            self.prompts.lock().unwrap().push(prompt);
            Ok("The CTA is hidden.".into())
        }
    }

    fn doc(i: usize, text: &str) -> Document {
        Document {
            page_content: text.into(),
            metadata: DocumentMetadata {
                website: "a.com".into(),
                category: "target".into(),
                source: PathBuf::from("results.txt"),
                segment_index: i,
                scan_index: None,
            },
        }
    }

    #[tokio::test]
    async fn answer_uses_top_k_context() {
        let docs = vec![doc(1, "cta below fold"), doc(2, "hero text"), doc(3, "cookie banner")];
        let index = VectorIndex::build(docs, &FirstLetter, 8, 8191).await.unwrap();
        let chat = CapturingChat::default();

        let answer = answer_question(&index, &FirstLetter, &chat, "cta?", 2)
            .await
            .unwrap();

        assert_eq!(answer.text, "The CTA is hidden.");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].metadata.segment_index, 1);
        let prompt = chat.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("cta below fold"));
        assert!(prompt.ends_with("Question: cta?"));
    }

    #[tokio::test]
    async fn empty_index_is_an_error() {
        let err = answer_question(
            &VectorIndex::default(),
            &FirstLetter,
            &CapturingChat::default(),
            "anything",
            2,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CriticError::NoSegments { .. }));
    }
}
