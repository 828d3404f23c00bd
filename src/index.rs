//! Similarity index over the corpus, used for ad hoc Q&A.
//!
//! The index is a flat list of `(document, embedding)` pairs searched by
//! squared Euclidean distance. It is always rebuilt from the full corpus and
//! persisted as JSON in `combined_vectorstore/index.json`.

use crate::artifact::write_atomic;
use crate::config::CriticConfig;
use crate::error::CriticError;
use crate::model::Document;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the persisted index inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.json";

/// Turns texts into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CriticError>;
}

// ── OpenAI-compatible embeddings client ──────────────────────────────────────

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    backoff_ms: u64,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
        max_retries: u32,
        batch_size: usize,
    ) -> Result<Self, CriticError> {
        if api_key.trim().is_empty() {
            return Err(CriticError::ProviderNotConfigured {
                provider: "openai-embeddings".to_string(),
                hint: "Set OPENAI_API_KEY to build or query the similarity index.".to_string(),
            });
        }
        if model.trim().is_empty() {
            return Err(CriticError::InvalidConfig(
                "Embedding model name must not be empty".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| CriticError::InvalidConfig("API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| CriticError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_retries,
            backoff_ms: 500,
            batch_size: batch_size.max(1),
        })
    }

    /// Build from `config`, reading the key from `OPENAI_API_KEY`.
    pub fn from_config(config: &CriticConfig) -> Result<Self, CriticError> {
        let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        Self::new(
            &key,
            &config.embedding_base_url,
            &config.embedding_model,
            Duration::from_secs(config.api_timeout_secs),
            config.max_retries,
            config.embedding_batch_size,
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, CriticError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };

        let mut attempt = 0u32;
        loop {
            let outcome = self.client.post(&self.endpoint).json(&request).send().await;
            let retry_reason = match outcome {
                Ok(resp) if resp.status().is_success() => {
                    let mut parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
                        CriticError::EmbeddingFailed(format!("unreadable response: {e}"))
                    })?;
                    parsed.data.sort_by_key(|entry| entry.index);
                    if parsed.data.len() != inputs.len() {
                        return Err(CriticError::EmbeddingFailed(format!(
                            "endpoint returned {} embeddings for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        )));
                    }
                    return Ok(parsed.data.into_iter().map(|e| e.embedding).collect());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    let message = format!("HTTP {status}: {body}");
                    if !should_retry(status) {
                        return Err(CriticError::EmbeddingFailed(message));
                    }
                    message
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => e.to_string(),
                Err(e) => return Err(CriticError::EmbeddingFailed(e.to_string())),
            };

            if attempt >= self.max_retries {
                return Err(CriticError::EmbeddingFailed(format!(
                    "gave up after {attempt} retries: {retry_reason}"
                )));
            }
            attempt += 1;
            let backoff = self.backoff(attempt);
            warn!(
                "Embeddings: retry {}/{} after {}ms ({})",
                attempt, self.max_retries, backoff, retry_reason
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    fn backoff(&self, attempt: u32) -> u64 {
        self.backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CriticError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(chunk).await?);
        }
        Ok(vectors)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

// ── Index ────────────────────────────────────────────────────────────────────

/// Rough token count used for the embedding-limit warning (≈ 4 chars/token).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    document: Document,
    vector: Vec<f32>,
}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub document: &'a Document,
    /// Squared Euclidean distance to the query; smaller is closer.
    pub distance: f32,
}

/// Flat nearest-neighbour index over corpus documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed every document, `batch_size` per request.
    ///
    /// Documents above `token_limit` estimated tokens are logged; the
    /// embedding endpoint decides what to do with them.
    pub async fn build(
        docs: Vec<Document>,
        embedder: &dyn Embedder,
        batch_size: usize,
        token_limit: usize,
    ) -> Result<Self, CriticError> {
        for doc in &docs {
            let tokens = estimate_tokens(&doc.page_content);
            if tokens > token_limit {
                warn!(
                    "{} segment {}: ~{} tokens exceeds the embedding limit of {}",
                    doc.metadata.website, doc.metadata.segment_index, tokens, token_limit
                );
            }
        }

        let mut entries = Vec::with_capacity(docs.len());
        let mut dimension = 0usize;
        for batch in docs.chunks(batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|d| d.page_content.as_str()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(CriticError::EmbeddingFailed(format!(
                    "{} vectors for {} documents",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (doc, vector) in batch.iter().zip(vectors) {
                if dimension == 0 {
                    dimension = vector.len();
                } else if vector.len() != dimension {
                    return Err(CriticError::EmbeddingFailed(format!(
                        "inconsistent vector dimension {} (expected {})",
                        vector.len(),
                        dimension
                    )));
                }
                entries.push(IndexEntry {
                    document: doc.clone(),
                    vector,
                });
            }
            debug!("Embedded {}/{} documents", entries.len(), docs.len());
        }

        info!("Built index of {} documents (dim {})", entries.len(), dimension);
        Ok(Self { dimension, entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The `k` documents closest to `query`, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit<'_>>, CriticError> {
        if !self.is_empty() && query.len() != self.dimension {
            return Err(CriticError::EmbeddingFailed(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let mut hits: Vec<SearchHit<'_>> = self
            .entries
            .iter()
            .map(|e| SearchHit {
                document: &e.document,
                distance: squared_l2(&e.vector, query),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Embed `question` and search for it.
    pub async fn search_text(
        &self,
        embedder: &dyn Embedder,
        question: &str,
        k: usize,
    ) -> Result<Vec<SearchHit<'_>>, CriticError> {
        let mut vectors = embedder.embed(&[question]).await?;
        let query = vectors
            .pop()
            .ok_or_else(|| CriticError::EmbeddingFailed("no vector for the query".into()))?;
        self.search(&query, k)
    }

    /// Persist to `dir/index.json`.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, CriticError> {
        let path = dir.join(INDEX_FILE_NAME);
        let json = serde_json::to_string(self).map_err(|e| CriticError::IndexIo {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        write_atomic(&path, &json).await?;
        info!("Saved index to {}", path.display());
        Ok(path)
    }

    /// Load from `dir/index.json`.
    pub async fn load(dir: &Path) -> Result<Self, CriticError> {
        let path = dir.join(INDEX_FILE_NAME);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CriticError::IndexIo {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        serde_json::from_str(&json).map_err(|e| CriticError::IndexIo {
            path,
            detail: e.to_string(),
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentMetadata;
    use std::sync::Mutex;

    /// Embeds text as `[len, count('a'), count('b')]`.
    #[derive(Default)]
    struct LetterEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CriticError> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| {
                    vec![
                        t.len() as f32,
                        t.matches('a').count() as f32,
                        t.matches('b').count() as f32,
                    ]
                })
                .collect())
        }
    }

    fn doc(i: usize, text: &str) -> Document {
        Document {
            page_content: text.to_string(),
            metadata: DocumentMetadata {
                website: "a.com".into(),
                category: "target".into(),
                source: PathBuf::from("a.com/results.txt"),
                segment_index: i,
                scan_index: None,
            },
        }
    }

    #[tokio::test]
    async fn build_batches_and_search_nearest_first() {
        let embedder = LetterEmbedder::default();
        let docs = vec![doc(1, "aaaa"), doc(2, "bbbb"), doc(3, "aabb"), doc(4, "zz")];
        let index = VectorIndex::build(docs, &embedder, 3, 8191).await.unwrap();

        assert_eq!(*embedder.batches.lock().unwrap(), vec![3, 1]);
        assert_eq!(index.len(), 4);
        assert_eq!(index.dimension(), 3);

        let hits = index.search_text(&embedder, "aaab", 2).await.unwrap();
        let ids: Vec<usize> = hits.iter().map(|h| h.document.metadata.segment_index).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::build(vec![doc(1, "ab")], &LetterEmbedder::default(), 8, 8191)
            .await
            .unwrap();
        let path = index.save(&dir.path().join("combined_vectorstore")).await.unwrap();
        assert!(path.ends_with("combined_vectorstore/index.json"));

        let back = VectorIndex::load(&dir.path().join("combined_vectorstore"))
            .await
            .unwrap();
        assert_eq!(back.len(), 1);
        let hits = back.search(&[2.0, 1.0, 1.0], 5).unwrap();
        assert_eq!(hits[0].document.page_content, "ab");
        assert_eq!(hits[0].distance, 0.0);
    }

    #[tokio::test]
    async fn load_missing_index_is_index_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = VectorIndex::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, CriticError::IndexIo { .. }));
    }

    #[test]
    fn query_dimension_mismatch_is_rejected() {
        let index = VectorIndex {
            dimension: 3,
            entries: vec![IndexEntry {
                document: doc(1, "x"),
                vector: vec![0.0, 0.0, 0.0],
            }],
        };
        assert!(index.search(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(8191 * 4)), 8191);
    }

    #[test]
    fn openai_embedder_requires_key() {
        let err = OpenAiEmbedder::new(
            " ",
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            Duration::from_secs(5),
            3,
            64,
        )
        .unwrap_err();
        assert!(matches!(err, CriticError::ProviderNotConfigured { .. }));
    }

    #[test]
    fn openai_embedder_endpoint() {
        let e = OpenAiEmbedder::new(
            "sk-test",
            "http://localhost:8080/v1/",
            "text-embedding-3-small",
            Duration::from_secs(5),
            0,
            64,
        )
        .unwrap();
        assert_eq!(e.endpoint(), "http://localhost:8080/v1/embeddings");
    }

    #[test]
    fn embedder_backoff_saturates_for_large_retry_counts() {
        let e = OpenAiEmbedder::new(
            "sk-test",
            "http://localhost:8080/v1",
            "text-embedding-3-small",
            Duration::from_secs(5),
            u32::MAX,
            64,
        )
        .unwrap();
        assert_eq!(e.backoff(1), 500);
        assert_eq!(e.backoff(3), 2000);
        assert_eq!(e.backoff(70), u64::MAX);
        assert_eq!(e.backoff(u32::MAX), u64::MAX);
    }

    #[test]
    fn retry_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }
}
