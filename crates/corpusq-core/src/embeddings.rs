//! The embedding model (§1): an out-of-scope black-box text→vector
//! function, reached over HTTP. Modeled as a trait so the retriever and
//! indexer never depend on a concrete HTTP client, and so tests can swap
//! in a deterministic stub (§9 "global singletons... re-architect as
//! context objects threaded through requests").

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

/// An OpenAI-compatible `/embeddings` endpoint client — the same wire
/// shape used by most self-hosted embedding servers (`text-embeddings-inference`,
/// `llama.cpp --embedding`, vLLM).
pub struct HttpEmbeddingModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .context("embedding backend returned an empty batch")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts.iter().map(|s| s.as_str()).collect(),
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("embedding backend request failed")?;
        if !resp.status().is_success() {
            bail!("embedding backend returned status {}", resp.status());
        }
        let parsed: EmbeddingResponse = resp.json().await.context("embedding backend returned invalid JSON")?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic stub used by tests and by any retrieval path that needs
/// to exercise lexical-only behavior without a live embedding backend
/// (§8 end-to-end scenario 3, "vector backend deliberately offline").
pub struct StubEmbeddingModel {
    dimension: usize,
}

impl StubEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingModel for StubEmbeddingModel {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dimension] += b as f32 / 255.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        Ok(v.into_iter().map(|x| x / norm).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_embeddings_are_deterministic() {
        let model = StubEmbeddingModel::new(16);
        let a = model.embed("hello world").await.unwrap();
        let b = model.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn stub_embeddings_differ_by_input() {
        let model = StubEmbeddingModel::new(16);
        let a = model.embed("alpha").await.unwrap();
        let b = model.embed("beta").await.unwrap();
        assert_ne!(a, b);
    }
}
