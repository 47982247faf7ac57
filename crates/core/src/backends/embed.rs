//! OpenAI-compatible embeddings client with fixed dimensionality.

use crate::error::BackendError;
use crate::traits::EmbeddingBackend;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub struct HttpEmbeddingBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl HttpEmbeddingBackend {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            dimensions,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.endpoint))
            .json(&json!({ "model": self.model, "input": inputs }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(BackendError::Response {
                backend: "embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let vectors = parse_embedding_data(&parsed).ok_or_else(|| BackendError::Response {
            backend: "embeddings".to_string(),
            details: "response has no embedding data".to_string(),
        })?;

        if vectors.len() != inputs.len() {
            return Err(BackendError::Response {
                backend: "embeddings".to_string(),
                details: format!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    vectors.len()
                ),
            });
        }
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(BackendError::Response {
                    backend: "embeddings".to_string(),
                    details: format!(
                        "embedding dimension {} does not match configured {}",
                        vector.len(),
                        self.dimensions
                    ),
                });
            }
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }
}

/// Rows come back with an `index` field and no ordering guarantee; sort
/// before returning so embeddings line up with their input texts.
fn parse_embedding_data(parsed: &Value) -> Option<Vec<Vec<f32>>> {
    let rows = parsed.pointer("/data").and_then(Value::as_array)?;

    let mut indexed: Vec<(usize, Vec<f32>)> = rows
        .iter()
        .map(|row| {
            let index = row.pointer("/index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let vector = row
                .pointer("/embedding")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .map(|v| v as f32)
                        .collect()
                })?;
            Some((index, vector))
        })
        .collect::<Option<Vec<_>>>()?;

    indexed.sort_by_key(|(index, _)| *index);
    Some(indexed.into_iter().map(|(_, vector)| vector).collect())
}
