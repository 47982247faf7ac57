use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior turn of a conversation, caller-supplied or synthesized by the
/// tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool the generation backend may call, declared with a JSON argument
/// schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A structured request from the backend to invoke a declared tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

impl FunctionCall {
    pub fn string_argument(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub response: String,
    pub function_calls: Vec<FunctionCall>,
}

#[async_trait]
pub trait TextGenerator {
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<String, BackendError>;

    async fn generate_with_tools(
        &self,
        prompt: &str,
        tools: &[ToolSpec],
        history: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<ToolOutcome, BackendError>;
}

#[async_trait]
pub trait EmbeddingBackend {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Key-value blob persistence over virtual slash-delimited paths. The host
/// application may map keys to a real filesystem or virtualize them.
#[async_trait]
pub trait BlobStore {
    async fn save(&self, key: &str, text: &str) -> Result<(), crate::error::StoreError>;

    async fn load(&self, key: &str) -> Result<Option<String>, crate::error::StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, crate::error::StoreError>;

    async fn list_directories(&self, key: &str) -> Result<Vec<String>, crate::error::StoreError>;
}

/// Per-page text extraction for an uploaded document.
pub trait DocumentFetcher {
    fn fetch_pages(&self, path: &std::path::Path) -> crate::error::Result<Vec<String>>;
}
