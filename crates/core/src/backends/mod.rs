pub mod chat;
pub mod embed;

pub use chat::OpenAiChatBackend;
pub use embed::HttpEmbeddingBackend;
