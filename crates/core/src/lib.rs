pub mod backends;
pub mod chunker;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod searcher;
pub mod store;
pub mod traits;
pub mod vector;

pub use backends::{HttpEmbeddingBackend, OpenAiChatBackend};
pub use chunker::DocumentChunker;
pub use embeddings::{EmbeddingPipeline, EMBED_BATCH_SIZE};
pub use error::{BackendError, IngestError, RagError, SearchError, StoreError};
pub use extractor::LopdfFetcher;
pub use index::{build_search_index, ChunkClassifier, ManualSearchIndex};
pub use ingest::{ingest_manual, IngestionReport};
pub use models::{
    ChunkCategory, ChunkEmbedding, ChunkedManual, ChunkerConfig, ManualKind, ManualMetadata,
    ManualPaths, ManualSearchResult, PdfChunk, SearchConfig,
};
pub use orchestrator::{
    format_search_result, manual_tool_specs, RagOrchestrator, RagOutcome,
    DEFAULT_TOOL_ITERATION_BUDGET,
};
pub use searcher::ManualSearcher;
pub use store::{ChunkStore, LocalBlobStore};
pub use traits::{
    BlobStore, ChatTurn, DocumentFetcher, EmbeddingBackend, FunctionCall, Role, TextGenerator,
    ToolOutcome, ToolSpec,
};
pub use vector::{cosine_similarity, VectorHit, VectorIndex};
