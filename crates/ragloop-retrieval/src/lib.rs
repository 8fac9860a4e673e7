pub mod embeddings;
pub mod opensearch;

pub use embeddings::{create_embedder, EmbeddingProvider, HttpEmbeddingProvider, OllamaEmbeddingProvider};
pub use opensearch::OpenSearchRetriever;
