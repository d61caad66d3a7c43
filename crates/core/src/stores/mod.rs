pub mod memory;
pub mod pinecone;

pub use memory::MemoryBackend;
pub use pinecone::PineconeBackend;
