//! Embeddings - oracle client, vector math, blob codec, query cache
//!
//! The engine never runs a model itself; an external HTTP oracle maps
//! text to fixed-dimension vectors. Every caller must tolerate the
//! oracle being down and proceed without a semantic component.

mod client;
mod vector;

pub use client::{
    embed_text, EmbedError, EmbeddingClient, QueryEmbeddingCache, EMBED_BATCH_SIZE,
    EMBED_TIMEOUT_SECS, MAX_EMBED_CHARS,
};
pub use vector::{cosine, from_blob, to_blob};
